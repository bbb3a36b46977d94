//! The event monitor: a single task owns the working set and every
//! mutation goes through its command channel. Readers work from the last
//! published [`Snapshot`] and never block the writer.

use crate::config::PulseConfig;
use crate::error::{FetchError, PipelineError, Result};
use crate::filter::{NamespaceFilter, SeverityFilter, TypeFilter};
use crate::log_errors::LogError;
use crate::model::{DeduplicatedEvent, EventGroup, RawEvent};
use crate::navigation::NavigationSlot;
use crate::pipeline::Pipeline;
use crate::stats::EventStats;
use crate::store::{BatchOutcome, FetchTicket, Snapshot, StreamOutcome, WorkingSet};
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
enum Command {
    BeginFetch,
    ApplyBatch(FetchTicket, std::result::Result<Vec<RawEvent>, FetchError>),
    ApplyLogErrors(FetchTicket, std::result::Result<Vec<LogError>, FetchError>),
    PushEvent(RawEvent),
    PushLogError(LogError),
    Clear,
    SetPaused(bool),
    SetSeverityFilter(SeverityFilter),
    SetTypeFilter(TypeFilter),
    SetNamespaceFilter(NamespaceFilter),
}

#[derive(Debug)]
enum Reply {
    Ticket(FetchTicket),
    Batch(BatchOutcome),
    Stream(StreamOutcome),
    Done,
}

type Envelope = (Command, oneshot::Sender<Reply>);

/// Cloneable handle to a running monitor.
#[derive(Debug, Clone)]
pub struct EventMonitor {
    commands: mpsc::Sender<Envelope>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    navigation: NavigationSlot,
    pipeline: Arc<Pipeline>,
}

impl EventMonitor {
    /// Start the monitor task. It runs until every handle is dropped.
    pub fn spawn(config: &PulseConfig) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;
        let pipeline = Pipeline::from_config(&config.pipeline)?;
        let set = WorkingSet::new(config.pipeline.max_events, config.log_errors.max_errors);
        Ok(Self::spawn_with(set, pipeline))
    }

    pub fn spawn_with(set: WorkingSet, pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (publisher, snapshots) = watch::channel(Arc::new(set.snapshot()));
        let handle = tokio::spawn(run(set, receiver, publisher));

        let monitor = Self {
            commands,
            snapshots,
            navigation: NavigationSlot::new(),
            pipeline: Arc::new(pipeline),
        };
        (monitor, handle)
    }

    async fn send(&self, command: Command) -> Result<Reply> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send((command, reply))
            .await
            .map_err(|_| PipelineError::MonitorClosed)?;
        response.await.map_err(|_| PipelineError::MonitorClosed)
    }

    async fn send_done(&self, command: Command) -> Result<()> {
        self.send(command).await.map(|_| ())
    }

    pub async fn begin_fetch(&self) -> Result<FetchTicket> {
        match self.send(Command::BeginFetch).await? {
            Reply::Ticket(ticket) => Ok(ticket),
            _ => Err(PipelineError::MonitorClosed),
        }
    }

    pub async fn apply_batch(
        &self,
        ticket: FetchTicket,
        result: std::result::Result<Vec<RawEvent>, FetchError>,
    ) -> Result<BatchOutcome> {
        match self.send(Command::ApplyBatch(ticket, result)).await? {
            Reply::Batch(outcome) => Ok(outcome),
            _ => Err(PipelineError::MonitorClosed),
        }
    }

    pub async fn apply_log_errors(
        &self,
        ticket: FetchTicket,
        result: std::result::Result<Vec<LogError>, FetchError>,
    ) -> Result<BatchOutcome> {
        match self.send(Command::ApplyLogErrors(ticket, result)).await? {
            Reply::Batch(outcome) => Ok(outcome),
            _ => Err(PipelineError::MonitorClosed),
        }
    }

    pub async fn push_event(&self, event: RawEvent) -> Result<StreamOutcome> {
        match self.send(Command::PushEvent(event)).await? {
            Reply::Stream(outcome) => Ok(outcome),
            _ => Err(PipelineError::MonitorClosed),
        }
    }

    pub async fn push_log_error(&self, error: LogError) -> Result<StreamOutcome> {
        match self.send(Command::PushLogError(error)).await? {
            Reply::Stream(outcome) => Ok(outcome),
            _ => Err(PipelineError::MonitorClosed),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.send_done(Command::Clear).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send_done(Command::SetPaused(true)).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send_done(Command::SetPaused(false)).await
    }

    pub async fn set_severity_filter(&self, filter: SeverityFilter) -> Result<()> {
        self.send_done(Command::SetSeverityFilter(filter)).await
    }

    pub async fn set_type_filter(&self, filter: TypeFilter) -> Result<()> {
        self.send_done(Command::SetTypeFilter(filter)).await
    }

    pub async fn set_namespace_filter(&self, filter: NamespaceFilter) -> Result<()> {
        self.send_done(Command::SetNamespaceFilter(filter)).await
    }

    /// The navigation slot this monitor reads and clears. Whoever navigates
    /// here holds a clone and calls [`NavigationSlot::set`] on it.
    pub fn navigation(&self) -> &NavigationSlot {
        &self.navigation
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// The deduplicated event view. A pending navigation filter is applied
    /// to this view only and then discarded.
    pub fn filtered_events(&self) -> Result<Vec<DeduplicatedEvent>> {
        let snapshot = self.snapshot();
        let navigation = self.navigation.consume();
        if let Some(nav) = &navigation {
            debug!(?nav, "Applying navigation filter");
        }
        self.pipeline
            .filtered_events(&snapshot.events, &snapshot.filters, navigation)
    }

    pub fn group_by_period(&self, period: Duration) -> Result<Vec<EventGroup>> {
        let snapshot = self.snapshot();
        self.pipeline
            .group_by_period(&snapshot.events, &snapshot.filters, period)
    }

    pub fn filtered_log_errors(&self) -> Vec<LogError> {
        let snapshot = self.snapshot();
        self.pipeline
            .filtered_log_errors(&snapshot.log_errors, &snapshot.filters)
    }

    pub fn stats(&self) -> EventStats {
        let snapshot = self.snapshot();
        self.pipeline.stats(&snapshot.events, &snapshot.log_errors)
    }

    pub fn refresh_error(&self) -> Option<String> {
        self.snapshot().refresh_error.clone()
    }
}

async fn run(
    mut set: WorkingSet,
    mut commands: mpsc::Receiver<Envelope>,
    publisher: watch::Sender<Arc<Snapshot>>,
) {
    info!("Event monitor started");

    while let Some((command, reply)) = commands.recv().await {
        let (response, changed) = apply(&mut set, command);
        if changed {
            publisher.send_replace(Arc::new(set.snapshot()));
        }
        // The caller may have given up waiting; the mutation stands.
        let _ = reply.send(response);
    }

    info!("Event monitor stopped");
}

fn apply(set: &mut WorkingSet, command: Command) -> (Reply, bool) {
    match command {
        Command::BeginFetch => (Reply::Ticket(set.begin_fetch()), false),
        Command::ApplyBatch(ticket, result) => {
            let outcome = set.replace_batch(ticket, result);
            let changed = matches!(outcome, BatchOutcome::Applied { .. } | BatchOutcome::Failed);
            (Reply::Batch(outcome), changed)
        }
        Command::ApplyLogErrors(ticket, result) => {
            let outcome = set.replace_log_errors(ticket, result);
            let changed = matches!(outcome, BatchOutcome::Applied { .. } | BatchOutcome::Failed);
            (Reply::Batch(outcome), changed)
        }
        Command::PushEvent(event) => {
            let outcome = set.push_stream(event);
            (Reply::Stream(outcome), outcome != StreamOutcome::Paused)
        }
        Command::PushLogError(error) => {
            let outcome = set.push_log_error(error);
            (Reply::Stream(outcome), outcome != StreamOutcome::Paused)
        }
        Command::Clear => {
            set.clear();
            (Reply::Done, true)
        }
        Command::SetPaused(paused) => {
            set.set_paused(paused);
            (Reply::Done, true)
        }
        Command::SetSeverityFilter(filter) => {
            set.set_severity_filter(filter);
            (Reply::Done, true)
        }
        Command::SetTypeFilter(filter) => {
            set.set_type_filter(filter);
            (Reply::Done, true)
        }
        Command::SetNamespaceFilter(filter) => {
            set.set_namespace_filter(filter);
            (Reply::Done, true)
        }
    }
}

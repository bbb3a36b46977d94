//! The bounded working set of monitored events and log errors.
//!
//! [`WorkingSet`] is mutated by exactly one owner (the monitor task).
//! Readers never touch it: they get an immutable [`Snapshot`] that is
//! rebuilt after every mutation.

use crate::error::FetchError;
use crate::filter::{NamespaceFilter, SeverityFilter, TypeFilter, ViewFilters};
use crate::log_errors::LogError;
use crate::model::RawEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard ceiling on the working set, whatever the configuration asks for.
pub const MAX_WORKING_SET: usize = 500;

/// Where an entry in the working set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Batch,
    Stream,
}

#[derive(Debug, Clone)]
struct Entry {
    origin: Origin,
    event: RawEvent,
}

/// Issued when a batch fetch starts and handed back with its result.
///
/// `epoch` changes on every clear, so results for fetches issued before a
/// clear are recognisable and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub sequence: u64,
    pub epoch: u64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied { kept_stream: usize, loaded: usize, dropped: usize },
    /// Issued before the last clear.
    Stale,
    /// A fetch issued later has already been applied.
    Superseded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Merged { evicted: usize },
    Paused,
}

#[derive(Debug)]
pub struct WorkingSet {
    entries: VecDeque<Entry>,
    log_errors: VecDeque<LogError>,
    max_events: usize,
    max_errors: usize,
    paused: bool,
    filters: ViewFilters,
    epoch: u64,
    next_sequence: u64,
    applied_events: Option<u64>,
    applied_errors: Option<u64>,
    refresh_error: Option<String>,
    last_refresh: Option<DateTime<Utc>>,
}

impl WorkingSet {
    pub fn new(max_events: usize, max_errors: usize) -> Self {
        let max_events = max_events.clamp(1, MAX_WORKING_SET);
        Self {
            entries: VecDeque::with_capacity(max_events),
            log_errors: VecDeque::with_capacity(max_errors),
            max_events,
            max_errors: max_errors.max(1),
            paused: false,
            filters: ViewFilters::default(),
            epoch: 0,
            next_sequence: 0,
            applied_events: None,
            applied_errors: None,
            refresh_error: None,
            last_refresh: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.next_sequence += 1;
        FetchTicket {
            sequence: self.next_sequence,
            epoch: self.epoch,
            issued_at: Utc::now(),
        }
    }

    /// Replace the batch-loaded part of the set with a fetch result.
    ///
    /// Stream entries whose id is absent from the new batch are kept in
    /// front of it. A failed fetch leaves the set as it was and records
    /// the error for display.
    pub fn replace_batch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<RawEvent>, FetchError>,
    ) -> BatchOutcome {
        if let Some(outcome) = self.check_ticket(ticket, self.applied_events) {
            return outcome;
        }

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                warn!("Event refresh failed: {}", e);
                self.refresh_error = Some(e.to_string());
                return BatchOutcome::Failed;
            }
        };

        let batch_ids: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        self.entries
            .retain(|entry| entry.origin == Origin::Stream && !batch_ids.contains(entry.event.id.as_str()));
        let kept_stream = self.entries.len();

        let room = self.max_events.saturating_sub(kept_stream);
        let dropped = events.len().saturating_sub(room);
        let loaded = events.len() - dropped;
        self.entries.extend(
            events
                .into_iter()
                .take(room)
                .map(|event| Entry { origin: Origin::Batch, event }),
        );

        if dropped > 0 {
            debug!(dropped, "Batch exceeded working set capacity");
        }

        self.applied_events = Some(ticket.sequence);
        self.refresh_error = None;
        self.last_refresh = Some(Utc::now());
        info!(loaded, kept_stream, "Applied event batch");

        BatchOutcome::Applied { kept_stream, loaded, dropped }
    }

    /// Replace the log error list with a fetch result.
    pub fn replace_log_errors(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<LogError>, FetchError>,
    ) -> BatchOutcome {
        if let Some(outcome) = self.check_ticket(ticket, self.applied_errors) {
            return outcome;
        }

        let errors = match result {
            Ok(errors) => errors,
            Err(e) => {
                warn!("Log error refresh failed: {}", e);
                self.refresh_error = Some(e.to_string());
                return BatchOutcome::Failed;
            }
        };

        let dropped = errors.len().saturating_sub(self.max_errors);
        self.log_errors = errors.into_iter().take(self.max_errors).collect();
        self.applied_errors = Some(ticket.sequence);

        BatchOutcome::Applied {
            kept_stream: 0,
            loaded: self.log_errors.len(),
            dropped,
        }
    }

    fn check_ticket(&self, ticket: FetchTicket, applied: Option<u64>) -> Option<BatchOutcome> {
        if ticket.epoch != self.epoch {
            debug!(sequence = ticket.sequence, "Discarding fetch issued before clear");
            return Some(BatchOutcome::Stale);
        }
        if applied.is_some_and(|seq| seq > ticket.sequence) {
            debug!(sequence = ticket.sequence, "Discarding superseded fetch");
            return Some(BatchOutcome::Superseded);
        }
        None
    }

    /// Prepend a live event, evicting the oldest entries beyond capacity.
    pub fn push_stream(&mut self, event: RawEvent) -> StreamOutcome {
        if self.paused {
            debug!(id = %event.id, "Dropping stream event while paused");
            return StreamOutcome::Paused;
        }

        self.entries.push_front(Entry { origin: Origin::Stream, event });
        let evicted = self.entries.len().saturating_sub(self.max_events);
        self.entries.truncate(self.max_events);
        if evicted > 0 {
            debug!(evicted, "Evicted oldest events");
        }
        StreamOutcome::Merged { evicted }
    }

    pub fn push_log_error(&mut self, error: LogError) -> StreamOutcome {
        if self.paused {
            return StreamOutcome::Paused;
        }

        self.log_errors.push_front(error);
        let evicted = self.log_errors.len().saturating_sub(self.max_errors);
        self.log_errors.truncate(self.max_errors);
        StreamOutcome::Merged { evicted }
    }

    /// Empty the set and invalidate every fetch still in flight.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.log_errors.clear();
        self.refresh_error = None;
        self.applied_events = None;
        self.applied_errors = None;
        self.epoch += 1;
        info!(epoch = self.epoch, "Cleared working set");
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!("Live stream {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    pub fn set_severity_filter(&mut self, filter: SeverityFilter) {
        self.filters.severity = filter;
    }

    pub fn set_type_filter(&mut self, filter: TypeFilter) {
        self.filters.event_type = filter;
    }

    pub fn set_namespace_filter(&mut self, filter: NamespaceFilter) {
        self.filters.namespaces = filter;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            events: Arc::new(self.entries.iter().map(|e| e.event.clone()).collect()),
            origins: self.entries.iter().map(|e| e.origin).collect(),
            log_errors: Arc::new(self.log_errors.iter().cloned().collect()),
            filters: self.filters.clone(),
            paused: self.paused,
            epoch: self.epoch,
            refresh_error: self.refresh_error.clone(),
            last_refresh: self.last_refresh,
        }
    }
}

/// Immutable view of the working set at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Arc<Vec<RawEvent>>,
    pub origins: Vec<Origin>,
    pub log_errors: Arc<Vec<LogError>>,
    pub filters: ViewFilters,
    pub paused: bool,
    pub epoch: u64,
    pub refresh_error: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stream_count(&self) -> usize {
        self.origins.iter().filter(|o| **o == Origin::Stream).count()
    }
}

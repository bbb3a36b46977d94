// Pulse CLI - inspect captured cluster event dumps through the event pipeline

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pulse_core::log_errors::extract_log_errors;
use pulse_core::source::{decode_records, refresh_once};
use pulse_core::{
    parse_period_or, spawn_stream_consumer, DeduplicatedEvent, EventGroup, EventMonitor,
    EventStats, FileSource, LogError, NamespaceFilter, NavigationFilter, PulseConfig,
    RefreshSettings, SeverityFilter, TypeFilter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(about = "Classify, deduplicate and group cluster events", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.pulse/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
struct FilterArgs {
    /// Severity tier to show, or "all"
    #[arg(long, default_value = "all")]
    severity: String,

    /// Event type to show, or "all"
    #[arg(long = "type", default_value = "all")]
    event_type: String,

    /// Restrict to these namespaces (repeatable)
    #[arg(short, long = "namespace")]
    namespaces: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the deduplicated event view
    Events {
        /// Event dump (JSON array or JSONL)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,

        /// Focus on one resource for this view
        #[arg(long)]
        resource: Option<String>,

        /// Kind of the focused resource
        #[arg(long, requires = "resource")]
        kind: Option<String>,
    },

    /// Group events into time buckets
    Groups {
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,

        /// Bucket width, e.g. 15m, 1h, 1h30m
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Show HTTP errors from a log error dump or raw pod logs
    Errors {
        /// Log error dump (JSON array or JSONL)
        #[arg(short, long, conflicts_with = "log")]
        input: Option<PathBuf>,

        /// Raw container log to extract errors from
        #[arg(long, requires = "pod")]
        log: Option<PathBuf>,

        /// Pod the raw log belongs to
        #[arg(long)]
        pod: Option<String>,

        /// Namespace of the pod
        #[arg(long, default_value = "")]
        pod_namespace: String,

        /// Container the raw log belongs to
        #[arg(long, default_value = "")]
        container: String,

        /// Restrict to these namespaces (repeatable)
        #[arg(short, long = "namespace")]
        namespaces: Vec<String>,

        /// Only 500/502/503 responses and failed POSTs
        #[arg(long)]
        critical_only: bool,
    },

    /// Summary counts over an event dump
    Stats {
        #[arg(short, long)]
        input: PathBuf,

        /// Optional log error dump
        #[arg(long)]
        errors: Option<PathBuf>,
    },

    /// Replay captured stream messages on top of an optional batch
    Replay {
        /// Stream capture, one JSON message per line
        #[arg(short, long)]
        stream: PathBuf,

        /// Batch dump loaded before the stream is replayed
        #[arg(short, long)]
        batch: Option<PathBuf>,

        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = PulseConfig::resolve(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Events {
            input,
            filters,
            resource,
            kind,
        } => {
            let monitor = load_batch(&config, FileSource::new(&input)).await?;
            apply_filters(&monitor, &filters).await?;
            if let Some(resource) = resource {
                let namespace = filters.namespaces.first().cloned().unwrap_or_default();
                monitor
                    .navigation()
                    .set(NavigationFilter::new(resource, namespace, kind.unwrap_or_default()));
            }
            let view = monitor.filtered_events()?;
            info!("{} entries after deduplication", view.len());
            emit(cli.format, view.as_slice(), print_events)?;
        }
        Commands::Groups {
            input,
            filters,
            period,
        } => {
            let fallback = config.pipeline.period()?;
            let period = period
                .map(|p| parse_period_or(&p, fallback))
                .unwrap_or(fallback);
            let monitor = load_batch(&config, FileSource::new(&input)).await?;
            apply_filters(&monitor, &filters).await?;
            let groups = monitor.group_by_period(period)?;
            emit(cli.format, groups.as_slice(), print_groups)?;
        }
        Commands::Errors {
            input,
            log,
            pod,
            pod_namespace,
            container,
            namespaces,
            critical_only,
        } => {
            let errors = match (input, log) {
                (Some(input), _) => read_log_error_dump(&input).await?,
                (None, Some(log)) => {
                    let content = tokio::fs::read_to_string(&log)
                        .await
                        .with_context(|| format!("Failed to read {}", log.display()))?;
                    let pod = pod.unwrap_or_default();
                    extract_log_errors(content.lines(), &pod, &pod_namespace, &container)
                }
                (None, None) => anyhow::bail!("Either --input or --log is required"),
            };

            let (monitor, _handle) = EventMonitor::spawn(&config)?;
            let ticket = monitor.begin_fetch().await?;
            monitor.apply_log_errors(ticket, Ok(errors)).await?;
            monitor
                .set_namespace_filter(NamespaceFilter::new(namespaces))
                .await?;

            let mut errors = monitor.filtered_log_errors();
            if critical_only || config.log_errors.critical_only {
                errors.retain(LogError::is_critical);
            }
            emit(cli.format, errors.as_slice(), print_log_errors)?;
        }
        Commands::Stats { input, errors } => {
            let mut source = FileSource::new(&input);
            if let Some(errors) = errors {
                source = source.with_log_errors(errors);
            }
            let monitor = load_batch(&config, source).await?;
            emit(cli.format, &monitor.stats(), print_stats)?;
        }
        Commands::Replay {
            stream,
            batch,
            filters,
        } => {
            let monitor = match batch {
                Some(batch) => load_batch(&config, FileSource::new(&batch)).await?,
                None => EventMonitor::spawn(&config)?.0,
            };

            let content = tokio::fs::read_to_string(&stream)
                .await
                .with_context(|| format!("Failed to read {}", stream.display()))?;
            let frames: Vec<String> = content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect();
            info!("Replaying {} stream messages", frames.len());

            spawn_stream_consumer(monitor.clone(), futures::stream::iter(frames))
                .await
                .context("Stream consumer failed")?;

            apply_filters(&monitor, &filters).await?;
            let view = monitor.filtered_events()?;
            emit(cli.format, view.as_slice(), print_events)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pulse={}", level).parse()?)
        .add_directive(format!("pulse_core={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Spawn a monitor and load one batch from `source` into it.
async fn load_batch(config: &PulseConfig, source: FileSource) -> Result<EventMonitor> {
    let (monitor, _handle) = EventMonitor::spawn(config)?;
    refresh_once(&monitor, &source, &RefreshSettings::from_config(config)).await?;

    if let Some(error) = monitor.refresh_error() {
        anyhow::bail!("Unable to refresh: {}", error);
    }
    Ok(monitor)
}

async fn apply_filters(monitor: &EventMonitor, filters: &FilterArgs) -> Result<()> {
    let severity: SeverityFilter = filters.severity.parse()?;
    monitor.set_severity_filter(severity).await?;
    monitor
        .set_type_filter(TypeFilter::from(filters.event_type.as_str()))
        .await?;
    monitor
        .set_namespace_filter(NamespaceFilter::new(filters.namespaces.iter().cloned()))
        .await?;
    Ok(())
}

async fn read_log_error_dump(path: &Path) -> Result<Vec<LogError>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let errors = decode_records(&content)?;
    Ok(errors)
}

fn emit<T: Serialize + ?Sized>(format: OutputFormat, value: &T, text: fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => print!("{}", text(value)),
    }
    Ok(())
}

fn format_time(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn print_events(view: &[DeduplicatedEvent]) -> String {
    if view.is_empty() {
        return "No events\n".to_string();
    }
    let mut out = String::new();
    for entry in view {
        let event = &entry.event.event;
        out.push_str(&format!(
            "{:<8} x{:<4} {}  {}/{}  {}  {}\n",
            entry.severity().as_str(),
            entry.duplicate_count,
            format_time(entry.last_seen.or(event.timestamp)),
            event.namespace.as_deref().unwrap_or(pulse_core::dedup::CLUSTER_WIDE),
            event.resource,
            event.category_or_type(),
            event.title,
        ));
    }
    out
}

fn print_groups(groups: &[EventGroup]) -> String {
    if groups.is_empty() {
        return "No events\n".to_string();
    }
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!("{}  {} events\n", format_time(Some(group.time)), group.count));
    }
    out
}

fn print_log_errors(errors: &[LogError]) -> String {
    if errors.is_empty() {
        return "No log errors\n".to_string();
    }
    let mut out = String::new();
    for error in errors {
        out.push_str(&format!(
            "{}  {}/{}  {} {} {}  {}\n",
            format_time(error.timestamp),
            error.namespace,
            error.pod,
            error.status_code,
            error.method,
            error.path,
            error.error_type,
        ));
    }
    out
}

fn print_stats(stats: &EventStats) -> String {
    let mut out = format!(
        "{} events ({} escalated), {} log errors\n",
        stats.total_events, stats.escalated, stats.total_errors
    );
    for (title, counts) in [
        ("severity", &stats.by_severity),
        ("type", &stats.by_type),
        ("category", &stats.by_category),
    ] {
        out.push_str(&format!("\nBy {}:\n", title));
        for (key, count) in counts {
            let key = if key.is_empty() { "(none)" } else { key.as_str() };
            out.push_str(&format!("  {:<24} {}\n", key, count));
        }
    }
    out
}

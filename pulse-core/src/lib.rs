pub mod buckets;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod log_errors;
pub mod model;
pub mod monitor;
pub mod navigation;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod store;
pub mod stream;

pub use buckets::{group_by_period, parse_period, parse_period_or, DEFAULT_PERIOD};
pub use classifier::{classify, classify_event, SeverityClassifier};
pub use config::PulseConfig;
pub use dedup::{deduplicate, deduplicate_with, DedupStrategy};
pub use error::{FetchError, PipelineError, Result};
pub use filter::{EventFilter, FilterChain, NamespaceFilter, SeverityFilter, TypeFilter, ViewFilters};
pub use log_errors::{extract_log_errors, filter_log_errors, LogError};
pub use model::{ClassifiedEvent, DeduplicatedEvent, EventGroup, RawEvent, Severity};
pub use monitor::EventMonitor;
pub use navigation::{NavigationFilter, NavigationSlot};
pub use pipeline::Pipeline;
pub use source::{spawn_poller, EventQuery, EventSource, FileSource, LogErrorQuery, RefreshSettings};
pub use stats::EventStats;
pub use store::{BatchOutcome, FetchTicket, Snapshot, StreamOutcome, WorkingSet};
pub use stream::{spawn_stream_consumer, StreamMessage};

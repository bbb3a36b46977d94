//! Read side of the event view: classify → filter → deduplicate.
//!
//! Nothing here is cached. Every call recomputes from the events it is
//! handed, which are expected to come from an immutable snapshot.

use crate::buckets::group_by_period;
use crate::classifier::SeverityClassifier;
use crate::config::PipelineSection;
use crate::dedup::{deduplicate_with, DedupStrategy};
use crate::error::{PipelineError, Result};
use crate::filter::ViewFilters;
use crate::log_errors::{filter_log_errors, LogError};
use crate::model::{ClassifiedEvent, DeduplicatedEvent, EventGroup, RawEvent};
use crate::navigation::NavigationFilter;
use crate::stats::EventStats;
use chrono::Duration;

#[derive(Debug, Clone)]
pub struct Pipeline {
    classifier: SeverityClassifier,
    window_minutes: u32,
    strategy: DedupStrategy,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            classifier: SeverityClassifier::new(),
            window_minutes: 5,
            strategy: DedupStrategy::KeyOnly,
        }
    }
}

impl Pipeline {
    pub fn new(window_minutes: u32, strategy: DedupStrategy) -> Result<Self> {
        if window_minutes == 0 {
            return Err(PipelineError::InvalidWindow(window_minutes));
        }
        Ok(Self {
            classifier: SeverityClassifier::new(),
            window_minutes,
            strategy,
        })
    }

    pub fn from_config(section: &PipelineSection) -> Result<Self> {
        Self::new(section.dedup_window_minutes, section.dedup_strategy)
    }

    pub fn with_classifier(mut self, classifier: SeverityClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    pub fn strategy(&self) -> DedupStrategy {
        self.strategy
    }

    pub fn classify(&self, events: &[RawEvent]) -> Vec<ClassifiedEvent> {
        self.classifier.classify_all(events.iter().cloned())
    }

    /// Classified events that pass the view filters and, when given, the
    /// navigation filter.
    pub fn select(
        &self,
        events: &[RawEvent],
        filters: &ViewFilters,
        navigation: Option<NavigationFilter>,
    ) -> Vec<ClassifiedEvent> {
        filters.chain(navigation).apply(self.classify(events))
    }

    pub fn filtered_events(
        &self,
        events: &[RawEvent],
        filters: &ViewFilters,
        navigation: Option<NavigationFilter>,
    ) -> Result<Vec<DeduplicatedEvent>> {
        let selected = self.select(events, filters, navigation);
        deduplicate_with(&selected, self.window_minutes, self.strategy)
    }

    /// Time buckets over the filtered, undeduplicated events.
    pub fn group_by_period(
        &self,
        events: &[RawEvent],
        filters: &ViewFilters,
        period: Duration,
    ) -> Result<Vec<EventGroup>> {
        let selected = self.select(events, filters, None);
        group_by_period(&selected, period)
    }

    pub fn filtered_log_errors(&self, errors: &[LogError], filters: &ViewFilters) -> Vec<LogError> {
        filter_log_errors(errors, &filters.namespaces)
    }

    pub fn stats(&self, events: &[RawEvent], errors: &[LogError]) -> EventStats {
        EventStats::compute(&self.classify(events), errors)
    }
}

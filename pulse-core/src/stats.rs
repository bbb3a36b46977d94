use crate::log_errors::LogError;
use crate::model::ClassifiedEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts over the classified working set, before any view filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub total_events: usize,
    pub total_errors: usize,
    pub escalated: usize,
}

impl EventStats {
    pub fn compute(events: &[ClassifiedEvent], log_errors: &[LogError]) -> Self {
        let mut stats = Self::default();
        for event in events {
            stats.add_event(event);
        }
        stats.total_errors = log_errors.len();
        stats
    }

    pub fn add_event(&mut self, event: &ClassifiedEvent) {
        self.total_events += 1;
        *self
            .by_severity
            .entry(event.severity().to_string())
            .or_insert(0) += 1;
        *self
            .by_type
            .entry(event.event.event_type.clone())
            .or_insert(0) += 1;
        *self
            .by_category
            .entry(event.event.category.clone())
            .or_insert(0) += 1;
        if event.escalated() {
            self.escalated += 1;
        }
    }
}

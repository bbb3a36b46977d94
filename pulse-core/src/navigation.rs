//! One-shot cross-navigation filter.
//!
//! Another part of the system drops a filter into the slot when it sends the
//! operator to the event view ("events for deployment/web in prod"). The
//! first read consumes it, so it shapes exactly one render pass.

use crate::model::RawEvent;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl NavigationFilter {
    pub fn new(
        resource: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            namespace: non_empty(namespace.into()),
            resource: non_empty(resource.into()),
            kind: non_empty(kind.into()),
        }
    }

    /// Resource matches loosely (equal, or either contains the other, ignoring
    /// case), namespace matches exactly, kind matches ignoring case when both
    /// sides name one.
    pub fn matches(&self, event: &RawEvent) -> bool {
        if let Some(resource) = &self.resource {
            if !resource_matches(&event.resource, resource) {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            if event.namespace_or_empty() != namespace {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            let event_kind = event.kind();
            if !event_kind.is_empty() && !event_kind.eq_ignore_ascii_case(kind) {
                return false;
            }
        }
        true
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn resource_matches(event_resource: &str, wanted: &str) -> bool {
    if event_resource.is_empty() {
        return false;
    }
    let have = event_resource.to_lowercase();
    let want = wanted.to_lowercase();
    have == want || have.contains(&want) || want.contains(&have)
}

/// Single-slot mailbox for the navigation filter. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct NavigationSlot {
    inner: Arc<Mutex<Option<NavigationFilter>>>,
}

impl NavigationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<NavigationFilter>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces any filter that has not been consumed yet.
    pub fn set(&self, filter: NavigationFilter) {
        tracing::debug!(?filter, "Navigation filter set");
        *self.lock() = Some(filter);
    }

    pub fn peek(&self) -> Option<NavigationFilter> {
        self.lock().clone()
    }

    /// Reads and clears in one step.
    pub fn consume(&self) -> Option<NavigationFilter> {
        self.lock().take()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

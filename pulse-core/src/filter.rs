use crate::model::{ClassifiedEvent, Severity};
use crate::navigation::NavigationFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub trait EventFilter {
    fn matches(&self, event: &ClassifiedEvent) -> bool;
}

/// `all`, or a single classified severity tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityFilter {
    #[default]
    All,
    Only(Severity),
}

impl std::str::FromStr for SeverityFilter {
    type Err = crate::error::PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(SeverityFilter::All)
        } else {
            s.parse().map(SeverityFilter::Only)
        }
    }
}

impl EventFilter for SeverityFilter {
    fn matches(&self, event: &ClassifiedEvent) -> bool {
        match self {
            SeverityFilter::All => true,
            SeverityFilter::Only(severity) => event.severity() == *severity,
        }
    }
}

/// `all`, or an exact source-provided event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    #[default]
    All,
    Only(String),
}

impl From<&str> for TypeFilter {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("all") {
            TypeFilter::All
        } else {
            TypeFilter::Only(s.to_string())
        }
    }
}

impl EventFilter for TypeFilter {
    fn matches(&self, event: &ClassifiedEvent) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(event_type) => event.event.event_type == *event_type,
        }
    }
}

/// Empty means unrestricted. Events without a namespace match only `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceFilter {
    namespaces: BTreeSet<String>,
}

impl NamespaceFilter {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn namespaces(&self) -> &BTreeSet<String> {
        &self.namespaces
    }

    /// The single selected namespace, used to narrow batch fetches.
    pub fn single(&self) -> Option<&str> {
        if self.namespaces.len() == 1 {
            self.namespaces.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn allows(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.contains(namespace)
    }
}

impl EventFilter for NamespaceFilter {
    fn matches(&self, event: &ClassifiedEvent) -> bool {
        self.allows(event.event.namespace_or_empty())
    }
}

impl EventFilter for NavigationFilter {
    fn matches(&self, event: &ClassifiedEvent) -> bool {
        NavigationFilter::matches(self, &event.event)
    }
}

/// Operator-selected filters of the event view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilters {
    pub severity: SeverityFilter,
    pub event_type: TypeFilter,
    pub namespaces: NamespaceFilter,
}

impl ViewFilters {
    /// Chain in application order: severity, type, namespace, navigation.
    pub fn chain(&self, navigation: Option<NavigationFilter>) -> FilterChain {
        let mut chain = FilterChain::new()
            .add_filter(Box::new(self.severity))
            .add_filter(Box::new(self.event_type.clone()))
            .add_filter(Box::new(self.namespaces.clone()));
        if let Some(navigation) = navigation {
            chain = chain.add_filter(Box::new(navigation));
        }
        chain
    }
}

#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn EventFilter + Send + Sync>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn add_filter(mut self, filter: Box<dyn EventFilter + Send + Sync>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn matches(&self, event: &ClassifiedEvent) -> bool {
        self.filters.iter().all(|filter| filter.matches(event))
    }

    pub fn apply(&self, events: Vec<ClassifiedEvent>) -> Vec<ClassifiedEvent> {
        events.into_iter().filter(|e| self.matches(e)).collect()
    }
}

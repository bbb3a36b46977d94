//! Severity escalation for raw cluster events.
//!
//! Escalation is a deterministic rule table walked top to bottom: the first
//! rule whose condition holds over the event's text decides the target tier,
//! and the event keeps whichever is higher of that tier and its own.

use crate::model::{ClassifiedEvent, RawEvent, Severity};
use regex::Regex;
use std::sync::LazyLock;

static DEFAULT_CLASSIFIER: LazyLock<SeverityClassifier> = LazyLock::new(SeverityClassifier::new);

static RESTART_COUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"restart[a-z_]*\W{0,3}(\d+)").expect("Failed to compile restart regex"),
        Regex::new(r"(\d+)\s*restarts?\b").expect("Failed to compile restarts regex"),
    ]
});

/// Classify with the built-in rule table.
pub fn classify(event: &RawEvent) -> Severity {
    DEFAULT_CLASSIFIER.classify(event)
}

/// Classify with the built-in rule table and wrap the result.
pub fn classify_event(event: RawEvent) -> ClassifiedEvent {
    DEFAULT_CLASSIFIER.classify_event(event)
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// Any of the patterns occurs in the search buffer.
    AnyPattern(Vec<Regex>),
    /// Every pattern occurs somewhere in the search buffer.
    AllPatterns(Vec<Regex>),
    /// A restart count greater than the threshold is mentioned.
    RestartsAbove(u32),
}

impl Condition {
    fn holds(&self, buffer: &str) -> bool {
        match self {
            Condition::AnyPattern(patterns) => patterns.iter().any(|p| p.is_match(buffer)),
            Condition::AllPatterns(patterns) => patterns.iter().all(|p| p.is_match(buffer)),
            Condition::RestartsAbove(threshold) => max_restart_count(buffer)
                .map(|count| count > *threshold)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub name: &'static str,
    pub condition: Condition,
    pub target: Severity,
}

impl EscalationRule {
    pub fn any(name: &'static str, patterns: &[&str], target: Severity) -> Self {
        Self {
            name,
            condition: Condition::AnyPattern(compile(patterns)),
            target,
        }
    }

    pub fn all(name: &'static str, patterns: &[&str], target: Severity) -> Self {
        Self {
            name,
            condition: Condition::AllPatterns(compile(patterns)),
            target,
        }
    }

    pub fn restarts_above(name: &'static str, threshold: u32, target: Severity) -> Self {
        Self {
            name,
            condition: Condition::RestartsAbove(threshold),
            target,
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Escalation patterns are static and must compile"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct SeverityClassifier {
    rules: Vec<EscalationRule>,
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SeverityClassifier {
    pub fn new() -> Self {
        Self::with_rules(vec![
            EscalationRule::any(
                "pod_sandbox_failure",
                &[r"create\s*pod\s*sandbox", r"createpodsandbox"],
                Severity::Critical,
            ),
            EscalationRule::any(
                "node_not_ready",
                &[
                    r"node\s*not\s*ready",
                    r"node[\s_]*unavailable",
                    r"node\s*unreachable",
                ],
                Severity::Critical,
            ),
            EscalationRule::any(
                "out_of_memory",
                &[r"(?:^|[^a-z])oom", r"out\s*of\s*memory"],
                Severity::Critical,
            ),
            EscalationRule::any("crash_loop", &[r"crash[\s_-]*loop"], Severity::Critical),
            EscalationRule::any(
                "image_pull_failure",
                &[
                    r"image[\s_-]*pull[\s_-]*back[\s_-]*off",
                    r"errimagepull",
                    r"failed\s+to\s+pull\s+image",
                ],
                Severity::Critical,
            ),
            EscalationRule::any(
                "network_failure",
                &[
                    r"network\s*plugin\s*(?:is\s*)?not\s*ready",
                    r"network\s*not\s*ready",
                    r"\bcni\b.*?(?:fail|error|not\s*ready)",
                    r"network\s*(?:is\s*)?unreachable",
                ],
                Severity::Critical,
            ),
            EscalationRule::all(
                "workload_failed",
                &[r"pod|deployment|replicaset", r"failed"],
                Severity::High,
            ),
            EscalationRule::any("unhealthy", &[r"unhealthy"], Severity::High),
            EscalationRule::restarts_above("restart_storm", 5, Severity::High),
        ])
    }

    pub fn with_rules(rules: Vec<EscalationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    /// First rule that holds for the event's text, if any.
    pub fn matching_rule(&self, event: &RawEvent) -> Option<&EscalationRule> {
        let buffer = search_buffer(event);
        self.rules.iter().find(|rule| rule.condition.holds(&buffer))
    }

    /// Severity after escalation; never lower than the event's own.
    pub fn classify(&self, event: &RawEvent) -> Severity {
        match self.matching_rule(event) {
            Some(rule) => rule.target.max(event.severity),
            None => event.severity,
        }
    }

    pub fn classify_event(&self, event: RawEvent) -> ClassifiedEvent {
        let severity = self.classify(&event);
        ClassifiedEvent::new(event, severity)
    }

    pub fn classify_all<I>(&self, events: I) -> Vec<ClassifiedEvent>
    where
        I: IntoIterator<Item = RawEvent>,
    {
        events.into_iter().map(|e| self.classify_event(e)).collect()
    }
}

fn search_buffer(event: &RawEvent) -> String {
    format!("{} {} {}", event.category, event.description, event.title).to_lowercase()
}

fn max_restart_count(buffer: &str) -> Option<u32> {
    RESTART_COUNT_PATTERNS
        .iter()
        .flat_map(|re| re.captures_iter(buffer))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .max()
}

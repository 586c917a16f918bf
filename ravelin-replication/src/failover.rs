use crate::types::OperationMetadata;
use std::collections::HashSet;

/// A destination a logical operation may be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverCandidate {
    pub operation: OperationMetadata,
    pub disabled: bool,
}

impl FailoverCandidate {
    pub fn url(&self) -> &str {
        &self.operation.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    TryingPrimary,
    SelectingReplica,
    Done,
    Failed,
}

/// Routing state for one logical operation: which destinations were tried
/// and which are out of the running.
///
/// Selection order is the primary, then replicas in the order the server
/// declared them. Disabled replicas, failed destinations and destinations
/// skipped by throttling are never selected.
#[derive(Debug, Clone)]
pub struct FailoverState {
    primary: OperationMetadata,
    replicas: Vec<FailoverCandidate>,
    phase: FailoverPhase,
    failed: Vec<String>,
    excluded: HashSet<String>,
    last_error: Option<String>,
}

impl FailoverState {
    pub fn new(primary: OperationMetadata, replicas: Vec<FailoverCandidate>) -> Self {
        FailoverState {
            primary,
            replicas,
            phase: FailoverPhase::TryingPrimary,
            failed: Vec::new(),
            excluded: HashSet::new(),
            last_error: None,
        }
    }

    pub fn phase(&self) -> FailoverPhase {
        self.phase
    }

    pub fn primary(&self) -> &OperationMetadata {
        &self.primary
    }

    pub fn replicas(&self) -> &[FailoverCandidate] {
        &self.replicas
    }

    pub fn is_primary(&self, url: &str) -> bool {
        self.primary.url == url
    }

    /// URLs marked failed, in the order they failed.
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Next destination to try, or `None` once every candidate is used up.
    /// Moves the state to `SelectingReplica` once the primary is out, and to
    /// `Failed` when nothing is left.
    pub fn next_candidate(&mut self) -> Option<OperationMetadata> {
        if matches!(self.phase, FailoverPhase::Done | FailoverPhase::Failed) {
            return None;
        }

        if self.phase == FailoverPhase::TryingPrimary {
            if !self.excluded.contains(&self.primary.url) {
                return Some(self.primary.clone());
            }
            self.phase = FailoverPhase::SelectingReplica;
        }

        let next = self
            .replicas
            .iter()
            .find(|c| !c.disabled && !self.excluded.contains(c.url()))
            .map(|c| c.operation.clone());

        if next.is_none() {
            self.phase = FailoverPhase::Failed;
        }
        next
    }

    /// Whether any destination other than `url` is still selectable.
    pub fn has_remaining_after(&self, url: &str) -> bool {
        let primary_left = self.phase == FailoverPhase::TryingPrimary
            && self.primary.url != url
            && !self.excluded.contains(&self.primary.url);
        primary_left
            || self
                .replicas
                .iter()
                .any(|c| !c.disabled && c.url() != url && !self.excluded.contains(c.url()))
    }

    /// Exclude `url` for the rest of this operation after it failed.
    pub fn mark_failed(&mut self, url: &str) {
        if self.excluded.insert(url.to_string()) {
            self.failed.push(url.to_string());
        }
        self.leave_primary_if(url);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Exclude `url` without counting it as a failure (e.g. throttled).
    pub fn skip(&mut self, url: &str) {
        self.excluded.insert(url.to_string());
        self.leave_primary_if(url);
    }

    pub fn complete(&mut self) {
        self.phase = FailoverPhase::Done;
    }

    /// Destinations that could have been used by this operation.
    pub fn total_destinations(&self) -> usize {
        1 + self.replicas.iter().filter(|c| !c.disabled).count()
    }

    fn leave_primary_if(&mut self, url: &str) {
        if self.phase == FailoverPhase::TryingPrimary && self.primary.url == url {
            self.phase = FailoverPhase::SelectingReplica;
        }
    }
}

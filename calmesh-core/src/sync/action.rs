use std::fmt;

use serde::Serialize;

/// Which way changes flow in one half of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    SourceToTarget,
    TargetToSource,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SourceToTarget => write!(f, "source → target"),
            Direction::TargetToSource => write!(f, "target → source"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    /// An existing counterpart was adopted without writing anything.
    Link,
    /// Both sides changed since the last sync; nothing was written.
    Conflict,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "+"),
            ActionKind::Update => write!(f, "~"),
            ActionKind::Delete => write!(f, "-"),
            ActionKind::Link => write!(f, "="),
            ActionKind::Conflict => write!(f, "!"),
        }
    }
}

/// One outcome of reconciliation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    pub direction: Direction,
    pub kind: ActionKind,
    pub title: String,
    /// Name of the backend that was (or would have been) written
    pub remote: String,
    /// Set when the write failed
    pub error: Option<String>,
}

impl SyncAction {
    pub fn new(direction: Direction, kind: ActionKind, title: &str, remote: &str) -> Self {
        SyncAction {
            direction,
            kind,
            title: title.to_string(),
            remote: remote.to_string(),
            error: None,
        }
    }

    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (title, remote) = (&self.title, &self.remote);
        if let Some(ref error) = self.error {
            let verb = match self.kind {
                ActionKind::Create => "create",
                ActionKind::Update => "update",
                ActionKind::Delete => "delete",
                ActionKind::Link | ActionKind::Conflict => "link",
            };
            return write!(f, "x Failed to {verb} \"{title}\" on {remote}: {error}");
        }
        match self.kind {
            ActionKind::Create => write!(f, "{} Created \"{title}\" on {remote}", self.kind),
            ActionKind::Update => write!(f, "{} Updated \"{title}\" on {remote}", self.kind),
            ActionKind::Delete => write!(f, "{} Deleted \"{title}\" from {remote}", self.kind),
            ActionKind::Link => write!(f, "{} Linked \"{title}\" to existing event on {remote}", self.kind),
            ActionKind::Conflict => write!(
                f,
                "{} Skipped \"{title}\": changed on both sides since last sync",
                self.kind
            ),
        }
    }
}

/// Per-direction tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub linked: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl DirectionCounts {
    fn record(&mut self, action: &SyncAction) {
        if action.is_failure() {
            self.failed += 1;
            return;
        }
        match action.kind {
            ActionKind::Create => self.created += 1,
            ActionKind::Update => self.updated += 1,
            ActionKind::Delete => self.deleted += 1,
            ActionKind::Link => self.linked += 1,
            ActionKind::Conflict => self.conflicts += 1,
        }
    }

    /// Successful network writes.
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    fn add(&mut self, other: &DirectionCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.linked += other.linked;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

impl fmt::Display for DirectionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} linked, {} conflicts, {} failed",
            self.created, self.updated, self.deleted, self.linked, self.conflicts, self.failed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub source_to_target: DirectionCounts,
    pub target_to_source: DirectionCounts,
    pub actions: Vec<SyncAction>,
}

impl ReconcileReport {
    pub fn record(&mut self, action: SyncAction) {
        match action.direction {
            Direction::SourceToTarget => self.source_to_target.record(&action),
            Direction::TargetToSource => self.target_to_source.record(&action),
        }
        self.actions.push(action);
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.source_to_target.add(&other.source_to_target);
        self.target_to_source.add(&other.target_to_source);
        self.actions.extend(other.actions);
    }

    pub fn totals(&self) -> DirectionCounts {
        let mut totals = self.source_to_target;
        totals.add(&self.target_to_source);
        totals
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Action lines for the sync log.
    pub fn lines(&self) -> Vec<String> {
        self.actions.iter().map(ToString::to_string).collect()
    }
}

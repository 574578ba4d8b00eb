use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, unique document key as produced by a [`crate::DocumentSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Indexing => "indexing",
            DocumentState::Indexed => "indexed",
            DocumentState::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub state: DocumentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate view over every [`DocumentRecord`] in the store.
///
/// `total == pending + indexing + indexed + failed` always holds for a value
/// handed out by [`crate::IndexStore::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounters {
    pub total: usize,
    pub pending: usize,
    pub indexing: usize,
    pub indexed: usize,
    pub failed: usize,
}

impl IndexCounters {
    /// Documents that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.indexed + self.failed
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.pending + self.indexing + self.indexed + self.failed
    }

    pub(crate) fn add(&mut self, state: DocumentState) {
        self.total += 1;
        *self.slot(state) += 1;
    }

    pub(crate) fn remove(&mut self, state: DocumentState) {
        self.total = self.total.saturating_sub(1);
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    pub(crate) fn shift(&mut self, from: DocumentState, to: DocumentState) {
        let slot = self.slot(from);
        *slot = slot.saturating_sub(1);
        *self.slot(to) += 1;
    }

    fn slot(&mut self, state: DocumentState) -> &mut usize {
        match state {
            DocumentState::Pending => &mut self.pending,
            DocumentState::Indexing => &mut self.indexing,
            DocumentState::Indexed => &mut self.indexed,
            DocumentState::Failed => &mut self.failed,
        }
    }
}

/// Point-in-time progress of the index. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub counters: IndexCounters,
    pub processed: usize,
    pub percent_complete: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(session_id: Option<Uuid>, counters: IndexCounters, processed: usize) -> Self {
        Self {
            session_id,
            counters,
            processed,
            percent_complete: percent(processed, counters.total),
            timestamp: Utc::now(),
        }
    }
}

fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed.min(total) as f64 / total as f64) * 100.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebuildOutcome {
    Completed,
    CompletedWithFailures,
    Cancelled,
    Aborted { reason: String },
}

impl RebuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildOutcome::Completed => "completed",
            RebuildOutcome::CompletedWithFailures => "completed_with_failures",
            RebuildOutcome::Cancelled => "cancelled",
            RebuildOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Terminal event of a rebuild session, published exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub session_id: Uuid,
    pub counters: IndexCounters,
    pub processed: usize,
    pub outcome: RebuildOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum IndexEvent {
    /// Synthesized for a newly connected subscriber, outside the publish cadence.
    CatchUp(ProgressSnapshot),
    Progress(ProgressSnapshot),
    Summary(SummaryEvent),
}

impl IndexEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IndexEvent::CatchUp(_) => "catch_up",
            IndexEvent::Progress(_) => "progress",
            IndexEvent::Summary(_) => "summary",
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            IndexEvent::CatchUp(snapshot) | IndexEvent::Progress(snapshot) => snapshot.session_id,
            IndexEvent::Summary(summary) => Some(summary.session_id),
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, IndexEvent::Summary(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event: IndexEvent,
}

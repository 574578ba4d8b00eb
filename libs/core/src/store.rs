//! Authoritative per-document index state.
//!
//! Every read and write goes through one mutex guarding both the record set
//! and the aggregate counters, so a reader can never observe counters that
//! disagree with the records. Critical sections are short and never span an
//! indexing call.

use crate::error::StoreError;
use crate::models::{DocumentId, DocumentRecord, DocumentState, IndexCounters};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Rebuild enumeration: listed records reset to pending, unlisted ones removed.
    Full,
    /// Insert missing ids as pending, leave existing records alone.
    Merge,
}

#[derive(Default)]
struct StoreInner {
    order: Vec<DocumentId>,
    records: HashMap<DocumentId, DocumentRecord>,
    counters: IndexCounters,
}

impl StoreInner {
    fn recompute(&mut self) {
        let mut counters = IndexCounters::default();
        for record in self.records.values() {
            counters.add(record.state);
        }
        self.counters = counters;
    }

    fn transition(
        &mut self,
        id: &DocumentId,
        allowed_from: &[DocumentState],
        to: DocumentState,
        reason: Option<String>,
    ) -> Result<IndexCounters, StoreError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownDocument(id.clone()))?;

        let from = record.state;
        if !allowed_from.contains(&from) {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        record.state = to;
        record.failure_reason = reason;
        record.updated_at = Utc::now();
        self.counters.shift(from, to);
        Ok(self.counters)
    }
}

#[derive(Default)]
pub struct IndexStore {
    inner: Mutex<StoreInner>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn upsert_documents<I>(&self, ids: I, mode: UpsertMode) -> IndexCounters
    where
        I: IntoIterator<Item = DocumentId>,
    {
        let now = Utc::now();
        let mut guard = self.lock();

        match mode {
            UpsertMode::Full => {
                let mut seen = HashSet::new();
                let mut order = Vec::new();
                let mut records = HashMap::new();

                for id in ids {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    records.insert(
                        id.clone(),
                        DocumentRecord {
                            id: id.clone(),
                            state: DocumentState::Pending,
                            failure_reason: None,
                            updated_at: now,
                        },
                    );
                    order.push(id);
                }

                guard.order = order;
                guard.records = records;
            }
            UpsertMode::Merge => {
                for id in ids {
                    if guard.records.contains_key(&id) {
                        continue;
                    }
                    guard.records.insert(
                        id.clone(),
                        DocumentRecord {
                            id: id.clone(),
                            state: DocumentState::Pending,
                            failure_reason: None,
                            updated_at: now,
                        },
                    );
                    guard.order.push(id);
                }
            }
        }

        guard.recompute();
        guard.counters
    }

    pub fn mark_indexing(&self, id: &DocumentId) -> Result<IndexCounters, StoreError> {
        self.lock()
            .transition(id, &[DocumentState::Pending], DocumentState::Indexing, None)
    }

    pub fn mark_indexed(&self, id: &DocumentId) -> Result<IndexCounters, StoreError> {
        self.lock()
            .transition(id, &[DocumentState::Indexing], DocumentState::Indexed, None)
    }

    pub fn mark_failed(
        &self,
        id: &DocumentId,
        reason: impl Into<String>,
    ) -> Result<IndexCounters, StoreError> {
        self.lock().transition(
            id,
            &[DocumentState::Indexing],
            DocumentState::Failed,
            Some(reason.into()),
        )
    }

    /// Forces an existing record into `Failed` from whatever state it is in.
    pub fn mark_quarantined(
        &self,
        id: &DocumentId,
        reason: impl Into<String>,
    ) -> Result<IndexCounters, StoreError> {
        self.lock().transition(
            id,
            &[
                DocumentState::Pending,
                DocumentState::Indexing,
                DocumentState::Indexed,
                DocumentState::Failed,
            ],
            DocumentState::Failed,
            Some(reason.into()),
        )
    }

    pub fn snapshot(&self) -> IndexCounters {
        self.lock().counters
    }

    /// Pending ids in enumeration order.
    pub fn pending_documents(&self) -> Vec<DocumentId> {
        let guard = self.lock();
        guard
            .order
            .iter()
            .filter(|id| {
                guard
                    .records
                    .get(*id)
                    .is_some_and(|record| record.state == DocumentState::Pending)
            })
            .cloned()
            .collect()
    }

    pub fn document(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.lock().records.get(id).cloned()
    }

    pub fn failures(&self) -> Vec<DocumentRecord> {
        let guard = self.lock();
        let mut failed: Vec<DocumentRecord> = guard
            .records
            .values()
            .filter(|record| record.state == DocumentState::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| a.id.cmp(&b.id));
        failed
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

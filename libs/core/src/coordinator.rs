//! Single-flight rebuild lifecycle.
//!
//! At most one [`RebuildSession`] is live at a time. The pipeline runs on its
//! own tokio task: enumerate, reset the store, drive every pending document
//! through the injected [`Indexer`], publish throttled progress and finally
//! exactly one summary. The session is released only after its summary has
//! been published, so a following session can never interleave events with
//! it.

use crate::broadcaster::{EventBroadcaster, Subscription, SubscriptionHandle};
use crate::config::RebuildConfig;
use crate::error::{CoordinatorError, StoreError};
use crate::indexer::{DocumentSource, Indexer};
use crate::models::{DocumentId, IndexEvent, ProgressSnapshot, RebuildOutcome, SummaryEvent};
use crate::store::{IndexStore, UpsertMode};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct RebuildSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl std::fmt::Debug for RebuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildSession")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RebuildSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the summary is published and the session released.
    pub async fn wait_finished(&self) {
        self.finished.cancelled().await
    }
}

#[derive(Clone)]
pub struct RebuildCoordinator {
    store: Arc<IndexStore>,
    broadcaster: Arc<EventBroadcaster>,
    source: Arc<dyn DocumentSource>,
    indexer: Arc<dyn Indexer>,
    config: RebuildConfig,
    active: Arc<Mutex<Option<RebuildSession>>>,
}

impl RebuildCoordinator {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        indexer: Arc<dyn Indexer>,
        config: RebuildConfig,
    ) -> Self {
        let store = Arc::new(IndexStore::new());
        let broadcaster = Arc::new(EventBroadcaster::new(
            store.clone(),
            config.subscriber_capacity,
        ));
        Self::from_parts(store, broadcaster, source, indexer, config)
    }

    pub fn from_parts(
        store: Arc<IndexStore>,
        broadcaster: Arc<EventBroadcaster>,
        source: Arc<dyn DocumentSource>,
        indexer: Arc<dyn Indexer>,
        config: RebuildConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            source,
            indexer,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &RebuildConfig {
        &self.config
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<RebuildSession>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Accepts a new rebuild and spawns its pipeline, or hands back the one in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_rebuild(&self) -> Result<RebuildSession, CoordinatorError> {
        let session = {
            let mut guard = self.lock_active();
            if let Some(existing) = guard.as_ref() {
                return Err(CoordinatorError::AlreadyRunning(existing.clone()));
            }
            let session = RebuildSession::new();
            *guard = Some(session.clone());
            session
        };

        info!(session_id = %session.id, "rebuild accepted");

        let coordinator = self.clone();
        let pipeline_session = session.clone();
        tokio::spawn(async move {
            coordinator.run_pipeline(pipeline_session).await;
        });

        Ok(session)
    }

    pub fn cancel_rebuild(&self, session_id: Uuid) -> Result<(), CoordinatorError> {
        let guard = self.lock_active();
        match guard.as_ref() {
            Some(active) if active.id == session_id => {
                active.cancel.cancel();
                info!(session_id = %session_id, "rebuild cancellation requested");
                Ok(())
            }
            Some(active) => Err(CoordinatorError::SessionMismatch {
                active_session_id: active.id,
                requested_session_id: session_id,
            }),
            None => Err(CoordinatorError::NotRunning),
        }
    }

    pub fn active_session(&self) -> Option<RebuildSession> {
        self.lock_active().clone()
    }

    pub fn current_snapshot(&self) -> ProgressSnapshot {
        let session_id = self.active_session().map(|session| session.id);
        let counters = self.store.snapshot();
        ProgressSnapshot::new(session_id, counters, counters.processed())
    }

    pub fn subscribe(&self, after: Option<u64>) -> Subscription {
        self.broadcaster.subscribe(after)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.broadcaster.unsubscribe(handle)
    }

    async fn run_pipeline(self, session: RebuildSession) {
        let documents = match self.source.enumerate().await {
            Ok(documents) => documents,
            Err(error) => {
                warn!(session_id = %session.id, error = %error, "rebuild aborted");
                self.finish(
                    &session,
                    0,
                    RebuildOutcome::Aborted {
                        reason: error.to_string(),
                    },
                );
                return;
            }
        };

        if session.is_cancelled() {
            self.finish(&session, 0, RebuildOutcome::Cancelled);
            return;
        }

        let counters = self.store.upsert_documents(documents, UpsertMode::Full);
        self.publish_progress(&session, 0);
        info!(session_id = %session.id, total = counters.total, "rebuild seeded");

        let pending = self.store.pending_documents();
        let mut processed = 0usize;
        let mut since_publish = 0usize;
        let mut last_publish = Instant::now();
        let mut cancelled = false;

        for (position, document) in pending.iter().enumerate() {
            if session.is_cancelled() {
                cancelled = true;
                break;
            }

            self.process_document(&session, document).await;
            processed += 1;
            since_publish += 1;

            let is_first = position == 0;
            let is_last = position + 1 == pending.len();

            if !is_last && session.is_cancelled() {
                cancelled = true;
                break;
            }

            if is_first
                || is_last
                || since_publish >= self.config.progress_every.max(1)
                || last_publish.elapsed() >= self.config.progress_interval
            {
                self.publish_progress(&session, processed);
                since_publish = 0;
                last_publish = Instant::now();
            }
        }

        let outcome = if cancelled {
            RebuildOutcome::Cancelled
        } else if self.store.snapshot().failed > 0 {
            RebuildOutcome::CompletedWithFailures
        } else {
            RebuildOutcome::Completed
        };
        self.finish(&session, processed, outcome);
    }

    async fn process_document(&self, session: &RebuildSession, document: &DocumentId) {
        if let Err(error) = self.store.mark_indexing(document) {
            self.contain(session, document, error);
            return;
        }

        let outcome = AssertUnwindSafe(self.indexer.index(document))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err("indexer panicked".to_string()));

        let recorded = match outcome {
            Ok(()) => self.store.mark_indexed(document),
            Err(reason) => {
                warn!(
                    session_id = %session.id,
                    document = %document,
                    reason = %reason,
                    "document failed to index"
                );
                self.store.mark_failed(document, reason)
            }
        };

        if let Err(error) = recorded {
            self.contain(session, document, error);
        }
    }

    fn contain(&self, session: &RebuildSession, document: &DocumentId, error: StoreError) {
        error!(
            session_id = %session.id,
            document = %document,
            error = %error,
            "index state invariant violated"
        );
        if let Err(error) = self.store.mark_quarantined(document, error.to_string()) {
            error!(
                session_id = %session.id,
                document = %document,
                error = %error,
                "document could not be marked failed"
            );
        }
    }

    fn publish_progress(&self, session: &RebuildSession, processed: usize) {
        let counters = self.store.snapshot();
        let snapshot = ProgressSnapshot::new(Some(session.id), counters, processed);
        self.broadcaster.publish(IndexEvent::Progress(snapshot));
    }

    fn finish(&self, session: &RebuildSession, processed: usize, outcome: RebuildOutcome) {
        let counters = self.store.snapshot();
        let summary = SummaryEvent {
            session_id: session.id,
            counters,
            processed,
            outcome,
            started_at: session.started_at,
            finished_at: Utc::now(),
        };

        info!(
            session_id = %session.id,
            outcome = summary.outcome.as_str(),
            processed,
            indexed = counters.indexed,
            failed = counters.failed,
            "rebuild finished"
        );

        // Summary and release share one critical section: once the summary is
        // out, cancel_rebuild sees no active session.
        {
            let mut guard = self.lock_active();
            self.broadcaster.publish(IndexEvent::Summary(summary));
            if guard
                .as_ref()
                .is_some_and(|active| active.id == session.id)
            {
                *guard = None;
            }
        }
        session.finished.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::{DocumentState, EventEnvelope, IndexCounters};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Barrier, Semaphore};
    use tokio::time::Duration;

    struct StaticSource(Vec<DocumentId>);

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn enumerate(&self) -> Result<Vec<DocumentId>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl DocumentSource for BrokenSource {
        async fn enumerate(&self) -> Result<Vec<DocumentId>, SourceError> {
            Err(SourceError::Enumeration("disk unplugged".to_string()))
        }
    }

    /// Indexer whose calls each consume one permit, so tests control pacing.
    struct ScriptedIndexer {
        permits: Semaphore,
        failures: HashMap<DocumentId, String>,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedIndexer {
        fn open() -> Self {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn with_permits(permits: usize) -> Self {
            Self {
                permits: Semaphore::new(permits),
                failures: HashMap::new(),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, document: &str, reason: &str) -> Self {
            self.failures
                .insert(DocumentId::from(document), reason.to_string());
            self
        }

        fn release(&self, count: usize) {
            self.permits.add_permits(count);
        }
    }

    #[async_trait]
    impl Indexer for ScriptedIndexer {
        async fn index(&self, document: &DocumentId) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            let permit = self.permits.acquire().await;
            if let Ok(permit) = permit {
                permit.forget();
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            match self.failures.get(document) {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            }
        }
    }

    fn documents(count: usize) -> Vec<DocumentId> {
        (1..=count)
            .map(|n| DocumentId::new(format!("doc-{n:02}")))
            .collect()
    }

    fn coordinator(
        source: Arc<dyn DocumentSource>,
        indexer: Arc<ScriptedIndexer>,
        config: RebuildConfig,
    ) -> RebuildCoordinator {
        RebuildCoordinator::new(source, indexer, config)
    }

    fn roomy_config() -> RebuildConfig {
        RebuildConfig {
            subscriber_capacity: 256,
            ..RebuildConfig::default()
        }
    }

    async fn wait_finished(session: &RebuildSession) {
        if tokio::time::timeout(Duration::from_secs(5), session.wait_finished())
            .await
            .is_err()
        {
            panic!("rebuild {} did not finish in time", session.id());
        }
    }

    async fn collect_until_summary(subscription: &mut Subscription) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), subscription.recv()).await;
            match next {
                Ok(Some(envelope)) => {
                    let done = envelope.event.is_summary();
                    events.push(envelope);
                    if done {
                        return events;
                    }
                }
                Ok(None) => panic!("subscription ended before summary"),
                Err(_) => panic!("timed out waiting for summary"),
            }
        }
    }

    fn summary_of(events: &[EventEnvelope]) -> SummaryEvent {
        match events.last().map(|envelope| &envelope.event) {
            Some(IndexEvent::Summary(summary)) => summary.clone(),
            other => panic!("expected summary as last event, got {other:?}"),
        }
    }

    fn progress_of(events: &[EventEnvelope]) -> Vec<ProgressSnapshot> {
        events
            .iter()
            .filter_map(|envelope| match &envelope.event {
                IndexEvent::Progress(snapshot) => Some(snapshot.clone()),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_processed(coordinator: &RebuildCoordinator, processed: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while coordinator.store().snapshot().processed() < processed {
            if Instant::now() > deadline {
                panic!("store never reached {processed} processed documents");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn partial_failure_completes_with_failures() {
        let indexer = Arc::new(ScriptedIndexer::open().failing("doc-07", "parse error"));
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(10))),
            indexer.clone(),
            roomy_config(),
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let summary = summary_of(&events);
        assert_eq!(summary.session_id, session.id());
        assert_eq!(summary.counters.indexed, 9);
        assert_eq!(summary.counters.failed, 1);
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.outcome, RebuildOutcome::CompletedWithFailures);

        let failures = coordinator.store().failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, DocumentId::from("doc-07"));
        assert_eq!(failures[0].failure_reason.as_deref(), Some("parse error"));
        assert!(coordinator.active_session().is_none());
    }

    #[tokio::test]
    async fn published_events_are_consistent_monotonic_and_end_in_one_summary() {
        let indexer = Arc::new(
            ScriptedIndexer::open()
                .failing("doc-02", "bad header")
                .failing("doc-05", "parse error"),
        );
        let config = RebuildConfig {
            progress_every: 1,
            ..roomy_config()
        };
        let coordinator = coordinator(Arc::new(StaticSource(documents(12))), indexer, config);
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let progress = progress_of(&events);
        assert_eq!(progress.len(), 13);
        assert!(progress.iter().all(|snapshot| snapshot.counters.is_consistent()));
        assert!(
            progress
                .windows(2)
                .all(|pair| pair[0].processed <= pair[1].processed
                    && pair[0].percent_complete <= pair[1].percent_complete)
        );
        assert!(events.windows(2).all(|pair| pair[0].id <= pair[1].id));

        let summaries = events
            .iter()
            .filter(|envelope| envelope.event.is_summary())
            .count();
        assert_eq!(summaries, 1);

        let late = tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await;
        assert!(late.is_err(), "no event may follow the summary");
    }

    #[tokio::test]
    async fn progress_is_throttled_but_always_includes_first_and_last() {
        let config = RebuildConfig {
            progress_every: 3,
            progress_interval: Duration::from_secs(3600),
            subscriber_capacity: 256,
        };
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(10))),
            Arc::new(ScriptedIndexer::open()),
            config,
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let processed: Vec<usize> = progress_of(&events)
            .iter()
            .map(|snapshot| snapshot.processed)
            .collect();
        assert_eq!(processed, vec![0, 1, 4, 7, 10]);
        assert!(matches!(events[0].event, IndexEvent::CatchUp(_)));
    }

    #[tokio::test]
    async fn start_while_running_returns_existing_session_without_second_pipeline() {
        let indexer = Arc::new(ScriptedIndexer::with_permits(0));
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(5))),
            indexer.clone(),
            roomy_config(),
        );

        let first = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };

        for _ in 0..3 {
            match coordinator.start_rebuild() {
                Err(CoordinatorError::AlreadyRunning(existing)) => {
                    assert_eq!(existing.id(), first.id())
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(session) => panic!("second rebuild {} should be rejected", session.id()),
            }
        }

        indexer.release(100);
        wait_finished(&first).await;

        assert_eq!(indexer.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 5);

        let second = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("rebuild after completion should start: {error}"),
        };
        assert_ne!(second.id(), first.id());
        wait_finished(&second).await;
    }

    #[tokio::test]
    async fn concurrent_starts_accept_exactly_one() {
        let coordinator = Arc::new(coordinator(
            Arc::new(StaticSource(documents(3))),
            Arc::new(ScriptedIndexer::with_permits(0)),
            roomy_config(),
        ));
        let barrier = Arc::new(Barrier::new(4));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                coordinator.start_rebuild()
            }));
        }

        let mut successes = 0usize;
        let mut conflicts = 0usize;
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => successes += 1,
                Ok(Err(CoordinatorError::AlreadyRunning(_))) => conflicts += 1,
                Ok(Err(other)) => panic!("unexpected error: {other}"),
                Err(join_error) => panic!("join error: {join_error}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(conflicts, 3);
    }

    #[tokio::test]
    async fn cancel_mid_rebuild_stops_early_with_cancelled_summary() {
        let indexer = Arc::new(ScriptedIndexer::with_permits(3));
        let config = RebuildConfig {
            progress_every: 1,
            ..roomy_config()
        };
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(10))),
            indexer.clone(),
            config,
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        wait_for_processed(&coordinator, 3).await;

        if let Err(error) = coordinator.cancel_rebuild(session.id()) {
            panic!("cancel should succeed: {error}");
        }
        indexer.release(10);

        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let summary = summary_of(&events);
        assert_eq!(summary.outcome, RebuildOutcome::Cancelled);
        assert!(summary.processed == 3 || summary.processed == 4);
        assert!(indexer.calls.load(Ordering::SeqCst) <= 4);
        assert!(
            progress_of(&events)
                .iter()
                .all(|snapshot| snapshot.processed <= 3)
        );
        assert!(summary.counters.pending >= 6);
        assert!(summary.counters.is_consistent());
    }

    #[tokio::test]
    async fn cancel_requires_matching_active_session() {
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(2))),
            Arc::new(ScriptedIndexer::with_permits(0)),
            roomy_config(),
        );

        let idle = coordinator.cancel_rebuild(Uuid::new_v4());
        assert!(matches!(idle, Err(CoordinatorError::NotRunning)));

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };

        let wrong = Uuid::new_v4();
        match coordinator.cancel_rebuild(wrong) {
            Err(CoordinatorError::SessionMismatch {
                active_session_id,
                requested_session_id,
            }) => {
                assert_eq!(active_session_id, session.id());
                assert_eq!(requested_session_id, wrong);
            }
            other => panic!("expected session mismatch, got {other:?}"),
        }

        assert!(coordinator.cancel_rebuild(session.id()).is_ok());
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn mid_rebuild_subscriber_is_caught_up_before_progress() {
        let indexer = Arc::new(ScriptedIndexer::with_permits(2));
        let config = RebuildConfig {
            progress_every: 1,
            ..roomy_config()
        };
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(6))),
            indexer.clone(),
            config,
        );

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        wait_for_processed(&coordinator, 2).await;

        let mut late = coordinator.subscribe(None);
        indexer.release(10);
        let events = collect_until_summary(&mut late).await;
        wait_finished(&session).await;

        match &events[0].event {
            IndexEvent::CatchUp(snapshot) => {
                assert_eq!(snapshot.counters.total, 6);
                assert!(snapshot.processed >= 2);
                assert_eq!(snapshot.session_id, Some(session.id()));
            }
            other => panic!("expected catch_up first, got {other:?}"),
        }

        let first_progress = progress_of(&events);
        assert!(
            first_progress
                .iter()
                .all(|snapshot| snapshot.processed >= 2)
        );
        assert_eq!(summary_of(&events).outcome, RebuildOutcome::Completed);
    }

    #[tokio::test]
    async fn enumeration_failure_aborts_and_releases_session() {
        let coordinator = coordinator(
            Arc::new(BrokenSource),
            Arc::new(ScriptedIndexer::open()),
            roomy_config(),
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        match summary_of(&events).outcome {
            RebuildOutcome::Aborted { reason } => assert!(reason.contains("disk unplugged")),
            other => panic!("expected aborted outcome, got {other:?}"),
        }
        assert!(progress_of(&events).is_empty());
        assert!(coordinator.active_session().is_none());
    }

    #[tokio::test]
    async fn empty_source_publishes_seed_then_completed_summary() {
        let coordinator = coordinator(
            Arc::new(StaticSource(Vec::new())),
            Arc::new(ScriptedIndexer::open()),
            roomy_config(),
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let progress = progress_of(&events);
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].percent_complete, 0.0);

        let summary = summary_of(&events);
        assert_eq!(summary.outcome, RebuildOutcome::Completed);
        assert_eq!(summary.counters, IndexCounters::default());
    }

    #[tokio::test]
    async fn panicking_indexer_marks_document_failed() {
        struct PanickyIndexer;

        #[async_trait]
        impl Indexer for PanickyIndexer {
            async fn index(&self, document: &DocumentId) -> Result<(), String> {
                if document.as_str() == "doc-02" {
                    panic!("extractor blew up");
                }
                Ok(())
            }
        }

        let coordinator = RebuildCoordinator::new(
            Arc::new(StaticSource(documents(3))),
            Arc::new(PanickyIndexer),
            roomy_config(),
        );
        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        wait_finished(&session).await;

        let counters = coordinator.store().snapshot();
        assert_eq!(counters.indexed, 2);
        assert_eq!(counters.failed, 1);
        let record = coordinator.store().document(&DocumentId::from("doc-02"));
        assert_eq!(
            record.and_then(|record| record.failure_reason),
            Some("indexer panicked".to_string())
        );
    }

    #[tokio::test]
    async fn invalid_transition_is_contained_as_failed_document() {
        let indexer = Arc::new(ScriptedIndexer::with_permits(0));
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(3))),
            indexer.clone(),
            roomy_config(),
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while indexer.calls.load(Ordering::SeqCst) < 1 {
            if Instant::now() > deadline {
                panic!("indexer was never called");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = DocumentId::from("doc-02");
        if let Err(error) = coordinator.store().mark_indexing(&second) {
            panic!("external mark_indexing should succeed: {error}");
        }
        indexer.release(10);

        let events = collect_until_summary(&mut subscription).await;
        wait_finished(&session).await;

        let summary = summary_of(&events);
        assert_eq!(summary.outcome, RebuildOutcome::CompletedWithFailures);
        assert_eq!(summary.counters.indexed, 2);
        assert_eq!(summary.counters.failed, 1);
        assert!(summary.counters.is_consistent());
        assert_eq!(indexer.calls.load(Ordering::SeqCst), 2);

        let record = coordinator.store().document(&second);
        match record {
            Some(record) => {
                assert_eq!(record.state, DocumentState::Failed);
                assert_eq!(
                    record.failure_reason.as_deref(),
                    Some("invalid transition for doc-02: indexing -> indexing")
                );
            }
            None => panic!("doc-02 should still be tracked"),
        }
    }

    #[tokio::test]
    async fn cancel_after_summary_reports_not_running() {
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(2))),
            Arc::new(ScriptedIndexer::open()),
            roomy_config(),
        );
        let mut subscription = coordinator.subscribe(None);

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        let events = collect_until_summary(&mut subscription).await;
        assert_eq!(summary_of(&events).outcome, RebuildOutcome::Completed);

        assert!(matches!(
            coordinator.cancel_rebuild(session.id()),
            Err(CoordinatorError::NotRunning)
        ));
        assert!(coordinator.active_session().is_none());
        wait_finished(&session).await;
    }

    #[tokio::test]
    async fn current_snapshot_reports_active_session() {
        let indexer = Arc::new(ScriptedIndexer::with_permits(1));
        let coordinator = coordinator(
            Arc::new(StaticSource(documents(4))),
            indexer.clone(),
            roomy_config(),
        );

        let session = match coordinator.start_rebuild() {
            Ok(session) => session,
            Err(error) => panic!("start_rebuild should succeed: {error}"),
        };
        wait_for_processed(&coordinator, 1).await;

        let snapshot = coordinator.current_snapshot();
        assert_eq!(snapshot.session_id, Some(session.id()));
        assert_eq!(snapshot.counters.total, 4);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.percent_complete, 25.0);

        indexer.release(10);
        wait_finished(&session).await;
        assert_eq!(coordinator.current_snapshot().session_id, None);
    }
}

//! Outbox drain engine
//!
//! Owns the local queue, the ID mapping, the remote client, and the event
//! bus as one injected service object; callers enqueue through it and
//! trigger drains opportunistically. A drain walks the queue in FIFO order,
//! one awaited remote write at a time, and halts on the first failure so
//! per-session ordering is never violated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::db::{Database, IdMapRepository, LibSqlIdMapRepository, LibSqlOutboxRepository, OutboxRepository};
use crate::error::Result;
use crate::models::{
    CancelPayload, EndPayload, NewWalkSession, OperationId, PausePayload, QueuedOperation,
    ResumePayload, SessionAction, StartPayload, UpdateSpeedPayload, WALK_SESSION_ENTITY,
};
use crate::remote::{RemoteError, SessionRemote};
use crate::sync::events::{EventBus, SyncEvent};

/// Why a single operation could not be delivered.
///
/// Recorded on the operation as `last_error`; never silently swallowed, so
/// malformed or unrecognized operations surface the same way remote
/// failures do.
#[derive(Debug, Error)]
enum DispatchError {
    #[error("Unsupported entity: {0}")]
    UnsupportedEntity(String),
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Storage error during dispatch: {0}")]
    Storage(#[from] crate::error::Error),
}

/// Result of a [`SyncEngine::drain`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain holds the guard; nothing was attempted
    AlreadyDraining,
    /// The engine is offline; nothing was attempted
    Offline,
    /// The queue was walked until exhaustion or first failure
    Completed(DrainReport),
}

/// Bookkeeping from a completed drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations delivered and removed this cycle
    pub synced: usize,
    /// Operation the cycle halted on, when a delivery failed
    pub halted_on: Option<OperationId>,
    /// Whether the failed operation hit the retry ceiling and was abandoned
    pub dead_lettered: bool,
    /// Pending count after the cycle
    pub pending: u64,
}

/// Sequential outbox sync engine over a pluggable remote
pub struct SyncEngine<R> {
    db: Arc<Database>,
    remote: R,
    events: EventBus,
    online: AtomicBool,
    drain_lock: Mutex<()>,
    max_attempts: u32,
}

impl<R: SessionRemote> SyncEngine<R> {
    /// Create an engine over the given local database and remote client
    #[must_use]
    pub fn new(db: Arc<Database>, remote: R, config: &EngineConfig) -> Self {
        Self {
            db,
            remote,
            events: EventBus::new(config.event_capacity),
            online: AtomicBool::new(config.start_online),
            drain_lock: Mutex::new(()),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// The engine's event bus, for pending-count badges and sync indicators
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Update the connectivity flag consulted by `drain`
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether the engine currently believes the network is reachable
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Durably queue an operation and notify observers.
    ///
    /// The single caller-side write path into the queue. An `Err` means the
    /// operation was not queued and the caller's action is not recorded.
    pub async fn enqueue(&self, op: QueuedOperation) -> Result<()> {
        let outbox = LibSqlOutboxRepository::new(self.db.connection());
        outbox.append(&op).await?;

        let pending = outbox.count().await?;
        tracing::debug!(op = %op.id, action = %op.action, pending, "Queued operation");
        self.events.emit(SyncEvent::QueueChanged { pending });
        Ok(())
    }

    /// Number of operations awaiting delivery
    pub async fn pending_count(&self) -> Result<u64> {
        LibSqlOutboxRepository::new(self.db.connection())
            .count()
            .await
    }

    /// Pending operations in FIFO order, for diagnostics
    pub async fn pending_operations(&self) -> Result<Vec<QueuedOperation>> {
        LibSqlOutboxRepository::new(self.db.connection())
            .list()
            .await
    }

    /// Dead-lettered operations, for diagnostics
    pub async fn dead_operations(&self) -> Result<Vec<QueuedOperation>> {
        LibSqlOutboxRepository::new(self.db.connection())
            .list_dead()
            .await
    }

    /// Manually drop a queued operation (pending or dead).
    ///
    /// The escape hatch for an operation that keeps failing and blocks the
    /// queue before the retry ceiling abandons it.
    pub async fn discard(&self, id: &OperationId) -> Result<()> {
        let outbox = LibSqlOutboxRepository::new(self.db.connection());
        outbox.remove(id).await?;
        let pending = outbox.count().await?;
        self.events.emit(SyncEvent::QueueChanged { pending });
        Ok(())
    }

    /// Walk the queue against the remote backend.
    ///
    /// No-op while another drain runs or the engine is offline. Otherwise
    /// processes pending operations strictly in insertion order: a delivered
    /// operation is removed and the walk continues; a failed one gets its
    /// attempts/last_error persisted and the walk halts so a later operation
    /// never overtakes an earlier one. An operation whose failure reaches
    /// the retry ceiling moves to the dead-letter bucket and stops blocking
    /// subsequent drains.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("Drain already in progress, skipping");
            return Ok(DrainOutcome::AlreadyDraining);
        };

        if !self.is_online() {
            tracing::debug!("Offline, skipping drain");
            return Ok(DrainOutcome::Offline);
        }

        self.events.emit(SyncEvent::SyncStarted);

        let conn = self.db.connection();
        let outbox = LibSqlOutboxRepository::new(conn);
        let mappings = LibSqlIdMapRepository::new(conn);

        let mut report = DrainReport::default();
        let ops = outbox.list().await?;

        for op in ops {
            match self.dispatch(&op, &mappings).await {
                Ok(()) => {
                    outbox.remove(&op.id).await?;
                    report.synced += 1;
                    tracing::debug!(op = %op.id, action = %op.action, "Delivered queued operation");
                    let pending = outbox.count().await?;
                    self.events.emit(SyncEvent::QueueChanged { pending });
                }
                Err(error) => {
                    let message = error.to_string();
                    tracing::warn!(
                        op = %op.id,
                        action = %op.action,
                        attempts = op.attempts + 1,
                        error = %message,
                        "Queued operation failed, halting drain"
                    );

                    let mut failed = op.clone();
                    failed.attempts += 1;
                    failed.last_error = Some(message);
                    outbox.update(&failed).await?;

                    if failed.attempts >= self.max_attempts {
                        outbox.mark_dead(&failed.id).await?;
                        report.dead_lettered = true;
                        tracing::warn!(
                            op = %failed.id,
                            attempts = failed.attempts,
                            "Retry ceiling reached, operation dead-lettered"
                        );
                    }

                    report.halted_on = Some(op.id);
                    break;
                }
            }
        }

        report.pending = outbox.count().await?;
        self.events.emit(SyncEvent::SyncCompleted {
            synced: report.synced,
            pending: report.pending,
        });
        self.events.emit(SyncEvent::QueueChanged {
            pending: report.pending,
        });

        Ok(DrainOutcome::Completed(report))
    }

    /// Translate one queued operation into its remote write
    async fn dispatch(
        &self,
        op: &QueuedOperation,
        mappings: &LibSqlIdMapRepository<'_>,
    ) -> std::result::Result<(), DispatchError> {
        if op.entity != WALK_SESSION_ENTITY {
            return Err(DispatchError::UnsupportedEntity(op.entity.clone()));
        }

        let action: SessionAction = op
            .action
            .parse()
            .map_err(|_| DispatchError::UnsupportedAction(op.action.clone()))?;

        match action {
            SessionAction::Start => {
                let payload: StartPayload = serde_json::from_value(op.payload.clone())?;
                let session = NewWalkSession {
                    started_at: payload.started_at,
                    speed_kmh: payload.speed_kmh,
                };
                let server_id = self.remote.insert_session(&op.user_id, &session).await?;
                mappings.set_mapping(&payload.local_id, &server_id).await?;
                tracing::debug!(local = %payload.local_id, server = %server_id, "Registered session ID mapping");
            }
            SessionAction::Pause => {
                let payload: PausePayload = serde_json::from_value(op.payload.clone())?;
                let session_id = mappings.resolve(&payload.session_id).await?;
                self.remote
                    .pause_session(&session_id, &op.user_id, payload.paused_at)
                    .await?;
            }
            SessionAction::Resume => {
                let payload: ResumePayload = serde_json::from_value(op.payload.clone())?;
                let session_id = mappings.resolve(&payload.session_id).await?;
                self.remote
                    .resume_session(
                        &session_id,
                        &op.user_id,
                        payload.resumed_at,
                        payload.pause_secs,
                    )
                    .await?;
            }
            SessionAction::UpdateSpeed => {
                let payload: UpdateSpeedPayload = serde_json::from_value(op.payload.clone())?;
                let session_id = mappings.resolve(&payload.session_id).await?;
                self.remote
                    .update_speed(&session_id, &op.user_id, payload.speed_kmh)
                    .await?;
            }
            SessionAction::End => {
                let payload: EndPayload = serde_json::from_value(op.payload.clone())?;
                let session_id = mappings.resolve(&payload.session_id).await?;
                self.remote
                    .end_session(&session_id, &op.user_id, &payload.fields)
                    .await?;
            }
            SessionAction::Cancel => {
                let payload: CancelPayload = serde_json::from_value(op.payload.clone())?;
                let session_id = mappings.resolve(&payload.session_id).await?;
                self.remote.delete_session(&session_id, &op.user_id).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeRemote, RemoteCall};

    async fn engine_with(config: EngineConfig) -> (Arc<SyncEngine<FakeRemote>>, FakeRemote) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let remote = FakeRemote::default();
        let engine = Arc::new(SyncEngine::new(db, remote.clone(), &config));
        (engine, remote)
    }

    fn start_op(user: &str, local_id: &str) -> QueuedOperation {
        QueuedOperation::start(
            user,
            &StartPayload {
                local_id: local_id.to_string(),
                started_at: 1_700_000_000_000,
                speed_kmh: 5.0,
            },
        )
        .unwrap()
    }

    fn pause_op(user: &str, session_id: &str) -> QueuedOperation {
        QueuedOperation::pause(
            user,
            &PausePayload {
                session_id: session_id.to_string(),
                paused_at: 1_700_000_100_000,
            },
        )
        .unwrap()
    }

    fn completed(outcome: DrainOutcome) -> DrainReport {
        match outcome {
            DrainOutcome::Completed(report) => report,
            other => panic!("expected completed drain, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_delivers_in_fifo_order() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        engine.enqueue(pause_op("user-1", "tmp1")).await.unwrap();
        engine
            .enqueue(
                QueuedOperation::update_speed(
                    "user-1",
                    &UpdateSpeedPayload {
                        session_id: "tmp1".to_string(),
                        speed_kmh: 6.5,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 3);
        assert_eq!(report.halted_on, None);
        assert_eq!(report.pending, 0);

        let calls = remote.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], RemoteCall::Insert { .. }));
        assert!(matches!(calls[1], RemoteCall::Pause { .. }));
        assert!(matches!(calls[2], RemoteCall::Speed { .. }));

        assert_eq!(engine.pending_count().await.unwrap(), 0);
        assert!(engine.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_resolves_local_ids_through_mapping() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        engine.enqueue(pause_op("user-1", "tmp1")).await.unwrap();

        completed(engine.drain().await.unwrap());

        let calls = remote.calls();
        let RemoteCall::Insert { .. } = &calls[0] else {
            panic!("expected insert first");
        };
        let RemoteCall::Pause { session_id, .. } = &calls[1] else {
            panic!("expected pause second");
        };
        assert_eq!(session_id, "srv-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mapping_survives_across_drains() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        completed(engine.drain().await.unwrap());

        engine.enqueue(pause_op("user-1", "tmp1")).await.unwrap();
        completed(engine.drain().await.unwrap());

        let calls = remote.calls();
        let RemoteCall::Pause { session_id, .. } = &calls[1] else {
            panic!("expected pause second");
        };
        assert_eq!(session_id, "srv-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unmapped_session_id_passes_through_and_fails() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        // No start queued, so "tmp2" reaches the remote unresolved and the
        // backend reports no matching row.
        engine.enqueue(pause_op("user-1", "tmp2")).await.unwrap();

        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 0);
        assert!(report.halted_on.is_some());
        assert_eq!(report.pending, 1);

        let calls = remote.calls();
        let RemoteCall::Pause { session_id, .. } = &calls[0] else {
            panic!("expected pause call");
        };
        assert_eq!(session_id, "tmp2");

        let remaining = engine.pending_operations().await.unwrap();
        assert_eq!(remaining[0].attempts, 1);
        assert!(remaining[0].last_error.as_deref().unwrap().contains("tmp2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_halts_on_first_failure() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;
        remote.fail_action("insert");

        let first = start_op("user-1", "tmp1");
        let second = pause_op("user-1", "srv-9");
        remote.add_known_session("srv-9");
        engine.enqueue(first.clone()).await.unwrap();
        engine.enqueue(second.clone()).await.unwrap();

        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 0);
        assert_eq!(report.halted_on, Some(first.id));
        assert_eq!(report.pending, 2);

        // Only the failed head was attempted
        assert_eq!(remote.calls().len(), 1);

        let remaining = engine.pending_operations().await.unwrap();
        assert_eq!(remaining[0].attempts, 1);
        assert!(!remaining[0].last_error.as_deref().unwrap().is_empty());
        // Later operation untouched
        assert_eq!(remaining[1].attempts, 0);
        assert_eq!(remaining[1].last_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_next_drain_retries_from_failed_operation() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;
        remote.fail_action("insert");

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        engine.enqueue(pause_op("user-1", "tmp1")).await.unwrap();

        completed(engine.drain().await.unwrap());
        assert_eq!(engine.pending_count().await.unwrap(), 2);

        remote.clear_failures();
        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 2);
        assert_eq!(report.pending, 0);

        // Attempts persisted from the failed cycle are not reset
        let calls = remote.calls();
        assert_eq!(calls.len(), 3); // failed insert, insert, pause
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_skips_when_offline() {
        let (engine, remote) = engine_with(EngineConfig::default().starting_offline()).await;

        engine.enqueue(pause_op("user-1", "srv-1")).await.unwrap();

        let outcome = engine.drain().await.unwrap();
        assert_eq!(outcome, DrainOutcome::Offline);
        assert!(remote.calls().is_empty());
        assert_eq!(engine.pending_count().await.unwrap(), 1);

        engine.set_online(true);
        remote.add_known_session("srv-1");
        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_skips_while_already_draining() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;
        engine.enqueue(pause_op("user-1", "srv-1")).await.unwrap();

        let _guard = engine.drain_lock.try_lock().unwrap();
        let outcome = engine.drain().await.unwrap();
        assert_eq!(outcome, DrainOutcome::AlreadyDraining);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_ceiling_dead_letters_and_unblocks_queue() {
        let (engine, remote) =
            engine_with(EngineConfig::default().with_max_attempts(2)).await;
        remote.add_known_session("srv-9");

        let stuck = pause_op("user-1", "tmp-never-mapped");
        let healthy = pause_op("user-1", "srv-9");
        engine.enqueue(stuck.clone()).await.unwrap();
        engine.enqueue(healthy.clone()).await.unwrap();

        // First failure: attempts=1, still pending, still blocking
        let report = completed(engine.drain().await.unwrap());
        assert!(!report.dead_lettered);
        assert_eq!(engine.pending_count().await.unwrap(), 2);

        // Second failure reaches the ceiling: dead-lettered, cycle halts
        let report = completed(engine.drain().await.unwrap());
        assert!(report.dead_lettered);
        assert_eq!(report.synced, 0);

        let dead = engine.dead_operations().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, stuck.id);
        assert_eq!(dead[0].attempts, 2);

        // Third drain proceeds past the dead operation
        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 1);
        assert_eq!(report.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_entity_fails_loudly() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        let op = QueuedOperation::new(
            "meal_log",
            "start",
            serde_json::json!({"local_id": "tmp1"}),
            "user-1",
        );
        engine.enqueue(op).await.unwrap();

        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 0);
        assert!(report.halted_on.is_some());
        assert!(remote.calls().is_empty());

        let remaining = engine.pending_operations().await.unwrap();
        assert_eq!(remaining[0].attempts, 1);
        assert!(remaining[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("Unsupported entity"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_action_fails_loudly() {
        let (engine, _remote) = engine_with(EngineConfig::default()).await;

        let op = QueuedOperation::new(
            WALK_SESSION_ENTITY,
            "teleport",
            serde_json::json!({}),
            "user-1",
        );
        engine.enqueue(op).await.unwrap();

        completed(engine.drain().await.unwrap());

        let remaining = engine.pending_operations().await.unwrap();
        assert!(remaining[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("Unsupported action"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_payload_fails_loudly() {
        let (engine, _remote) = engine_with(EngineConfig::default()).await;

        let op = QueuedOperation::new(
            WALK_SESSION_ENTITY,
            "pause",
            serde_json::json!({"paused_at": "not a number"}),
            "user-1",
        );
        engine.enqueue(op).await.unwrap();

        completed(engine.drain().await.unwrap());

        let remaining = engine.pending_operations().await.unwrap();
        assert_eq!(remaining[0].attempts, 1);
        assert!(remaining[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("Malformed payload"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resume_carries_measured_pause_interval() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        engine
            .enqueue(
                QueuedOperation::resume(
                    "user-1",
                    &ResumePayload {
                        session_id: "tmp1".to_string(),
                        resumed_at: 1_700_000_200_000,
                        pause_secs: 42,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        completed(engine.drain().await.unwrap());

        let calls = remote.calls();
        let RemoteCall::Resume {
            session_id,
            pause_secs,
            ..
        } = &calls[1]
        else {
            panic!("expected resume call");
        };
        assert_eq!(session_id, "srv-1");
        assert_eq!(*pause_secs, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_passes_field_updates_through() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("status".to_string(), serde_json::json!("completed"));
        fields.insert(
            "ended_at".to_string(),
            serde_json::json!(1_700_000_900_000_i64),
        );
        engine
            .enqueue(
                QueuedOperation::end(
                    "user-1",
                    &EndPayload {
                        session_id: "tmp1".to_string(),
                        fields: fields.clone(),
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        completed(engine.drain().await.unwrap());

        let calls = remote.calls();
        let RemoteCall::End {
            session_id,
            fields: sent,
            ..
        } = &calls[1]
        else {
            panic!("expected end call");
        };
        assert_eq!(session_id, "srv-1");
        assert_eq!(sent, &fields);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_deletes_remote_row() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        engine
            .enqueue(
                QueuedOperation::cancel(
                    "user-1",
                    &CancelPayload {
                        session_id: "tmp1".to_string(),
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        completed(engine.drain().await.unwrap());

        let calls = remote.calls();
        let RemoteCall::Delete { session_id, .. } = &calls[1] else {
            panic!("expected delete call");
        };
        assert_eq!(session_id, "srv-1");
        assert_eq!(engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_event_sequence_for_successful_drain() {
        let (engine, _remote) = engine_with(EngineConfig::default()).await;
        let mut rx = engine.events().subscribe();

        engine.enqueue(start_op("user-1", "tmp1")).await.unwrap();
        completed(engine.drain().await.unwrap());

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::QueueChanged { pending: 1 }
        );
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::SyncStarted);
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::QueueChanged { pending: 0 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::SyncCompleted {
                synced: 1,
                pending: 0
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::QueueChanged { pending: 0 }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_completed_emitted_after_halting_drain() {
        let (engine, _remote) = engine_with(EngineConfig::default()).await;

        engine.enqueue(pause_op("user-1", "tmp-unmapped")).await.unwrap();

        let mut rx = engine.events().subscribe();
        completed(engine.drain().await.unwrap());

        assert_eq!(rx.try_recv().unwrap(), SyncEvent::SyncStarted);
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::SyncCompleted {
                synced: 0,
                pending: 1
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discard_unblocks_queue() {
        let (engine, remote) = engine_with(EngineConfig::default()).await;
        remote.add_known_session("srv-9");

        let stuck = pause_op("user-1", "tmp-never-mapped");
        engine.enqueue(stuck.clone()).await.unwrap();
        engine.enqueue(pause_op("user-1", "srv-9")).await.unwrap();

        completed(engine.drain().await.unwrap());
        assert_eq!(engine.pending_count().await.unwrap(), 2);

        engine.discard(&stuck.id).await.unwrap();

        let report = completed(engine.drain().await.unwrap());
        assert_eq!(report.synced, 1);
        assert_eq!(report.pending, 0);
    }
}

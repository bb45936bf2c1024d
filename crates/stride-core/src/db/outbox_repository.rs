//! Outbox queue repository implementation

use crate::error::{Error, Result};
use crate::models::{OpState, OperationId, QueuedOperation};
use libsql::{params, Connection, Row};

/// Trait for durable outbox storage operations (async)
///
/// The queue is append-only from the caller side; entries leave only after
/// a confirmed remote success (`remove`) or when abandoned (`mark_dead`).
#[allow(async_fn_in_trait)]
pub trait OutboxRepository {
    /// Append an operation to the end of the queue
    ///
    /// Storage failures propagate to the caller; an `Err` means the
    /// operation was not durably queued.
    async fn append(&self, op: &QueuedOperation) -> Result<()>;

    /// All pending operations in insertion (FIFO) order
    async fn list(&self) -> Result<Vec<QueuedOperation>>;

    /// Fetch one operation by ID, pending or dead
    async fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>>;

    /// Delete an operation after confirmed remote success
    async fn remove(&self, id: &OperationId) -> Result<()>;

    /// Persist updated delivery bookkeeping (attempts, last error)
    async fn update(&self, op: &QueuedOperation) -> Result<()>;

    /// Move an operation to the dead-letter bucket
    async fn mark_dead(&self, id: &OperationId) -> Result<()>;

    /// Dead-lettered operations in insertion order
    async fn list_dead(&self) -> Result<Vec<QueuedOperation>>;

    /// Number of pending operations; always equals `list().len()`
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_op(row: &Row) -> Result<QueuedOperation> {
        let id: String = row.get(0)?;
        let payload: String = row.get(3)?;
        let attempts: i64 = row.get(6)?;
        let last_error = match row.get_value(7)? {
            libsql::Value::Text(text) => Some(text),
            _ => None,
        };
        let state: String = row.get(8)?;

        Ok(QueuedOperation {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid operation id: {id}")))?,
            entity: row.get(1)?,
            action: row.get(2)?,
            payload: serde_json::from_str(&payload)?,
            user_id: row.get(4)?,
            created_at: row.get(5)?,
            attempts: u32::try_from(attempts)
                .map_err(|_| Error::Database(format!("Invalid attempt count: {attempts}")))?,
            last_error,
            state: state.parse()?,
        })
    }

    async fn list_with_state(&self, state: OpState) -> Result<Vec<QueuedOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, action, payload, user_id, created_at, attempts, last_error, state
                 FROM outbox_ops
                 WHERE state = ?
                 ORDER BY seq ASC",
                [state.as_str()],
            )
            .await?;

        let mut ops = Vec::new();
        while let Some(row) = rows.next().await? {
            ops.push(Self::parse_op(&row)?);
        }
        Ok(ops)
    }
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn append(&self, op: &QueuedOperation) -> Result<()> {
        if op.entity.trim().is_empty() {
            return Err(Error::InvalidInput("Operation entity is required".into()));
        }
        if op.action.trim().is_empty() {
            return Err(Error::InvalidInput("Operation action is required".into()));
        }
        if op.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("Operation user_id is required".into()));
        }

        let payload = serde_json::to_string(&op.payload)?;
        self.conn
            .execute(
                "INSERT INTO outbox_ops (id, entity, action, payload, user_id, created_at, attempts, last_error, state)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    op.id.as_str(),
                    op.entity.as_str(),
                    op.action.as_str(),
                    payload,
                    op.user_id.as_str(),
                    op.created_at,
                    i64::from(op.attempts),
                    op.last_error.as_deref(),
                    op.state.as_str(),
                ],
            )
            .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedOperation>> {
        self.list_with_state(OpState::Pending).await
    }

    async fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, action, payload, user_id, created_at, attempts, last_error, state
                 FROM outbox_ops
                 WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_op(&row)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &OperationId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM outbox_ops WHERE id = ?", [id.as_str()])
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn update(&self, op: &QueuedOperation) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox_ops SET attempts = ?, last_error = ? WHERE id = ?",
                params![i64::from(op.attempts), op.last_error.as_deref(), op.id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(op.id.to_string()));
        }

        Ok(())
    }

    async fn mark_dead(&self, id: &OperationId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox_ops SET state = ? WHERE id = ?",
                params![OpState::Dead.as_str(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn list_dead(&self) -> Result<Vec<QueuedOperation>> {
        self.list_with_state(OpState::Dead).await
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM outbox_ops WHERE state = ?",
                [OpState::Pending.as_str()],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::WALK_SESSION_ENTITY;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn pause_op(user: &str, session: &str) -> QueuedOperation {
        QueuedOperation::new(
            WALK_SESSION_ENTITY,
            "pause",
            serde_json::json!({"session_id": session, "paused_at": 1000}),
            user,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_and_list_preserves_fifo_order() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op1 = pause_op("user-1", "s-1");
        let op2 = pause_op("user-1", "s-2");
        let op3 = pause_op("user-1", "s-3");
        repo.append(&op1).await.unwrap();
        repo.append(&op2).await.unwrap();
        repo.append(&op3).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, op1.id);
        assert_eq!(listed[1].id, op2.id);
        assert_eq!(listed[2].id, op3.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_rejects_missing_structural_fields() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let mut op = pause_op("user-1", "s-1");
        op.entity = String::new();
        assert!(matches!(
            repo.append(&op).await,
            Err(Error::InvalidInput(_))
        ));

        let mut op = pause_op("user-1", "s-1");
        op.user_id = "   ".to_string();
        assert!(matches!(
            repo.append(&op).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_count_matches_list_len() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        assert_eq!(repo.count().await.unwrap(), 0);

        repo.append(&pause_op("user-1", "s-1")).await.unwrap();
        repo.append(&pause_op("user-1", "s-2")).await.unwrap();

        let listed = repo.list().await.unwrap();
        assert_eq!(repo.count().await.unwrap(), listed.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_deletes_operation() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op = pause_op("user-1", "s-1");
        repo.append(&op).await.unwrap();
        repo.remove(&op.id).await.unwrap();

        assert!(repo.list().await.unwrap().is_empty());
        assert!(matches!(
            repo.remove(&op.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_persists_attempts_and_error() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let mut op = pause_op("user-1", "s-1");
        repo.append(&op).await.unwrap();

        op.attempts += 1;
        op.last_error = Some("record not found".to_string());
        repo.update(&op).await.unwrap();

        let stored = repo.get(&op.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("record not found"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_dead_removes_from_pending() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let op1 = pause_op("user-1", "s-1");
        let op2 = pause_op("user-1", "s-2");
        repo.append(&op1).await.unwrap();
        repo.append(&op2).await.unwrap();

        repo.mark_dead(&op1.id).await.unwrap();

        let pending = repo.list().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, op2.id);
        assert_eq!(repo.count().await.unwrap(), 1);

        let dead = repo.list_dead().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, op1.id);
        assert_eq!(dead[0].state, OpState::Dead);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("outbox.db");

        let op = pause_op("user-1", "s-1");
        {
            let db = Database::open(&db_path).await.unwrap();
            let repo = LibSqlOutboxRepository::new(db.connection());
            repo.append(&op).await.unwrap();
        }

        let db = Database::open(&db_path).await.unwrap();
        let repo = LibSqlOutboxRepository::new(db.connection());
        let listed = repo.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, op.id);
        assert_eq!(listed[0].payload["session_id"], "s-1");
    }
}

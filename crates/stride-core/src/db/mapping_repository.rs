//! Local-to-server ID mapping repository implementation

use crate::error::{Error, Result};
use libsql::{params, Connection};

/// Trait for ID mapping storage operations (async)
///
/// A mapping is recorded once per successful `start` delivery and persists
/// until explicitly cleared; every later operation in the same session
/// lifecycle resolves through it.
#[allow(async_fn_in_trait)]
pub trait IdMapRepository {
    /// Record a local-to-server association
    async fn set_mapping(&self, local_id: &str, server_id: &str) -> Result<()>;

    /// Resolve an ID that may be local or already server-assigned
    ///
    /// Returns the mapped server ID when one exists, otherwise the input
    /// unchanged (pass-through).
    async fn resolve(&self, id: &str) -> Result<String>;

    /// Drop all recorded mappings
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `IdMapRepository`
pub struct LibSqlIdMapRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlIdMapRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IdMapRepository for LibSqlIdMapRepository<'_> {
    async fn set_mapping(&self, local_id: &str, server_id: &str) -> Result<()> {
        if local_id.trim().is_empty() || server_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Mapping IDs must not be empty".into(),
            ));
        }

        self.conn
            .execute(
                "INSERT OR REPLACE INTO id_map (local_id, server_id, created_at) VALUES (?, ?, ?)",
                params![local_id, server_id, crate::util::unix_timestamp_ms()],
            )
            .await?;
        Ok(())
    }

    async fn resolve(&self, id: &str) -> Result<String> {
        let mut rows = self
            .conn
            .query("SELECT server_id FROM id_map WHERE local_id = ?", [id])
            .await?;

        if let Some(row) = rows.next().await? {
            let server_id: String = row.get(0)?;
            Ok(server_id)
        } else {
            Ok(id.to_string())
        }
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM id_map", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_mapped_id() {
        let db = setup().await;
        let repo = LibSqlIdMapRepository::new(db.connection());

        repo.set_mapping("tmp1", "srv-42").await.unwrap();
        assert_eq!(repo.resolve("tmp1").await.unwrap(), "srv-42");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_passes_unmapped_id_through() {
        let db = setup().await;
        let repo = LibSqlIdMapRepository::new(db.connection());

        assert_eq!(repo.resolve("srv-7").await.unwrap(), "srv-7");
        assert_eq!(repo.resolve("tmp2").await.unwrap(), "tmp2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_mapping_rejects_empty_ids() {
        let db = setup().await;
        let repo = LibSqlIdMapRepository::new(db.connection());

        assert!(repo.set_mapping("", "srv-1").await.is_err());
        assert!(repo.set_mapping("tmp1", "  ").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_drops_all_mappings() {
        let db = setup().await;
        let repo = LibSqlIdMapRepository::new(db.connection());

        repo.set_mapping("tmp1", "srv-1").await.unwrap();
        repo.set_mapping("tmp2", "srv-2").await.unwrap();
        repo.clear().await.unwrap();

        assert_eq!(repo.resolve("tmp1").await.unwrap(), "tmp1");
        assert_eq!(repo.resolve("tmp2").await.unwrap(), "tmp2");
    }
}

use crate::clock::Clock;
use crate::directory::error::{DirectoryError, DirectoryResult};
use crate::directory::types::{RegisterServerRequest, ServerEntry};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// SQLite-backed directory entry set.
///
/// The cap check and the insert run in one transaction, so the entry limit
/// holds under concurrent registration.
pub struct DirectoryStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    cap: i64,
}

impl DirectoryStore {
    pub async fn new(
        db_url: &str,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
        cap: i64,
    ) -> DirectoryResult<Self> {
        let pool = SqlitePool::connect(db_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                server_id TEXT PRIMARY KEY,
                endpoint TEXT NOT NULL,
                public_key TEXT,
                region TEXT,
                registered_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_servers_last_seen ON servers(last_seen)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            clock,
            ttl_ms,
            cap,
        })
    }

    /// In-memory database (for testing).
    pub async fn new_in_memory(
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
        cap: i64,
    ) -> DirectoryResult<Self> {
        Self::new("sqlite::memory:", clock, ttl_ms, cap).await
    }

    /// Register or refresh an entry. `registered_at` survives
    /// re-registration; the cap only applies to new ids.
    pub async fn upsert(&self, req: &RegisterServerRequest) -> DirectoryResult<ServerEntry> {
        let now = self.clock.now_ms();
        let mut tx = self.pool.begin().await?;

        let existing_registered_at: Option<i64> =
            sqlx::query("SELECT registered_at FROM servers WHERE server_id = ?")
                .bind(&req.server_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("registered_at"))
                .transpose()?;

        if existing_registered_at.is_none() {
            let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM servers")
                .fetch_one(&mut *tx)
                .await?
                .try_get("n")?;
            if count >= self.cap {
                return Err(DirectoryError::CapacityExceeded);
            }
        }

        let registered_at = existing_registered_at.unwrap_or(now);
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO servers
            (server_id, endpoint, public_key, region, registered_at, last_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.server_id)
        .bind(&req.endpoint)
        .bind(&req.public_key)
        .bind(&req.region)
        .bind(registered_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ServerEntry {
            server_id: req.server_id.clone(),
            endpoint: req.endpoint.clone(),
            public_key: req.public_key.clone(),
            region: req.region.clone(),
            registered_at,
            last_seen: now,
        })
    }

    /// All live entries; stale ones are swept in the same call.
    pub async fn list_live(&self) -> DirectoryResult<Vec<ServerEntry>> {
        self.sweep().await?;

        let rows = sqlx::query("SELECT * FROM servers ORDER BY server_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    /// Refresh an entry's liveness; returns the live peer list excluding the
    /// caller.
    pub async fn heartbeat(&self, server_id: &str) -> DirectoryResult<Vec<ServerEntry>> {
        let now = self.clock.now_ms();
        let cutoff = now - self.ttl_ms;

        // A stale entry is already dead even if the sweep has not caught it.
        let updated =
            sqlx::query("UPDATE servers SET last_seen = ? WHERE server_id = ? AND last_seen > ?")
                .bind(now)
                .bind(server_id)
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if updated == 0 {
            return Err(DirectoryError::NotFound);
        }

        Ok(self
            .list_live()
            .await?
            .into_iter()
            .filter(|entry| entry.server_id != server_id)
            .collect())
    }

    pub async fn get(&self, server_id: &str) -> DirectoryResult<Option<ServerEntry>> {
        let row = sqlx::query("SELECT * FROM servers WHERE server_id = ?")
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    /// Idempotent delete; reports whether an entry was removed.
    pub async fn delete(&self, server_id: &str) -> DirectoryResult<bool> {
        let removed = sqlx::query("DELETE FROM servers WHERE server_id = ?")
            .bind(server_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }

    /// Drop entries whose liveness window has lapsed.
    pub async fn sweep(&self) -> DirectoryResult<u64> {
        let cutoff = self.clock.now_ms() - self.ttl_ms;
        let removed = sqlx::query("DELETE FROM servers WHERE last_seen <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed)
    }

    pub async fn count(&self) -> DirectoryResult<i64> {
        let count = sqlx::query("SELECT COUNT(*) AS n FROM servers")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(count)
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> DirectoryResult<ServerEntry> {
        Ok(ServerEntry {
            server_id: row.try_get("server_id")?,
            endpoint: row.try_get("endpoint")?,
            public_key: row.try_get("public_key")?,
            region: row.try_get("region")?,
            registered_at: row.try_get("registered_at")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TTL_MS: i64 = 5 * 60 * 1000;

    fn request(id: &str) -> RegisterServerRequest {
        RegisterServerRequest {
            server_id: id.to_string(),
            endpoint: format!("wss://{id}.example.org/ws"),
            public_key: None,
            region: None,
        }
    }

    async fn store(clock: Arc<ManualClock>, cap: i64) -> DirectoryStore {
        DirectoryStore::new_in_memory(clock, TTL_MS, cap)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = store(clock, 10).await;

        store.upsert(&request("srv-A")).await.unwrap();
        let servers = store.list_live().await.unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_id, "srv-A");
        assert_eq!(servers[0].registered_at, 1_000);
    }

    #[tokio::test]
    async fn test_reregistration_preserves_registered_at() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = store(clock.clone(), 10).await;

        store.upsert(&request("srv-A")).await.unwrap();
        clock.advance(60_000);
        let entry = store.upsert(&request("srv-A")).await.unwrap();

        assert_eq!(entry.registered_at, 1_000);
        assert_eq!(entry.last_seen, 61_000);
    }

    #[tokio::test]
    async fn test_capacity_cap_blocks_new_ids_only() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock, 2).await;

        store.upsert(&request("srv-A")).await.unwrap();
        store.upsert(&request("srv-B")).await.unwrap();

        let err = store.upsert(&request("srv-C")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::CapacityExceeded));

        // Refreshing an existing id is still allowed at the cap.
        store.upsert(&request("srv-A")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_entries_swept_on_read() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock.clone(), 10).await;

        store.upsert(&request("srv-A")).await.unwrap();
        clock.advance(TTL_MS); // last_seen + ttl == now is stale

        assert!(store.list_live().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_and_excludes_self() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock.clone(), 10).await;

        store.upsert(&request("srv-A")).await.unwrap();
        store.upsert(&request("srv-B")).await.unwrap();

        clock.advance(TTL_MS - 1);
        let peers = store.heartbeat("srv-A").await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].server_id, "srv-B");

        // srv-B lapses; srv-A lives on its refreshed heartbeat.
        clock.advance(1);
        let servers = store.list_live().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_id, "srv-A");
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_or_stale_is_not_found() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock.clone(), 10).await;

        let err = store.heartbeat("ghost").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound));

        store.upsert(&request("srv-A")).await.unwrap();
        clock.advance(TTL_MS);
        let err = store.heartbeat("srv-A").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let clock = Arc::new(ManualClock::new(0));
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("directory.db").display()
        );

        {
            let store = DirectoryStore::new(&db_url, clock.clone(), TTL_MS, 10)
                .await
                .unwrap();
            store.upsert(&request("srv-A")).await.unwrap();
        }

        let store = DirectoryStore::new(&db_url, clock, TTL_MS, 10).await.unwrap();
        let servers = store.list_live().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_id, "srv-A");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock, 10).await;

        store.upsert(&request("srv-A")).await.unwrap();
        assert!(store.delete("srv-A").await.unwrap());
        assert!(!store.delete("srv-A").await.unwrap());
    }
}

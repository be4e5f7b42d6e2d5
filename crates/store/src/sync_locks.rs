//! Per-workspace mutual exclusion for background resyncs.
//!
//! The lock lives in the same database as the cache so it also coordinates
//! independently-scheduled workers sharing one store. A lock is active iff a
//! row exists and is younger than `stale_after`; it goes free purely by time,
//! though the sync task releases it explicitly on success.

use std::time::Duration;

use {sqlx::SqlitePool, tracing::debug};

use crate::{Result, now_secs};

#[derive(Clone)]
pub struct SyncLockStore {
    pool: SqlitePool,
    stale_after: Duration,
}

impl SyncLockStore {
    pub fn new(pool: SqlitePool, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    fn stale_before(&self, now: i64) -> i64 {
        now - self.stale_after.as_secs() as i64
    }

    /// Try to take the workspace lock.
    ///
    /// Check-and-set in a single statement, so a race between concurrent
    /// acquirers yields exactly one winner: the insert only lands when no
    /// row exists, and the conflict update only fires against a stale row.
    pub async fn try_acquire(&self, workspace_id: &str) -> Result<bool> {
        let now = now_secs();
        let acquired = sqlx::query(
            r#"INSERT INTO sync_locks (workspace_id, locked_at) VALUES (?, ?)
               ON CONFLICT(workspace_id) DO UPDATE SET locked_at = excluded.locked_at
               WHERE sync_locks.locked_at < ?"#,
        )
        .bind(workspace_id)
        .bind(now)
        .bind(self.stale_before(now))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        debug!(workspace_id, acquired, "sync lock acquire attempt");
        Ok(acquired)
    }

    /// Drop the lock row. Called after a successful resync; a failed resync
    /// leaves the row to expire so a later request can retry.
    pub async fn release(&self, workspace_id: &str) -> Result<()> {
        let released = sqlx::query("DELETE FROM sync_locks WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;
        debug!(workspace_id, released, "sync lock release");
        Ok(())
    }

    /// Whether the workspace lock is currently held and fresh. Feeds the
    /// externally visible `sync_status`.
    pub async fn is_held(&self, workspace_id: &str) -> Result<bool> {
        let now = now_secs();
        let locked_at: Option<i64> =
            sqlx::query_scalar("SELECT locked_at FROM sync_locks WHERE workspace_id = ?")
                .bind(workspace_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(locked_at.is_some_and(|at| at >= self.stale_before(now)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    const STALE_AFTER: Duration = Duration::from_secs(600);

    async fn test_locks() -> SyncLockStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::init(&pool).await.unwrap();
        SyncLockStore::new(pool, STALE_AFTER)
    }

    async fn backdate(locks: &SyncLockStore, workspace_id: &str, age: Duration) {
        sqlx::query("UPDATE sync_locks SET locked_at = ? WHERE workspace_id = ?")
            .bind(now_secs() - age.as_secs() as i64)
            .bind(workspace_id)
            .execute(&locks.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_acquire_fails_while_fresh() {
        let locks = test_locks().await;
        assert!(locks.try_acquire("T1").await.unwrap());
        assert!(!locks.try_acquire("T1").await.unwrap());
        assert!(locks.is_held("T1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_acquires_have_exactly_one_winner() {
        let locks = test_locks().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            handles.push(tokio::spawn(
                async move { locks.try_acquire("T1").await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimable() {
        let locks = test_locks().await;
        assert!(locks.try_acquire("T1").await.unwrap());
        backdate(&locks, "T1", STALE_AFTER + Duration::from_secs(1)).await;

        assert!(!locks.is_held("T1").await.unwrap());
        assert!(locks.try_acquire("T1").await.unwrap());
    }

    #[tokio::test]
    async fn nearly_stale_lock_is_not_reclaimable() {
        let locks = test_locks().await;
        assert!(locks.try_acquire("T1").await.unwrap());
        backdate(&locks, "T1", STALE_AFTER - Duration::from_secs(1)).await;

        assert!(locks.is_held("T1").await.unwrap());
        assert!(!locks.try_acquire("T1").await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_lock() {
        let locks = test_locks().await;
        assert!(locks.try_acquire("T1").await.unwrap());
        locks.release("T1").await.unwrap();

        assert!(!locks.is_held("T1").await.unwrap());
        assert!(locks.try_acquire("T1").await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_scoped_per_workspace() {
        let locks = test_locks().await;
        assert!(locks.try_acquire("T1").await.unwrap());
        assert!(locks.try_acquire("T2").await.unwrap());
    }
}

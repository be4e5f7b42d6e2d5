//! SQLite persistence for the channel cache and the per-workspace sync
//! locks.
//!
//! Both stores share one pool. All channel-name keys go through
//! [`normalize_name`] so `"General"`, `" general "` and `"GENERAL"` collide
//! to a single row.

pub mod channels;
pub mod sync_locks;

pub use {
    channels::{ChannelRecord, ChannelStore, NewChannel},
    sync_locks::SyncLockStore,
};

use sqlx::SqlitePool;

/// Crate-wide result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Channel names are keyed trimmed and lower-cased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Unix seconds.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Create the schema if it does not exist yet.
///
/// Called once at startup; tests use it against in-memory pools.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS workspace_channels (
            workspace_id TEXT    NOT NULL,
            channel_id   TEXT    NOT NULL,
            name         TEXT    NOT NULL,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            created_at   INTEGER NOT NULL,
            updated_at   INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, channel_id)
        )"#,
    )
    .execute(pool)
    .await?;

    // One live row per (workspace, normalized name); archived rows may keep
    // their old names.
    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS uq_workspace_channel_name
           ON workspace_channels (workspace_id, name) WHERE is_archived = 0"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS sync_locks (
            workspace_id TEXT    PRIMARY KEY,
            locked_at    INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

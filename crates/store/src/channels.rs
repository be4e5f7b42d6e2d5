//! Cached channel records, keyed by (workspace, upstream id) and by
//! (workspace, normalized name).

use {
    sqlx::{SqliteConnection, SqlitePool},
    tracing::debug,
};

use crate::{Error, Result, normalize_name, now_secs};

/// A cached channel row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChannelRecord {
    pub workspace_id: String,
    pub channel_id: String,
    /// Stored normalized (trimmed, lower-cased).
    pub name: String,
    pub is_archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for an upsert, before timestamps are assigned.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub channel_id: String,
    pub name: String,
    pub is_archived: bool,
}

/// SQLite-backed channel cache.
#[derive(Clone)]
pub struct ChannelStore {
    pool: SqlitePool,
}

impl ChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Point lookup by normalized name. Archived rows are invisible here;
    /// deletion is represented as `is_archived = 1`.
    pub async fn get_by_name(&self, workspace_id: &str, name: &str) -> Result<Option<ChannelRecord>> {
        let normalized = normalize_name(name);
        let row = sqlx::query_as::<_, ChannelRecord>(
            "SELECT * FROM workspace_channels
             WHERE workspace_id = ? AND name = ? AND is_archived = 0",
        )
        .bind(workspace_id)
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await?;
        debug!(workspace_id, name = %normalized, found = row.is_some(), "channel lookup by name");
        Ok(row)
    }

    /// Point lookup by upstream channel id, archived or not.
    pub async fn get_by_id(
        &self,
        workspace_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelRecord>> {
        let row = sqlx::query_as::<_, ChannelRecord>(
            "SELECT * FROM workspace_channels WHERE workspace_id = ? AND channel_id = ?",
        )
        .bind(workspace_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Idempotent insert-or-update. Matches by upstream id first, then by
    /// the live row with the same normalized name (the sync path may learn a
    /// new id for a name created out-of-band), then inserts.
    pub async fn upsert(&self, workspace_id: &str, channel: NewChannel) -> Result<ChannelRecord> {
        let channels = std::slice::from_ref(&channel);
        retry_insert_race(|| self.upsert_round(workspace_id, channels)).await?;

        let row = sqlx::query_as::<_, ChannelRecord>(
            "SELECT * FROM workspace_channels WHERE workspace_id = ? AND channel_id = ?",
        )
        .bind(workspace_id)
        .bind(&channel.channel_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Apply one resync round as a single atomic unit: readers see either
    /// the whole round or none of it.
    pub async fn bulk_upsert(
        &self,
        workspace_id: &str,
        channels: Vec<NewChannel>,
    ) -> Result<usize> {
        let count = channels.len();
        retry_insert_race(|| self.upsert_round(workspace_id, &channels)).await?;
        debug!(workspace_id, synced = count, "bulk upsert committed");
        Ok(count)
    }

    /// One transactional upsert round over a batch of channels.
    async fn upsert_round(&self, workspace_id: &str, channels: &[NewChannel]) -> Result<()> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;
        for channel in channels {
            upsert_in(&mut *tx, workspace_id, channel, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Lifecycle rename, keyed by upstream id. Inserts when the channel is
    /// unknown locally (created and renamed are both upserts).
    pub async fn apply_rename(
        &self,
        workspace_id: &str,
        channel_id: &str,
        name: &str,
    ) -> Result<()> {
        let normalized = normalize_name(name);
        let now = now_secs();
        let updated = sqlx::query(
            "UPDATE workspace_channels SET name = ?, updated_at = ?
             WHERE workspace_id = ? AND channel_id = ?",
        )
        .bind(&normalized)
        .bind(now)
        .bind(workspace_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(
                "INSERT INTO workspace_channels
                 (workspace_id, channel_id, name, is_archived, created_at, updated_at)
                 VALUES (?, ?, ?, 0, ?, ?)",
            )
            .bind(workspace_id)
            .bind(channel_id)
            .bind(&normalized)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Lifecycle delete: mark archived, never remove the row.
    pub async fn apply_archive(&self, workspace_id: &str, channel_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workspace_channels SET is_archived = 1, updated_at = ?
             WHERE workspace_id = ? AND channel_id = ?",
        )
        .bind(now_secs())
        .bind(workspace_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Rerun an upsert round once if it lost an insert race.
///
/// Two writers can both miss the name match and insert the same normalized
/// name; the loser hits the unique index. The round is idempotent, so a
/// rerun cannot duplicate data: the loser's second attempt lands on the
/// name-match update. Any second failure is surfaced.
async fn retry_insert_race<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(err) if is_unique_violation(&err) => {
            debug!(error = %err, "upsert lost an insert race, retrying once");
            op().await
        },
        other => other,
    }
}

fn is_unique_violation(err: &Error) -> bool {
    let Error::Sqlx(inner) = err;
    matches!(inner, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Upsert against an open transaction. Id match wins over name match.
async fn upsert_in(
    conn: &mut SqliteConnection,
    workspace_id: &str,
    channel: &NewChannel,
    now: i64,
) -> Result<()> {
    let normalized = normalize_name(&channel.name);

    let by_id = sqlx::query(
        "UPDATE workspace_channels SET name = ?, is_archived = ?, updated_at = ?
         WHERE workspace_id = ? AND channel_id = ?",
    )
    .bind(&normalized)
    .bind(channel.is_archived)
    .bind(now)
    .bind(workspace_id)
    .bind(&channel.channel_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if by_id > 0 {
        return Ok(());
    }

    let by_name = sqlx::query(
        "UPDATE workspace_channels SET channel_id = ?, is_archived = ?, updated_at = ?
         WHERE workspace_id = ? AND name = ? AND is_archived = 0",
    )
    .bind(&channel.channel_id)
    .bind(channel.is_archived)
    .bind(now)
    .bind(workspace_id)
    .bind(&normalized)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if by_name > 0 {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO workspace_channels
         (workspace_id, channel_id, name, is_archived, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(workspace_id)
    .bind(&channel.channel_id)
    .bind(&normalized)
    .bind(channel.is_archived)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

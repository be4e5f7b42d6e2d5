//! Channel cache orchestration.
//!
//! The read path only ever consults the local cache. The create path goes
//! upstream and, on a name conflict, tries to take the per-workspace sync
//! lock and schedule a detached full resync; the losing side of that race
//! reports `sync_in_progress` and schedules nothing, so at most one resync
//! is in flight per workspace.

pub mod events;

pub use events::{ChannelEvent, EventIngestor};

use std::sync::Arc;

use {
    serde::{Deserialize, Serialize},
    tracing::{error, info},
};

use {
    slackproxy_store::{ChannelRecord, ChannelStore, NewChannel, SyncLockStore, normalize_name},
    slackproxy_upstream::{UpstreamApi, UpstreamError},
};

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad or missing credential; the workspace could not be resolved.
    #[error("{detail}")]
    Unauthorized { detail: String },

    /// Upstream failed in a way the caller must see (never converted to
    /// not-found). Carries the upstream detail text verbatim.
    #[error("{detail}")]
    Upstream { detail: String },

    #[error(transparent)]
    Store(#[from] slackproxy_store::Error),
}

impl From<UpstreamError> for ServiceError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthorized { detail } => Self::Unauthorized { detail },
            other => Self::Upstream {
                detail: other.to_string(),
            },
        }
    }
}

/// Where a response was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Db,
    Slack,
    SyncQueued,
    SyncInProgress,
}

/// Externally visible cache-freshness hint.
///
/// `SyncQueued` is one-shot: only the request that just scheduled a resync
/// reports it; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    SyncQueued,
    SyncInProgress,
}

/// Response shape for both the read and the create path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReply {
    pub id: String,
    pub name: String,
    pub source: ReplySource,
    pub exists: bool,
    pub sync_status: Option<SyncStatus>,
}

impl ChannelReply {
    fn from_record(record: &ChannelRecord, source: ReplySource, sync_status: Option<SyncStatus>) -> Self {
        Self {
            id: record.channel_id.clone(),
            name: record.name.clone(),
            source,
            exists: source != ReplySource::Slack,
            sync_status,
        }
    }
}

/// Orchestrates the cache read path and the upstream create path.
pub struct ChannelService {
    upstream: Arc<dyn UpstreamApi>,
    channels: ChannelStore,
    locks: SyncLockStore,
}

impl ChannelService {
    pub fn new(upstream: Arc<dyn UpstreamApi>, channels: ChannelStore, locks: SyncLockStore) -> Self {
        Self {
            upstream,
            channels,
            locks,
        }
    }

    /// Cache-only lookup. Never calls upstream beyond resolving the
    /// workspace behind the caller's token.
    pub async fn read_channel(&self, token: &str, name: &str) -> Result<ChannelReply> {
        let workspace_id = self.upstream.resolve_workspace(token).await?;
        let normalized = normalize_name(name);

        let hit = self.channels.get_by_name(&workspace_id, &normalized).await?;
        let sync_status = self.current_sync_status(&workspace_id).await?;
        info!(
            workspace_id = %workspace_id,
            name = %normalized,
            found = hit.is_some(),
            "channel read"
        );

        Ok(match hit {
            Some(record) => ChannelReply::from_record(&record, ReplySource::Db, sync_status),
            None => ChannelReply {
                id: String::new(),
                name: normalized,
                source: ReplySource::Db,
                exists: false,
                sync_status,
            },
        })
    }

    /// Create upstream; on a name conflict, try to schedule a background
    /// resync and answer from whatever the cache already holds.
    pub async fn create_channel(&self, token: &str, name: &str) -> Result<ChannelReply> {
        let workspace_id = self.upstream.resolve_workspace(token).await?;
        let normalized = normalize_name(name);

        match self.upstream.create_channel(token, &normalized).await {
            Ok(channel) => {
                let record = self
                    .channels
                    .upsert(&workspace_id, NewChannel {
                        channel_id: channel.id,
                        name: channel.name,
                        is_archived: channel.is_archived,
                    })
                    .await?;
                info!(workspace_id = %workspace_id, channel_id = %record.channel_id, "channel created upstream");
                Ok(ChannelReply::from_record(&record, ReplySource::Slack, None))
            },
            Err(UpstreamError::Conflict) => {
                self.handle_create_conflict(&workspace_id, token, &normalized)
                    .await
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn handle_create_conflict(
        &self,
        workspace_id: &str,
        token: &str,
        name: &str,
    ) -> Result<ChannelReply> {
        if !self.locks.try_acquire(workspace_id).await? {
            info!(workspace_id = %workspace_id, name = %name, "conflict while resync in flight");
            return Ok(ChannelReply {
                id: String::new(),
                name: name.to_string(),
                source: ReplySource::SyncInProgress,
                exists: true,
                sync_status: Some(SyncStatus::SyncInProgress),
            });
        }

        self.spawn_resync(workspace_id.to_string(), token.to_string());

        // Answer synchronously from whatever is cached right now.
        let cached = self.channels.get_by_name(workspace_id, name).await?;
        info!(
            workspace_id = %workspace_id,
            name = %name,
            cached = cached.is_some(),
            "conflict queued background resync"
        );
        Ok(match cached {
            Some(record) => {
                ChannelReply::from_record(&record, ReplySource::Db, Some(SyncStatus::SyncQueued))
            },
            None => ChannelReply {
                id: String::new(),
                name: name.to_string(),
                source: ReplySource::SyncQueued,
                exists: true,
                sync_status: Some(SyncStatus::SyncQueued),
            },
        })
    }

    /// Detached resync task. Outlives the triggering request; failures are
    /// logged and the lock is left to expire so a later request can retry.
    fn spawn_resync(&self, workspace_id: String, token: String) {
        let upstream = Arc::clone(&self.upstream);
        let channels = self.channels.clone();
        let locks = self.locks.clone();

        tokio::spawn(async move {
            match run_resync(&*upstream, &channels, &workspace_id, &token).await {
                Ok(synced) => {
                    if let Err(e) = locks.release(&workspace_id).await {
                        error!(workspace_id = %workspace_id, error = %e, "failed to release sync lock");
                    }
                    info!(workspace_id = %workspace_id, synced, "background channel sync completed");
                },
                Err(e) => {
                    error!(workspace_id = %workspace_id, error = %e, "background channel sync failed");
                },
            }
        });
    }

    async fn current_sync_status(&self, workspace_id: &str) -> Result<Option<SyncStatus>> {
        Ok(self
            .locks
            .is_held(workspace_id)
            .await?
            .then_some(SyncStatus::SyncInProgress))
    }
}

/// One full refetch of the workspace channel list, applied atomically.
async fn run_resync(
    upstream: &dyn UpstreamApi,
    channels: &ChannelStore,
    workspace_id: &str,
    token: &str,
) -> Result<usize> {
    let listed = upstream.list_channels(token).await?;
    let records = listed
        .into_iter()
        .map(|c| NewChannel {
            channel_id: c.id,
            name: c.name,
            is_archived: c.is_archived,
        })
        .collect();
    Ok(channels.bulk_upsert(workspace_id, records).await?)
}

//! Inbound channel lifecycle notifications.
//!
//! Applied straight to the cache, bypassing the sync lock: events are
//! authoritative single-channel facts, not a resync round. Signature
//! verification happens at the HTTP boundary before anything reaches this
//! module.

use {
    serde::Deserialize,
    tracing::{debug, info},
};

use slackproxy_store::{ChannelStore, NewChannel};

/// The lifecycle event kinds we act on. Anything else deserializes to
/// `Other` and is accepted and ignored, so upstream API evolution does not
/// turn into webhook failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "channel_created")]
    Created { channel: ChannelInfo },
    #[serde(rename = "channel_rename")]
    Renamed { channel: ChannelInfo },
    #[serde(rename = "channel_deleted")]
    Deleted { channel: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
}

/// Applies lifecycle events to the channel cache.
#[derive(Clone)]
pub struct EventIngestor {
    channels: ChannelStore,
}

impl EventIngestor {
    pub fn new(channels: ChannelStore) -> Self {
        Self { channels }
    }

    pub async fn apply(
        &self,
        workspace_id: &str,
        event: ChannelEvent,
    ) -> slackproxy_store::Result<()> {
        match event {
            ChannelEvent::Created { channel } => {
                info!(workspace_id, channel_id = %channel.id, name = %channel.name, "channel created event");
                self.channels
                    .upsert(workspace_id, NewChannel {
                        channel_id: channel.id,
                        name: channel.name,
                        is_archived: channel.is_archived,
                    })
                    .await?;
            },
            ChannelEvent::Renamed { channel } => {
                info!(workspace_id, channel_id = %channel.id, name = %channel.name, "channel rename event");
                self.channels
                    .apply_rename(workspace_id, &channel.id, &channel.name)
                    .await?;
            },
            ChannelEvent::Deleted { channel } => {
                info!(workspace_id, channel_id = %channel, "channel deleted event");
                self.channels.apply_archive(workspace_id, &channel).await?;
            },
            ChannelEvent::Other => {
                debug!(workspace_id, "ignoring unsupported event kind");
            },
        }
        Ok(())
    }
}

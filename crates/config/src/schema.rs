use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub slack: SlackConfig,
    pub sync: SyncConfig,
    pub database_url: Option<String>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Upstream Slack API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Base URL of the Slack Web API.
    pub base_url: String,
    /// Signing secret used to verify inbound event webhooks.
    pub signing_secret: String,
    /// Maximum age of a webhook timestamp before it is rejected.
    pub signature_tolerance_secs: u64,
    /// Total attempts for a rate-limited upstream call.
    pub max_retries: u32,
    /// Fallback delay when a 429 carries no Retry-After header.
    pub retry_delay_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/api".into(),
            signing_secret: String::new(),
            signature_tolerance_secs: 300,
            max_retries: 5,
            retry_delay_secs: 1,
        }
    }
}

/// Background resync coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Age after which a held sync lock becomes reclaimable.
    pub stale_lock_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_lock_secs: 600,
        }
    }
}

impl Settings {
    /// Database URL with the default SQLite location applied.
    #[must_use]
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| "sqlite://data/slackproxy.db".into())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.slack.base_url, "https://slack.com/api");
        assert_eq!(s.slack.max_retries, 5);
        assert_eq!(s.slack.signature_tolerance_secs, 300);
        assert_eq!(s.sync.stale_lock_secs, 600);
        assert_eq!(s.database_url(), "sqlite://data/slackproxy.db");
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let s: Settings = toml::from_str(
            r#"
            [slack]
            base_url = "http://127.0.0.1:9999/api"

            [sync]
            stale_lock_secs = 120
            "#,
        )
        .expect("parse");
        assert_eq!(s.slack.base_url, "http://127.0.0.1:9999/api");
        assert_eq!(s.sync.stale_lock_secs, 120);
        assert_eq!(s.slack.max_retries, 5);
        assert_eq!(s.server.host, "0.0.0.0");
    }
}

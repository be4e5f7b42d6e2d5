use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::schema::Settings;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["slackproxy.toml"];

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let settings = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(settings)
}

/// Discover and load config from standard locations, then apply
/// environment-variable overrides.
///
/// Search order:
/// 1. `./slackproxy.toml` (project-local)
/// 2. `~/.config/slackproxy/slackproxy.toml` (user-global)
///
/// Returns `Settings::default()` (plus env overrides) if no file is found.
pub fn discover_and_load() -> Settings {
    let mut settings = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                Settings::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        Settings::default()
    };

    apply_env_overrides(&mut settings, &std::env::vars().collect());
    settings
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "slackproxy") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Apply per-field environment overrides from the given variable map.
fn apply_env_overrides(settings: &mut Settings, vars: &HashMap<String, String>) {
    if let Some(v) = vars.get("SLACKPROXY_HOST") {
        settings.server.host = v.clone();
    }
    if let Some(v) = vars.get("SLACKPROXY_PORT") {
        match v.parse() {
            Ok(port) => settings.server.port = port,
            Err(_) => warn!(value = %v, "ignoring invalid SLACKPROXY_PORT"),
        }
    }
    if let Some(v) = vars.get("DATABASE_URL") {
        settings.database_url = Some(v.clone());
    }
    if let Some(v) = vars.get("SLACK_BASE_URL") {
        settings.slack.base_url = v.clone();
    }
    if let Some(v) = vars.get("SLACK_SIGNING_SECRET") {
        settings.slack.signing_secret = v.clone();
    }
    if let Some(v) = vars.get("SLACK_SIGNATURE_TOLERANCE_SECS")
        && let Ok(secs) = v.parse()
    {
        settings.slack.signature_tolerance_secs = secs;
    }
    if let Some(v) = vars.get("SLACK_MAX_RETRIES")
        && let Ok(n) = v.parse()
    {
        settings.slack.max_retries = n;
    }
    if let Some(v) = vars.get("SLACK_RETRY_DELAY_SECS")
        && let Ok(secs) = v.parse()
    {
        settings.slack.retry_delay_secs = secs;
    }
    if let Some(v) = vars.get("SYNC_STALE_LOCK_SECS")
        && let Ok(secs) = v.parse()
    {
        settings.sync.stale_lock_secs = secs;
    }
}

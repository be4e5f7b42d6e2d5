//! Configuration loading for the proxy.
//!
//! Config file: `slackproxy.toml`, searched in `./` then
//! `~/.config/slackproxy/`. Every field can also be overridden through an
//! environment variable, so a bare deployment needs no file at all.

pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{ServerConfig, Settings, SlackConfig, SyncConfig},
};

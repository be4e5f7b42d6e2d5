use std::{str::FromStr, sync::Arc, time::Duration};

use {
    clap::Parser,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    slackproxy_gateway::{AppState, build_app},
    slackproxy_service::{ChannelService, EventIngestor},
    slackproxy_store::{ChannelStore, SyncLockStore},
    slackproxy_upstream::SlackClient,
};

#[derive(Parser)]
#[command(name = "slackproxy", about = "Caching proxy for the Slack channel directory")]
struct Cli {
    /// Address to bind to (overrides config value).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long)]
    port: Option<u16>,
    /// Database URL (overrides config value).
    #[arg(long)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// For file-backed SQLite URLs, make sure the parent directory exists.
fn prepare_sqlite_path(database_url: &str) -> anyhow::Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://")
        && path != ":memory:"
        && let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "slackproxy starting");

    let config = slackproxy_config::discover_and_load();

    // CLI args override config values.
    let host = cli.host.unwrap_or(config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let database_url = cli.database_url.unwrap_or_else(|| config.database_url());

    if config.slack.signing_secret.is_empty() {
        warn!("SLACK_SIGNING_SECRET is not set; event webhooks will be rejected");
    }

    prepare_sqlite_path(&database_url)?;
    let pool = SqlitePoolOptions::new()
        .connect_with(SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true))
        .await?;
    slackproxy_store::init(&pool).await?;
    info!(database_url = %database_url, "database ready");

    let upstream = Arc::new(SlackClient::new(
        config.slack.base_url.clone(),
        config.slack.max_retries,
        Duration::from_secs(config.slack.retry_delay_secs),
    ));
    let channels = ChannelStore::new(pool.clone());
    let locks = SyncLockStore::new(pool, Duration::from_secs(config.sync.stale_lock_secs));
    let service = Arc::new(ChannelService::new(upstream, channels.clone(), locks));

    let app = build_app(AppState {
        service,
        ingestor: EventIngestor::new(channels),
        signing_secret: config.slack.signing_secret.clone(),
        signature_tolerance: Duration::from_secs(config.slack.signature_tolerance_secs),
    });

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(addr = %listener.local_addr()?, "slackproxy listening");
    axum::serve(listener, app).await?;

    Ok(())
}

use oltwatch::broadcaster::HubEvent;
use oltwatch::config::MonitorConfig;
use oltwatch::state::AppState;
use oltwatch::store::SqliteStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> oltwatch::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oltwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env()?;
    info!(
        ranges = config.scan_ranges.len(),
        interval_sec = config.scan_interval.as_secs(),
        concurrency = config.concurrency,
        "starting oltwatch"
    );

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    let store = SqliteStore::new(pool);
    store.init_schema().await?;

    let state = AppState::new(config, Arc::new(store));
    let tasks = state.start_background_tasks();

    // Keep an audit trail of everything the hub announces
    let mut subscription = state.subscribe();
    let log_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            match &event {
                HubEvent::ScanStatus {
                    status, message, ..
                } => {
                    info!(status = ?status, message = %message, "scan status");
                }
                HubEvent::Change(change) => {
                    info!(change = ?change, "inventory change");
                }
                HubEvent::Stats(stats) => {
                    info!(
                        devices = stats.total_devices,
                        online = stats.devices_online,
                        terminals = stats.total_terminals,
                        "stats"
                    );
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    log_task.abort();
    for task in tasks {
        task.abort();
    }
    Ok(())
}

use std::sync::Arc;

use tracing::{info, warn};

use bookdrip_core::config::BookdripConfig;
use bookdrip_delivery::{DeliveryService, RunnerConfig};
use bookdrip_store::SqliteRepository;
use bookdrip_telegram::TelegramSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookdrip=info".into()),
        )
        .init();

    // load config: explicit path via BOOKDRIP_CONFIG > ~/.bookdrip/bookdrip.toml
    let config_path = std::env::var("BOOKDRIP_CONFIG").ok();
    let config = BookdripConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        BookdripConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let repo = Arc::new(SqliteRepository::open(db_path)?);

    let Some(ref telegram) = config.telegram else {
        anyhow::bail!("no Telegram bot token configured — set telegram.bot_token in bookdrip.toml");
    };
    let sink = Arc::new(TelegramSink::new(&telegram.bot_token));

    // Delivery results are mirrored onto a channel for observability.
    let (results_tx, mut results_rx) =
        tokio::sync::mpsc::channel::<bookdrip_core::DeliveryResult>(256);
    tokio::spawn(async move {
        while let Some(result) = results_rx.recv().await {
            if result.success {
                info!(
                    schedule_id = result.schedule_id,
                    user_id = result.user_id,
                    book_id = result.book_id,
                    position = result.snippet_position,
                    attempts = result.attempts,
                    "{}",
                    result.message
                );
            } else {
                warn!(
                    schedule_id = result.schedule_id,
                    user_id = result.user_id,
                    book_id = result.book_id,
                    error = result.error.as_deref().unwrap_or(""),
                    "{}",
                    result.message
                );
            }
        }
    });

    let mut service = DeliveryService::new(repo, sink, RunnerConfig::from(&config.delivery))
        .with_results(results_tx);
    service.start();
    info!(
        interval_secs = config.delivery.check_interval_secs,
        "bookdrip delivery engine running — press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    service.stop().await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_retriever::{Retriever, RetrieverConfig, StartSignal};
use courier_store::StoreFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_retriever=info,courier_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier retriever starting...");

    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let factory = Arc::new(StoreFactory::postgres(pool));
    let mut handle = Retriever::spawn(
        factory,
        RetrieverConfig::new(&config.api_key).with_concurrency(config.retriever_concurrency),
    )?;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.retriever_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(
        db_name = %config.db_name,
        interval_ms = config.retriever_interval_ms,
        "Scheduling retrieval passes"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if handle.pending() > 0 {
                    tracing::warn!(
                        db_name = %config.db_name,
                        "Previous retrieval pass still running, skipping"
                    );
                    continue;
                }
                handle.start(StartSignal::new(&config.db_name, &config.api_url)).await?;
            }
            Some(completion) = handle.completions().recv() => {
                tracing::info!(
                    db_name = %completion.start.db_name,
                    "Retrieval pass signalled completion"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    handle.shutdown().await;
    tracing::info!("Courier retriever stopped.");
    Ok(())
}

use std::fs::File;
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_notifier::{ApiClient, Campaign, CampaignOperations, read_rows};
use courier_store::StoreFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_notifier=info,courier_store=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier sender starting...");

    let config = AppConfig::from_env()?;

    let csv_path = std::env::var("CAMPAIGN_CSV")
        .map_err(|_| anyhow::anyhow!("CAMPAIGN_CSV environment variable is required"))?;
    let template_path = std::env::var("CAMPAIGN_TEMPLATE")
        .map_err(|_| anyhow::anyhow!("CAMPAIGN_TEMPLATE environment variable is required"))?;
    let subject = std::env::var("CAMPAIGN_SUBJECT")
        .map_err(|_| anyhow::anyhow!("CAMPAIGN_SUBJECT environment variable is required"))?;
    let template_id = std::env::var("CAMPAIGN_TEMPLATE_ID")
        .map_err(|_| anyhow::anyhow!("CAMPAIGN_TEMPLATE_ID environment variable is required"))?;
    let batch_id =
        std::env::var("CAMPAIGN_BATCH_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());
    let fetch_profiles = std::env::var("CAMPAIGN_FETCH_PROFILES")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let markdown = std::fs::read_to_string(&template_path)
        .with_context(|| format!("failed to read template {template_path}"))?;
    let csv = File::open(&csv_path).with_context(|| format!("failed to open {csv_path}"))?;
    let rows = read_rows(csv)?;
    tracing::info!(rows = rows.len(), batch_id = %batch_id, "Campaign loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let factory = StoreFactory::postgres(pool);
    let store = factory.open(&config.db_name)?;
    let api = ApiClient::new(&config.api_url, &config.api_key)?;
    let ops = CampaignOperations::new(api, Arc::clone(&store));

    let campaign = Campaign {
        subject,
        markdown,
        template_id,
        batch_id,
        due_date_format: config.due_date_format.clone(),
    };

    let run = async {
        if fetch_profiles {
            campaign.fetch_profiles(&ops, &rows).await?;
        }
        campaign.send(&ops, &rows).await
    };

    tokio::select! {
        result = run => {
            let report = result?;
            tracing::info!(
                sent = report.sent,
                not_sent = report.not_sent,
                rejected = report.rejected,
                "Courier sender finished"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping before the batch completed");
        }
    }

    Ok(())
}

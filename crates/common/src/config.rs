use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the remote messaging API
    pub api_url: String,

    /// Subscription key sent with every API request
    pub api_key: String,

    /// PostgreSQL connection string for the durable document store
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Name of the document database campaigns are persisted into
    pub db_name: String,

    /// Number of messages the retriever fetches at once (default: 1)
    pub retriever_concurrency: usize,

    /// Interval between retrieval passes in milliseconds (default: 60000)
    pub retriever_interval_ms: u64,

    /// chrono pattern used to parse campaign due dates (default: `%d/%m/%Y`)
    pub due_date_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            api_url: std::env::var("IO_API_URL")
                .unwrap_or_else(|_| "https://api.io.italia.it/api/v1".to_string()),
            api_key: std::env::var("IO_API_KEY")
                .map_err(|_| anyhow::anyhow!("IO_API_KEY environment variable is required"))?,
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            db_name: std::env::var("COURIER_DB_NAME").unwrap_or_else(|_| "courier".to_string()),
            retriever_concurrency: std::env::var("RETRIEVER_CONCURRENCY")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRIEVER_CONCURRENCY must be a valid usize"))?,
            retriever_interval_ms: std::env::var("RETRIEVER_INTERVAL_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRIEVER_INTERVAL_MS must be a valid u64"))?,
            due_date_format: std::env::var("DUE_DATE_FORMAT")
                .unwrap_or_else(|_| "%d/%m/%Y".to_string()),
        })
    }
}

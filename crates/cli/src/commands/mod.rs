pub mod chat;
pub mod ingest;
pub mod init;
pub mod sessions;

use std::sync::Arc;

use anyhow::Context;
use marshal_config::AppConfig;
use marshal_store::SqliteStore;

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

/// Open the configured history database.
pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.store.resolved_path();
    let store = SqliteStore::new(&path)
        .await
        .with_context(|| format!("Failed to open history database at {path}"))?;
    Ok(Arc::new(store))
}

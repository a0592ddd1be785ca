//! `marshal ingest`: add a document to the knowledge store.

use std::path::Path;

use anyhow::Context;
use marshal_tools::{Document, FileKnowledgeStore, KnowledgeStore};

pub async fn run(file: &Path) -> anyhow::Result<()> {
    let config = super::load_config()?;
    if !config.knowledge.enabled {
        anyhow::bail!("The knowledge store is disabled in the config ([knowledge] enabled = false)");
    }

    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let path = config.knowledge.resolved_path();
    let store = FileKnowledgeStore::open(&path);
    let source = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let chunks = store.ingest(Document { source: source.clone(), text }).await?;
    println!("  Ingested {source}: {chunks} chunks -> {}", path.display());
    Ok(())
}

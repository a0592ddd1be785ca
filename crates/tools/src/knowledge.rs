//! Knowledge retrieval: the `knowledge_base_query` capability and a
//! file-backed knowledge store.
//!
//! Documents are split into overlapping chunks on ingest. Retrieval ranks
//! chunks by keyword overlap with the query; swapping in a vector store only
//! means implementing [`KnowledgeStore`].

use async_trait::async_trait;
use marshal_core::error::ToolError;
use marshal_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;

const DEFAULT_TOP_K: usize = 5;
const NO_MATCH: &str = "No relevant information found in the knowledge base.";

/// A piece of source text handed to [`KnowledgeStore::ingest`].
#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub text: String,
}

/// A ranked chunk returned from a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub content: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// The best `limit` passages for `text`, highest score first.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Passage>, ToolError>;

    /// Chunk and index a document. Returns the number of chunks added.
    async fn ingest(&self, document: Document) -> Result<usize, ToolError>;
}

// --- Tool ---

pub struct KnowledgeBaseQueryTool {
    store: Arc<dyn KnowledgeStore>,
}

impl KnowledgeBaseQueryTool {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseQueryTool {
    fn name(&self) -> &str {
        "knowledge_base_query"
    }

    fn description(&self) -> &str {
        "Search the user's uploaded documents for relevant passages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in the documents",
                    "minLength": 1
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of passages (default 5)",
                    "minimum": 1,
                    "maximum": 20
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let top_k = arguments["top_k"].as_u64().map_or(DEFAULT_TOP_K, |n| n as usize);

        let passages = self.store.query(query, top_k).await?;
        if passages.is_empty() {
            return Ok(ToolResult::ok(NO_MATCH));
        }

        let output = passages
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let data = serde_json::to_value(&passages).unwrap_or_default();
        Ok(ToolResult::with_data(output, data))
    }
}

// --- Chunking and ranking ---

/// Split text into chunks of at most `size` characters, each overlapping
/// the previous one by up to `overlap` characters. Breaks prefer whitespace
/// in the second half of a window.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let overlap = overlap.min(size / 2);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            let floor = start + size / 2;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = (end.saturating_sub(overlap)).max(start + 1);
    }

    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in the chunk.
fn overlap_score(query_terms: &HashSet<String>, chunk: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let chunk_terms = terms(chunk);
    let hits = query_terms.iter().filter(|t| chunk_terms.contains(*t)).count();
    hits as f32 / query_terms.len() as f32
}

// --- File-backed store ---

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    source: String,
    index: usize,
    content: String,
}

/// A knowledge store persisted as JSONL, one chunk per line.
///
/// Chunks are loaded on open and the file is rewritten after every ingest.
pub struct FileKnowledgeStore {
    path: PathBuf,
    chunks: RwLock<Vec<Chunk>>,
}

impl FileKnowledgeStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let chunks = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = chunks.len(), "Knowledge store loaded");
        Self {
            path,
            chunks: RwLock::new(chunks),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }

    fn load_from_disk(path: &Path) -> Vec<Chunk> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Chunk>(line) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted knowledge chunk");
                    None
                }
            })
            .collect()
    }

    fn flush(&self, chunks: &[Chunk]) -> Result<(), ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "knowledge_base".into(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| failed(format!("Failed to create knowledge directory: {e}")))?;
        }

        let mut content = String::new();
        for chunk in chunks {
            let line = serde_json::to_string(chunk)
                .map_err(|e| failed(format!("Failed to serialize chunk: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, content)
            .map_err(|e| failed(format!("Failed to write knowledge file: {e}")))
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<Passage>, ToolError> {
        let query_terms = terms(text);
        let chunks = self.chunks.read().await;

        let mut passages: Vec<Passage> = chunks
            .iter()
            .map(|c| Passage {
                source: c.source.clone(),
                content: c.content.clone(),
                score: overlap_score(&query_terms, &c.content),
            })
            .filter(|p| p.score > 0.0)
            .collect();

        passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(limit);
        Ok(passages)
    }

    async fn ingest(&self, document: Document) -> Result<usize, ToolError> {
        let pieces = split_text(&document.text, CHUNK_SIZE, CHUNK_OVERLAP);
        let added = pieces.len();

        let mut chunks = self.chunks.write().await;
        let mut updated = chunks.clone();
        updated.extend(pieces.into_iter().enumerate().map(|(index, content)| Chunk {
            source: document.source.clone(),
            index,
            content,
        }));
        // Memory only changes once the file does.
        self.flush(&updated)?;
        *chunks = updated;

        info!(source = %document.source, chunks = added, "Document ingested");
        Ok(added)
    }
}

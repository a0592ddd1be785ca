//! Web search: the `web_search` capability and its backends.
//!
//! The tool only formats results; fetching them is the job of a
//! [`SearchBackend`]. [`TavilySearch`] talks to the Tavily HTTP API.

use async_trait::async_trait;
use marshal_core::error::ToolError;
use marshal_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Anything that can answer a web query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

/// The `web_search` capability.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

fn render_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {} ({})\n{}", i + 1, hit.title, hit.url, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titles, URLs, and content snippets."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query",
                    "minLength": 1
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 5)",
                    "minimum": 1,
                    "maximum": MAX_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let num_results = arguments["num_results"]
            .as_u64()
            .map_or(DEFAULT_RESULTS, |n| n as usize)
            .clamp(1, MAX_RESULTS);

        let hits = self.backend.search(query, num_results).await?;
        debug!(query, hits = hits.len(), "Web search complete");

        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No results found for '{query}'.")));
        }

        let data = serde_json::to_value(&hits).unwrap_or_default();
        Ok(ToolResult::with_data(render_hits(&hits), data))
    }
}

/// Search backed by the Tavily API.
pub struct TavilySearch {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: api_key.into(),
            base_url: "https://api.tavily.com".into(),
            client,
        }
    }

    /// Point at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(query: &str, max_results: usize) -> serde_json::Value {
        serde_json::json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
        })
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchBackend for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(query, max_results))
            .send()
            .await
            .map_err(|e| failed(format!("Search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("Search API returned {status}: {body}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("Unreadable search response: {e}")))?;

        Ok(parsed.results.into_iter().take(max_results).collect())
    }
}

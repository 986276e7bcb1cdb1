//! Document-retrieval collaborator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::security::SecretValue;
use crate::state::SourceDocument;

pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Return up to `k` documents ranked by relevance to `query`.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SourceDocument>>;
}

pub type DynRetriever = Arc<dyn DocumentRetriever>;

/// Web search through the Tavily search API.
#[derive(Clone)]
pub struct TavilyRetriever {
    client: Client,
    api_key: SecretValue,
    base_url: String,
}

impl TavilyRetriever {
    pub fn new(api_key: SecretValue) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_TAVILY_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

impl From<TavilyResult> for SourceDocument {
    fn from(result: TavilyResult) -> Self {
        let mut doc = SourceDocument::new(result.url, result.content);
        if let Some(title) = result.title {
            doc = doc.with_meta("title", json!(title));
        }
        if let Some(score) = result.score {
            doc = doc.with_meta("score", json!(score));
        }
        doc
    }
}

#[async_trait]
impl DocumentRetriever for TavilyRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SourceDocument>> {
        let url = format!("{}/search", self.base_url);
        let body = json!({
            "api_key": self.api_key.expose(),
            "query": query,
            "max_results": k,
            "search_depth": "basic",
            "include_answer": false,
            "include_raw_content": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("failed to send search request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("search request failed with status {status}: {error_body}");
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .context("failed to parse search response")?;

        debug!(results = parsed.results.len(), "search returned results");

        Ok(parsed
            .results
            .into_iter()
            .take(k)
            .map(SourceDocument::from)
            .collect())
    }
}

/// Fixed corpus ranked by query-term overlap, for offline runs and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryRetriever {
    documents: Vec<SourceDocument>,
}

impl InMemoryRetriever {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of documents.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read corpus {}", path.display()))?;
        let documents: Vec<SourceDocument> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid corpus file {}", path.display()))?;
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn score(doc: &SourceDocument, terms: &[String]) -> usize {
        let haystack = doc.content.to_lowercase();
        terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .count()
    }
}

#[async_trait]
impl DocumentRetriever for InMemoryRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SourceDocument>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|term| {
                term.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|term| !term.is_empty())
            .collect();

        let mut ranked: Vec<(usize, &SourceDocument)> = self
            .documents
            .iter()
            .map(|doc| (Self::score(doc, &terms), doc))
            .collect();
        // Stable sort keeps corpus order among equal scores.
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

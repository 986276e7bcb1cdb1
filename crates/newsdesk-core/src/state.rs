//! Workflow state threaded by value through every task.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// Pipeline stage, one per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieve,
    Curate,
    Draft,
    Critique,
    Revise,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Retrieve => "researcher",
            Stage::Curate => "curator",
            Stage::Draft => "drafter",
            Stage::Critique => "critic",
            Stage::Revise => "reviser",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to a retrieved document. `source` holds the origin URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl SourceDocument {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                extra: BTreeMap::new(),
            },
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.extra.insert(key.into(), value);
        self
    }

    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

/// Shared record read by each task and returned, updated, as a new value.
///
/// `critique == None` after the critic ran means the article was approved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowState {
    topic: String,
    pub search_results: Option<Vec<SourceDocument>>,
    pub article: Option<String>,
    pub critique: Option<String>,
}

impl WorkflowState {
    pub fn new(topic: impl Into<String>) -> Result<Self, WorkflowError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "topic must not be empty".to_string(),
            ));
        }
        Ok(Self {
            topic,
            search_results: None,
            article: None,
            critique: None,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn with_search_results(&self, docs: Vec<SourceDocument>) -> Self {
        Self {
            search_results: Some(docs),
            ..self.clone()
        }
    }

    pub fn with_article(&self, article: String) -> Self {
        Self {
            article: Some(article),
            ..self.clone()
        }
    }

    pub fn with_critique(&self, critique: Option<String>) -> Self {
        Self {
            critique,
            ..self.clone()
        }
    }

    /// URLs of the documents currently held, in order.
    pub fn source_urls(&self) -> Vec<String> {
        self.search_results
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|doc| doc.source().to_string())
            .collect()
    }
}

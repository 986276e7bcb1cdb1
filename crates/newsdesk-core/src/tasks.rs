use anyhow::anyhow;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::WorkflowError;
use crate::llm::{CompletionRequest, DynLanguageModel, LanguageModel};
use crate::prompts::{self, APPROVAL_SENTINEL};
use crate::retriever::DynRetriever;
use crate::state::{SourceDocument, Stage, WorkflowState};

/// One step of the article workflow: reads the state, returns the next one.
#[async_trait]
pub trait Task: Send + Sync {
    fn stage(&self) -> Stage;

    fn id(&self) -> &'static str {
        self.stage().as_str()
    }

    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError>;
}

async fn complete(
    llm: &dyn LanguageModel,
    request: CompletionRequest,
) -> Result<String, WorkflowError> {
    let stage = request.stage;
    let text = llm
        .complete(request)
        .await
        .map_err(|err| WorkflowError::generation(stage, err))?;
    if text.trim().is_empty() {
        return Err(WorkflowError::generation(
            stage,
            anyhow!("model returned an empty response"),
        ));
    }
    Ok(text)
}

fn require<'a, T: ?Sized>(
    value: Option<&'a T>,
    stage: Stage,
    field: &'static str,
) -> Result<&'a T, WorkflowError> {
    value.ok_or(WorkflowError::MissingState { stage, field })
}

pub struct ResearchTask {
    retriever: DynRetriever,
    top_k: usize,
}

impl ResearchTask {
    pub fn new(retriever: DynRetriever, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn stage(&self) -> Stage {
        Stage::Retrieve
    }

    #[instrument(name = "task.researcher", skip(self, state))]
    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let query = prompts::retrieval_query(state.topic());
        info!(%query, k = self.top_k, "searching for sources");

        let docs = self
            .retriever
            .search(&query, self.top_k)
            .await
            .map_err(WorkflowError::retrieval)?;

        info!(documents = docs.len(), "retrieval complete");
        Ok(state.with_search_results(docs))
    }
}

#[derive(Debug, Deserialize)]
struct CuratedSelection {
    urls: Vec<String>,
}

/// Parse the curator's `{"urls": [...]}` reply.
pub fn parse_selection(raw: &str) -> Result<Vec<String>, WorkflowError> {
    serde_json::from_str::<CuratedSelection>(raw.trim())
        .map(|selection| selection.urls)
        .map_err(|err| WorkflowError::parse(Stage::Curate, err.to_string(), raw))
}

/// Documents whose source is among `urls`, in their original order.
pub fn filter_by_selection(docs: &[SourceDocument], urls: &[String]) -> Vec<SourceDocument> {
    docs.iter()
        .filter(|doc| urls.iter().any(|url| url == doc.source()))
        .cloned()
        .collect()
}

pub struct CurateTask {
    llm: DynLanguageModel,
    max_sources: usize,
    today: NaiveDate,
}

impl CurateTask {
    pub fn new(llm: DynLanguageModel, max_sources: usize, today: NaiveDate) -> Self {
        Self {
            llm,
            max_sources,
            today,
        }
    }
}

#[async_trait]
impl Task for CurateTask {
    fn stage(&self) -> Stage {
        Stage::Curate
    }

    #[instrument(name = "task.curator", skip(self, state))]
    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let docs = require(state.search_results.as_deref(), Stage::Curate, "search_results")?;

        let request = prompts::curator_request(state.topic(), docs, self.max_sources, self.today);
        let raw = complete(self.llm.as_ref(), request).await?;

        let urls = parse_selection(&raw)?;
        let mut curated = filter_by_selection(docs, &urls);
        curated.truncate(self.max_sources);

        if curated.is_empty() {
            warn!(
                selected = ?urls,
                "none of the selected URLs matched a retrieved document"
            );
        }
        info!(
            retrieved = docs.len(),
            curated = curated.len(),
            "curated search results"
        );

        Ok(state.with_search_results(curated))
    }
}

pub struct DraftTask {
    llm: DynLanguageModel,
    today: NaiveDate,
}

impl DraftTask {
    pub fn new(llm: DynLanguageModel, today: NaiveDate) -> Self {
        Self { llm, today }
    }
}

#[async_trait]
impl Task for DraftTask {
    fn stage(&self) -> Stage {
        Stage::Draft
    }

    #[instrument(name = "task.drafter", skip(self, state))]
    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let docs = require(state.search_results.as_deref(), Stage::Draft, "search_results")?;

        let request = prompts::drafter_request(state.topic(), docs, self.today);
        let article = complete(self.llm.as_ref(), request).await?;

        info!(chars = article.len(), sources = docs.len(), "drafted article");
        Ok(state.with_article(article))
    }
}

/// `None` when the reply contains the approval sentinel, otherwise the reply verbatim.
pub fn interpret_critique(raw: &str) -> Option<String> {
    if raw.contains(APPROVAL_SENTINEL) {
        None
    } else {
        Some(raw.to_string())
    }
}

pub struct CritiqueTask {
    llm: DynLanguageModel,
    today: NaiveDate,
}

impl CritiqueTask {
    pub fn new(llm: DynLanguageModel, today: NaiveDate) -> Self {
        Self { llm, today }
    }
}

#[async_trait]
impl Task for CritiqueTask {
    fn stage(&self) -> Stage {
        Stage::Critique
    }

    #[instrument(name = "task.critic", skip(self, state))]
    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let article = require(state.article.as_deref(), Stage::Critique, "article")?;

        let request = prompts::critic_request(article, state.critique.as_deref(), self.today);
        let raw = complete(self.llm.as_ref(), request).await?;
        let critique = interpret_critique(&raw);

        match &critique {
            None => info!("critic approved the article"),
            Some(note) => info!(critique = %note, "critic requested changes"),
        }

        Ok(state.with_critique(critique))
    }
}

pub struct ReviseTask {
    llm: DynLanguageModel,
}

impl ReviseTask {
    pub fn new(llm: DynLanguageModel) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Task for ReviseTask {
    fn stage(&self) -> Stage {
        Stage::Revise
    }

    #[instrument(name = "task.reviser", skip(self, state))]
    async fn run(&self, state: &WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let critique = require(state.critique.as_deref(), Stage::Revise, "critique")?;
        let article = require(state.article.as_deref(), Stage::Revise, "article")?;

        let request = prompts::reviser_request(article, critique);
        let revised = complete(self.llm.as_ref(), request).await?;

        debug!(chars = revised.len(), "revised article");
        Ok(state.with_article(revised))
    }
}

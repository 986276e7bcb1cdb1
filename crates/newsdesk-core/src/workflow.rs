//! Retrieve → curate → draft → critique ⇄ revise, as an explicit state machine.
//!
//! Each run owns its [`WorkflowState`]; tasks execute strictly one after another
//! and the only suspension points are the collaborator calls. Dropping the
//! future returned by [`ArticleWorkflow::run_with_report`] cancels the
//! in-flight call and discards the partial state.

use std::time::Instant;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::feedback::{extract_feedback, strip_feedback};
use crate::llm::DynLanguageModel;
use crate::metrics::{record_run_metrics, record_task_metrics};
use crate::retriever::DynRetriever;
use crate::state::{Stage, WorkflowState};
use crate::tasks::{CritiqueTask, CurateTask, DraftTask, ResearchTask, ReviseTask, Task};
use crate::trace::{TraceCollector, TraceEvent, TraceSummary};

/// What to do when the critic has not approved after `max_revisions` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonConvergencePolicy {
    /// Finish with the latest draft and report `Termination::NonConvergence`.
    #[default]
    ReturnLastDraft,
    /// Fail with `WorkflowError::NonConvergence`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub max_revisions: usize,
    pub top_k: usize,
    pub curated_sources: usize,
    pub on_non_convergence: NonConvergencePolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_revisions: 5,
            top_k: 10,
            curated_sources: 5,
            on_non_convergence: NonConvergencePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    Approved,
    NonConvergence { revisions: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Retrieving,
    Curating,
    Drafting,
    Critiquing,
    Revising,
    Done(Termination),
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct RunOptions<'a> {
    pub topic: &'a str,
    pub run_id: Option<String>,
    /// Date shown to the model; defaults to today in local time.
    pub today: Option<NaiveDate>,
}

impl<'a> RunOptions<'a> {
    pub fn new(topic: &'a str) -> Self {
        Self {
            topic,
            run_id: None,
            today: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleOutcome {
    pub run_id: String,
    pub topic: String,
    /// Final article with feedback spans removed.
    pub article: String,
    pub termination: Termination,
    pub revisions: usize,
    /// Curated source URLs the article was drafted from.
    pub sources: Vec<String>,
    /// Notes the reviser left inside feedback tags, oldest first.
    pub reviewer_notes: Vec<String>,
    /// Outstanding critique when the run stopped without approval.
    pub final_critique: Option<String>,
    pub trace_events: Vec<TraceEvent>,
}

impl ArticleOutcome {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Approved
    }

    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace_events)
    }
}

struct WorkflowTasks {
    research: ResearchTask,
    curate: CurateTask,
    draft: DraftTask,
    critique: CritiqueTask,
    revise: ReviseTask,
}

impl WorkflowTasks {
    fn new(
        llm: &DynLanguageModel,
        retriever: &DynRetriever,
        settings: &WorkflowSettings,
        today: NaiveDate,
    ) -> Self {
        Self {
            research: ResearchTask::new(retriever.clone(), settings.top_k),
            curate: CurateTask::new(llm.clone(), settings.curated_sources, today),
            draft: DraftTask::new(llm.clone(), today),
            critique: CritiqueTask::new(llm.clone(), today),
            revise: ReviseTask::new(llm.clone()),
        }
    }
}

/// The article workflow bound to its two collaborators.
#[derive(Clone)]
pub struct ArticleWorkflow {
    llm: DynLanguageModel,
    retriever: DynRetriever,
    settings: WorkflowSettings,
}

impl ArticleWorkflow {
    pub fn new(llm: DynLanguageModel, retriever: DynRetriever) -> Self {
        Self {
            llm,
            retriever,
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Produce the cleaned article for `topic`.
    pub async fn run(&self, topic: &str) -> Result<String, WorkflowError> {
        self.run_with_report(RunOptions::new(topic))
            .await
            .map(|outcome| outcome.article)
    }

    pub async fn run_with_report(
        &self,
        options: RunOptions<'_>,
    ) -> Result<ArticleOutcome, WorkflowError> {
        let mut state = WorkflowState::new(options.topic)?;
        let run_id = options.run_id.unwrap_or_else(new_run_id);
        let today = options.today.unwrap_or_else(|| Local::now().date_naive());
        let tasks = WorkflowTasks::new(&self.llm, &self.retriever, &self.settings, today);

        let mut trace = TraceCollector::new();
        let mut reviewer_notes = Vec::new();
        let mut revisions = 0usize;
        let mut phase = Phase::Retrieving;

        info!(
            %run_id,
            topic = %state.topic(),
            model = %self.llm.name(),
            max_revisions = self.settings.max_revisions,
            "starting article workflow"
        );

        let termination = loop {
            phase = match phase {
                Phase::Retrieving => {
                    state = execute(&tasks.research, &state, &mut trace).await?;
                    trace.record(
                        Stage::Retrieve,
                        format!("retrieved {} documents", state.source_urls().len()),
                    );
                    Phase::Curating
                }
                Phase::Curating => {
                    let retrieved = state.source_urls().len();
                    state = execute(&tasks.curate, &state, &mut trace).await?;
                    let curated = state.source_urls().len();
                    if curated == 0 {
                        trace.record(
                            Stage::Curate,
                            format!("none of {retrieved} documents matched the selection"),
                        );
                    } else {
                        trace.record(
                            Stage::Curate,
                            format!("kept {curated} of {retrieved} documents"),
                        );
                    }
                    Phase::Drafting
                }
                Phase::Drafting => {
                    state = execute(&tasks.draft, &state, &mut trace).await?;
                    let paragraphs = state.article.as_deref().map(count_paragraphs).unwrap_or(0);
                    trace.record(Stage::Draft, format!("drafted {paragraphs} paragraphs"));
                    Phase::Critiquing
                }
                Phase::Critiquing => {
                    state = execute(&tasks.critique, &state, &mut trace).await?;
                    match state.critique.as_deref() {
                        None => {
                            trace.record(Stage::Critique, "approved");
                            Phase::Done(Termination::Approved)
                        }
                        Some(note) if revisions >= self.settings.max_revisions => {
                            trace.record(
                                Stage::Critique,
                                format!("still requesting changes after {revisions} revisions: {note}"),
                            );
                            warn!(
                                %run_id,
                                revisions,
                                "revision bound reached without approval"
                            );
                            Phase::Done(Termination::NonConvergence { revisions })
                        }
                        Some(note) => {
                            trace.record(Stage::Critique, format!("requested changes: {note}"));
                            Phase::Revising
                        }
                    }
                }
                Phase::Revising => {
                    state = execute(&tasks.revise, &state, &mut trace).await?;
                    revisions += 1;
                    // Spans carried over from an earlier draft are reported once.
                    let mut notes = Vec::new();
                    for note in state.article.as_deref().map(extract_feedback).unwrap_or_default() {
                        if !reviewer_notes.contains(&note) && !notes.contains(&note) {
                            notes.push(note);
                        }
                    }
                    if !notes.is_empty() {
                        info!(revision = revisions, notes = ?notes, "reviser left feedback");
                    }
                    trace.record(
                        Stage::Revise,
                        format!("revision {revisions} ({} new feedback notes)", notes.len()),
                    );
                    reviewer_notes.extend(notes);
                    Phase::Critiquing
                }
                Phase::Done(termination) => break termination,
            };
        };

        let draft = state.article.as_deref().ok_or(WorkflowError::MissingState {
            stage: Stage::Critique,
            field: "article",
        })?;
        let article = strip_feedback(draft);
        let converged = termination == Termination::Approved;
        record_run_metrics(revisions, converged);

        if !converged && self.settings.on_non_convergence == NonConvergencePolicy::Fail {
            return Err(WorkflowError::NonConvergence {
                revisions,
                last_draft: article,
            });
        }

        info!(%run_id, revisions, converged, chars = article.len(), "article workflow finished");

        Ok(ArticleOutcome {
            run_id,
            topic: state.topic().to_string(),
            article,
            termination,
            revisions,
            sources: state.source_urls(),
            reviewer_notes,
            final_critique: state.critique.clone(),
            trace_events: trace.into_events(),
        })
    }
}

/// Run the workflow for `topic` with default settings.
pub async fn run_article_workflow(
    topic: &str,
    llm: DynLanguageModel,
    retriever: DynRetriever,
) -> Result<String, WorkflowError> {
    ArticleWorkflow::new(llm, retriever).run(topic).await
}

async fn execute(
    task: &dyn Task,
    state: &WorkflowState,
    trace: &mut TraceCollector,
) -> Result<WorkflowState, WorkflowError> {
    let started = Instant::now();
    let result = task.run(state).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    record_task_metrics(task.stage(), result.is_ok(), elapsed_ms);

    if let Err(err) = &result {
        error!(task = task.id(), error = %err, "task failed");
        trace.record(task.stage(), format!("failed: {err}"));
    }
    result
}

fn count_paragraphs(article: &str) -> usize {
    article
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .count()
}

fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4())
}

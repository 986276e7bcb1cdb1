//! Newsdesk core: a cyclic multi-agent workflow that turns a topic into a
//! short news article.
//!
//! A researcher retrieves candidate sources, a curator keeps the most relevant
//! ones, a drafter writes the article, and a critic and reviser iterate on it
//! until the critic approves or the revision bound is reached. The language
//! model and the document retriever are injected through the [`LanguageModel`]
//! and [`DocumentRetriever`] traits.

mod config;
mod error;
mod feedback;
mod llm;
mod logging;
mod metrics;
mod prompts;
mod retriever;
mod security;
mod state;
mod tasks;
mod telemetry;
mod trace;
mod workflow;

pub use config::{
    Config, ConfigLoader, LlmConfig, LoggingConfig, RetrieverConfig, RetrieverProvider,
    WorkflowConfig,
};
pub use error::{NewsdeskError, WorkflowError};
pub use feedback::{extract_feedback, strip_feedback};
pub use llm::{CompletionRequest, DynLanguageModel, LanguageModel, OpenAiChatModel, ResponseFormat};
pub use logging::{log_base_dir, log_run_completion};
pub use metrics::init_metrics_from_env;
pub use prompts::{APPROVAL_SENTINEL, SHORT_TOPIC_PREFIX, retrieval_query};
pub use retriever::{DocumentRetriever, DynRetriever, InMemoryRetriever, TavilyRetriever};
pub use security::{SecretValue, require_env};
pub use state::{DocumentMetadata, SourceDocument, Stage, WorkflowState};
pub use tasks::{
    CritiqueTask, CurateTask, DraftTask, ResearchTask, ReviseTask, Task, filter_by_selection,
    interpret_critique, parse_selection,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use workflow::{
    ArticleOutcome, ArticleWorkflow, NonConvergencePolicy, RunOptions, Termination,
    WorkflowSettings, run_article_workflow,
};

use std::path::PathBuf;

use thiserror::Error;

use crate::state::Stage;

/// Configuration and environment errors.
#[derive(Debug, Error)]
pub enum NewsdeskError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NewsdeskError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Failure of a workflow run, tagged with the stage that produced it.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Rejected before any collaborator was called.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("document retrieval failed: {source:#}")]
    Retrieval {
        #[source]
        source: anyhow::Error,
    },
    #[error("{stage} returned unparseable output: {reason}")]
    Parse {
        stage: Stage,
        reason: String,
        raw: String,
    },
    #[error("{stage} completion failed: {source:#}")]
    Generation {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    #[error("{stage} requires `{field}` but it is not set")]
    MissingState { stage: Stage, field: &'static str },
    #[error("critic did not approve the article after {revisions} revision(s)")]
    NonConvergence { revisions: usize, last_draft: String },
}

impl WorkflowError {
    pub fn retrieval(source: impl Into<anyhow::Error>) -> Self {
        Self::Retrieval {
            source: source.into(),
        }
    }

    pub fn generation(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self::Generation {
            stage,
            source: source.into(),
        }
    }

    pub fn parse(stage: Stage, reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Stage that failed. `None` for validation failures raised before the first stage.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => None,
            Self::Retrieval { .. } => Some(Stage::Retrieve),
            Self::Parse { stage, .. }
            | Self::Generation { stage, .. }
            | Self::MissingState { stage, .. } => Some(*stage),
            Self::NonConvergence { .. } => Some(Stage::Critique),
        }
    }

    /// Whether a caller may reasonably retry the whole run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Retrieval { .. } | Self::Generation { .. } | Self::NonConvergence { .. }
        )
    }
}

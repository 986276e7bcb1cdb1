use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::llm::DEFAULT_OPENAI_BASE_URL;
use crate::retriever::DEFAULT_TAVILY_BASE_URL;
use crate::workflow::{NonConvergencePolicy, WorkflowSettings};
use crate::{NewsdeskError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "newsdesk.toml";
const CONFIG_PATH_ENV: &str = "NEWSDESK_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn llm_api_key(&self) -> Result<SecretValue, NewsdeskError> {
        require_env(&self.llm.api_key_env)
    }

    pub fn retriever_api_key(&self) -> Result<SecretValue, NewsdeskError> {
        require_env(&self.retriever.api_key_env)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `NEWSDESK_CONFIG` environment variable.
    /// 3. `newsdesk.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, NewsdeskError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| NewsdeskError::config_io(candidate.clone(), err))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Config, NewsdeskError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| NewsdeskError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), NewsdeskError> {
        if config.llm.provider != "openai" {
            return Err(NewsdeskError::InvalidConfiguration(format!(
                "unsupported llm.provider `{}` (expected `openai` or an OpenAI-compatible endpoint)",
                config.llm.provider
            )));
        }
        if config.llm.api_key_env.trim().is_empty() {
            return Err(NewsdeskError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.llm.temperature != 0.0 {
            return Err(NewsdeskError::InvalidConfiguration(format!(
                "llm.temperature must be 0.0 (deterministic sampling), got {}",
                config.llm.temperature
            )));
        }
        if config.retriever.top_k == 0 {
            return Err(NewsdeskError::InvalidConfiguration(
                "retriever.top_k must be at least 1".into(),
            ));
        }
        if config.workflow.curated_sources == 0 {
            return Err(NewsdeskError::InvalidConfiguration(
                "workflow.curated_sources must be at least 1".into(),
            ));
        }
        if config.retriever.provider == RetrieverProvider::Memory
            && config.retriever.corpus_path.is_none()
        {
            return Err(NewsdeskError::InvalidConfiguration(
                "retriever.corpus_path is required when retriever.provider = \"memory\"".into(),
            ));
        }

        // Keys live in the environment, never inline in the file.
        require_env(&config.llm.api_key_env)?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn default_provider() -> String {
        "openai".to_string()
    }

    fn default_base_url() -> String {
        DEFAULT_OPENAI_BASE_URL.to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    const fn default_timeout_secs() -> u64 {
        60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverProvider {
    #[default]
    Tavily,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrieverConfig {
    #[serde(default)]
    pub provider: RetrieverProvider,
    #[serde(default = "RetrieverConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "RetrieverConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
    #[serde(default = "RetrieverConfig::default_top_k")]
    pub top_k: usize,
}

impl RetrieverConfig {
    fn default_base_url() -> String {
        DEFAULT_TAVILY_BASE_URL.to_string()
    }

    fn default_api_key_env() -> String {
        "TAVILY_API_KEY".to_string()
    }

    const fn default_top_k() -> usize {
        10
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            provider: RetrieverProvider::default(),
            base_url: Self::default_base_url(),
            api_key_env: Self::default_api_key_env(),
            corpus_path: None,
            top_k: Self::default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "WorkflowConfig::default_max_revisions")]
    pub max_revisions: usize,
    #[serde(default = "WorkflowConfig::default_curated_sources")]
    pub curated_sources: usize,
    #[serde(default)]
    pub on_non_convergence: NonConvergencePolicy,
}

impl WorkflowConfig {
    const fn default_max_revisions() -> usize {
        5
    }

    const fn default_curated_sources() -> usize {
        5
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: Self::default_max_revisions(),
            curated_sources: Self::default_curated_sources(),
            on_non_convergence: NonConvergencePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl Config {
    /// Workflow settings with the retriever's `top_k` folded in.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            max_revisions: self.workflow.max_revisions,
            top_k: self.retriever.top_k,
            curated_sources: self.workflow.curated_sources,
            on_non_convergence: self.workflow.on_non_convergence,
        }
    }
}

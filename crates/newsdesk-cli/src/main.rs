use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use newsdesk_core::{
    ArticleOutcome, ArticleWorkflow, Config, ConfigLoader, DynLanguageModel, DynRetriever,
    InMemoryRetriever, NonConvergencePolicy, OpenAiChatModel, RetrieverProvider, RunOptions,
    TavilyRetriever, TelemetryOptions, init_metrics_from_env, init_telemetry, log_base_dir,
    log_run_completion, persist_trace,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk",
    version,
    about = "Turn a topic into a short, critiqued news article"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Research, draft and revise an article for a topic.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Topic or query to write about.
    #[arg(long)]
    topic: String,

    /// Configuration file (falls back to `NEWSDESK_CONFIG`, then `newsdesk.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file of source documents to search instead of the configured retriever.
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Override `workflow.max_revisions`.
    #[arg(long)]
    max_revisions: Option<usize>,

    /// Fail instead of returning the last draft when the critic never approves.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Persist the run trace as JSON under this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print the stage trace (markdown and mermaid) to stderr.
    #[arg(long, default_value_t = false)]
    explain: bool,

    /// Print notes the reviser left for the critic to stderr.
    #[arg(long, default_value_t = false)]
    show_feedback: bool,

    /// Print the full run report as JSON instead of the bare article.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args).await?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.clone())?;

    init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("newsdesk-cli");

    let llm = build_llm(&config)?;
    let retriever = build_retriever(&config, args.sources.as_deref())?;

    let mut settings = config.workflow_settings();
    if let Some(max_revisions) = args.max_revisions {
        settings.max_revisions = max_revisions;
    }
    if args.strict {
        settings.on_non_convergence = NonConvergencePolicy::Fail;
    }

    info!(topic = %args.topic, model = %config.llm.model, "starting newsdesk run");

    let workflow = ArticleWorkflow::new(llm, retriever).with_settings(settings);
    let outcome = workflow
        .run_with_report(RunOptions::new(&args.topic))
        .await
        .context("article workflow failed")?;

    let trace_path = match &args.trace_dir {
        Some(dir) => match persist_trace(dir, &outcome.run_id, &outcome.trace_events) {
            Ok(path) => {
                info!(path = %path.display(), "trace written");
                Some(path)
            }
            Err(err) => {
                warn!(error = %err, "failed to persist trace");
                None
            }
        },
        None => None,
    };

    if let Err(err) = log_run_completion(&log_base_dir(), &outcome, trace_path.as_deref()) {
        warn!(error = %err, "failed to append run log");
    }

    report(&args, &outcome)
}

fn build_llm(config: &Config) -> Result<DynLanguageModel> {
    let model = OpenAiChatModel::with_timeout(
        config.llm_api_key()?,
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )?
    .with_base_url(config.llm.base_url.clone())
    .with_temperature(config.llm.temperature);
    Ok(Arc::new(model))
}

fn build_retriever(config: &Config, sources: Option<&Path>) -> Result<DynRetriever> {
    if let Some(path) = sources {
        let corpus = InMemoryRetriever::from_json_file(path)?;
        info!(path = %path.display(), documents = corpus.len(), "using local sources");
        return Ok(Arc::new(corpus));
    }

    match config.retriever.provider {
        RetrieverProvider::Tavily => {
            let retriever = TavilyRetriever::new(config.retriever_api_key()?)?
                .with_base_url(config.retriever.base_url.clone());
            Ok(Arc::new(retriever))
        }
        RetrieverProvider::Memory => {
            let path = config
                .retriever
                .corpus_path
                .as_deref()
                .context("retriever.corpus_path is not set")?;
            Ok(Arc::new(InMemoryRetriever::from_json_file(path)?))
        }
    }
}

fn report(args: &RunArgs, outcome: &ArticleOutcome) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("{}", outcome.article);
    }

    if !outcome.converged() {
        eprintln!(
            "warning: critic did not approve after {} revisions",
            outcome.revisions
        );
        if let Some(critique) = &outcome.final_critique {
            eprintln!("outstanding critique: {critique}");
        }
    }

    if args.show_feedback && !outcome.reviewer_notes.is_empty() {
        eprintln!("\nReviewer notes:");
        for note in &outcome.reviewer_notes {
            eprintln!("- {note}");
        }
    }

    if args.explain {
        let summary = outcome.trace_summary();
        eprintln!("\n{}", summary.render_markdown());
        eprintln!("```mermaid\n{}```", summary.render_mermaid());
    }

    Ok(())
}

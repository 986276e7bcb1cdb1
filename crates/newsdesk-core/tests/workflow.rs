use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use newsdesk_core::{
    ArticleWorkflow, CompletionRequest, DocumentRetriever, LanguageModel, NonConvergencePolicy,
    RunOptions, SourceDocument, Stage, Termination, WorkflowError, WorkflowSettings,
    run_article_workflow,
};

const DRAFT: &str = "# AI today\n\nOne.\n\nTwo.\n\nThree.\n\nFour.\n\nFive.";

enum CriticScript {
    Approve,
    Never,
    ApproveAfter(usize),
}

struct ScriptedModel {
    curator_reply: String,
    critic: CriticScript,
    reviser_reply: Box<dyn Fn(usize) -> String + Send + Sync>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(critic: CriticScript) -> Self {
        Self {
            curator_reply: r#"{"urls": ["https://news.example/1", "https://news.example/3", "https://news.example/5"]}"#.to_string(),
            critic,
            reviser_reply: Box::new(|n| format!("Revised draft {n}")),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_curator_reply(mut self, reply: &str) -> Self {
        self.curator_reply = reply.to_string();
        self
    }

    fn with_reviser(mut self, reply: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        self.reviser_reply = Box::new(reply);
        self
    }

    fn count(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.stage == stage)
            .count()
    }

    fn requests(&self, stage: Stage) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.stage == stage)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
        let stage = request.stage;
        let previous = self.count(stage);
        self.calls.lock().unwrap().push(request);

        let reply = match stage {
            Stage::Curate => self.curator_reply.clone(),
            Stage::Draft => DRAFT.to_string(),
            Stage::Critique => match self.critic {
                CriticScript::Approve => "[DONE]".to_string(),
                CriticScript::Never => format!("Tighten paragraph {}", previous + 1),
                CriticScript::ApproveAfter(n) if previous >= n => "Good now. [DONE]".to_string(),
                CriticScript::ApproveAfter(_) => "Add a quote.".to_string(),
            },
            Stage::Revise => (self.reviser_reply)(previous + 1),
            Stage::Retrieve => anyhow::bail!("retrieval stage never calls the model"),
        };
        Ok(reply)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct RecordingRetriever {
    queries: Mutex<Vec<(String, usize)>>,
    fail: bool,
}

impl RecordingRetriever {
    fn new() -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn documents() -> Vec<SourceDocument> {
        (1..=10)
            .map(|idx| {
                SourceDocument::new(
                    format!("https://news.example/{idx}"),
                    format!("Story number {idx}"),
                )
            })
            .collect()
    }
}

#[async_trait]
impl DocumentRetriever for RecordingRetriever {
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SourceDocument>> {
        self.queries.lock().unwrap().push((query.to_string(), k));
        if self.fail {
            anyhow::bail!("search quota exhausted");
        }
        Ok(Self::documents().into_iter().take(k).collect())
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn workflow(
    model: &Arc<ScriptedModel>,
    retriever: &Arc<RecordingRetriever>,
    settings: WorkflowSettings,
) -> ArticleWorkflow {
    ArticleWorkflow::new(model.clone(), retriever.clone()).with_settings(settings)
}

#[tokio::test]
async fn short_topic_approved_on_first_pass() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Approve));
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("AI").with_date(date()))
        .await
        .expect("workflow should succeed");

    let queries = retriever.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    let (query, k) = &queries[0];
    assert!(query.contains("AI"));
    assert!(query.len() > "AI".len());
    assert_eq!(*k, 10);

    assert!(outcome.sources.len() <= 5);
    assert_eq!(
        outcome.sources,
        vec![
            "https://news.example/1",
            "https://news.example/3",
            "https://news.example/5"
        ]
    );
    assert_eq!(outcome.article.matches("\n\n").count(), 5);
    assert_eq!(outcome.article, DRAFT);
    assert_eq!(outcome.termination, Termination::Approved);
    assert_eq!(outcome.revisions, 0);
    assert_eq!(model.count(Stage::Revise), 0);
    assert_eq!(model.count(Stage::Critique), 1);
    assert_eq!(outcome.final_critique, None);
}

#[tokio::test]
async fn empty_topic_fails_before_any_call() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Approve));
    let retriever = Arc::new(RecordingRetriever::new());

    let err = run_article_workflow("", model.clone(), retriever.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(retriever.queries.lock().unwrap().is_empty());
    assert!(model.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn loop_stops_at_bound_and_returns_last_draft() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Never));
    let retriever = Arc::new(RecordingRetriever::new());
    let settings = WorkflowSettings {
        max_revisions: 3,
        ..WorkflowSettings::default()
    };

    let outcome = workflow(&model, &retriever, settings)
        .run_with_report(RunOptions::new("ocean heatwaves").with_date(date()))
        .await
        .expect("non-convergence returns the last draft by default");

    assert_eq!(model.count(Stage::Revise), 3);
    assert_eq!(model.count(Stage::Critique), 4);
    assert_eq!(outcome.termination, Termination::NonConvergence { revisions: 3 });
    assert!(!outcome.converged());
    assert_eq!(outcome.article, "Revised draft 3");
    assert_eq!(outcome.final_critique.as_deref(), Some("Tighten paragraph 4"));
}

#[tokio::test]
async fn zero_bound_never_revises() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Never));
    let retriever = Arc::new(RecordingRetriever::new());
    let settings = WorkflowSettings {
        max_revisions: 0,
        ..WorkflowSettings::default()
    };

    let outcome = workflow(&model, &retriever, settings)
        .run_with_report(RunOptions::new("ocean heatwaves").with_date(date()))
        .await
        .unwrap();

    assert_eq!(model.count(Stage::Revise), 0);
    assert_eq!(outcome.article, DRAFT);
    assert_eq!(outcome.termination, Termination::NonConvergence { revisions: 0 });
}

#[tokio::test]
async fn strict_policy_surfaces_non_convergence() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Never).with_reviser(|n| {
        format!("Draft {n}<FEEDBACK>disagree</FEEDBACK>")
    }));
    let retriever = Arc::new(RecordingRetriever::new());
    let settings = WorkflowSettings {
        max_revisions: 2,
        on_non_convergence: NonConvergencePolicy::Fail,
        ..WorkflowSettings::default()
    };

    let err = workflow(&model, &retriever, settings)
        .run("ocean heatwaves")
        .await
        .unwrap_err();

    match err {
        WorkflowError::NonConvergence {
            revisions,
            last_draft,
        } => {
            assert_eq!(revisions, 2);
            assert_eq!(last_draft, "Draft 2");
        }
        other => panic!("expected NonConvergence, got {other:?}"),
    }
    assert_eq!(model.count(Stage::Revise), 2);
}

#[tokio::test]
async fn feedback_spans_are_stripped_and_surfaced() {
    let model = Arc::new(
        ScriptedModel::new(CriticScript::ApproveAfter(1)).with_reviser(|_| {
            "<FEEDBACK>The quote request\nwas already addressed.</FEEDBACK># Title\n\nBody with a quote.\n<FEEDBACK>second note</FEEDBACK>"
                .to_string()
        }),
    );
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("city budget vote").with_date(date()))
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Approved);
    assert_eq!(outcome.revisions, 1);
    assert_eq!(outcome.article, "# Title\n\nBody with a quote.\n");
    assert!(!outcome.article.contains("FEEDBACK"));
    assert!(!outcome.article.contains("already addressed"));
    assert_eq!(
        outcome.reviewer_notes,
        vec!["The quote request\nwas already addressed.", "second note"]
    );
}

#[tokio::test]
async fn carried_over_feedback_is_reported_once() {
    let model = Arc::new(
        ScriptedModel::new(CriticScript::ApproveAfter(2)).with_reviser(|n| {
            let mut draft = "<FEEDBACK>quote already present</FEEDBACK>Body".to_string();
            if n == 2 {
                draft.push_str("<FEEDBACK>added a source</FEEDBACK>");
            }
            format!("{draft} v{n}")
        }),
    );
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("city budget vote").with_date(date()))
        .await
        .unwrap();

    assert_eq!(outcome.revisions, 2);
    assert_eq!(
        outcome.reviewer_notes,
        vec!["quote already present", "added a source"]
    );
    assert_eq!(outcome.article, "Body v2");
}

#[tokio::test]
async fn critic_sees_previous_critique_after_revision() {
    let model = Arc::new(ScriptedModel::new(CriticScript::ApproveAfter(1)));
    let retriever = Arc::new(RecordingRetriever::new());

    workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("city budget vote").with_date(date()))
        .await
        .unwrap();

    let critic_requests = model.requests(Stage::Critique);
    assert_eq!(critic_requests.len(), 2);
    assert!(!critic_requests[0].user.contains("Add a quote."));
    assert!(critic_requests[1].user.contains("Add a quote."));
    assert!(critic_requests[1].user.contains("Revised draft 1"));

    let reviser_requests = model.requests(Stage::Revise);
    assert!(reviser_requests[0].user.contains("Add a quote."));
    assert!(reviser_requests[0].user.contains(DRAFT));
}

#[tokio::test]
async fn curated_sources_never_include_fabricated_urls() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Approve).with_curator_reply(
        r#"{"urls": ["https://fake.example/a", "https://news.example/2", "https://news.example/9"]}"#,
    ));
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("transit strikes").with_date(date()))
        .await
        .unwrap();

    let retrieved: Vec<String> = RecordingRetriever::documents()
        .iter()
        .map(|doc| doc.source().to_string())
        .collect();
    assert!(outcome.sources.iter().all(|url| retrieved.contains(url)));
    assert_eq!(
        outcome.sources,
        vec!["https://news.example/2", "https://news.example/9"]
    );

    let draft_request = &model.requests(Stage::Draft)[0];
    assert!(draft_request.user.contains("https://news.example/9"));
    assert!(!draft_request.user.contains("https://news.example/4"));
}

#[tokio::test]
async fn unmatched_selection_drafts_from_no_sources() {
    let model = Arc::new(
        ScriptedModel::new(CriticScript::Approve)
            .with_curator_reply(r#"{"urls": ["https://invented.example"]}"#),
    );
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(RunOptions::new("transit strikes").with_date(date()))
        .await
        .unwrap();

    assert!(outcome.sources.is_empty());
    assert_eq!(model.count(Stage::Draft), 1);
}

#[tokio::test]
async fn invalid_curator_json_is_a_parse_error() {
    let model = Arc::new(
        ScriptedModel::new(CriticScript::Approve).with_curator_reply("Here are the best links!"),
    );
    let retriever = Arc::new(RecordingRetriever::new());

    let err = workflow(&model, &retriever, WorkflowSettings::default())
        .run("transit strikes")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Parse {
            stage: Stage::Curate,
            ..
        }
    ));
    assert_eq!(err.stage(), Some(Stage::Curate));
    assert_eq!(model.count(Stage::Draft), 0);
}

#[tokio::test]
async fn retrieval_failure_stops_the_run() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Approve));
    let retriever = Arc::new(RecordingRetriever::failing());

    let err = workflow(&model, &retriever, WorkflowSettings::default())
        .run("transit strikes")
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::Retrieval { .. }));
    assert!(err.is_retryable());
    assert!(model.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn trace_follows_the_stage_sequence() {
    let model = Arc::new(ScriptedModel::new(CriticScript::ApproveAfter(1)));
    let retriever = Arc::new(RecordingRetriever::new());

    let outcome = workflow(&model, &retriever, WorkflowSettings::default())
        .run_with_report(
            RunOptions::new("city budget vote")
                .with_run_id("run-fixed")
                .with_date(date()),
        )
        .await
        .unwrap();

    let stages: Vec<Stage> = outcome.trace_events.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Retrieve,
            Stage::Curate,
            Stage::Draft,
            Stage::Critique,
            Stage::Revise,
            Stage::Critique
        ]
    );
    assert_eq!(outcome.run_id, "run-fixed");
    assert!(outcome.trace_summary().render_markdown().contains("approved"));
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let model = Arc::new(ScriptedModel::new(CriticScript::Approve));
    let retriever = Arc::new(RecordingRetriever::new());
    let flow = workflow(&model, &retriever, WorkflowSettings::default());

    let (first, second) = tokio::join!(flow.run("wildfire season"), flow.run("EU"));

    assert_eq!(first.unwrap(), DRAFT);
    assert_eq!(second.unwrap(), DRAFT);

    let mut queries: Vec<String> = retriever
        .queries
        .lock()
        .unwrap()
        .iter()
        .map(|(query, _)| query.clone())
        .collect();
    queries.sort();
    assert_eq!(queries, vec!["Topic: EU", "wildfire season"]);
}

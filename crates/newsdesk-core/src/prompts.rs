//! Prompt construction for the model-backed stages.
//!
//! Builders are pure: everything they need, including the run date, is passed
//! in, so the exact text sent to the model is reproducible in tests.

use chrono::NaiveDate;

use crate::feedback::{FEEDBACK_CLOSE, FEEDBACK_OPEN};
use crate::llm::{CompletionRequest, ResponseFormat};
use crate::state::{SourceDocument, Stage};

/// Marker the critic returns when the article needs no further changes.
pub const APPROVAL_SENTINEL: &str = "[DONE]";
/// Prefix applied to topics shorter than [`MIN_QUERY_CHARS`] before retrieval.
pub const SHORT_TOPIC_PREFIX: &str = "Topic: ";
pub const MIN_QUERY_CHARS: usize = 5;
pub const ARTICLE_PARAGRAPHS: usize = 5;

/// Date as shown to the model (`dd/mm/YYYY`).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Query actually sent to the retriever for a topic.
pub fn retrieval_query(topic: &str) -> String {
    if topic.chars().count() < MIN_QUERY_CHARS {
        format!("{SHORT_TOPIC_PREFIX}{topic}")
    } else {
        topic.to_string()
    }
}

fn serialize_sources(sources: &[SourceDocument]) -> String {
    serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string())
}

pub fn curator_request(
    topic: &str,
    sources: &[SourceDocument],
    max_urls: usize,
    today: NaiveDate,
) -> CompletionRequest {
    let placeholders = (1..=max_urls)
        .map(|idx| format!("\"url{idx}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let system = format!(
        "You are a personal newspaper editor. Your sole task is to return the list of URLs of the \
         {max_urls} most relevant articles for the provided topic or query as a JSON string in \
         this format: {{\"urls\": [{placeholders}]}}. Return nothing but the JSON object."
    );
    let user = format!(
        "Today's date is {}. Topic or query: {topic}. Here is a list of articles: {}",
        format_date(today),
        serialize_sources(sources)
    );
    CompletionRequest::new(Stage::Curate, system, user).with_format(ResponseFormat::Json)
}

pub fn drafter_request(topic: &str, sources: &[SourceDocument], today: NaiveDate) -> CompletionRequest {
    let system = format!(
        "You are a personal newspaper writer. Your sole task is to write an excellent article \
         about a topic using a list of articles. Write {ARTICLE_PARAGRAPHS} paragraphs in markdown."
    );
    let user = format!(
        "Today's date is {}. Your task is to write a critically acclaimed article for me about \
         the provided query or topic based on the sources. Here is a list of articles: {} \
         This is the topic: {topic} Please return a well-written article based on the provided \
         information.",
        format_date(today),
        serialize_sources(sources)
    );
    CompletionRequest::new(Stage::Draft, system, user)
}

pub fn critic_request(
    article: &str,
    previous_critique: Option<&str>,
    today: NaiveDate,
) -> CompletionRequest {
    let system = format!(
        "You are a personal newspaper writing critique. Your sole purpose is to provide short \
         feedback on a written article so the writer will know what to fix. Today's date is {}. \
         Your task is to provide really short feedback on the article only if necessary. If you \
         think the article is good, please return {APPROVAL_SENTINEL}. You can provide feedback \
         on the revised article or just return {APPROVAL_SENTINEL} if you think the article is \
         good. Please return a string of your critique or {APPROVAL_SENTINEL}.",
        format_date(today)
    );
    let revision_note = previous_critique
        .map(|critique| {
            format!(
                "The writer has revised the article based on your previous critique: {critique} \
                 The writer might have left feedback for you encoded between {FEEDBACK_OPEN} \
                 tags. The feedback is only for you to see and will be removed from the final \
                 article.\n"
            )
        })
        .unwrap_or_default();
    let user = format!("{revision_note}This is the article: {article}");
    CompletionRequest::new(Stage::Critique, system, user)
}

pub fn reviser_request(article: &str, critique: &str) -> CompletionRequest {
    let system = "You are a personal newspaper editor. Your sole purpose is to edit a \
                  well-written article about a topic based on given critique."
        .to_string();
    let user = format!(
        "Your task is to edit the article based on the critique given. This is the article: \
         {article} This is the critique: {critique} Please return the edited article based on \
         the critique given. You may leave feedback about the critique encoded between \
         {FEEDBACK_OPEN} tags like this: {FEEDBACK_OPEN} here goes the feedback ...{FEEDBACK_CLOSE}"
    );
    CompletionRequest::new(Stage::Revise, system, user)
}

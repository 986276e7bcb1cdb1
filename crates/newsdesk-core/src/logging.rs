//! Append-only JSONL log of finished runs, one file per month.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::warn;

use crate::workflow::{ArticleOutcome, Termination};

const LOG_DIR_ENV: &str = "NEWSDESK_LOG_DIR";
const RETENTION_ENV: &str = "NEWSDESK_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
        (
            "tvly_token",
            Regex::new(r"(tvly-[A-Za-z0-9]{16,})").expect("invalid tvly_token regex"),
        ),
    ]
});

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    run_id: String,
    topic: String,
    termination: Termination,
    revisions: usize,
    article_chars: usize,
    sources: Vec<String>,
    reviewer_notes: usize,
    final_critique: Option<String>,
    trace_path: Option<String>,
    redactions: Vec<&'static str>,
}

/// Base directory for run logs (`NEWSDESK_LOG_DIR`, default `data/logs`).
pub fn log_base_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

fn retention_days() -> u64 {
    std::env::var(RETENTION_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        if !regex.is_match(&output) {
            continue;
        }
        output = regex
            .replace_all(&output, |caps: &Captures| {
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .into_owned();
        redactions.insert(*name);
    }
    output
}

/// Append a record of `outcome` under `base_dir/<year>/<month>/runs.jsonl`.
pub fn log_run_completion(
    base_dir: &Path,
    outcome: &ArticleOutcome,
    trace_path: Option<&Path>,
) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let topic = sanitize_text(&outcome.topic, &mut redactions);
    let sources = outcome
        .sources
        .iter()
        .map(|source| sanitize_text(source, &mut redactions))
        .collect();
    let final_critique = outcome
        .final_critique
        .as_deref()
        .map(|critique| sanitize_text(critique, &mut redactions));

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        run_id: outcome.run_id.clone(),
        topic,
        termination: outcome.termination,
        revisions: outcome.revisions,
        article_chars: outcome.article.chars().count(),
        sources,
        reviewer_notes: outcome.reviewer_notes.len(),
        final_critique,
        trace_path: trace_path.map(|path| path.display().to_string()),
        redactions: redactions.into_iter().collect(),
    };

    if !record.redactions.is_empty() {
        warn!(
            run_id = %record.run_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    let path = base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()))
        .join("runs.jsonl");
    append_json_line(&path, &record)?;
    enforce_retention(base_dir)?;
    Ok(path)
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writeln!(writer)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn enforce_retention(base_dir: &Path) -> Result<()> {
    let retention = retention_days();
    if retention == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn outcome() -> ArticleOutcome {
        ArticleOutcome {
            run_id: "run-test".into(),
            topic: "leaked api_key=abcd1234 story".into(),
            article: "Body".into(),
            termination: Termination::NonConvergence { revisions: 2 },
            revisions: 2,
            sources: vec!["https://a.example".into()],
            reviewer_notes: vec!["note".into()],
            final_critique: Some("remove sk-abcdef1234567890XYZ".into()),
            trace_events: Vec::new(),
        }
    }

    #[test]
    fn redacts_and_appends_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = log_run_completion(dir.path(), &outcome(), None)?;
        log_run_completion(dir.path(), &outcome(), None)?;

        let contents = fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: Value = serde_json::from_str(lines[0])?;
        assert_eq!(record["run_id"], "run-test");
        assert_eq!(record["termination"]["status"], "non_convergence");
        assert_eq!(record["topic"], "leaked api_key=[REDACTED] story");
        assert_eq!(record["final_critique"], "remove [REDACTED]");
        assert_eq!(record["redactions"], serde_json::json!(["api_key", "sk_token"]));
        Ok(())
    }

    #[test]
    fn clean_text_is_untouched() {
        let mut redactions = BTreeSet::new();
        assert_eq!(sanitize_text("plain topic", &mut redactions), "plain topic");
        assert!(redactions.is_empty());
    }
}

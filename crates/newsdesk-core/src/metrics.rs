use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

use crate::state::Stage;

struct WorkflowMetrics {
    task_runs: Counter<u64>,
    task_duration_ms: Histogram<f64>,
    revisions: Histogram<u64>,
    non_convergence: Counter<u64>,
}

static METRICS: OnceCell<WorkflowMetrics> = OnceCell::new();

fn handles() -> &'static WorkflowMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("newsdesk.workflow");
        WorkflowMetrics {
            task_runs: meter
                .u64_counter("workflow_task_runs_total")
                .with_description("Task executions by stage and status")
                .init(),
            task_duration_ms: meter
                .f64_histogram("workflow_task_duration_ms")
                .with_description("Task runtime in milliseconds, including the external call")
                .init(),
            revisions: meter
                .u64_histogram("workflow_revisions")
                .with_description("Revise passes per completed run")
                .init(),
            non_convergence: meter
                .u64_counter("workflow_non_convergence_total")
                .with_description("Runs stopped by the revision bound before approval")
                .init(),
        }
    })
}

/// Log whether an OTLP endpoint is configured; exporters are installed by the deployment.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("NEWSDESK_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "NEWSDESK_OTEL_METRICS_ENDPOINT detected for {service_name}; install an OTLP meter provider to export workflow metrics"
        );
    }
}

/// No-op unless a global meter provider is installed.
pub fn record_task_metrics(stage: Stage, succeeded: bool, duration_ms: f64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("stage", stage.as_str()),
        KeyValue::new("status", if succeeded { "ok" } else { "error" }),
    ];
    metrics.task_runs.add(1, &attrs);
    metrics.task_duration_ms.record(duration_ms, &attrs);
}

pub fn record_run_metrics(revisions: usize, converged: bool) {
    let metrics = handles();
    let attrs = [KeyValue::new("converged", converged)];
    metrics.revisions.record(revisions as u64, &attrs);
    if !converged {
        metrics.non_convergence.add(1, &[]);
    }
}

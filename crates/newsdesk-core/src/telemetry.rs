use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::NewsdeskError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Filter directive; `RUST_LOG` wins when set, then this, then `info`.
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            with_target: false,
        }
    }
}

/// Install the global tracing subscriber (logs go to stderr).
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), NewsdeskError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or(options.env_filter)
        .unwrap_or_else(|| "info".to_string());

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(directive))
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| NewsdeskError::InvalidConfiguration(format!("telemetry init failed: {err}")))?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

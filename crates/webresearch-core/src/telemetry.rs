use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::ResearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber. The filter argument wins over
/// `RUST_LOG`; with neither present the level defaults to `info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_telemetry(filter: Option<&str>) -> Result<(), ResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let directives = filter
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(directives))
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

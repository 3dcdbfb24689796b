//! Tracing subscriber setup.

use crate::error::{RunnerError, RunnerResult};
use tracing_subscriber::EnvFilter;

/// Default filter when nothing else is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Build the log filter.
///
/// Precedence: `--log-level`, then `RUST_LOG`, then the config document,
/// then [`DEFAULT_LOG_LEVEL`].
pub fn log_filter(cli: Option<&str>, config: Option<&str>) -> RunnerResult<EnvFilter> {
    if let Some(directive) = cli {
        return parse(directive);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    parse(config.unwrap_or(DEFAULT_LOG_LEVEL))
}

fn parse(directive: &str) -> RunnerResult<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|err| RunnerError::Config(format!("invalid log filter {:?}: {}", directive, err)))
}

/// Install the global subscriber. Logs go to stderr.
pub fn init_logging(filter: EnvFilter) -> RunnerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| RunnerError::Config(format!("cannot install logger: {}", err)))
}

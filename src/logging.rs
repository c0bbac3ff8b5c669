// 📝 Logging setup
//
// Logs go to stderr so that CLI output on stdout stays clean.

use crate::config::{LogArgs, LogFormat};
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from RUST_LOG when set, the configured level otherwise.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid log level {:?}: {}", level, e)),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(args: &LogArgs) -> Result<()> {
    let filter = env_filter(&args.log_level)?;
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .flatten_event(true),
            )
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names_parse() {
        for level in ["debug", "info", "warn", "error", "statement_ledger=debug"] {
            assert!(EnvFilter::try_new(level).is_ok(), "{} should parse", level);
        }
    }

    #[test]
    fn test_garbage_level_is_rejected() {
        assert!(EnvFilter::try_new("statement_ledger=loud").is_err());
    }
}

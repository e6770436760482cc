use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LedgerConfig;

/// Filter used when neither `RUST_LOG` nor [`ENV_LOG`] is set.
pub const DEFAULT_FILTER: &str = "info,ledgerops_client=debug,ledgerops_contracts=debug";

/// Filter override that only applies to ledgerops, so a shell-wide
/// `RUST_LOG` meant for other tools can be left alone.
pub const ENV_LOG: &str = "LEDGEROPS_LOG";

const LOG_FILE_PREFIX: &str = "ledgerops";

/// Where log lines go besides the daily file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Console {
    Stderr,
    Off,
}

/// Logs to `~/.ledgerops/logs` and stderr. The returned guard flushes the
/// file writer on drop and must outlive every log call.
pub fn init_logging() -> Result<WorkerGuard> {
    let logs_dir = LedgerConfig::logs_dir()?;
    let filter = resolve_filter(|key| std::env::var(key).ok(), DEFAULT_FILTER)?;
    install(&logs_dir, filter, Console::Stderr)
}

/// File-only logging under `logs_dir`. A second call in the same process
/// returns an error instead of panicking.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    let filter = resolve_filter(|key| std::env::var(key).ok(), filter)?;
    install(logs_dir, filter, Console::Off)
}

/// Pick the active filter: `RUST_LOG`, then [`ENV_LOG`], then `fallback`.
/// An unparsable directive is an error rather than a silent fallback.
fn resolve_filter(lookup: impl Fn(&str) -> Option<String>, fallback: &str) -> Result<EnvFilter> {
    let (source, directives) = [EnvFilter::DEFAULT_ENV, ENV_LOG]
        .into_iter()
        .find_map(|key| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key, value))
        })
        .unwrap_or(("default", fallback.to_string()));
    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter from {source}: {directives:?}"))
}

fn install(logs_dir: &Path, filter: EnvFilter, console: Console) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory: {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = (console == Console::Stderr).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_rust_log_wins_over_ledgerops_log() {
        let filter = resolve_filter(
            lookup(&[("RUST_LOG", "warn"), (ENV_LOG, "trace")]),
            DEFAULT_FILTER,
        )
        .unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_ledgerops_log_applies_without_rust_log() {
        let filter = resolve_filter(lookup(&[(ENV_LOG, "ledgerops_client=trace")]), "info").unwrap();
        assert_eq!(filter.to_string(), "ledgerops_client=trace");
    }

    #[test]
    fn test_blank_variables_fall_back_to_default() {
        let filter = resolve_filter(lookup(&[("RUST_LOG", "  ")]), DEFAULT_FILTER);
        assert!(filter.is_ok());
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let err = resolve_filter(lookup(&[(ENV_LOG, "ledgerops_client=loud")]), "info").unwrap_err();
        assert!(err.to_string().contains(ENV_LOG), "unexpected error: {err}");
    }

    #[test]
    fn test_init_logging_to_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        // Only one subscriber can be installed per process; the directory is
        // created either way.
        let _guard = init_logging_to_dir(&logs_dir, "warn");
        assert!(logs_dir.exists());
    }

    #[test]
    fn test_second_init_reports_error_instead_of_panicking() {
        let tmp = tempfile::tempdir().unwrap();
        let first = init_logging_to_dir(&tmp.path().join("a"), "info");
        let second = init_logging_to_dir(&tmp.path().join("b"), "info");

        assert!(first.is_err() || second.is_err());
        if let Err(e) = second {
            assert!(e.to_string().contains("logging"), "unexpected error: {e}");
        }
    }
}

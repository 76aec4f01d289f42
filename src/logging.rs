use crate::cli::Cli;
use crate::config::Config;
use crate::constants::DEFAULT_LOG_FILE;
use crate::error::AppError;
use std::io::stderr;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_DIRECTIVE: &str = "dart_identity=info";

fn env_filter() -> Result<EnvFilter, AppError> {
    let directive = DEFAULT_DIRECTIVE
        .parse()
        .map_err(|e| AppError::log_setup_error(format!("Invalid log directive: {e}")))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Splits a log file path into `(directory, file name)`, with defaults.
pub fn resolve_log_target(custom_path: Option<&str>) -> (String, String) {
    match custom_path {
        Some(custom_path) => {
            let path = Path::new(custom_path);
            let parent = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            (parent.to_string_lossy().to_string(), file_name.to_string())
        }
        None => (Config::get_log_dir_path(), DEFAULT_LOG_FILE.to_string()),
    }
}

/// Sets up logging for one CLI run.
///
/// - Always logs to a daily rolling file
/// - With `--verbose`, also logs to stderr so stdout stays clean for `--json`
/// - `RUST_LOG` directives are honored on top of `dart_identity=info`
///
/// Returns the path to the log file and the guard that must be kept alive
/// for the duration of the program to ensure proper log flushing.
pub async fn setup_logging(cli: &Cli, config: &Config) -> Result<(String, WorkerGuard), AppError> {
    let custom_log_path = cli.log_file.as_deref().or(config.log_file_path.as_deref());
    let (log_dir, log_file_name) = resolve_log_target(custom_log_path);

    if !Path::new(&log_dir).exists() {
        tokio::fs::create_dir_all(&log_dir).await.map_err(|e| {
            AppError::log_setup_error(format!("Failed to create log directory: {e}"))
        })?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, &log_file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::Layer::new()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter()?);

    let registry = tracing_subscriber::registry().with(file_layer);
    let installed = if cli.verbose {
        registry
            .with(
                fmt::Layer::new()
                    .with_writer(stderr)
                    .with_ansi(true)
                    .with_filter(env_filter()?),
            )
            .try_init()
    } else {
        registry.try_init()
    };
    installed
        .map_err(|e| AppError::log_setup_error(format!("Failed to install subscriber: {e}")))?;

    let log_file_path = format!("{log_dir}/{log_file_name}");
    Ok((log_file_path, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_log_target_custom_path() {
        let (dir, file) = resolve_log_target(Some("/var/log/darts/identity.log"));
        assert_eq!(dir, "/var/log/darts");
        assert_eq!(file, "identity.log");
    }

    #[test]
    fn test_resolve_log_target_bare_file_name() {
        let (dir, file) = resolve_log_target(Some("identity.log"));
        assert_eq!(dir, ".");
        assert_eq!(file, "identity.log");
    }

    #[test]
    fn test_resolve_log_target_default() {
        let (dir, file) = resolve_log_target(None);
        assert!(dir.contains("dart_identity"));
        assert_eq!(file, DEFAULT_LOG_FILE);
    }

    #[test]
    fn test_default_directive_parses() {
        assert!(env_filter().is_ok());
    }
}

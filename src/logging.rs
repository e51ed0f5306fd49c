//! Log setup for the server and client binaries.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{ChatterboxError, Result};

/// sqlx logs every statement at info.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx=warn"];

fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// `RUST_LOG` wins; otherwise `level`, falling back to info.
fn build_filter(level: &str) -> EnvFilter {
    let level = parse_level(level).unwrap_or(Level::INFO);
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the server subscriber: stdout plus an append-only log file.
///
/// Fails if the file cannot be opened or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if let Some(parent) = Path::new(&config.file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(Arc::new(log_file)))
                .with_ansi(false),
        )
        .with(build_filter(&config.level))
        .try_init()
        .map_err(|e| ChatterboxError::Config(format!("logging already initialized: {e}")))?;

    if parse_level(&config.level).is_none() {
        tracing::warn!(level = %config.level, "Unknown log level, using info");
    }
    Ok(())
}

/// Install a stderr-only subscriber, leaving stdout to the chat itself.
/// Does nothing if a subscriber is already installed.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(build_filter(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level(" Info "), Some(Level::INFO));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("error"), Some(Level::ERROR));
    }

    #[test]
    fn test_parse_level_unknown() {
        assert_eq!(parse_level("verbose"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logs").join("chatterbox.log");
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: file.to_string_lossy().into_owned(),
        };

        // Another test may already own the global subscriber; the file is
        // opened before that matters.
        let _ = init(&config);
        assert!(file.exists());
    }
}

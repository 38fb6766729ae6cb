//! Logging bootstrap for the tree core.
//!
//! # Responsibility
//! - Start rolling file logs once per process.
//! - Capture panics as single-line, sanitized log events.
//!
//! # Invariants
//! - Same level and directory: repeated init is a no-op.
//! - A different level or directory after init is rejected.
//! - Nothing here panics.
//! - Events carry ids, counts and codes only. Titles and content stay out of
//!   the log.

use crate::config::CoreConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "treenote";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 8 * 1024 * 1024;
const MAX_LOG_FILES: usize = 4;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    dir: PathBuf,
    _handle: LoggerHandle,
}

/// Logging setup failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    InvalidDirectory(String),
    AlreadyInitialized { active: String, requested: String },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidDirectory(message) => write!(f, "invalid log directory: {message}"),
            Self::AlreadyInitialized { active, requested } => write!(
                f,
                "logging already initialized with {active}; refusing to switch to {requested}"
            ),
            Self::Backend(message) => write!(f, "logger backend failed: {message}"),
        }
    }
}

impl Error for LoggingError {}

/// Starts file logging at `level` under the absolute directory `log_dir`.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), LoggingError> {
    let level = normalize_level(level)?;
    let dir = normalize_log_dir(log_dir)?;

    if let Some(active) = ACTIVE.get() {
        return ensure_same(active, level, &dir);
    }

    let active = ACTIVE.get_or_try_init(|| start_logger(level, &dir))?;
    ensure_same(active, level, &dir)
}

/// Starts logging from the configured level and directory.
pub fn init_from_config(config: &CoreConfig) -> Result<(), LoggingError> {
    let dir = config
        .log_dir
        .to_str()
        .ok_or_else(|| LoggingError::InvalidDirectory("path is not valid UTF-8".to_string()))?;
    init_logging(&config.log_level, dir)
}

/// Returns `(level, directory)` of the active logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, LoggingError> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err(LoggingError::InvalidDirectory("path is empty".to_string()));
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(LoggingError::InvalidDirectory(format!(
            "`{trimmed}` is not absolute"
        )));
    }
    Ok(path.to_path_buf())
}

fn ensure_same(active: &ActiveLogger, level: &str, dir: &Path) -> Result<(), LoggingError> {
    if active.dir != dir {
        return Err(LoggingError::AlreadyInitialized {
            active: format!("directory `{}`", active.dir.display()),
            requested: format!("directory `{}`", dir.display()),
        });
    }
    if active.level != level {
        return Err(LoggingError::AlreadyInitialized {
            active: format!("level `{}`", active.level),
            requested: format!("level `{level}`"),
        });
    }
    Ok(())
}

fn start_logger(level: &'static str, dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|err| {
        LoggingError::InvalidDirectory(format!("cannot create `{}`: {err}", dir.display()))
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_init module=logging status=ok level={} os={} version={}",
        level,
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic module=logging status=error location={} payload={}",
            location,
            sanitize(&payload, MAX_PANIC_PAYLOAD_CHARS)
        );
        previous(panic_info);
    }));
}

/// Flattens to one line and caps the length.
fn sanitize(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, normalize_level, sanitize, LoggingError};

    #[test]
    fn levels_normalize_and_unknown_is_rejected() {
        assert_eq!(normalize_level(" WARNING ").unwrap(), "warn");
        assert_eq!(normalize_level("Trace").unwrap(), "trace");
        assert_eq!(
            normalize_level("loud"),
            Err(LoggingError::UnsupportedLevel("loud".to_string()))
        );
    }

    #[test]
    fn relative_directory_is_rejected() {
        let err = init_logging("info", "logs/dev").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidDirectory(message) if message.contains("absolute")));
    }

    #[test]
    fn sanitize_flattens_and_caps() {
        let out = sanitize("a\nb\rc-long-tail", 5);
        assert_eq!(out, "a b c...");
    }

    fn scratch_dir(suffix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "treenote-logging-{suffix}-{}-{}",
            std::process::id(),
            crate::model::node::now_epoch_ms()
        ))
    }

    #[test]
    fn repeated_init_is_idempotent_and_conflicts_are_rejected() {
        let first = scratch_dir("first");
        let second = scratch_dir("second");
        let first_dir = first.to_str().unwrap();
        let second_dir = second.to_str().unwrap();

        init_logging("info", first_dir).unwrap();
        init_logging("INFO", first_dir).unwrap();
        assert!(matches!(
            init_logging("debug", first_dir),
            Err(LoggingError::AlreadyInitialized { .. })
        ));
        assert!(matches!(
            init_logging("info", second_dir),
            Err(LoggingError::AlreadyInitialized { .. })
        ));

        let (level, dir) = logging_status().unwrap();
        assert_eq!(level, "info");
        assert_eq!(dir, first);
    }
}

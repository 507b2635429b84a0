//! Shared logging utilities for Clipflow binaries.
//!
//! Both binaries log to stderr and to a per-service file under the runtime
//! log directory. Rotation is deliberately simple: growth is checked once
//! at startup, and an oversized log is set aside as `<name>.log.prev`
//! before a fresh file is opened. Controller runs are short and the
//! distribution runner restarts with its host, so start-of-process is the
//! natural rotation point; nothing rotates mid-write.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "clipflow_controller=info,clipflow_dist=info,clipflow_store=info,clipflow_qc=info";
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Clipflow binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a per-service log file and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_runtime_log_dir().context("Failed to ensure log directory")?;
    let log_file = open_service_log(&log_dir, config.app_name)?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter =
        if config.verbose { EnvFilter::new("debug") } else { file_filter.clone() };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Runtime (service-level) log directory.
///
/// Priority:
/// 1) CLIPFLOW_LOG_DIR
/// 2) <CLIPFLOW_ROOT or .>/logs/runtime
///
/// Job-level logs live under `sandbox/logs/<job_id>/` and are written by
/// the controller directly, not through tracing.
pub fn runtime_log_dir() -> PathBuf {
    if let Ok(override_path) = std::env::var("CLIPFLOW_LOG_DIR") {
        return PathBuf::from(override_path);
    }
    let root = std::env::var("CLIPFLOW_ROOT").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(root).join("logs").join("runtime")
}

/// Ensure the runtime log directory exists.
pub fn ensure_runtime_log_dir() -> Result<PathBuf> {
    let dir = runtime_log_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    Ok(dir)
}

/// Open `<dir>/<app>.log` for appending, first setting an oversized log
/// aside as `<app>.log.prev`. One predecessor is kept; older history is
/// dropped with it.
fn open_service_log(dir: &Path, app_name: &str) -> Result<File> {
    let name = log_file_name(app_name);
    let path = dir.join(&name);

    if let Ok(meta) = fs::metadata(&path) {
        if meta.len() > MAX_LOG_FILE_SIZE {
            let prev = dir.join(format!("{name}.prev"));
            fs::rename(&path, &prev).with_context(|| {
                format!("Failed to set aside oversized log {}", path.display())
            })?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn log_file_name(app_name: &str) -> String {
    let safe: String = app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    format!("{safe}.log")
}

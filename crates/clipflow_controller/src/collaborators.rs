//! Subprocess collaborators and their log capture.
//!
//! Collaborators stay process-isolated for memory hygiene; the controller
//! consumes nothing but their exit codes and captured output. Commands are
//! argv vectors, overridable per deployment through whitespace-split env
//! vars so stub tools can stand in during tests.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};

/// Env var pointing the worker at the current retry plan, when one exists.
pub const RETRY_PLAN_ENV: &str = "CAF_RETRY_PLAN_PATH";
/// Env var carrying the attempt id into the worker.
pub const RETRY_ATTEMPT_ENV: &str = "CAF_RETRY_ATTEMPT_ID";

/// Argv vectors for the external tools the controller drives.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Renders the job outputs. Invoked with `--job <path>` appended.
    pub worker: Vec<String>,
    /// Verifies output lineage. Invoked with the job path appended.
    pub lineage_verify: Vec<String>,
    /// Derives the two-pass orchestration artifact. Invoked with
    /// `--job-id <id>` appended. Optional; failures are warnings.
    pub two_pass: Option<Vec<String>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            worker: argv_default("python3 repo/worker/render_clip.py"),
            lineage_verify: argv_default("python3 repo/tools/lineage_verify.py"),
            two_pass: Some(argv_default("python3 repo/tools/derive_two_pass_orchestration.py")),
        }
    }
}

impl Collaborators {
    /// Resolve commands from the environment, falling back to the stock
    /// tool layout. Setting `CLIPFLOW_TWO_PASS_CMD` to an empty string
    /// disables the two-pass step.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker: argv_from_env("CLIPFLOW_WORKER_CMD").unwrap_or(defaults.worker),
            lineage_verify: argv_from_env("CLIPFLOW_LINEAGE_VERIFY_CMD")
                .unwrap_or(defaults.lineage_verify),
            two_pass: match std::env::var("CLIPFLOW_TWO_PASS_CMD") {
                Ok(raw) if raw.trim().is_empty() => None,
                Ok(raw) => Some(split_argv(&raw)),
                Err(_) => defaults.two_pass,
            },
        }
    }
}

fn argv_default(raw: &str) -> Vec<String> {
    split_argv(raw)
}

fn argv_from_env(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let argv = split_argv(&raw);
    if argv.is_empty() {
        None
    } else {
        Some(argv)
    }
}

fn split_argv(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Run one collaborator, streaming stdout+stderr into `log_path`. Returns
/// the exit code; a signal death maps to -1.
pub fn run_logged(
    argv: &[String],
    extra_args: &[&str],
    log_path: &Path,
    env: &[(&str, String)],
    cwd: &Path,
) -> Result<i32> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty collaborator command");
    };
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory for {}", log_path.display()))?;
    }
    let log = File::create(log_path)
        .with_context(|| format!("Failed to open collaborator log {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("Failed to clone log handle for {}", log_path.display()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .args(extra_args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    for (key, value) in env {
        command.env(key, value);
    }

    let status = command
        .status()
        .with_context(|| format!("Failed to spawn collaborator: {program}"))?;
    Ok(status.code().unwrap_or(-1))
}

//! Sandbox-rooted filesystem layout.
//!
//! Every persistent structure lives under `<project_root>/sandbox/`:
//!
//! ```text
//! sandbox/
//!   jobs/<job_id>.job.json
//!   inbox/approve-*.json
//!   assets/
//!   logs/<job_id>/{events.ndjson, state.json, .lock/, attempts/, qc/}
//!   output/<job_id>/{final.mp4, final.srt, result.json, segments/}
//!   dist_artifacts/<job_id>/{publish_plan.json, <platform>.state.json, bundles/}
//! ```
//!
//! Contract pointers (`repo/...` relpaths) resolve against the project root.

use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1) CLIPFLOW_ROOT
/// 2) current directory
pub fn project_root() -> PathBuf {
    if let Ok(override_path) = std::env::var("CLIPFLOW_ROOT") {
        return PathBuf::from(override_path);
    }
    PathBuf::from(".")
}

/// Typed accessors for the sandbox directory tree.
#[derive(Debug, Clone)]
pub struct SandboxLayout {
    project_root: PathBuf,
    sandbox_root: PathBuf,
}

impl SandboxLayout {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let sandbox_root = project_root.join("sandbox");
        Self { project_root, sandbox_root }
    }

    /// Layout with a non-default sandbox location, given relative to the
    /// project root (absolute paths are taken as-is).
    pub fn with_sandbox(project_root: impl Into<PathBuf>, sandbox: impl AsRef<Path>) -> Self {
        let project_root = project_root.into();
        let sandbox = sandbox.as_ref();
        let sandbox_root = if sandbox.is_absolute() {
            sandbox.to_path_buf()
        } else {
            project_root.join(sandbox)
        };
        Self { project_root, sandbox_root }
    }

    /// Layout rooted at `CLIPFLOW_ROOT` (or the current directory).
    pub fn discover() -> Self {
        Self::new(project_root())
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.sandbox_root.join("jobs")
    }

    pub fn job_contract_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(format!("{job_id}.job.json"))
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.sandbox_root.join("inbox")
    }

    pub fn assets_root(&self) -> PathBuf {
        self.sandbox_root.join("assets")
    }

    pub fn logs_root(&self) -> PathBuf {
        self.sandbox_root.join("logs")
    }

    pub fn job_logs_dir(&self, job_id: &str) -> PathBuf {
        self.logs_root().join(job_id)
    }

    pub fn events_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("events.ndjson")
    }

    pub fn state_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("state.json")
    }

    pub fn lock_dir(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join(".lock")
    }

    pub fn validate_log_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("validate_job.log")
    }

    pub fn lineage_verify_log_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("lineage_verify.log")
    }

    pub fn attempts_root(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("attempts")
    }

    pub fn attempt_dir(&self, job_id: &str, attempt_id: &str) -> PathBuf {
        self.attempts_root(job_id).join(attempt_id)
    }

    pub fn qc_dir(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir(job_id).join("qc")
    }

    pub fn quality_decision_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("quality_decision.v1.json")
    }

    pub fn quality_report_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("recast_quality_report.v1.json")
    }

    pub fn costume_report_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("costume_fidelity.v1.json")
    }

    pub fn two_pass_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("two_pass_orchestration.v1.json")
    }

    pub fn two_pass_log_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("two_pass_orchestration.log")
    }

    pub fn retry_plan_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("retry_plan.v1.json")
    }

    pub fn finalize_gate_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("finalize_gate.v1.json")
    }

    pub fn route_advice_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("qc_route_advice.v1.json")
    }

    pub fn lineage_doc_path(&self, job_id: &str) -> PathBuf {
        self.qc_dir(job_id).join("retry_attempt_lineage.v1.json")
    }

    pub fn output_root(&self) -> PathBuf {
        self.sandbox_root.join("output")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.output_root().join(job_id)
    }

    pub fn segment_report_path(&self, job_id: &str) -> PathBuf {
        self.output_dir(job_id)
            .join("segments")
            .join("segment_stitch_report.v1.json")
    }

    pub fn dist_root(&self) -> PathBuf {
        self.sandbox_root.join("dist_artifacts")
    }

    pub fn dist_job_dir(&self, job_id: &str) -> PathBuf {
        self.dist_root().join(job_id)
    }

    pub fn publish_plan_path(&self, job_id: &str) -> PathBuf {
        self.dist_job_dir(job_id).join("publish_plan.json")
    }

    pub fn platform_state_path(&self, job_id: &str, platform: &str) -> PathBuf {
        self.dist_job_dir(job_id).join(format!("{platform}.state.json"))
    }

    pub fn bundles_dir(&self, job_id: &str) -> PathBuf {
        self.dist_job_dir(job_id).join("bundles")
    }

    /// Resolve a repo-rooted contract pointer relpath. Returns None when the
    /// relpath does not carry the `repo/` prefix.
    pub fn resolve_repo_pointer(&self, relpath: &str) -> Option<PathBuf> {
        if relpath.starts_with("repo/") {
            Some(self.project_root.join(relpath))
        } else {
            None
        }
    }
}

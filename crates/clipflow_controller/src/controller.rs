//! The job state machine.
//!
//! Journal-first discipline throughout: every transition appends its event
//! line before the state document is rewritten. The controller writes only
//! under `logs/<job_id>/`; outputs and assets belong to the worker and the
//! planner.

use crate::collaborators::{run_logged, Collaborators, RETRY_ATTEMPT_ENV, RETRY_PLAN_ENV};
use crate::shutdown::ShutdownFlag;
use anyhow::{Context, Result};
use clipflow_protocol::contract::{validate_job, JobContract};
use clipflow_protocol::events::{JobEvent, JobState, QcAction};
use clipflow_protocol::naming::{job_id_from_filename, PREEXISTING_ATTEMPT_ID};
use clipflow_protocol::paths::SandboxLayout;
use clipflow_protocol::qc::{
    LineageArtifacts, LineageAttempt, RetryPlanDoc, RouteAdviceDoc, ROUTE_ADVICE_VERSION,
};
use clipflow_qc::{apply_finalize_gate, decide, load_context};
use clipflow_store::{
    append_attempt, next_attempt_id, read_json_as, safe_relpath, write_json_atomic, JobLock,
    Journal, StatePointers, StoreError,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outputs the worker must leave behind for a job to advance.
const REQUIRED_OUTPUTS: [&str; 3] = ["final.mp4", "final.srt", "result.json"];

/// Disambiguates staging logs when several controllers share a process.
static STAGING_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// One controller invocation's configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub layout: SandboxLayout,
    pub job_path: PathBuf,
    pub max_retries: u32,
    pub collaborators: Collaborators,
}

/// Drive one job to a terminal outcome. Returns the process exit code:
/// 0 on COMPLETED or lock-busy, 1 otherwise.
pub fn run_job(cfg: &ControllerConfig) -> Result<i32> {
    let shutdown = ShutdownFlag::register();
    let filename_job_id = job_id_from_filename(&cfg.job_path);

    // Validation happens before any per-job log directory exists; its
    // report goes to a staging log that is only promoted once the job id
    // is known and the lock is held.
    let staging_seq = STAGING_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let staging_log = std::env::temp_dir()
        .join(format!("clipflow-validate-{}-{staging_seq}.log", std::process::id()));
    let Some(job) = validate_to_staging(&cfg.job_path, &staging_log) else {
        return Ok(1);
    };
    let Ok(contract) = serde_json::from_value::<JobContract>(job.clone()) else {
        return Ok(1);
    };
    let job_id = contract.job_id.clone();

    let logs_dir = cfg.layout.job_logs_dir(&job_id);
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create log directory {}", logs_dir.display()))?;

    let Some(_lock) = JobLock::try_acquire(&cfg.layout.lock_dir(&job_id))? else {
        info!(job_id = %job_id, "lock exists; another controller owns this job");
        return Ok(0);
    };

    let validate_log = cfg.layout.validate_log_path(&job_id);
    if let Err(e) = fs::copy(&staging_log, &validate_log) {
        warn!(error = %e, "failed to promote validation log");
    }

    let journal = Journal::new(cfg.layout.events_path(&job_id), cfg.layout.state_path(&job_id));
    let mut run = JobRun {
        cfg,
        job_id,
        filename_job_id,
        contract,
        job,
        journal,
        current_state: None,
        pointers: StatePointers {
            validate_log: Some(validate_log.display().to_string()),
            ..Default::default()
        },
    };
    run.execute(&shutdown)
}

/// Read, parse and validate the contract, leaving a report in the staging
/// log. None means the contract was rejected (total invalidation).
fn validate_to_staging(job_path: &Path, staging_log: &Path) -> Option<Value> {
    let outcome: Result<Value, String> = (|| {
        let raw = fs::read_to_string(job_path)
            .map_err(|e| format!("failed to read job contract {}: {e}", job_path.display()))?;
        let job: Value = serde_json::from_str(&raw)
            .map_err(|e| format!("job contract is not valid JSON: {e}"))?;
        validate_job(&job).map_err(|e| e.to_string())?;
        Ok(job)
    })();
    match outcome {
        Ok(job) => {
            let _ = fs::write(staging_log, "OK\n");
            Some(job)
        }
        Err(message) => {
            warn!(job = %job_path.display(), %message, "job contract rejected");
            let _ = fs::write(staging_log, format!("{message}\n"));
            None
        }
    }
}

#[derive(Debug)]
struct OutputsStatus {
    all_present: bool,
    any_present: bool,
    present: Vec<String>,
    missing: Vec<String>,
}

fn outputs_status(output_dir: &Path) -> OutputsStatus {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for name in REQUIRED_OUTPUTS {
        if output_dir.join(name).exists() {
            present.push(name.to_string());
        } else {
            missing.push(name.to_string());
        }
    }
    OutputsStatus {
        all_present: missing.is_empty(),
        any_present: !present.is_empty(),
        present,
        missing,
    }
}

/// The routing outcome of one quality evaluation, with the artifact
/// pointers the lineage record wants.
struct DecisionOutcome {
    action: QcAction,
    reason: String,
    retry_type: Option<String>,
    segment_retry: Option<Value>,
    quality_decision_relpath: Option<String>,
    retry_plan_relpath: Option<String>,
}

struct JobRun<'a> {
    cfg: &'a ControllerConfig,
    job_id: String,
    filename_job_id: String,
    contract: JobContract,
    job: Value,
    journal: Journal,
    current_state: Option<String>,
    pointers: StatePointers,
}

impl JobRun<'_> {
    fn transition(
        &mut self,
        state: JobState,
        event: JobEvent,
        attempt_id: Option<&str>,
        reason: Option<&str>,
        error: Option<&str>,
        details: Value,
    ) -> Result<(), StoreError> {
        self.journal.append_event(
            event.as_str(),
            self.current_state.as_deref(),
            Some(state.as_str()),
            attempt_id,
            details,
        )?;
        self.current_state = Some(state.as_str().to_string());
        self.journal.write_state(
            &self.job_id,
            state.as_str(),
            attempt_id,
            reason,
            error,
            &self.pointers,
        )
    }

    /// Warning event: journaled without a state change.
    fn warn_event(
        &self,
        event: JobEvent,
        attempt_id: Option<&str>,
        details: Value,
    ) -> Result<(), StoreError> {
        self.journal.append_event(
            event.as_str(),
            self.current_state.as_deref(),
            self.current_state.as_deref(),
            attempt_id,
            details,
        )
    }

    fn relpath_if_exists(&self, path: &Path) -> Option<String> {
        if path.exists() {
            safe_relpath(path, self.cfg.layout.project_root()).ok()
        } else {
            None
        }
    }

    fn job_path_arg(&self) -> String {
        self.cfg.job_path.display().to_string()
    }

    fn verify_inputs(&self) -> Result<(), String> {
        let background = &self.contract.render.background_asset;
        let bg_path = self.cfg.layout.sandbox_root().join(background);
        if !bg_path.exists() {
            return Err(format!("missing background asset: {}", bg_path.display()));
        }
        if !clipflow_store::ensure_under(&bg_path, &self.cfg.layout.assets_root()) {
            return Err(format!(
                "background asset outside sandbox assets: {}",
                bg_path.display()
            ));
        }
        Ok(())
    }

    /// Run the two-pass collaborator, compute the in-process decision,
    /// journal the decision/advisory/retry-plan events, and apply the
    /// finalize gate. The retry-plan artifact, when valid and in budget,
    /// is authoritative over the engine's action.
    fn quality_decision(&mut self, attempt_id: Option<&str>) -> Result<DecisionOutcome> {
        let layout = self.cfg.layout.clone();
        let job_id = self.job_id.clone();
        fs::create_dir_all(layout.qc_dir(&job_id))
            .with_context(|| format!("Failed to create qc directory for {job_id}"))?;

        if let Some(two_pass) = &self.cfg.collaborators.two_pass {
            let rc = run_logged(
                two_pass,
                &["--job-id", &job_id],
                &layout.two_pass_log_path(&job_id),
                &[],
                layout.project_root(),
            )?;
            if rc != 0 {
                self.warn_event(
                    JobEvent::TwoPassOrchestrationFailed,
                    attempt_id,
                    json!({"exit_code": rc}),
                )?;
            }
        }

        let ctx = load_context(&layout, &job_id, &self.job, self.cfg.max_retries);
        let doc = decide(&ctx);
        let decision_path = layout.quality_decision_path(&job_id);
        write_json_atomic(&decision_path, &doc)?;

        let mut action = doc.decision.action;
        let mut reason = doc.decision.reason.clone();
        self.warn_event(
            JobEvent::QualityDecision,
            attempt_id,
            json!({
                "action": action.as_str(),
                "reason": reason,
                "artifact": decision_path.display().to_string(),
            }),
        )?;

        let advice_path = layout.route_advice_path(&job_id);
        if let Some(advice) = read_json_as::<RouteAdviceDoc>(&advice_path) {
            if advice.version == ROUTE_ADVICE_VERSION {
                self.warn_event(
                    JobEvent::QualityAdvisory,
                    attempt_id,
                    json!({
                        "advice_action": advice.advice.recommended_action,
                        "advice_reason": advice.advice.reason,
                        "authoritative_action": action.as_str(),
                        "authority_mode": "policy_authoritative",
                        "artifact": advice_path.display().to_string(),
                    }),
                )?;
            }
        }

        let mut retry_type = match action {
            QcAction::RetryMotion => Some("motion".to_string()),
            QcAction::RetryRecast => Some("recast".to_string()),
            _ => None,
        };
        let mut segment_retry = if retry_type.is_some() {
            Some(serde_json::to_value(&doc.segment_retry).unwrap_or(Value::Null))
        } else {
            None
        };

        let retry_plan_path = layout.retry_plan_path(&job_id);
        if let Some(plan) = read_json_as::<RetryPlanDoc>(&retry_plan_path) {
            let mapped = match plan.retry.retry_type.as_str() {
                "motion" => Some(QcAction::RetryMotion),
                "recast" => Some(QcAction::RetryRecast),
                _ => None,
            };
            let in_budget = matches!(
                (plan.retry.next_attempt, plan.retry.max_retries),
                (Some(next), Some(max)) if next <= max
            );
            if let (true, Some(mapped), true) = (plan.retry.enabled, mapped, in_budget) {
                self.warn_event(
                    JobEvent::QualityRetryPlan,
                    attempt_id,
                    json!({
                        "mapped_action": mapped.as_str(),
                        "source_action": plan.source.action.clone()
                            .unwrap_or_else(|| action.as_str().to_string()),
                        "next_attempt": plan.retry.next_attempt,
                        "max_retries": plan.retry.max_retries,
                        "artifact": retry_plan_path.display().to_string(),
                    }),
                )?;
                action = mapped;
                if let Some(source_reason) = plan.source.reason.clone() {
                    reason = source_reason;
                }
                retry_type = Some(plan.retry.retry_type.clone());
                segment_retry = plan.retry.segment_retry.clone();
            } else if let Some(terminal) = QcAction::parse(&plan.state.terminal_state) {
                if matches!(terminal, QcAction::BlockForCostume | QcAction::EscalateHitl) {
                    action = terminal;
                    if let Some(source_reason) = plan.source.reason.clone() {
                        reason = source_reason;
                    }
                    retry_type = None;
                    segment_retry = plan.retry.segment_retry.clone();
                }
            }
        }

        let (action, reason, gate_blocked) =
            apply_finalize_gate(&layout.finalize_gate_path(&job_id), action, &reason);
        if gate_blocked {
            info!(job_id = %job_id, "finalize gate blocked completion");
        }

        Ok(DecisionOutcome {
            action,
            reason,
            retry_type,
            segment_retry,
            quality_decision_relpath: self.relpath_if_exists(&decision_path),
            retry_plan_relpath: self.relpath_if_exists(&retry_plan_path),
        })
    }

    fn record_lineage(
        &self,
        attempt_id: &str,
        source_attempt_id: Option<&str>,
        outcome: &DecisionOutcome,
    ) -> Result<(), StoreError> {
        let output_dir = self.cfg.layout.output_dir(&self.job_id);
        let entry = LineageAttempt {
            ts: clipflow_protocol::events::now_utc_ts(),
            attempt_id: attempt_id.to_string(),
            source_attempt_id: source_attempt_id.map(str::to_string),
            decision_action: outcome.action.as_str().to_string(),
            decision_reason: outcome.reason.clone(),
            resolution: outcome.action.class().as_str().to_string(),
            retry_type: outcome.retry_type.clone(),
            segment_retry: outcome.segment_retry.clone(),
            artifacts: LineageArtifacts {
                quality_decision_relpath: outcome.quality_decision_relpath.clone(),
                retry_plan_relpath: outcome.retry_plan_relpath.clone(),
                result_relpath: self.relpath_if_exists(&output_dir.join("result.json")),
                output_final_relpath: self.relpath_if_exists(&output_dir.join("final.mp4")),
            },
        };
        append_attempt(&self.cfg.layout.lineage_doc_path(&self.job_id), &self.job_id, &entry)
    }

    fn execute(&mut self, shutdown: &ShutdownFlag) -> Result<i32> {
        let layout = self.cfg.layout.clone();
        let job_id = self.job_id.clone();
        let job_path_arg = self.job_path_arg();

        self.transition(JobState::Discovered, JobEvent::Discovered, None, None, None, json!({}))?;
        self.transition(JobState::Validated, JobEvent::Validated, None, None, None, json!({}))?;

        if self.filename_job_id != job_id {
            self.warn_event(
                JobEvent::JobIdMismatch,
                None,
                json!({
                    "filename_job_id": self.filename_job_id,
                    "job_json_job_id": job_id,
                }),
            )?;
        }

        let output_dir = layout.output_dir(&job_id);
        self.pointers.result_json = Some(output_dir.join("result.json").display().to_string());

        let status = outputs_status(&output_dir);
        if status.any_present && !status.all_present {
            self.warn_event(
                JobEvent::OutputsPartial,
                None,
                json!({"present": status.present, "missing": status.missing}),
            )?;
        }

        // Re-entry: complete outputs short-circuit the worker; the quality
        // decision alone settles the job or sends it into the retry loop.
        let mut force_retry_from_existing = false;
        if status.all_present {
            self.transition(JobState::OutputsPresent, JobEvent::OutputsPresent, None, None, None, json!({}))?;
            self.transition(JobState::LineageReady, JobEvent::LineageReady, None, None, None, json!({}))?;

            let lineage_log = layout.lineage_verify_log_path(&job_id);
            self.pointers.lineage_log = Some(lineage_log.display().to_string());
            let rc = run_logged(
                &self.cfg.collaborators.lineage_verify,
                &[&job_path_arg],
                &lineage_log,
                &[],
                layout.project_root(),
            )?;
            if rc == 0 {
                self.transition(JobState::Verified, JobEvent::LineageOk, None, None, None, json!({}))?;
                let outcome = self.quality_decision(None)?;
                self.record_lineage(PREEXISTING_ATTEMPT_ID, None, &outcome)?;
                match outcome.action.class() {
                    clipflow_protocol::events::ActionClass::Finalize => {
                        self.transition(JobState::Completed, JobEvent::Completed, None, None, None, json!({}))?;
                        return Ok(0);
                    }
                    clipflow_protocol::events::ActionClass::Escalate => {
                        self.transition(
                            JobState::FailQuality,
                            JobEvent::QualityEscalated,
                            None,
                            Some(&outcome.reason),
                            None,
                            json!({}),
                        )?;
                        return Ok(1);
                    }
                    clipflow_protocol::events::ActionClass::Retry => {
                        self.transition(
                            JobState::FailQuality,
                            JobEvent::QualityRetry,
                            None,
                            Some(&outcome.reason),
                            None,
                            json!({}),
                        )?;
                        if self.cfg.max_retries == 0 {
                            return Ok(1);
                        }
                        force_retry_from_existing = true;
                        self.warn_event(
                            JobEvent::QualityRetryExecution,
                            None,
                            json!({"reason": "retry requested on existing outputs; entering bounded retry loop"}),
                        )?;
                    }
                }
            } else {
                self.transition(
                    JobState::FailVerify,
                    JobEvent::LineageFailed,
                    None,
                    Some("lineage verification failed on existing outputs"),
                    None,
                    json!({"exit_code": rc}),
                )?;
            }
        }

        if let Err(message) = self.verify_inputs() {
            self.transition(
                JobState::FailMissingInputs,
                JobEvent::MissingInputs,
                None,
                Some(&message),
                None,
                json!({}),
            )?;
            return Ok(1);
        }

        let total_attempts = self.cfg.max_retries + 1;
        for attempt_index in 0..total_attempts {
            if shutdown.is_set() {
                info!(job_id = %job_id, "SIGINT received; exiting cleanly");
                return Ok(1);
            }
            let has_budget = attempt_index + 1 < total_attempts;

            let attempt_id = next_attempt_id(&layout.attempts_root(&job_id))?;
            let attempt_dir = layout.attempt_dir(&job_id, &attempt_id);
            fs::create_dir_all(&attempt_dir)
                .with_context(|| format!("Failed to create attempt directory {}", attempt_dir.display()))?;
            self.pointers.attempt_dir = Some(attempt_dir.display().to_string());

            self.transition(JobState::Running, JobEvent::AttemptStart, Some(&attempt_id), None, None, json!({}))?;

            let worker_log = attempt_dir.join("worker.log");
            self.pointers.worker_log = Some(worker_log.display().to_string());
            let mut worker_env: Vec<(&str, String)> =
                vec![(RETRY_ATTEMPT_ENV, attempt_id.clone())];
            let retry_plan_path = layout.retry_plan_path(&job_id);
            if retry_plan_path.exists() {
                let absolute = fs::canonicalize(&retry_plan_path).unwrap_or(retry_plan_path);
                worker_env.push((RETRY_PLAN_ENV, absolute.display().to_string()));
            }
            let rc = run_logged(
                &self.cfg.collaborators.worker,
                &["--job", &job_path_arg],
                &worker_log,
                &worker_env,
                layout.project_root(),
            )?;
            if rc != 0 {
                self.transition(
                    JobState::FailWorker,
                    JobEvent::WorkerFailed,
                    Some(&attempt_id),
                    Some("worker failed"),
                    Some(&format!("worker exited with code {rc}")),
                    json!({"exit_code": rc}),
                )?;
                if has_budget {
                    continue;
                }
                return Ok(1);
            }
            if shutdown.is_set() {
                info!(job_id = %job_id, "SIGINT received; exiting cleanly");
                return Ok(1);
            }

            let status = outputs_status(&output_dir);
            if !status.all_present {
                self.transition(
                    JobState::FailOutputs,
                    JobEvent::OutputsMissing,
                    Some(&attempt_id),
                    Some("outputs missing after worker"),
                    None,
                    json!({"present": status.present, "missing": status.missing}),
                )?;
                if has_budget {
                    continue;
                }
                return Ok(1);
            }

            self.transition(JobState::OutputsPresent, JobEvent::OutputsPresent, Some(&attempt_id), None, None, json!({}))?;
            self.transition(JobState::LineageReady, JobEvent::LineageReady, Some(&attempt_id), None, None, json!({}))?;

            let lineage_log = attempt_dir.join("lineage_verify.log");
            self.pointers.lineage_log = Some(lineage_log.display().to_string());
            let rc = run_logged(
                &self.cfg.collaborators.lineage_verify,
                &[&job_path_arg],
                &lineage_log,
                &[],
                layout.project_root(),
            )?;
            if rc != 0 {
                self.transition(
                    JobState::FailVerify,
                    JobEvent::LineageFailed,
                    Some(&attempt_id),
                    Some("lineage verification failed"),
                    None,
                    json!({"exit_code": rc}),
                )?;
                if has_budget {
                    continue;
                }
                return Ok(1);
            }
            self.transition(JobState::Verified, JobEvent::LineageOk, Some(&attempt_id), None, None, json!({}))?;

            let outcome = self.quality_decision(Some(&attempt_id))?;
            let source = force_retry_from_existing.then_some(PREEXISTING_ATTEMPT_ID);
            self.record_lineage(&attempt_id, source, &outcome)?;
            match outcome.action.class() {
                clipflow_protocol::events::ActionClass::Finalize => {
                    self.transition(JobState::Completed, JobEvent::Completed, Some(&attempt_id), None, None, json!({}))?;
                    return Ok(0);
                }
                clipflow_protocol::events::ActionClass::Escalate => {
                    self.transition(
                        JobState::FailQuality,
                        JobEvent::QualityEscalated,
                        Some(&attempt_id),
                        Some(&outcome.reason),
                        None,
                        json!({}),
                    )?;
                    return Ok(1);
                }
                clipflow_protocol::events::ActionClass::Retry => {
                    self.transition(
                        JobState::FailQuality,
                        JobEvent::QualityRetry,
                        Some(&attempt_id),
                        Some(&outcome.reason),
                        None,
                        json!({}),
                    )?;
                    if has_budget {
                        continue;
                    }
                    return Ok(1);
                }
            }
        }
        Ok(1)
    }
}

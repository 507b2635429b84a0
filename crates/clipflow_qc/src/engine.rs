//! The deterministic quality decision engine.
//!
//! `decide` is a pure function: identical inputs produce identical decision
//! documents up to `generated_at`. Rules are evaluated in a fixed order and
//! the first match wins:
//!
//! 1. invalid quality-target contract        -> escalate_hitl
//! 2. invalid continuity pack                -> escalate_hitl
//! 3. two-pass identity failed               -> retry_recast | escalate_hitl
//! 4. two-pass motion failed                 -> retry_motion | escalate_hitl
//! 5. costume gate required but unreported   -> block_for_costume
//! 6. costume gate failed                    -> block_for_costume
//! 7. metric failures                        -> retry_* | escalate_hitl
//! 8. otherwise                              -> proceed_finalize
//!
//! The finalize-gate override sits between 7 and 8 at the system level but
//! lives in [`crate::gate`]; the engine itself never reads the gate
//! artifact.

use crate::contracts::{load_continuity_pack, load_quality_targets, ContinuityLoad, QualityTargetsLoad};
use clipflow_protocol::events::{now_utc_ts, QcAction};
use clipflow_protocol::paths::SandboxLayout;
use clipflow_protocol::qc::{
    Decision, DecisionInputs, DecisionPasses, DecisionPolicy, PassStatus, QualityDecisionDoc,
    SegmentRetryMode, SegmentRetryPlan, MOTION_METRICS, QUALITY_DECISION_VERSION,
};
use clipflow_store::{read_json_if_exists, safe_relpath};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Everything the engine needs, gathered once.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub job_id: String,
    pub max_retries: u32,
    pub prior_retry_attempt: u32,
    pub quality_report: Option<Value>,
    pub costume_report: Option<Value>,
    pub two_pass: Option<Value>,
    pub segment_report: Option<Value>,
    pub targets: QualityTargetsLoad,
    pub continuity: ContinuityLoad,
    pub quality_report_relpath: Option<String>,
    pub costume_report_relpath: Option<String>,
    pub two_pass_relpath: Option<String>,
    pub segment_report_relpath: Option<String>,
}

fn read_object(path: &Path) -> Option<Value> {
    read_json_if_exists(path).filter(Value::is_object)
}

fn existing_relpath(layout: &SandboxLayout, path: &Path) -> Option<String> {
    if path.exists() {
        safe_relpath(path, layout.project_root()).ok()
    } else {
        None
    }
}

/// Gather the QC artifacts, contracts and prior retry counter for a job.
/// `job` is the already-loaded contract; its pointers drive contract
/// resolution and its problems become escalation reasons, not errors.
pub fn load_context(
    layout: &SandboxLayout,
    job_id: &str,
    job: &Value,
    max_retries: u32,
) -> DecisionContext {
    let quality_path = layout.quality_report_path(job_id);
    let costume_path = layout.costume_report_path(job_id);
    let two_pass_path = layout.two_pass_path(job_id);
    let segment_path = layout.segment_report_path(job_id);

    let prior = read_object(&layout.quality_decision_path(job_id));
    let prior_retry_attempt = prior
        .as_ref()
        .and_then(|p| p.get("policy"))
        .and_then(|p| p.get("retry_attempt"))
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(0);

    DecisionContext {
        job_id: job_id.to_string(),
        max_retries,
        prior_retry_attempt,
        quality_report: read_object(&quality_path),
        costume_report: read_object(&costume_path),
        two_pass: read_object(&two_pass_path),
        segment_report: read_object(&segment_path),
        targets: load_quality_targets(layout, job),
        continuity: load_continuity_pack(layout, job),
        quality_report_relpath: existing_relpath(layout, &quality_path),
        costume_report_relpath: existing_relpath(layout, &costume_path),
        two_pass_relpath: existing_relpath(layout, &two_pass_path),
        segment_report_relpath: existing_relpath(layout, &segment_path),
    }
}

/// Metrics that failed: the report's own verdict plus any score that falls
/// below its (possibly contract-tuned) threshold.
fn failed_metrics(ctx: &DecisionContext) -> Vec<String> {
    let mut failed: BTreeSet<String> = BTreeSet::new();
    let Some(quality) = &ctx.quality_report else {
        return Vec::new();
    };
    if let Some(listed) = quality
        .get("overall")
        .and_then(|o| o.get("failed_metrics"))
        .and_then(Value::as_array)
    {
        for metric in listed {
            if let Some(name) = metric.as_str() {
                failed.insert(name.to_string());
            }
        }
    }
    if let Some(metrics) = quality.get("metrics").filter(|m| m.is_object()) {
        for (name, threshold) in &ctx.targets.thresholds {
            let score = metrics.get(name).and_then(|m| m.get("score")).and_then(Value::as_f64);
            if let Some(score) = score {
                if score < *threshold {
                    failed.insert(name.clone());
                }
            }
        }
    }
    failed.into_iter().collect()
}

fn is_motion_metric(name: &str) -> bool {
    MOTION_METRICS.contains(&name)
}

/// Build the segment targeting plan for a motion retry. Segment ids must
/// carry the `seg_` prefix; anything else in the report is ignored.
fn segment_retry_plan(segment_report: Option<&Value>, failed: &[String]) -> SegmentRetryPlan {
    let trigger: Vec<String> = failed.iter().filter(|m| is_motion_metric(m)).cloned().collect();
    if trigger.is_empty() {
        return SegmentRetryPlan::default();
    }
    let Some(report) = segment_report else {
        return SegmentRetryPlan {
            mode: SegmentRetryMode::RetryAll,
            target_segments: Vec::new(),
            trigger_metrics: trigger,
        };
    };

    let mut ids: BTreeSet<String> = BTreeSet::new();
    if trigger.iter().any(|m| m == "loop_seam") {
        if let Some(seams) = report.get("seams").and_then(Value::as_array) {
            for seam in seams {
                for key in ["from_segment", "to_segment"] {
                    if let Some(id) = seam.get(key).and_then(Value::as_str) {
                        if id.starts_with("seg_") {
                            ids.insert(id.to_string());
                        }
                    }
                }
            }
        }
    }
    if ids.is_empty() && trigger.iter().any(|m| m == "temporal_stability") {
        if let Some(segments) = report.get("segments").and_then(Value::as_array) {
            for segment in segments {
                if let Some(id) = segment.get("segment_id").and_then(Value::as_str) {
                    if id.starts_with("seg_") {
                        ids.insert(id.to_string());
                    }
                }
            }
        }
    }

    if ids.is_empty() {
        SegmentRetryPlan {
            mode: SegmentRetryMode::RetryAll,
            target_segments: Vec::new(),
            trigger_metrics: trigger,
        }
    } else {
        SegmentRetryPlan {
            mode: SegmentRetryMode::RetrySelected,
            target_segments: ids.into_iter().collect(),
            trigger_metrics: trigger,
        }
    }
}

/// Run the rule table and emit the full decision document.
pub fn decide(ctx: &DecisionContext) -> QualityDecisionDoc {
    let prior = ctx.prior_retry_attempt;
    let within = |next: u32| next <= ctx.max_retries;

    let failed = failed_metrics(ctx);
    let segment_retry = segment_retry_plan(ctx.segment_report.as_ref(), &failed);

    let motion_status = PassStatus::from_raw(
        ctx.two_pass
            .as_ref()
            .and_then(|t| t.get("passes"))
            .and_then(|p| p.get("motion"))
            .and_then(|m| m.get("status"))
            .and_then(Value::as_str),
    );
    let identity_status = PassStatus::from_raw(
        ctx.two_pass
            .as_ref()
            .and_then(|t| t.get("passes"))
            .and_then(|p| p.get("identity"))
            .and_then(|m| m.get("status"))
            .and_then(Value::as_str),
    );

    let costume_failed = ctx
        .costume_report
        .as_ref()
        .map(|c| c.get("pass") == Some(&Value::Bool(false)))
        .unwrap_or(false);

    let overall_pass = ctx
        .quality_report
        .as_ref()
        .and_then(|q| q.get("overall"))
        .and_then(|o| o.get("pass"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (action, reason, retry_attempt) = if let Some(err) = &ctx.targets.error {
        (
            QcAction::EscalateHitl,
            format!("Quality target contract invalid: {err}"),
            prior,
        )
    } else if let Some(err) = &ctx.continuity.error {
        (
            QcAction::EscalateHitl,
            format!("Continuity pack invalid: {err}"),
            prior,
        )
    } else if identity_status == PassStatus::Fail {
        if within(prior + 1) {
            (
                QcAction::RetryRecast,
                "Identity pass failed within retry budget; deterministic recast retry requested."
                    .to_string(),
                prior + 1,
            )
        } else {
            (
                QcAction::EscalateHitl,
                "Identity pass failed beyond retry budget; escalate to explicit HITL.".to_string(),
                prior + 1,
            )
        }
    } else if motion_status == PassStatus::Fail {
        if within(prior + 1) {
            (
                QcAction::RetryMotion,
                "Motion pass failed within retry budget; deterministic motion retry requested."
                    .to_string(),
                prior + 1,
            )
        } else {
            (
                QcAction::EscalateHitl,
                "Motion pass failed beyond retry budget; escalate to explicit HITL.".to_string(),
                prior + 1,
            )
        }
    } else if ctx.continuity.require_costume_fidelity && ctx.costume_report.is_none() {
        (
            QcAction::BlockForCostume,
            "Continuity pack requires costume fidelity report; report is missing.".to_string(),
            prior,
        )
    } else if costume_failed {
        (
            QcAction::BlockForCostume,
            "Costume fidelity gate failed; require corrected recast input.".to_string(),
            prior,
        )
    } else if ctx.quality_report.is_some() && (!overall_pass || !failed.is_empty()) {
        if within(prior + 1) {
            if !failed.is_empty() && failed.iter().all(|m| is_motion_metric(m)) {
                (
                    QcAction::RetryMotion,
                    "Motion quality metrics failed within retry budget; deterministic motion retry requested."
                        .to_string(),
                    prior + 1,
                )
            } else {
                (
                    QcAction::RetryRecast,
                    "Quality metrics failed within retry budget; deterministic retry requested."
                        .to_string(),
                    prior + 1,
                )
            }
        } else {
            (
                QcAction::EscalateHitl,
                "Quality metrics failed beyond retry budget; escalate to explicit HITL.".to_string(),
                prior + 1,
            )
        }
    } else {
        (
            QcAction::ProceedFinalize,
            "No blocking quality findings.".to_string(),
            prior,
        )
    };

    QualityDecisionDoc {
        version: QUALITY_DECISION_VERSION.to_string(),
        job_id: ctx.job_id.clone(),
        generated_at: now_utc_ts(),
        inputs: DecisionInputs {
            quality_report_relpath: ctx.quality_report_relpath.clone(),
            costume_report_relpath: ctx.costume_report_relpath.clone(),
            two_pass_orchestration_relpath: ctx.two_pass_relpath.clone(),
            quality_target_relpath: ctx.targets.relpath.clone(),
            quality_target_contract_error: ctx.targets.error.clone(),
            continuity_pack_relpath: ctx.continuity.relpath.clone(),
            continuity_pack_error: ctx.continuity.error.clone(),
            segment_stitch_report_relpath: ctx.segment_report_relpath.clone(),
            failed_metrics: failed,
        },
        policy: DecisionPolicy {
            max_retries: ctx.max_retries,
            retry_attempt,
            quality_targets: ctx.targets.thresholds.clone(),
        },
        segment_retry,
        passes: DecisionPasses { motion_status, identity_status },
        decision: Decision { action, reason },
    }
}

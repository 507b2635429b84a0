//! QC artifact documents: the quality decision, retry-attempt lineage,
//! finalize gate, and the advisory artifacts produced by external QC tools.
//!
//! Version tags are load-bearing: readers treat a document with the wrong
//! tag as absent (lineage starts fresh; advice is ignored).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::events::QcAction;

pub const QUALITY_DECISION_VERSION: &str = "quality_decision.v1";
pub const RETRY_LINEAGE_VERSION: &str = "retry_attempt_lineage.v1";
pub const ROUTE_ADVICE_VERSION: &str = "qc_route_advice.v1";
pub const QUALITY_TARGET_VERSION: &str = "quality_target.v1";
pub const CONTINUITY_PACK_VERSION: &str = "episode_continuity_pack.v1";

/// Default thresholds for the five canonical quality metrics.
pub fn default_quality_targets() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("identity_consistency".to_string(), 0.70),
        ("mask_edge_bleed".to_string(), 0.60),
        ("temporal_stability".to_string(), 0.70),
        ("loop_seam".to_string(), 0.70),
        ("audio_video".to_string(), 0.95),
    ])
}

/// Metrics whose failure routes to a motion retry rather than a recast.
pub const MOTION_METRICS: [&str; 2] = ["temporal_stability", "loop_seam"];

/// Two-pass orchestration status for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PassStatus {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

impl PassStatus {
    /// Normalize a raw status string; anything but pass/fail is unknown.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("pass") => PassStatus::Pass,
            Some("fail") => PassStatus::Fail,
            _ => PassStatus::Unknown,
        }
    }
}

/// Segment targeting mode for a motion retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SegmentRetryMode {
    #[serde(rename = "none")]
    #[default]
    None,
    #[serde(rename = "retry_all")]
    RetryAll,
    #[serde(rename = "retry_selected")]
    RetrySelected,
}

/// Which segments a motion retry should regenerate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SegmentRetryPlan {
    pub mode: SegmentRetryMode,
    pub target_segments: Vec<String>,
    pub trigger_metrics: Vec<String>,
}

/// Relpaths (project-root-relative) of the artifacts the decision consumed,
/// plus the contract errors that drove an escalation, if any.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DecisionInputs {
    pub quality_report_relpath: Option<String>,
    pub costume_report_relpath: Option<String>,
    pub two_pass_orchestration_relpath: Option<String>,
    pub quality_target_relpath: Option<String>,
    pub quality_target_contract_error: Option<String>,
    pub continuity_pack_relpath: Option<String>,
    pub continuity_pack_error: Option<String>,
    pub segment_stitch_report_relpath: Option<String>,
    pub failed_metrics: Vec<String>,
}

/// Retry budget bookkeeping carried between decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub max_retries: u32,
    pub retry_attempt: u32,
    pub quality_targets: BTreeMap<String, f64>,
}

/// Two-pass statuses as the decision saw them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DecisionPasses {
    pub motion_status: PassStatus,
    pub identity_status: PassStatus,
}

/// The chosen routing action and its reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: QcAction,
    pub reason: String,
}

/// `qc/quality_decision.v1.json`: the engine's full output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityDecisionDoc {
    pub version: String,
    pub job_id: String,
    pub generated_at: String,
    pub inputs: DecisionInputs,
    pub policy: DecisionPolicy,
    pub segment_retry: SegmentRetryPlan,
    pub passes: DecisionPasses,
    pub decision: Decision,
}

/// One attempt entry in the retry lineage chain. `source_attempt_id` points
/// at the attempt this one retries, forming a flat back-pointer chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageAttempt {
    pub ts: String,
    pub attempt_id: String,
    pub source_attempt_id: Option<String>,
    pub decision_action: String,
    pub decision_reason: String,
    pub resolution: String,
    pub retry_type: Option<String>,
    pub segment_retry: Option<Value>,
    pub artifacts: LineageArtifacts,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LineageArtifacts {
    pub quality_decision_relpath: Option<String>,
    pub retry_plan_relpath: Option<String>,
    pub result_relpath: Option<String>,
    pub output_final_relpath: Option<String>,
}

/// `qc/retry_attempt_lineage.v1.json`: grown in place, never rewritten
/// destructively while the version tag matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttemptLineage {
    pub version: String,
    pub job_id: String,
    pub generated_at: String,
    pub updated_at: String,
    pub attempts: Vec<LineageAttempt>,
}

/// `qc/finalize_gate.v1.json`: secondary authority over a finalize.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FinalizeGateDoc {
    pub gate: FinalizeGate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FinalizeGate {
    #[serde(default)]
    pub allow_finalize: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// `qc/retry_plan.v1.json`: produced by external QC tooling. When it names
/// an enabled in-budget retry, its mapping is authoritative for routing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPlanDoc {
    #[serde(default)]
    pub retry: RetryPlanRetry,
    #[serde(default)]
    pub source: RetryPlanSource,
    #[serde(default)]
    pub state: RetryPlanState,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPlanRetry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "none_string")]
    pub retry_type: String,
    #[serde(default)]
    pub max_retries: Option<i64>,
    #[serde(default)]
    pub next_attempt: Option<i64>,
    #[serde(default)]
    pub segment_retry: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPlanSource {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPlanState {
    #[serde(default = "none_string")]
    pub terminal_state: String,
}

impl Default for RetryPlanState {
    fn default() -> Self {
        Self { terminal_state: none_string() }
    }
}

fn none_string() -> String {
    "none".to_string()
}

/// `qc/qc_route_advice.v1.json`: advisory only; never changes the action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteAdviceDoc {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub advice: RouteAdvice,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteAdvice {
    #[serde(default)]
    pub recommended_action: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_status_normalization() {
        assert_eq!(PassStatus::from_raw(Some("pass")), PassStatus::Pass);
        assert_eq!(PassStatus::from_raw(Some("fail")), PassStatus::Fail);
        assert_eq!(PassStatus::from_raw(Some("flaky")), PassStatus::Unknown);
        assert_eq!(PassStatus::from_raw(None), PassStatus::Unknown);
    }

    #[test]
    fn retry_plan_tolerates_sparse_documents() {
        let doc: RetryPlanDoc = serde_json::from_str("{}").unwrap();
        assert!(!doc.retry.enabled);
        assert_eq!(doc.retry.retry_type, "none");
        assert_eq!(doc.state.terminal_state, "none");
    }

    #[test]
    fn default_targets_cover_canonical_metrics() {
        let targets = default_quality_targets();
        assert_eq!(targets.len(), 5);
        assert_eq!(targets["audio_video"], 0.95);
        assert_eq!(targets["mask_edge_bleed"], 0.60);
    }
}

//! Controller event and state vocabulary.
//!
//! The event journal is append-only NDJSON; the state document is a single
//! atomically-replaced JSON file. Events are the canonical history: the
//! controller always appends the event first, then rewrites state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// UTC timestamp at second precision, e.g. `2026-08-01T12:00:00Z`.
///
/// Second precision is deliberate: consumers assume monotone non-decrease,
/// not strict increase.
pub fn now_utc_ts() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Lifecycle states of a job. `FAIL_*` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "DISCOVERED")]
    Discovered,
    #[serde(rename = "VALIDATED")]
    Validated,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "OUTPUTS_PRESENT")]
    OutputsPresent,
    #[serde(rename = "LINEAGE_READY")]
    LineageReady,
    #[serde(rename = "VERIFIED")]
    Verified,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAIL_VALIDATE")]
    FailValidate,
    #[serde(rename = "FAIL_MISSING_INPUTS")]
    FailMissingInputs,
    #[serde(rename = "FAIL_WORKER")]
    FailWorker,
    #[serde(rename = "FAIL_OUTPUTS")]
    FailOutputs,
    #[serde(rename = "FAIL_VERIFY")]
    FailVerify,
    #[serde(rename = "FAIL_QUALITY")]
    FailQuality,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Discovered => "DISCOVERED",
            JobState::Validated => "VALIDATED",
            JobState::Running => "RUNNING",
            JobState::OutputsPresent => "OUTPUTS_PRESENT",
            JobState::LineageReady => "LINEAGE_READY",
            JobState::Verified => "VERIFIED",
            JobState::Completed => "COMPLETED",
            JobState::FailValidate => "FAIL_VALIDATE",
            JobState::FailMissingInputs => "FAIL_MISSING_INPUTS",
            JobState::FailWorker => "FAIL_WORKER",
            JobState::FailOutputs => "FAIL_OUTPUTS",
            JobState::FailVerify => "FAIL_VERIFY",
            JobState::FailQuality => "FAIL_QUALITY",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journal event names. Warning events reuse the current state on both
/// sides of the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Discovered,
    Validated,
    JobIdMismatch,
    OutputsPartial,
    OutputsPresent,
    OutputsMissing,
    LineageReady,
    LineageOk,
    LineageFailed,
    AttemptStart,
    WorkerFailed,
    MissingInputs,
    TwoPassOrchestrationFailed,
    QualityDecision,
    QualityAdvisory,
    QualityRetryPlan,
    QualityRetry,
    QualityRetryExecution,
    QualityEscalated,
    Completed,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Discovered => "DISCOVERED",
            JobEvent::Validated => "VALIDATED",
            JobEvent::JobIdMismatch => "JOB_ID_MISMATCH",
            JobEvent::OutputsPartial => "OUTPUTS_PARTIAL",
            JobEvent::OutputsPresent => "OUTPUTS_PRESENT",
            JobEvent::OutputsMissing => "OUTPUTS_MISSING",
            JobEvent::LineageReady => "LINEAGE_READY",
            JobEvent::LineageOk => "LINEAGE_OK",
            JobEvent::LineageFailed => "LINEAGE_FAILED",
            JobEvent::AttemptStart => "ATTEMPT_START",
            JobEvent::WorkerFailed => "WORKER_FAILED",
            JobEvent::MissingInputs => "MISSING_INPUTS",
            JobEvent::TwoPassOrchestrationFailed => "TWO_PASS_ORCHESTRATION_FAILED",
            JobEvent::QualityDecision => "QUALITY_DECISION",
            JobEvent::QualityAdvisory => "QUALITY_ADVISORY",
            JobEvent::QualityRetryPlan => "QUALITY_RETRY_PLAN",
            JobEvent::QualityRetry => "QUALITY_RETRY",
            JobEvent::QualityRetryExecution => "QUALITY_RETRY_EXECUTION",
            JobEvent::QualityEscalated => "QUALITY_ESCALATED",
            JobEvent::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One NDJSON line in `events.ndjson`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: String,
    pub event: String,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
    pub attempt_id: Option<String>,
    pub details: Value,
}

/// The quality policy engine's routing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QcAction {
    #[serde(rename = "proceed_finalize")]
    ProceedFinalize,
    #[serde(rename = "retry_motion")]
    RetryMotion,
    #[serde(rename = "retry_recast")]
    RetryRecast,
    #[serde(rename = "block_for_costume")]
    BlockForCostume,
    #[serde(rename = "escalate_hitl")]
    EscalateHitl,
}

impl QcAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcAction::ProceedFinalize => "proceed_finalize",
            QcAction::RetryMotion => "retry_motion",
            QcAction::RetryRecast => "retry_recast",
            QcAction::BlockForCostume => "block_for_costume",
            QcAction::EscalateHitl => "escalate_hitl",
        }
    }

    /// How the controller routes on this action.
    pub fn class(&self) -> ActionClass {
        match self {
            QcAction::RetryMotion | QcAction::RetryRecast => ActionClass::Retry,
            QcAction::BlockForCostume | QcAction::EscalateHitl => ActionClass::Escalate,
            QcAction::ProceedFinalize => ActionClass::Finalize,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "proceed_finalize" => Some(QcAction::ProceedFinalize),
            "retry_motion" => Some(QcAction::RetryMotion),
            "retry_recast" => Some(QcAction::RetryRecast),
            "block_for_costume" => Some(QcAction::BlockForCostume),
            "escalate_hitl" => Some(QcAction::EscalateHitl),
            _ => None,
        }
    }
}

impl std::fmt::Display for QcAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapsed routing class for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Retry,
    Escalate,
    Finalize,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Retry => "retry",
            ActionClass::Escalate => "escalate",
            ActionClass::Finalize => "finalize",
        }
    }
}

//! Finalize-gate reader: the secondary authority over a finalize.
//!
//! The gate can only block. A present gate without `allow_finalize: true`
//! vetoes a `proceed_finalize` into `escalate_hitl`; it never upgrades a
//! retry or an escalation. A missing or malformed gate artifact is
//! advisory silence: the decision stands.

use clipflow_protocol::events::QcAction;
use clipflow_store::read_json_if_exists;
use serde_json::Value;
use std::path::Path;

/// Reason recorded when the gate vetoes a finalize.
pub const GATE_BLOCKED_REASON: &str = "Finalize gate blocked completion.";

/// Apply the finalize gate at `gate_path` to a computed decision. Returns
/// the (possibly overridden) action/reason pair and whether an override
/// happened.
pub fn apply_finalize_gate(
    gate_path: &Path,
    action: QcAction,
    reason: &str,
) -> (QcAction, String, bool) {
    if action != QcAction::ProceedFinalize {
        return (action, reason.to_string(), false);
    }
    let Some(gate_doc) = read_json_if_exists(gate_path).filter(Value::is_object) else {
        return (action, reason.to_string(), false);
    };
    let allow = gate_doc
        .get("gate")
        .and_then(|g| g.get("allow_finalize"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if allow {
        (action, reason.to_string(), false)
    } else {
        (QcAction::EscalateHitl, GATE_BLOCKED_REASON.to_string(), true)
    }
}

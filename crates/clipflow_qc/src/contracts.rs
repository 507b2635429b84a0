//! Loaders for the policy contracts a job contract points at.
//!
//! Loading never fails hard: a malformed pointer or contract is reported as
//! an error string, which the decision engine turns into an HITL
//! escalation. Defaults stay in effect alongside the error so the decision
//! document always records a complete threshold table.

use clipflow_protocol::contract::ContractPointer;
use clipflow_protocol::paths::SandboxLayout;
use clipflow_protocol::qc::{
    default_quality_targets, CONTINUITY_PACK_VERSION, QUALITY_TARGET_VERSION,
};
use clipflow_store::{read_json_if_exists, safe_relpath};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome of resolving the `quality_target` pointer.
#[derive(Debug, Clone)]
pub struct QualityTargetsLoad {
    /// Effective thresholds: contract overrides on success, defaults otherwise.
    pub thresholds: BTreeMap<String, f64>,
    /// Project-root relpath of the contract file, when it exists.
    pub relpath: Option<String>,
    /// First problem found, if any. Drives an `escalate_hitl`.
    pub error: Option<String>,
}

impl QualityTargetsLoad {
    fn defaults() -> Self {
        Self { thresholds: default_quality_targets(), relpath: None, error: None }
    }

    fn fail(self, error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..self }
    }
}

/// Outcome of resolving the `continuity_pack` pointer.
#[derive(Debug, Clone, Default)]
pub struct ContinuityLoad {
    pub require_costume_fidelity: bool,
    pub require_identity_consistency: bool,
    pub relpath: Option<String>,
    pub error: Option<String>,
}

impl ContinuityLoad {
    fn fail(self, error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..self }
    }
}

fn existing_relpath(layout: &SandboxLayout, path: &PathBuf) -> Option<String> {
    if path.exists() {
        safe_relpath(path, layout.project_root()).ok()
    } else {
        None
    }
}

/// Resolve and parse the quality-target contract, falling back to defaults.
pub fn load_quality_targets(layout: &SandboxLayout, job: &Value) -> QualityTargetsLoad {
    let load = QualityTargetsLoad::defaults();
    let pointer = match job.get("quality_target") {
        None | Some(Value::Null) => return load,
        Some(p) => p,
    };
    if !pointer.is_object() {
        return load.fail("quality_target must be object");
    }
    let pointer = match serde_json::from_value::<ContractPointer>(pointer.clone()) {
        Ok(p) => p,
        Err(_) => return load.fail("quality_target.relpath must be repo-relative"),
    };
    let contract_path = match layout.resolve_repo_pointer(&pointer.relpath) {
        Some(p) => p,
        None => return load.fail("quality_target.relpath must be repo-relative"),
    };
    if !contract_path.exists() {
        return load.fail("quality target contract missing");
    }
    let load = QualityTargetsLoad {
        relpath: existing_relpath(layout, &contract_path),
        ..load
    };
    let contract = match read_json_if_exists(&contract_path) {
        Some(c) if c.is_object() => c,
        _ => return load.fail("quality target contract unreadable"),
    };
    if contract.get("version").and_then(Value::as_str) != Some(QUALITY_TARGET_VERSION) {
        return load.fail("quality target contract version mismatch");
    }
    let thresholds = match contract.get("thresholds") {
        Some(t) if t.is_object() => t,
        _ => return load.fail("quality target thresholds missing"),
    };

    let mut parsed = BTreeMap::new();
    for key in default_quality_targets().keys() {
        let value = match thresholds.get(key).and_then(Value::as_f64) {
            Some(v) => v,
            None => return load.fail(format!("quality target threshold missing: {key}")),
        };
        if !(0.0..=1.0).contains(&value) {
            return load.fail(format!("quality target threshold out of range: {key}"));
        }
        parsed.insert(key.clone(), value);
    }
    QualityTargetsLoad { thresholds: parsed, ..load }
}

/// Resolve and parse the continuity pack contract.
pub fn load_continuity_pack(layout: &SandboxLayout, job: &Value) -> ContinuityLoad {
    let load = ContinuityLoad::default();
    let pointer = match job.get("continuity_pack") {
        None | Some(Value::Null) => return load,
        Some(p) => p,
    };
    if !pointer.is_object() {
        return load.fail("continuity_pack must be object");
    }
    let pointer = match serde_json::from_value::<ContractPointer>(pointer.clone()) {
        Ok(p) => p,
        Err(_) => return load.fail("continuity_pack.relpath must be repo-relative"),
    };
    let pack_path = match layout.resolve_repo_pointer(&pointer.relpath) {
        Some(p) => p,
        None => return load.fail("continuity_pack.relpath must be repo-relative"),
    };
    if !pack_path.exists() {
        return load.fail("continuity pack missing");
    }
    let load = ContinuityLoad { relpath: existing_relpath(layout, &pack_path), ..load };
    let pack = match read_json_if_exists(&pack_path) {
        Some(p) if p.is_object() => p,
        _ => return load.fail("continuity pack unreadable"),
    };
    if pack.get("version").and_then(Value::as_str) != Some(CONTINUITY_PACK_VERSION) {
        return load.fail("continuity pack version mismatch");
    }
    let rules = match pack.get("rules") {
        Some(r) if r.is_object() => r,
        _ => return load.fail("continuity rules missing"),
    };
    let costume = match rules.get("require_costume_fidelity").and_then(Value::as_bool) {
        Some(b) => b,
        None => return load.fail("continuity rules require_costume_fidelity missing"),
    };
    let identity = match rules.get("require_identity_consistency").and_then(Value::as_bool) {
        Some(b) => b,
        None => return load.fail("continuity rules require_identity_consistency missing"),
    };
    ContinuityLoad {
        require_costume_fidelity: costume,
        require_identity_consistency: identity,
        ..load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn layout_with_contract(contract: &Value, rel: &str) -> (TempDir, SandboxLayout) {
        let dir = TempDir::new().unwrap();
        let layout = SandboxLayout::new(dir.path());
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(contract).unwrap()).unwrap();
        (dir, layout)
    }

    #[test]
    fn absent_pointer_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let layout = SandboxLayout::new(dir.path());
        let load = load_quality_targets(&layout, &json!({"job_id": "job-abc123"}));
        assert!(load.error.is_none());
        assert_eq!(load.thresholds["audio_video"], 0.95);
    }

    #[test]
    fn non_repo_relpath_is_an_error() {
        let dir = TempDir::new().unwrap();
        let layout = SandboxLayout::new(dir.path());
        let job = json!({"quality_target": {"relpath": "sandbox/q.json"}});
        let load = load_quality_targets(&layout, &job);
        assert_eq!(load.error.as_deref(), Some("quality_target.relpath must be repo-relative"));
        // Defaults stay in effect alongside the error.
        assert_eq!(load.thresholds.len(), 5);
    }

    #[test]
    fn contract_overrides_thresholds() {
        let contract = json!({
            "version": "quality_target.v1",
            "thresholds": {
                "identity_consistency": 0.9,
                "mask_edge_bleed": 0.5,
                "temporal_stability": 0.8,
                "loop_seam": 0.8,
                "audio_video": 0.99
            }
        });
        let (_dir, layout) = layout_with_contract(&contract, "repo/canon/qt.json");
        let job = json!({"quality_target": {"relpath": "repo/canon/qt.json"}});
        let load = load_quality_targets(&layout, &job);
        assert!(load.error.is_none());
        assert_eq!(load.thresholds["identity_consistency"], 0.9);
        assert!(load.relpath.as_deref().unwrap().ends_with("repo/canon/qt.json"));
    }

    #[test]
    fn missing_threshold_key_is_reported() {
        let contract = json!({
            "version": "quality_target.v1",
            "thresholds": {"identity_consistency": 0.9}
        });
        let (_dir, layout) = layout_with_contract(&contract, "repo/canon/qt.json");
        let job = json!({"quality_target": {"relpath": "repo/canon/qt.json"}});
        let load = load_quality_targets(&layout, &job);
        assert!(load.error.as_deref().unwrap().starts_with("quality target threshold missing:"));
    }

    #[test]
    fn out_of_range_threshold_is_reported() {
        let mut thresholds = serde_json::Map::new();
        for key in default_quality_targets().keys() {
            thresholds.insert(key.clone(), json!(0.5));
        }
        thresholds.insert("loop_seam".into(), json!(1.5));
        let contract = json!({"version": "quality_target.v1", "thresholds": thresholds});
        let (_dir, layout) = layout_with_contract(&contract, "repo/canon/qt.json");
        let job = json!({"quality_target": {"relpath": "repo/canon/qt.json"}});
        let load = load_quality_targets(&layout, &job);
        assert_eq!(load.error.as_deref(), Some("quality target threshold out of range: loop_seam"));
    }

    #[test]
    fn continuity_pack_round_trip() {
        let pack = json!({
            "version": "episode_continuity_pack.v1",
            "rules": {"require_costume_fidelity": true, "require_identity_consistency": true}
        });
        let (_dir, layout) = layout_with_contract(&pack, "repo/canon/pack.json");
        let job = json!({"continuity_pack": {"relpath": "repo/canon/pack.json"}});
        let load = load_continuity_pack(&layout, &job);
        assert!(load.error.is_none());
        assert!(load.require_costume_fidelity);
    }

    #[test]
    fn continuity_pack_missing_rule_is_an_error() {
        let pack = json!({
            "version": "episode_continuity_pack.v1",
            "rules": {"require_costume_fidelity": true}
        });
        let (_dir, layout) = layout_with_contract(&pack, "repo/canon/pack.json");
        let job = json!({"continuity_pack": {"relpath": "repo/canon/pack.json"}});
        let load = load_continuity_pack(&layout, &job);
        assert_eq!(
            load.error.as_deref(),
            Some("continuity rules require_identity_consistency missing")
        );
    }

    #[test]
    fn continuity_pack_file_missing() {
        let dir = TempDir::new().unwrap();
        let layout = SandboxLayout::new(dir.path());
        let job = json!({"continuity_pack": {"relpath": "repo/nope.json"}});
        let load = load_continuity_pack(&layout, &job);
        assert_eq!(load.error.as_deref(), Some("continuity pack missing"));
    }
}

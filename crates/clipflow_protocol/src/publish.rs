//! Distribution-side documents: approval artifacts, the publishing plan,
//! and the per-(job, platform) idempotency state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Platforms with a bundle adapter.
pub const KNOWN_PLATFORMS: [&str; 4] = ["youtube", "tiktok", "instagram", "x"];

/// A parsed `approve-*.json` artifact. `(job_id, platform, nonce)` is the
/// idempotency key; nonces are opaque and coerced to strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub job_id: String,
    pub platform: String,
    pub nonce: String,
    pub approved: bool,
}

impl Approval {
    /// Lenient extraction: returns None when any key component is missing
    /// or empty. A numeric nonce is accepted and stringified.
    pub fn from_value(value: &Value) -> Option<Self> {
        let job_id = value.get("job_id")?.as_str()?.to_string();
        let platform = value.get("platform")?.as_str()?.to_string();
        let nonce = match value.get("nonce")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if job_id.is_empty() || platform.is_empty() || nonce.is_empty() {
            return None;
        }
        let approved = value.get("approved").and_then(Value::as_bool).unwrap_or(false);
        Some(Self { job_id, platform, nonce, approved })
    }
}

/// Per-(job, platform) processing outcome. Pull-forward monotone: once
/// POSTED, no re-bundling happens for the recorded nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformStatus {
    #[serde(rename = "BUNDLE_GENERATED")]
    BundleGenerated,
    #[serde(rename = "POSTED")]
    Posted,
    #[serde(rename = "SKIPPED")]
    Skipped,
    #[serde(rename = "FAILED")]
    Failed,
}

impl PlatformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformStatus::BundleGenerated => "BUNDLE_GENERATED",
            PlatformStatus::Posted => "POSTED",
            PlatformStatus::Skipped => "SKIPPED",
            PlatformStatus::Failed => "FAILED",
        }
    }

    /// Statuses that make a same-nonce approval a no-op.
    pub fn is_settled(&self) -> bool {
        matches!(self, PlatformStatus::BundleGenerated | PlatformStatus::Posted)
    }
}

/// `<platform>.state.json` under `dist_artifacts/<job_id>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformState {
    pub job_id: String,
    pub platform: String,
    pub nonce: String,
    pub status: PlatformStatus,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Language-keyed strings (`{"en": "...", "zh-Hans": "..."}`). Values are
/// kept raw; non-string entries are ignored at resolution time.
pub type LangMap = Map<String, Value>;

/// `publish_plan.json`: read-only to the bundler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPlan {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub platform_plans: BTreeMap<String, PlatformPlan>,
}

/// One platform's slice of the publishing plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformPlan {
    #[serde(default)]
    pub title: LangMap,
    #[serde(default)]
    pub description: LangMap,
    #[serde(default)]
    pub tags: Vec<Value>,
    #[serde(default)]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub clips: Vec<ClipPlan>,
}

/// One clip to export.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClipPlan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub caption: LangMap,
    #[serde(default)]
    pub audio_plan: Option<Value>,
    #[serde(default)]
    pub audio_notes: Option<String>,
    #[serde(default)]
    pub audio_assets: Vec<String>,
}

//! Atomic, traversal-safe bundle materialization.
//!
//! One platform slice of the publishing plan becomes a self-contained
//! `dist_artifacts/<job_id>/bundles/<platform>/v1/` tree. The tree is
//! built under a nonce-suffixed temp directory and swapped into place by
//! rename; on any failure the temp tree is removed and a previously
//! published `v1/` is restored.
//!
//! Hard constraints, all fatal:
//! - job ids must be filesystem-safe;
//! - the dist root must resolve exactly to `sandbox/dist_artifacts/`;
//! - plan keys must not look like secrets (key-based scan only; value
//!   sniffing has a history of blocking legitimate URLs);
//! - source videos must live under `sandbox/output/<job_id>/`, audio
//!   assets under `sandbox/`;
//! - a platform slice with an empty clip list never produces a bundle.

use crate::checklist::checklist_content;
use crate::copy_format::format_copy;
use clipflow_protocol::naming::{clip_dirname, is_safe_job_id};
use clipflow_protocol::paths::SandboxLayout;
use clipflow_protocol::publish::{ClipPlan, PublishPlan};
use clipflow_store::ensure_under;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Forbidden key fragments (case-insensitive substring match on keys).
const SECRET_KEY_PATTERNS: [&str; 7] =
    ["api_key", "token", "cookie", "authorization", "secret", "password", "bearer"];

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("potential secret found in publish plan key: {key_path}")]
    SecretLeak { key_path: String },

    #[error("path safety violation: {0}")]
    PathEscape(String),

    #[error("invalid publish plan: {0}")]
    InvalidPlan(String),

    #[error("required artifact missing: {0}")]
    MissingAsset(String),

    #[error("filesystem failure on {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn fs_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> BundleError {
    let path = path.into();
    move |source| BundleError::Fs { path, source }
}

/// Recursively scan object keys for secret-shaped names. Deliberately
/// key-based, never value-based.
pub fn scan_for_secrets(value: &Value, path: &str) -> Result<(), BundleError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key_path =
                    if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                let lowered = key.to_lowercase();
                if SECRET_KEY_PATTERNS.iter().any(|p| lowered.contains(p)) {
                    return Err(BundleError::SecretLeak { key_path });
                }
                scan_for_secrets(child, &key_path)?;
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                scan_for_secrets(item, &format!("{path}[{idx}]"))?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Adapter entry point: load + scan the plan, render the checklist, build.
/// `Ok(None)` means the plan has no slice for this platform.
pub fn generate_bundle(
    layout: &SandboxLayout,
    job_id: &str,
    platform: &str,
    publish_plan_path: &Path,
    dist_root: &Path,
) -> Result<Option<PathBuf>, BundleError> {
    let raw = fs::read_to_string(publish_plan_path).map_err(fs_err(publish_plan_path))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| BundleError::InvalidPlan(format!("publish plan is not valid JSON: {e}")))?;
    scan_for_secrets(&value, "")?;

    let plan_job_id = value.get("job_id").and_then(Value::as_str).unwrap_or_default();
    if plan_job_id != job_id {
        return Err(BundleError::InvalidPlan(format!(
            "plan job_id '{plan_job_id}' does not match requested '{job_id}'"
        )));
    }
    let plan: PublishPlan = serde_json::from_value(value)
        .map_err(|e| BundleError::InvalidPlan(format!("publish plan has unexpected shape: {e}")))?;

    let Some(checklist) = checklist_content(platform, &plan) else {
        return Err(BundleError::InvalidPlan(format!("no adapter for platform: {platform}")));
    };
    build_bundle(layout, job_id, platform, &plan, &checklist, dist_root)
}

/// Build the `v1/` bundle for one platform. `Ok(None)` when the platform
/// has no slice in the plan.
pub fn build_bundle(
    layout: &SandboxLayout,
    job_id: &str,
    platform: &str,
    plan: &PublishPlan,
    checklist_text: &str,
    dist_root: &Path,
) -> Result<Option<PathBuf>, BundleError> {
    if !is_safe_job_id(job_id) {
        return Err(BundleError::PathEscape(format!(
            "job_id '{job_id}' must not contain separators or traversal"
        )));
    }
    let resolved_dist = resolve_dist_root(layout, dist_root)?;

    let Some(platform_plan) = plan.platform_plans.get(platform) else {
        return Ok(None);
    };
    if platform_plan.clips.is_empty() {
        return Err(BundleError::InvalidPlan(format!("no clips defined for {platform}")));
    }

    let bundle_parent = resolved_dist.join(job_id).join("bundles").join(platform);
    fs::create_dir_all(&bundle_parent).map_err(fs_err(&bundle_parent))?;
    let final_dir = bundle_parent.join("v1");
    if !ensure_under(&final_dir, &resolved_dist) {
        return Err(BundleError::PathEscape(format!(
            "computed bundle path {} escapes {}",
            final_dir.display(),
            resolved_dist.display()
        )));
    }

    let nonce = short_nonce();
    let tmp_dir = bundle_parent.join(format!("v1.__tmp__{nonce}"));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir).map_err(fs_err(&tmp_dir))?;
    }
    fs::create_dir_all(&tmp_dir).map_err(fs_err(&tmp_dir))?;

    let built = build_tree(layout, job_id, platform, platform_plan, checklist_text, &tmp_dir)
        .and_then(|()| swap_into_place(&bundle_parent, &tmp_dir, &final_dir));

    // The temp tree must never survive, success or failure.
    if tmp_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&tmp_dir) {
            warn!(tmp = %tmp_dir.display(), error = %e, "failed to clean bundle temp directory");
        }
    }

    built.map(|()| Some(final_dir))
}

fn resolve_dist_root(layout: &SandboxLayout, dist_root: &Path) -> Result<PathBuf, BundleError> {
    let expected = layout.dist_root();
    fs::create_dir_all(&expected).map_err(fs_err(&expected))?;
    let expected = fs::canonicalize(&expected).map_err(fs_err(layout.dist_root()))?;

    let requested = if dist_root.is_absolute() {
        dist_root.to_path_buf()
    } else {
        layout.project_root().join(dist_root)
    };
    let resolved = fs::canonicalize(&requested)
        .map_err(|_| BundleError::PathEscape(format!(
            "dist_root must resolve to '{}', got: {}",
            expected.display(),
            requested.display()
        )))?;
    if resolved != expected {
        return Err(BundleError::PathEscape(format!(
            "dist_root must resolve to '{}', got: {}",
            expected.display(),
            resolved.display()
        )));
    }
    Ok(resolved)
}

fn short_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Map `sandbox/...` (or `/sandbox/...`) plan paths onto the project root;
/// anything else is taken as a literal path.
fn resolve_plan_path(layout: &SandboxLayout, raw: &str) -> PathBuf {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.starts_with("sandbox/") {
        layout.project_root().join(trimmed)
    } else {
        PathBuf::from(raw)
    }
}

fn build_tree(
    layout: &SandboxLayout,
    job_id: &str,
    platform: &str,
    platform_plan: &clipflow_protocol::publish::PlatformPlan,
    checklist_text: &str,
    tmp_dir: &Path,
) -> Result<(), BundleError> {
    let clips_dir = tmp_dir.join("clips");
    fs::create_dir(&clips_dir).map_err(fs_err(&clips_dir))?;
    let checklists_dir = tmp_dir.join("checklists");
    fs::create_dir(&checklists_dir).map_err(fs_err(&checklists_dir))?;

    let checklist_path = checklists_dir.join(format!("posting_checklist_{platform}.txt"));
    fs::write(&checklist_path, checklist_text).map_err(fs_err(&checklist_path))?;

    let output_root = layout.output_dir(job_id);
    for (idx, clip) in platform_plan.clips.iter().enumerate() {
        let clip_dir = clips_dir.join(clip_dirname(clip.id.as_deref(), idx));
        write_clip(layout, job_id, platform, platform_plan, clip, idx, &output_root, &clip_dir)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_clip(
    layout: &SandboxLayout,
    job_id: &str,
    platform: &str,
    platform_plan: &clipflow_protocol::publish::PlatformPlan,
    clip: &ClipPlan,
    idx: usize,
    output_root: &Path,
    clip_dir: &Path,
) -> Result<(), BundleError> {
    for sub in ["video", "copy", "audio/assets"] {
        let dir = clip_dir.join(sub);
        fs::create_dir_all(&dir).map_err(fs_err(&dir))?;
    }

    // Video: byte-for-byte copy, confined to this job's output tree.
    let Some(video_raw) = clip.video_path.as_deref() else {
        return Err(BundleError::InvalidPlan(format!("missing video_path for clip {idx}")));
    };
    let src_video = resolve_plan_path(layout, video_raw);
    if !ensure_under(&src_video, output_root) {
        return Err(BundleError::PathEscape(format!(
            "source video '{video_raw}' must resolve under sandbox/output/{job_id}/"
        )));
    }
    if !src_video.exists() {
        return Err(BundleError::MissingAsset(format!(
            "video artifact not found: {}",
            src_video.display()
        )));
    }
    let dst_video = clip_dir.join("video").join("final.mp4");
    fs::copy(&src_video, &dst_video).map_err(fs_err(&dst_video))?;

    // Captions ride along when the worker produced them.
    if let Some(parent) = src_video.parent() {
        let srt = parent.join("final.srt");
        if srt.exists() {
            let captions_dir = clip_dir.join("captions");
            fs::create_dir_all(&captions_dir).map_err(fs_err(&captions_dir))?;
            let dst = captions_dir.join("final.srt");
            fs::copy(&srt, &dst).map_err(fs_err(&dst))?;
        }
    }

    for lang in ["en", "zh-Hans"] {
        let content = format_copy(platform, platform_plan, clip, lang);
        let path = clip_dir.join("copy").join(format!("copy.{lang}.txt"));
        fs::write(&path, content).map_err(fs_err(&path))?;
    }

    let Some(audio_plan) = clip.audio_plan.as_ref().filter(|p| !p.is_null()) else {
        return Err(BundleError::InvalidPlan(format!("missing audio_plan for clip {idx}")));
    };
    let audio_plan_path = clip_dir.join("audio").join("audio_plan.json");
    let body = serde_json::to_string_pretty(audio_plan)
        .map_err(|e| BundleError::InvalidPlan(format!("unserializable audio_plan: {e}")))?;
    fs::write(&audio_plan_path, body).map_err(fs_err(&audio_plan_path))?;

    let Some(audio_notes) = clip.audio_notes.as_deref().filter(|n| !n.is_empty()) else {
        return Err(BundleError::InvalidPlan(format!("missing audio_notes for clip {idx}")));
    };
    let notes_path = clip_dir.join("audio").join("audio_notes.txt");
    fs::write(&notes_path, audio_notes).map_err(fs_err(&notes_path))?;

    for asset_raw in &clip.audio_assets {
        let asset = resolve_plan_path(layout, asset_raw);
        if !ensure_under(&asset, layout.sandbox_root()) {
            return Err(BundleError::PathEscape(format!(
                "audio asset '{asset_raw}' must resolve under sandbox/"
            )));
        }
        if !asset.exists() {
            return Err(BundleError::MissingAsset(format!(
                "audio asset not found: {}",
                asset.display()
            )));
        }
        let name = asset
            .file_name()
            .ok_or_else(|| BundleError::InvalidPlan(format!("audio asset has no basename: {asset_raw}")))?;
        let dst = clip_dir.join("audio").join("assets").join(name);
        fs::copy(&asset, &dst).map_err(fs_err(&dst))?;
    }
    Ok(())
}

/// Rename the temp tree over `v1/`, setting any previous version aside and
/// restoring it if the swap fails. A double fault is logged, not recovered.
fn swap_into_place(
    bundle_parent: &Path,
    tmp_dir: &Path,
    final_dir: &Path,
) -> Result<(), BundleError> {
    let mut set_aside: Option<PathBuf> = None;
    if final_dir.exists() {
        let aside = bundle_parent.join(format!("v1.__old__{}", short_nonce()));
        fs::rename(final_dir, &aside).map_err(fs_err(final_dir))?;
        set_aside = Some(aside);
    }

    if let Err(swap_err) = fs::rename(tmp_dir, final_dir) {
        if let Some(aside) = &set_aside {
            if !final_dir.exists() {
                if let Err(restore_err) = fs::rename(aside, final_dir) {
                    error!(
                        aside = %aside.display(),
                        error = %restore_err,
                        "double fault: failed to restore previous bundle"
                    );
                }
            }
        }
        return Err(fs_err(final_dir)(swap_err));
    }

    if let Some(aside) = set_aside {
        fs::remove_dir_all(&aside).map_err(fs_err(&aside))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const JOB: &str = "job-abc123";

    struct Fixture {
        _root: TempDir,
        layout: SandboxLayout,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let layout = SandboxLayout::new(root.path());
        let out = layout.output_dir(JOB);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("final.mp4"), "video-bytes").unwrap();
        fs::write(out.join("final.srt"), "1\n00:00:00,000 --> 00:00:01,000\ncat\n").unwrap();
        let audio = layout.assets_root().join("audio");
        fs::create_dir_all(&audio).unwrap();
        fs::write(audio.join("theme.wav"), "wav-bytes").unwrap();
        fs::create_dir_all(layout.dist_root()).unwrap();
        Fixture { _root: root, layout }
    }

    fn plan() -> PublishPlan {
        serde_json::from_value(json!({
            "job_id": JOB,
            "platform_plans": {
                "youtube": {
                    "title": {"en": "Cats"},
                    "description": {"en": "A cat."},
                    "tags": ["#cats"],
                    "publish_time": "2026-08-02T09:00:00Z",
                    "clips": [{
                        "video_path": format!("sandbox/output/{JOB}/final.mp4"),
                        "audio_plan": {"mode": "license", "track": "theme"},
                        "audio_notes": "Use the licensed theme.",
                        "audio_assets": ["sandbox/assets/audio/theme.wav"]
                    }]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn builds_the_full_clip_tree() {
        let f = fixture();
        let bundle = build_bundle(&f.layout, JOB, "youtube", &plan(), "checklist", &f.layout.dist_root())
            .unwrap()
            .unwrap();

        assert_eq!(bundle, f.layout.bundles_dir(JOB).join("youtube").join("v1"));
        let clip = bundle.join("clips").join("clip-001");
        assert_eq!(fs::read(clip.join("video/final.mp4")).unwrap(), b"video-bytes");
        assert!(clip.join("captions/final.srt").exists());
        assert!(clip.join("copy/copy.en.txt").exists());
        assert!(clip.join("copy/copy.zh-Hans.txt").exists());
        assert!(clip.join("audio/audio_plan.json").exists());
        assert_eq!(
            fs::read_to_string(clip.join("audio/audio_notes.txt")).unwrap(),
            "Use the licensed theme."
        );
        assert_eq!(fs::read(clip.join("audio/assets/theme.wav")).unwrap(), b"wav-bytes");
        assert_eq!(
            fs::read_to_string(bundle.join("checklists/posting_checklist_youtube.txt")).unwrap(),
            "checklist"
        );
        // No temp or aside directories survive.
        let leftovers: Vec<_> = fs::read_dir(bundle.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != "v1")
            .collect();
        assert!(leftovers.is_empty(), "unexpected leftovers: {leftovers:?}");
    }

    #[test]
    fn clip_id_names_the_directory_when_safe() {
        let f = fixture();
        let mut plan = plan();
        let platform_plan = plan.platform_plans.get_mut("youtube").unwrap();
        platform_plan.clips[0].id = Some("teaser_A".to_string());
        let bundle = build_bundle(&f.layout, JOB, "youtube", &plan, "c", &f.layout.dist_root())
            .unwrap()
            .unwrap();
        assert!(bundle.join("clips/teaser_A").is_dir());
    }

    #[test]
    fn unsafe_clip_id_falls_back_to_ordinal() {
        let f = fixture();
        let mut plan = plan();
        plan.platform_plans.get_mut("youtube").unwrap().clips[0].id =
            Some("bad id/with sep".to_string());
        let bundle = build_bundle(&f.layout, JOB, "youtube", &plan, "c", &f.layout.dist_root())
            .unwrap()
            .unwrap();
        assert!(bundle.join("clips/clip-001").is_dir());
    }

    #[test]
    fn platform_absent_returns_none() {
        let f = fixture();
        let result =
            build_bundle(&f.layout, JOB, "tiktok", &plan(), "c", &f.layout.dist_root()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn empty_clips_fail_hard() {
        let f = fixture();
        let mut plan = plan();
        plan.platform_plans.get_mut("youtube").unwrap().clips.clear();
        let err = build_bundle(&f.layout, JOB, "youtube", &plan, "c", &f.layout.dist_root())
            .unwrap_err();
        assert!(matches!(err, BundleError::InvalidPlan(_)));
    }

    #[test]
    fn unsafe_job_id_is_rejected() {
        let f = fixture();
        let err = build_bundle(&f.layout, "../evil", "youtube", &plan(), "c", &f.layout.dist_root())
            .unwrap_err();
        assert!(matches!(err, BundleError::PathEscape(_)));
    }

    #[test]
    fn foreign_dist_root_is_rejected() {
        let f = fixture();
        let elsewhere = f.layout.sandbox_root().join("elsewhere");
        fs::create_dir_all(&elsewhere).unwrap();
        let err = build_bundle(&f.layout, JOB, "youtube", &plan(), "c", &elsewhere).unwrap_err();
        assert!(matches!(err, BundleError::PathEscape(_)));
    }

    #[test]
    fn video_outside_job_output_is_rejected() {
        let f = fixture();
        let mut plan = plan();
        plan.platform_plans.get_mut("youtube").unwrap().clips[0].video_path =
            Some("sandbox/assets/audio/theme.wav".to_string());
        let err = build_bundle(&f.layout, JOB, "youtube", &plan, "c", &f.layout.dist_root())
            .unwrap_err();
        assert!(matches!(err, BundleError::PathEscape(_)));
    }

    #[test]
    fn missing_audio_asset_is_fatal_and_leaves_no_bundle() {
        let f = fixture();
        let mut plan = plan();
        plan.platform_plans.get_mut("youtube").unwrap().clips[0]
            .audio_assets
            .push("sandbox/assets/audio/absent.wav".to_string());
        let err = build_bundle(&f.layout, JOB, "youtube", &plan, "c", &f.layout.dist_root())
            .unwrap_err();
        assert!(matches!(err, BundleError::MissingAsset(_)));

        let platform_dir = f.layout.bundles_dir(JOB).join("youtube");
        assert!(!platform_dir.join("v1").exists());
        let leftovers: Vec<_> = fs::read_dir(&platform_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(leftovers.is_empty(), "temp tree must be cleaned up: {leftovers:?}");
    }

    #[test]
    fn rebuild_replaces_v1_atomically() {
        let f = fixture();
        let dist = f.layout.dist_root();
        let bundle = build_bundle(&f.layout, JOB, "youtube", &plan(), "c", &dist).unwrap().unwrap();
        fs::write(bundle.join("canary.txt"), "old").unwrap();

        let rebuilt = build_bundle(&f.layout, JOB, "youtube", &plan(), "c", &dist).unwrap().unwrap();
        assert_eq!(rebuilt, bundle);
        assert!(!rebuilt.join("canary.txt").exists(), "old tree must be replaced");
        assert!(rebuilt.join("clips/clip-001/video/final.mp4").exists());
    }

    #[test]
    fn secret_keys_are_rejected_anywhere_in_the_plan() {
        let plan = json!({
            "job_id": JOB,
            "platform_plans": {"youtube": {"clips": [{"upload_Token": "abc"}]}}
        });
        let err = scan_for_secrets(&plan, "").unwrap_err();
        match err {
            BundleError::SecretLeak { key_path } => {
                assert_eq!(key_path, "platform_plans.youtube.clips[0].upload_Token");
            }
            other => panic!("expected SecretLeak, got {other:?}"),
        }
    }

    #[test]
    fn secret_free_plan_passes_the_scan() {
        scan_for_secrets(&json!({"job_id": JOB, "notes": "no secrets here"}), "").unwrap();
    }

    #[test]
    fn generate_bundle_enforces_plan_job_id() {
        let f = fixture();
        let plan_path = f.layout.publish_plan_path(JOB);
        fs::create_dir_all(plan_path.parent().unwrap()).unwrap();
        let mut doc = serde_json::to_value(plan()).unwrap();
        doc["job_id"] = json!("job-other1");
        fs::write(&plan_path, serde_json::to_string(&doc).unwrap()).unwrap();

        let err = generate_bundle(&f.layout, JOB, "youtube", &plan_path, &f.layout.dist_root())
            .unwrap_err();
        assert!(matches!(err, BundleError::InvalidPlan(_)));
    }

    #[test]
    fn generate_bundle_happy_path() {
        let f = fixture();
        let plan_path = f.layout.publish_plan_path(JOB);
        fs::create_dir_all(plan_path.parent().unwrap()).unwrap();
        fs::write(&plan_path, serde_json::to_string(&serde_json::to_value(plan()).unwrap()).unwrap())
            .unwrap();

        let bundle = generate_bundle(&f.layout, JOB, "youtube", &plan_path, &f.layout.dist_root())
            .unwrap()
            .unwrap();
        let checklist = fs::read_to_string(
            bundle.join("checklists").join("posting_checklist_youtube.txt"),
        )
        .unwrap();
        assert!(checklist.contains("POSTING CHECKLIST -- YOUTUBE -- Job: job-abc123"));
    }
}

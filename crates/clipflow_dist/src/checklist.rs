//! Per-platform posting checklists.
//!
//! Checklists always address clips by ordinal (`clip-001`, ...) so the
//! instructions stay valid whatever the bundle directory names are.

use clipflow_protocol::publish::PublishPlan;

/// Checklist text for a known platform; None for platforms without an
/// adapter.
pub fn checklist_content(platform: &str, plan: &PublishPlan) -> Option<String> {
    match platform {
        "youtube" => Some(youtube(plan)),
        "instagram" => Some(instagram(plan)),
        "tiktok" => Some(tiktok(plan)),
        "x" => Some(x(plan)),
        _ => None,
    }
}

fn clip_count(plan: &PublishPlan, platform: &str) -> usize {
    plan.platform_plans.get(platform).map(|p| p.clips.len()).unwrap_or(0)
}

fn header(lines: &mut Vec<String>, label: &str, job_id: &str) {
    lines.push(format!("POSTING CHECKLIST -- {label} -- Job: {job_id}"));
    lines.push("---------------------------------------------------".to_string());
}

fn youtube(plan: &PublishPlan) -> String {
    let mut lines = Vec::new();
    header(&mut lines, "YOUTUBE", &plan.job_id);
    lines.push("[ ] 1. Log in to YouTube Studio (correct channel?).".to_string());
    lines.push("[ ] 2. Click 'Create' -> 'Upload Video'.".to_string());
    for idx in 1..=clip_count(plan, "youtube") {
        let clip = format!("clip-{idx:03}");
        lines.push(format!("\n--- CLIP {idx} ({clip}) ---"));
        lines.push(format!("[ ] 3.{idx}.1 Drag & Drop 'clips/{clip}/video/final.mp4'."));
        lines.push(format!(
            "[ ] 3.{idx}.2 Copy Title from 'clips/{clip}/copy/copy.en.txt' (or correct language)."
        ));
        lines.push(format!("[ ] 3.{idx}.3 Copy Description from same file."));
        lines.push(format!("[ ] 3.{idx}.4 Set Visibility to 'Public' (or as planned)."));
        lines.push(format!("[ ] 3.{idx}.5 Select 'Not made for kids'."));
        lines.push(format!("[ ] 3.{idx}.6 Add Tags from plan if defined."));
        lines.push(format!(
            "[ ] 3.{idx}.7 Check 'clips/{clip}/audio/audio_notes.txt' for audio details."
        ));
    }
    lines.push("\n---------------------------------------------------".to_string());
    lines.push("Done!".to_string());
    lines.join("\n")
}

fn instagram(plan: &PublishPlan) -> String {
    let mut lines = Vec::new();
    header(&mut lines, "INSTAGRAM", &plan.job_id);
    lines.push("[ ] 1. Open Instagram App (mobile preferred) or Creator Studio.".to_string());
    lines.push("[ ] 2. Create New Reel.".to_string());
    for idx in 1..=clip_count(plan, "instagram") {
        let clip = format!("clip-{idx:03}");
        lines.push(format!("\n--- CLIP {idx} ({clip}) ---"));
        lines.push(format!("[ ] 3.{idx}.1 Select 'clips/{clip}/video/final.mp4'."));
        lines.push(format!("[ ] 3.{idx}.2 Add Cover (if planned)."));
        lines.push(format!("[ ] 3.{idx}.3 Copy Caption from 'clips/{clip}/copy/copy.en.txt'."));
        lines.push(format!(
            "[ ] 3.{idx}.4 Add Music/Audio: See 'clips/{clip}/audio/audio_notes.txt'."
        ));
        lines.push(format!("[ ] 3.{idx}.5 Tag accounts/location/products if planned."));
        lines.push(format!("[ ] 3.{idx}.6 Share to Feed (Recommended)."));
    }
    lines.push("\n---------------------------------------------------".to_string());
    lines.join("\n")
}

fn tiktok(plan: &PublishPlan) -> String {
    let mut lines = Vec::new();
    header(&mut lines, "TIKTOK", &plan.job_id);
    lines.push("[ ] 1. Open TikTok App or Web Upload.".to_string());
    lines.push("[ ] 2. Upload Video.".to_string());
    for idx in 1..=clip_count(plan, "tiktok") {
        let clip = format!("clip-{idx:03}");
        lines.push(format!("\n--- CLIP {idx} ({clip}) ---"));
        lines.push(format!("[ ] 3.{idx}.1 Select 'clips/{clip}/video/final.mp4'."));
        lines.push(format!("[ ] 3.{idx}.2 Add Sound: See 'clips/{clip}/audio/audio_notes.txt'."));
        lines.push(format!(
            "[ ] 3.{idx}.3 Copy Description from 'clips/{clip}/copy/copy.en.txt'."
        ));
        lines.push(format!("[ ] 3.{idx}.4 Add Link (if applicable)."));
    }
    lines.push("\n---------------------------------------------------".to_string());
    lines.join("\n")
}

fn x(plan: &PublishPlan) -> String {
    let mut lines = Vec::new();
    header(&mut lines, "X (TWITTER)", &plan.job_id);
    lines.push("[ ] 1. Log in to X/Twitter.".to_string());
    for idx in 1..=clip_count(plan, "x") {
        let clip = format!("clip-{idx:03}");
        lines.push(format!("\n--- CLIP {idx} ({clip}) ---"));
        lines.push(format!("[ ] 3.{idx}.1 Attach Media 'clips/{clip}/video/final.mp4'."));
        lines.push(format!("[ ] 3.{idx}.2 Copy Text from 'clips/{clip}/copy/copy.en.txt'."));
        lines.push(format!("[ ] 3.{idx}.3 Add Alt Text (recommended)."));
        lines.push(format!(
            "[ ] 3.{idx}.4 Review 'clips/{clip}/audio/audio_notes.txt' for any required audio guidance."
        ));
    }
    lines.push("\n---------------------------------------------------".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_with_clips(platform: &str, count: usize) -> PublishPlan {
        let clips: Vec<_> = (0..count).map(|_| json!({"video_path": "x"})).collect();
        serde_json::from_value(json!({
            "job_id": "job-abc123",
            "platform_plans": {platform: {"clips": clips}}
        }))
        .unwrap()
    }

    #[test]
    fn youtube_checklist_enumerates_clips() {
        let text = checklist_content("youtube", &plan_with_clips("youtube", 2)).unwrap();
        assert!(text.starts_with("POSTING CHECKLIST -- YOUTUBE -- Job: job-abc123"));
        assert!(text.contains("--- CLIP 1 (clip-001) ---"));
        assert!(text.contains("--- CLIP 2 (clip-002) ---"));
        assert!(text.contains("clips/clip-002/video/final.mp4"));
        assert!(text.ends_with("Done!"));
    }

    #[test]
    fn x_checklist_mentions_alt_text() {
        let text = checklist_content("x", &plan_with_clips("x", 1)).unwrap();
        assert!(text.contains("Add Alt Text (recommended)."));
    }

    #[test]
    fn unknown_platform_has_no_checklist() {
        assert!(checklist_content("myspace", &plan_with_clips("myspace", 1)).is_none());
    }
}

//! Deterministic platform-specific copy formatting.
//!
//! One plain-text file per (clip, language). Caption resolution prefers
//! the clip's own caption over the platform description; tags are trimmed,
//! `#`-prefixed and case-insensitively deduped preserving first
//! occurrence and order.

use clipflow_protocol::publish::{ClipPlan, LangMap, PlatformPlan};
use serde_json::Value;
use std::collections::HashSet;

fn lang_string(map: &LangMap, lang: &str) -> Option<String> {
    let value = map.get(lang)?;
    let s = value.as_str()?;
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Clip caption for `lang`, falling back to the platform description.
pub fn resolve_caption(plan: &PlatformPlan, clip: &ClipPlan, lang: &str) -> String {
    lang_string(&clip.caption, lang)
        .or_else(|| lang_string(&plan.description, lang))
        .unwrap_or_default()
}

/// Platform title for `lang`; empty when absent.
pub fn resolve_title(plan: &PlatformPlan, lang: &str) -> String {
    lang_string(&plan.title, lang).unwrap_or_default()
}

/// Trim, drop empties, prepend `#` where missing, dedupe
/// case-insensitively preserving the first occurrence.
pub fn normalize_tags(tags: &[Value]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let raw = match tag {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let tagged = if trimmed.starts_with('#') {
            trimmed.to_string()
        } else {
            format!("#{trimmed}")
        };
        let key = tagged.to_lowercase();
        if seen.insert(key) {
            out.push(tagged);
        }
    }
    out
}

/// Render the copy file body for one (platform, clip, language).
pub fn format_copy(platform: &str, plan: &PlatformPlan, clip: &ClipPlan, lang: &str) -> String {
    let body = resolve_caption(plan, clip, lang);
    let title = resolve_title(plan, lang);
    let tags = normalize_tags(&plan.tags);
    let publish_time = plan.publish_time.as_deref();

    match platform.to_lowercase().as_str() {
        "youtube" => format_youtube(&title, &body, &tags, publish_time),
        "instagram" | "tiktok" => format_feed(&body, &tags, publish_time),
        "x" => format_x(&body, &tags, publish_time),
        _ => body,
    }
}

fn format_youtube(title: &str, body: &str, tags: &[String], publish_time: Option<&str>) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !title.is_empty() {
        lines.push(format!("TITLE: {title}"));
    }
    if !body.is_empty() {
        lines.push("DESCRIPTION:".to_string());
        lines.push(body.to_string());
    }
    if !tags.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("HASHTAGS: {}", tags.join(" ")));
    }
    if let Some(time) = publish_time {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("SCHEDULED_PUBLISH_TIME: {time}"));
    }
    lines.join("\n")
}

fn format_feed(body: &str, tags: &[String], publish_time: Option<&str>) -> String {
    let mut out = body.to_string();
    if !tags.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&tags.join(" "));
    }
    if let Some(time) = publish_time {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("SCHEDULED_PUBLISH_TIME: {time}"));
    }
    out
}

fn format_x(body: &str, tags: &[String], publish_time: Option<&str>) -> String {
    let mut out = body.to_string();
    let first_three = &tags[..tags.len().min(3)];
    if !first_three.is_empty() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&first_three.join(" "));
    }
    if let Some(time) = publish_time {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("SCHEDULED_PUBLISH_TIME: {time}"));
    }
    out
}

//! Planner job contract: the consumed fields and the admission rules.
//!
//! The contract is immutable from the controller's viewpoint and the
//! `job_id` inside it is authoritative even when the filename disagrees.
//! Only the fields the controller consumes are typed; everything else is
//! forwarded to the worker untouched (the worker re-reads the job file).
//!
//! Validation mirrors the planner's admission contract and is fail-fast:
//! the first violation is reported and nothing else is checked.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// A job contract failed admission validation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Sandbox-relative reference to another contract artifact. Relpaths must
/// be repo-rooted (`repo/...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractPointer {
    pub relpath: String,
}

/// Render hints consumed by the controller's input check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSpec {
    pub background_asset: String,
}

/// The fields of a job contract that the controller itself consumes.
/// Pointer fields (`quality_target`, `continuity_pack`, `motion_contract`)
/// are read leniently by the decision engine's contract loaders so that a
/// malformed pointer escalates instead of crashing the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContract {
    pub job_id: String,
    pub render: RenderSpec,
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date regex"))
}

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#\w[\w_]*$").expect("hashtag regex"))
}

fn require<'a>(obj: &'a Value, field: &str, ctx: &str) -> Result<&'a Value, ValidationError> {
    obj.get(field)
        .ok_or_else(|| ValidationError::new(format!("Missing required field {ctx}.{field}")))
}

fn as_str<'a>(v: &'a Value, what: &str) -> Result<&'a str, ValidationError> {
    v.as_str()
        .ok_or_else(|| ValidationError::new(format!("{what} must be a string")))
}

fn int_in_range(v: &Value, what: &str, lo: i64, hi: i64) -> Result<i64, ValidationError> {
    let n = v
        .as_i64()
        .ok_or_else(|| ValidationError::new(format!("{what} must be int {lo}..{hi}")))?;
    if n < lo || n > hi {
        return Err(ValidationError::new(format!("{what} must be int {lo}..{hi}")));
    }
    Ok(n)
}

fn str_len_in_range(v: &Value, what: &str, lo: usize, hi: usize) -> Result<(), ValidationError> {
    let s = v
        .as_str()
        .ok_or_else(|| ValidationError::new(format!("{what} length must be {lo}..{hi}")))?;
    if s.chars().count() < lo || s.chars().count() > hi {
        return Err(ValidationError::new(format!("{what} length must be {lo}..{hi}")));
    }
    Ok(())
}

/// Validate a raw job contract. Fail-fast: the first violation wins.
pub fn validate_job(job: &Value) -> Result<(), ValidationError> {
    for field in [
        "job_id", "date", "niche", "video", "script", "shots", "captions", "hashtags", "render",
    ] {
        require(job, field, "job")?;
    }

    let job_id = job["job_id"].as_str().unwrap_or_default();
    if job_id.len() < 6 {
        return Err(ValidationError::new(
            "job.job_id must be a string with length >= 6",
        ));
    }
    let date = as_str(&job["date"], "job.date")
        .map_err(|_| ValidationError::new("job.date must be YYYY-MM-DD"))?;
    if !date_re().is_match(date) {
        return Err(ValidationError::new("job.date must be YYYY-MM-DD"));
    }
    as_str(&job["niche"], "job.niche")?;

    let video = &job["video"];
    for field in ["length_seconds", "aspect_ratio", "fps", "resolution"] {
        require(video, field, "video")?;
    }
    int_in_range(&video["length_seconds"], "video.length_seconds", 10, 60)?;
    if video["aspect_ratio"] != Value::from("9:16") {
        return Err(ValidationError::new("video.aspect_ratio must be 9:16"));
    }
    int_in_range(&video["fps"], "video.fps", 24, 60)?;
    if video["resolution"] != Value::from("1080x1920") {
        return Err(ValidationError::new("video.resolution must be 1080x1920"));
    }

    let script = &job["script"];
    for field in ["hook", "voiceover", "ending"] {
        require(script, field, "script")?;
    }
    str_len_in_range(&script["hook"], "script.hook", 3, 120)?;
    str_len_in_range(&script["voiceover"], "script.voiceover", 20, 900)?;
    str_len_in_range(&script["ending"], "script.ending", 3, 120)?;

    let shots = job["shots"]
        .as_array()
        .ok_or_else(|| ValidationError::new("shots must be list length 6..14"))?;
    if shots.len() < 6 || shots.len() > 14 {
        return Err(ValidationError::new("shots must be list length 6..14"));
    }
    for (idx, shot) in shots.iter().enumerate() {
        if !shot.is_object() {
            return Err(ValidationError::new(format!("shots[{idx}] must be an object")));
        }
        for field in ["t", "visual", "action", "caption"] {
            require(shot, field, &format!("shots[{idx}]"))?;
        }
        int_in_range(&shot["t"], &format!("shots[{idx}].t"), 0, 60)?;
        for key in ["visual", "action", "caption"] {
            as_str(&shot[key], &format!("shots[{idx}].{key}"))?;
        }
    }

    let captions = job["captions"]
        .as_array()
        .ok_or_else(|| ValidationError::new("captions must be list length 4..24"))?;
    if captions.len() < 4 || captions.len() > 24 {
        return Err(ValidationError::new("captions must be list length 4..24"));
    }
    for (idx, cap) in captions.iter().enumerate() {
        str_len_in_range(cap, &format!("captions[{idx}]"), 1, 80)?;
    }

    let hashtags = job["hashtags"]
        .as_array()
        .ok_or_else(|| ValidationError::new("hashtags must be list length 3..20"))?;
    if hashtags.len() < 3 || hashtags.len() > 20 {
        return Err(ValidationError::new("hashtags must be list length 3..20"));
    }
    for (idx, tag) in hashtags.iter().enumerate() {
        let ok = tag.as_str().map(|s| hashtag_re().is_match(s)).unwrap_or(false);
        if !ok {
            return Err(ValidationError::new(format!(
                "hashtags[{idx}] must match {}",
                hashtag_re().as_str()
            )));
        }
    }

    let render = &job["render"];
    for field in ["background_asset", "subtitle_style", "output_basename"] {
        require(render, field, "render")?;
    }
    as_str(&render["background_asset"], "render.background_asset")?;
    let style = render["subtitle_style"].as_str().unwrap_or_default();
    if style != "big_bottom" && style != "karaoke_bottom" {
        return Err(ValidationError::new(
            "render.subtitle_style must be big_bottom or karaoke_bottom",
        ));
    }
    as_str(&render["output_basename"], "render.output_basename")?;

    Ok(())
}

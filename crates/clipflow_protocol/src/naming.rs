//! Stable naming rules shared by the controller and the bundler.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Attempt ids are zero-padded and monotone per job: `run-0001`, `run-0002`.
pub const ATTEMPT_PREFIX: &str = "run-";

/// Synthetic attempt id recorded when a quality decision is made against
/// outputs that existed before the controller ran.
pub const PREEXISTING_ATTEMPT_ID: &str = "preexisting-output";

fn job_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("job id regex"))
}

fn clip_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("clip id regex"))
}

fn run_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"run-(\d{4})$").expect("run dir regex"))
}

/// A job id is filesystem-safe: no separators, no traversal, safe charset.
pub fn is_safe_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && !job_id.contains("..")
        && !job_id.contains('/')
        && !job_id.contains('\\')
        && job_id_re().is_match(job_id)
}

/// Derive the job id implied by a contract filename. The contract-embedded
/// id is authoritative; this exists only to detect and log mismatches.
pub fn job_id_from_filename(job_path: &Path) -> String {
    let name = job_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stripped) = name.strip_suffix(".job.json") {
        return stripped.to_string();
    }
    if let Some(stripped) = name.strip_suffix(".json") {
        return stripped.to_string();
    }
    job_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// Parse the numeric suffix of a `run-NNNN` directory name.
pub fn parse_attempt_number(dir_name: &str) -> Option<u32> {
    run_dir_re()
        .captures(dir_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Format an attempt id from its number.
pub fn format_attempt_id(number: u32) -> String {
    format!("{ATTEMPT_PREFIX}{number:04}")
}

/// Directory name for a clip inside a bundle: the clip's own id when it is
/// filesystem-safe, otherwise the 1-based ordinal `clip-NNN`.
pub fn clip_dirname(clip_id: Option<&str>, index: usize) -> String {
    if let Some(id) = clip_id {
        if clip_id_re().is_match(id) {
            return id.to_string();
        }
    }
    format!("clip-{:03}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn safe_job_ids() {
        assert!(is_safe_job_id("job-abc123"));
        assert!(is_safe_job_id("Job_2.final"));
        assert!(!is_safe_job_id(""));
        assert!(!is_safe_job_id("a/b"));
        assert!(!is_safe_job_id("a\\b"));
        assert!(!is_safe_job_id("a..b"));
        assert!(!is_safe_job_id("job id"));
    }

    #[test]
    fn filename_stem_strips_job_json() {
        assert_eq!(
            job_id_from_filename(&PathBuf::from("/x/job-abc123.job.json")),
            "job-abc123"
        );
        assert_eq!(job_id_from_filename(&PathBuf::from("/x/other.json")), "other");
        assert_eq!(job_id_from_filename(&PathBuf::from("/x/plain.txt")), "plain");
    }

    #[test]
    fn attempt_ids_round_trip() {
        assert_eq!(format_attempt_id(1), "run-0001");
        assert_eq!(parse_attempt_number("run-0042"), Some(42));
        assert_eq!(parse_attempt_number("run-42"), None);
        assert_eq!(parse_attempt_number("other"), None);
    }

    #[test]
    fn clip_dirnames() {
        assert_eq!(clip_dirname(Some("teaser_A.1"), 0), "teaser_A.1");
        assert_eq!(clip_dirname(Some("bad id"), 0), "clip-001");
        assert_eq!(clip_dirname(None, 11), "clip-012");
    }
}

//! Retry-attempt lineage recorder.
//!
//! The lineage document is read-modify-written under the job lock: prior
//! attempt entries are preserved byte-for-byte as raw JSON values, the new
//! entry is appended, and the whole document is rewritten atomically. A
//! document with a wrong or unreadable version tag is replaced with a fresh
//! one; no merge is attempted.

use crate::atomic::{read_json_if_exists, write_json_atomic};
use crate::StoreError;
use clipflow_protocol::events::now_utc_ts;
use clipflow_protocol::qc::{LineageAttempt, RETRY_LINEAGE_VERSION};
use serde_json::{json, Value};
use std::path::Path;

/// Append one attempt entry to the lineage document at `lineage_path`.
pub fn append_attempt(
    lineage_path: &Path,
    job_id: &str,
    entry: &LineageAttempt,
) -> Result<(), StoreError> {
    let now = now_utc_ts();
    let mut attempts: Vec<Value> = Vec::new();
    let mut generated_at = now.clone();

    if let Some(existing) = read_json_if_exists(lineage_path) {
        if existing.get("version").and_then(Value::as_str) == Some(RETRY_LINEAGE_VERSION) {
            if let Some(prior) = existing.get("attempts").and_then(Value::as_array) {
                attempts = prior.iter().filter(|a| a.is_object()).cloned().collect();
            }
            if let Some(ts) = existing.get("generated_at").and_then(Value::as_str) {
                generated_at = ts.to_string();
            }
        }
    }

    attempts.push(serde_json::to_value(entry).map_err(|e| StoreError::Serialize {
        path: lineage_path.to_path_buf(),
        source: e,
    })?);

    let doc = json!({
        "version": RETRY_LINEAGE_VERSION,
        "job_id": job_id,
        "generated_at": generated_at,
        "updated_at": now,
        "attempts": attempts,
    });
    write_json_atomic(lineage_path, &doc)
}

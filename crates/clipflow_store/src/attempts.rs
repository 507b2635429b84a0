//! Attempt-id allocation.
//!
//! Attempt counters are monotone across controller restarts: the next id is
//! strictly greater than the numeric max of the `run-NNNN` directories that
//! already exist, whatever state those attempts died in.

use crate::StoreError;
use clipflow_protocol::naming::{format_attempt_id, parse_attempt_number};
use std::fs;
use std::path::Path;

/// Allocate the next attempt id under `attempts_root`, creating the root if
/// needed. Only the id is returned; the caller creates the directory.
pub fn next_attempt_id(attempts_root: &Path) -> Result<String, StoreError> {
    fs::create_dir_all(attempts_root).map_err(|e| StoreError::fs(attempts_root, e))?;

    let mut max_seen: u32 = 0;
    for entry in fs::read_dir(attempts_root).map_err(|e| StoreError::fs(attempts_root, e))? {
        let entry = entry.map_err(|e| StoreError::fs(attempts_root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(n) = parse_attempt_number(&entry.file_name().to_string_lossy()) {
            max_seen = max_seen.max(n);
        }
    }
    Ok(format_attempt_id(max_seen + 1))
}

//! Per-job event journal and current-state document.
//!
//! Discipline: ALWAYS append the event first, then overwrite state. A crash
//! between the two leaves the journal ahead of the state document, and the
//! journal wins on recovery.

use crate::atomic::write_json_atomic;
use crate::StoreError;
use clipflow_protocol::events::{now_utc_ts, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Pointers in the state document to the latest interesting artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatePointers {
    pub result_json: Option<String>,
    pub attempt_dir: Option<String>,
    pub validate_log: Option<String>,
    pub worker_log: Option<String>,
    pub lineage_log: Option<String>,
}

/// The single-valued current-state document for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDoc {
    pub job_id: String,
    pub state: String,
    pub attempt_id: Option<String>,
    pub updated_at: String,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub pointers: StatePointers,
}

/// Writer for one job's `events.ndjson` + `state.json` pair.
#[derive(Debug, Clone)]
pub struct Journal {
    events_path: PathBuf,
    state_path: PathBuf,
}

impl Journal {
    pub fn new(events_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self { events_path: events_path.into(), state_path: state_path.into() }
    }

    pub fn events_path(&self) -> &PathBuf {
        &self.events_path
    }

    /// Append one event line and flush before returning.
    pub fn append_event(
        &self,
        event: &str,
        from_state: Option<&str>,
        to_state: Option<&str>,
        attempt_id: Option<&str>,
        details: Value,
    ) -> Result<(), StoreError> {
        let record = EventRecord {
            ts: now_utc_ts(),
            event: event.to_string(),
            from_state: from_state.map(str::to_string),
            to_state: to_state.map(str::to_string),
            attempt_id: attempt_id.map(str::to_string),
            details,
        };
        let line = serde_json::to_string(&serde_json::to_value(&record).map_err(|e| {
            StoreError::Serialize { path: self.events_path.clone(), source: e }
        })?)
        .map_err(|e| StoreError::Serialize { path: self.events_path.clone(), source: e })?;

        if let Some(parent) = self.events_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::fs(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .map_err(|e| StoreError::fs(&self.events_path, e))?;
        writeln!(file, "{line}").map_err(|e| StoreError::fs(&self.events_path, e))?;
        file.flush().map_err(|e| StoreError::fs(&self.events_path, e))?;
        Ok(())
    }

    /// Atomically overwrite the current-state document.
    pub fn write_state(
        &self,
        job_id: &str,
        state: &str,
        attempt_id: Option<&str>,
        reason: Option<&str>,
        error: Option<&str>,
        pointers: &StatePointers,
    ) -> Result<(), StoreError> {
        let doc = StateDoc {
            job_id: job_id.to_string(),
            state: state.to_string(),
            attempt_id: attempt_id.map(str::to_string),
            updated_at: now_utc_ts(),
            reason: reason.map(str::to_string),
            error: error.map(str::to_string),
            pointers: pointers.clone(),
        };
        write_json_atomic(&self.state_path, &doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn journal_in(dir: &TempDir) -> Journal {
        Journal::new(dir.path().join("events.ndjson"), dir.path().join("state.json"))
    }

    #[test]
    fn events_append_in_order_with_all_keys() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        journal.append_event("DISCOVERED", None, Some("DISCOVERED"), None, json!({})).unwrap();
        journal
            .append_event("VALIDATED", Some("DISCOVERED"), Some("VALIDATED"), None, json!({}))
            .unwrap();

        let raw = fs::read_to_string(journal.events_path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let record: Value = serde_json::from_str(line).unwrap();
            for key in ["ts", "event", "from_state", "to_state", "attempt_id", "details"] {
                assert!(record.get(key).is_some(), "missing {key} in {line}");
            }
        }
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["to_state"], second["from_state"]);
    }

    #[test]
    fn state_doc_carries_pointers() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let pointers = StatePointers {
            worker_log: Some("attempts/run-0001/worker.log".into()),
            ..Default::default()
        };
        journal
            .write_state("job-abc123", "RUNNING", Some("run-0001"), None, None, &pointers)
            .unwrap();

        let doc: StateDoc =
            serde_json::from_str(&fs::read_to_string(dir.path().join("state.json")).unwrap())
                .unwrap();
        assert_eq!(doc.state, "RUNNING");
        assert_eq!(doc.attempt_id.as_deref(), Some("run-0001"));
        assert_eq!(doc.pointers.worker_log.as_deref(), Some("attempts/run-0001/worker.log"));
        assert!(doc.pointers.result_json.is_none());
    }
}

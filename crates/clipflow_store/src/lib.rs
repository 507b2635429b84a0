//! Durable state for Clipflow jobs.
//!
//! Four small, sharp tools:
//! - atomic JSON materialization with sandbox path safety ([`atomic`])
//! - the append-only event journal + current-state document ([`journal`])
//! - the per-job directory lock ([`lock`])
//! - the retry-attempt lineage recorder ([`lineage`])
//!
//! Writes are crash-atomic via write-temp-then-rename; readers never
//! observe a partial file. The journal is written before the state document
//! so that on recovery the events file is the canonical history.

pub mod atomic;
pub mod attempts;
pub mod journal;
pub mod lineage;
pub mod lock;

use std::path::PathBuf;
use thiserror::Error;

/// Store-level failures. Everything here is fatal to the current operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem failure on {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path escapes {root}: {path}")]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("failed to serialize document for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Fs { path: path.into(), source }
    }
}

pub use atomic::{ensure_under, read_json_as, read_json_if_exists, safe_relpath, write_json_atomic};
pub use attempts::next_attempt_id;
pub use journal::{Journal, StateDoc, StatePointers};
pub use lineage::append_attempt;
pub use lock::JobLock;

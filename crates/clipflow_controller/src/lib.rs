//! Single-job pipeline controller.
//!
//! One invocation drives one job contract to a terminal outcome:
//! validate -> input check -> attempt loop (worker -> outputs -> lineage
//! verify -> quality decision) -> COMPLETED or a FAIL_* state. Every
//! transition is journaled before the state document is rewritten, each
//! job is owned exclusively through a directory lock, and retries are
//! bounded by `--max-retries`.
//!
//! The validator and quality decision engine run in-process; the worker,
//! lineage-verify and two-pass-orchestration collaborators are child
//! processes with captured logs.

pub mod collaborators;
pub mod controller;
pub mod shutdown;

pub use collaborators::Collaborators;
pub use controller::{run_job, ControllerConfig};

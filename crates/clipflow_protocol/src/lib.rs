//! Shared data model for the Clipflow pipeline.
//!
//! Everything that crosses a process or filesystem boundary lives here: the
//! planner's job contract, the controller's event/state vocabulary, the QC
//! artifact documents, the distribution-side approval/plan/state documents,
//! and the naming and path-layout rules that bind them together.
//!
//! Documents are plain serde types; the store crate owns how they reach disk.

pub mod contract;
pub mod events;
pub mod naming;
pub mod paths;
pub mod publish;
pub mod qc;

pub use contract::{ContractPointer, JobContract, RenderSpec, ValidationError};
pub use events::{now_utc_ts, ActionClass, EventRecord, JobEvent, JobState, QcAction};
pub use paths::SandboxLayout;

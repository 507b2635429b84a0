//! Quality policy for Clipflow jobs.
//!
//! [`engine`] is the deterministic decision engine: a pure function over
//! the measured-metric artifacts, the policy contracts and the prior
//! decision's retry counter, producing the routing action and the full
//! decision document. [`contracts`] loads the quality-target and
//! continuity-pack contracts a job points at. [`gate`] is the secondary
//! finalize-gate authority, which can only block a finalize, never grant
//! one.

pub mod contracts;
pub mod engine;
pub mod gate;

pub use contracts::{load_continuity_pack, load_quality_targets, ContinuityLoad, QualityTargetsLoad};
pub use engine::{decide, load_context, DecisionContext};
pub use gate::apply_finalize_gate;

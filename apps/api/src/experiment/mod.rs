//! A/B/C/D experiment over the quality-scoring weights.
//!
//! Users are bucketed once, by a stable hash of their id, and keep their
//! variant for life. Scoring only ever sees a `VariantConfig`, so adding a
//! variant means registering a config, nothing else.

pub mod assignor;
pub mod handlers;
pub mod variants;

pub use assignor::{AssignorStats, UserAssignment, VariantAssignor};
pub use variants::{Variant, VariantConfig, VariantRegistry};

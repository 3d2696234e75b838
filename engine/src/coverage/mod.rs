//! Spatial algebra over projected provider layers
//!
//! Provides:
//! - Coverage statuses and the status map
//! - The set-operation partition into exclusive, competition, planned and white-spot areas

mod algebra;
mod types;

pub use algebra::{AlgebraInput, DEFAULT_PARTITION_TOLERANCE, compute_coverage, compute_coverage_with_tolerance};
pub use types::*;

//! Topology cleaning of provider layers
//!
//! Provides:
//! - Layer identity and the raw → cleaned → projected layer typestates
//! - The buffer-dissolve-unbuffer cleaner with validity repair and sliver removal

mod cleaner;
mod types;

pub use cleaner::{CleanOutcome, TopologyCleaner};
pub use types::*;

//! Area reporting in the analysis CRS
//!
//! Provides:
//! - Study-area totals per coverage status in km²
//! - Status × group aggregation over an R-tree of grouping polygons

mod index;
mod reporter;
mod types;

pub use index::GroupIndex;
pub use reporter::AreaReporter;
pub use types::*;

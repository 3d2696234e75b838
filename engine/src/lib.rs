//! Coverage Engine Library
//!
//! Turns classified coverage-map raster tiles into clean, reprojected
//! polygon layers and derives market coverage statistics from them.

pub mod area;
pub mod config;
pub mod coverage;
pub mod crs;
pub mod pipeline;
pub mod raster;
pub mod topology;
pub mod vector;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use coverage::{CoverageMap, CoverageStatus};
pub use pipeline::{AnalysisInputs, Pipeline, PipelineOutcome, ProviderInput, RunStatus};

//! End-to-end pipeline
//!
//! Provides:
//! - Sequential and parallel runs over per-provider tile inputs
//! - Role routing of raw geometry into layers, in memory or spilled
//! - A structured outcome listing skipped tiles, rejected geometry and failed layers

mod outcome;
mod runner;

pub use outcome::{LayerFailure, LayerStage, PipelineOutcome, RejectedGeometry, RunStatus};
pub use runner::{AnalysisInputs, Pipeline, ProviderInput, TileJobs};

//! Structured result of a pipeline run

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::area::AreaReport;
use crate::coverage::CoverageMap;
use crate::raster::TileId;
use crate::topology::{CleaningStats, LayerId, ProjectedLayer, TopologyError};
use crate::vector::{StreamReport, TileFailure};

/// Overall result classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every tile and layer processed
    Complete,
    /// Statistics produced, but something was skipped or the status areas do not add up
    Partial,
    /// No coverage statistics could be produced
    Failed,
}

/// Stage at which a layer-level failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStage {
    Setup,
    Vectorize,
    Clean,
    Reproject,
    Algebra,
    Area,
}

impl fmt::Display for LayerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerStage::Setup => "setup",
            LayerStage::Vectorize => "vectorize",
            LayerStage::Clean => "clean",
            LayerStage::Reproject => "reproject",
            LayerStage::Algebra => "algebra",
            LayerStage::Area => "area",
        };
        f.write_str(name)
    }
}

/// A stage failure that aborted one provider's layer (or the shared stages)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerFailure {
    /// Offending layer, when the failure belongs to a single layer
    pub layer: Option<LayerId>,
    pub provider: Option<String>,
    pub stage: LayerStage,
    pub error: String,
}

impl LayerFailure {
    pub fn layer(layer: LayerId, stage: LayerStage, error: impl fmt::Display) -> Self {
        Self {
            provider: Some(layer.provider.clone()),
            layer: Some(layer),
            stage,
            error: error.to_string(),
        }
    }

    pub fn provider(provider: &str, stage: LayerStage, error: impl fmt::Display) -> Self {
        Self {
            layer: None,
            provider: Some(provider.to_string()),
            stage,
            error: error.to_string(),
        }
    }

    pub fn shared(stage: LayerStage, error: impl fmt::Display) -> Self {
        Self {
            layer: None,
            provider: None,
            stage,
            error: error.to_string(),
        }
    }
}

/// A raw geometry the cleaner could not repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedGeometry {
    pub layer: LayerId,
    pub tile_id: TileId,
    pub reason: String,
}

impl RejectedGeometry {
    pub fn from_error(error: &TopologyError) -> Option<Self> {
        match error {
            TopologyError::Unrepairable {
                layer,
                tile_id,
                reason,
            } => Some(Self {
                layer: layer.clone(),
                tile_id: tile_id.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Everything a run produced, including what it had to skip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub status: RunStatus,
    /// Per-provider streaming counters
    pub streams: IndexMap<String, StreamReport>,
    pub tile_failures: Vec<TileFailure>,
    pub rejected: Vec<RejectedGeometry>,
    pub cleaning: IndexMap<String, CleaningStats>,
    pub layers: Vec<ProjectedLayer>,
    pub layer_failures: Vec<LayerFailure>,
    pub coverage: Option<CoverageMap>,
    pub report: Option<AreaReport>,
}

impl PipelineOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn failed_tile_ids(&self) -> Vec<&TileId> {
        self.tile_failures.iter().map(|f| &f.tile_id).collect()
    }

    pub(crate) fn classify(
        coverage_ok: bool,
        partition_exceeded: bool,
        tile_failures: &[TileFailure],
        rejected: &[RejectedGeometry],
        layer_failures: &[LayerFailure],
    ) -> RunStatus {
        if !coverage_ok {
            RunStatus::Failed
        } else if !partition_exceeded
            && tile_failures.is_empty()
            && rejected.is_empty()
            && layer_failures.is_empty()
        {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }
}

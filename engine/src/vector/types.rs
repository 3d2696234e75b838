//! Vectorization types and error definitions

use geo::Polygon;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::raster::{Affine, ClassificationError, Label, SourceError, TileId};

/// Errors raised while converting a classified tile into polygons
#[derive(Debug, Error)]
pub enum VectorizationError {
    #[error("Tile {tile}: affine transform {transform:?} is degenerate")]
    DegenerateTransform { tile: TileId, transform: Affine },

    #[error("Tile {tile}: mask is {mask_width}x{mask_height}, tile is {tile_width}x{tile_height}")]
    ShapeMismatch {
        tile: TileId,
        mask_width: u32,
        mask_height: u32,
        tile_width: u32,
        tile_height: u32,
    },
}

/// Errors raised by the on-disk spill
#[derive(Debug, Error)]
pub enum SpillError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt spill record in {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode spill record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One polygon traced from a tile, in the tile's native CRS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGeometry {
    pub label: Label,
    /// Tile the polygon was traced from (first tile for merged regions)
    pub tile_id: TileId,
    pub polygon: Polygon<f64>,
    /// The region reaches the tile edge and may continue in a neighbour
    #[serde(default)]
    pub touches_border: bool,
    /// Other tiles whose parts were merged into this polygon
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<TileId>,
}

/// Pipeline step at which a tile was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStage {
    Source,
    Classify,
    Vectorize,
}

impl fmt::Display for TileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileStage::Source => "source",
            TileStage::Classify => "classify",
            TileStage::Vectorize => "vectorize",
        };
        f.write_str(name)
    }
}

/// A tile skipped by the stream, reported alongside the partial output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFailure {
    pub tile_id: TileId,
    pub stage: TileStage,
    pub message: String,
}

impl TileFailure {
    pub fn source(tile_id: TileId, err: &SourceError) -> Self {
        Self {
            tile_id,
            stage: TileStage::Source,
            message: err.to_string(),
        }
    }

    pub fn classify(tile_id: TileId, err: &ClassificationError) -> Self {
        Self {
            tile_id,
            stage: TileStage::Classify,
            message: err.to_string(),
        }
    }

    pub fn vectorize(tile_id: TileId, err: &VectorizationError) -> Self {
        Self {
            tile_id,
            stage: TileStage::Vectorize,
            message: err.to_string(),
        }
    }
}

/// Counters accumulated over one pass of the stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub tiles_processed: usize,
    pub geometries_emitted: usize,
    pub seam_merges: usize,
    pub failed_tiles: Vec<TileFailure>,
}

impl StreamReport {
    pub fn is_complete(&self) -> bool {
        self.failed_tiles.is_empty()
    }

    pub(crate) fn record_tile(&mut self) {
        self.tiles_processed += 1;
        counter!("coverage_tiles_processed_total").increment(1);
    }

    pub(crate) fn record_failure(&mut self, failure: TileFailure) {
        warn!(
            "Skipping tile {} at {} stage: {}",
            failure.tile_id, failure.stage, failure.message
        );
        counter!("coverage_tiles_failed_total").increment(1);
        self.failed_tiles.push(failure);
    }
}

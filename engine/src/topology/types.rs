//! Layer types and topology error definitions

use geo::{MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crs::Crs;
use crate::raster::TileId;
use crate::vector::RawGeometry;

/// Errors raised by the buffer-dissolve-unbuffer cleaner
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Layer {layer}: geometry from tile {tile_id} is invalid and could not be repaired ({reason})")]
    Unrepairable {
        layer: LayerId,
        tile_id: TileId,
        reason: String,
    },

    /// `bounds` is `[min_x, min_y, max_x, max_y]` of the offending polygon
    #[error("Layer {layer}: cleaned geometry within {bounds:?} failed validity check")]
    InvalidAfterCleaning { layer: LayerId, bounds: [f64; 4] },

    #[error(
        "Layer {layer}: area dropped from {before:.3} to {after:.3} (allowed loss {allowed:.3})"
    )]
    AreaRegression {
        layer: LayerId,
        before: f64,
        after: f64,
        allowed: f64,
    },

    #[error("Layer {layer}: spill read failed: {message}")]
    Spill { layer: LayerId, message: String },
}

impl TopologyError {
    pub fn layer(&self) -> &LayerId {
        match self {
            TopologyError::Unrepairable { layer, .. }
            | TopologyError::InvalidAfterCleaning { layer, .. }
            | TopologyError::AreaRegression { layer, .. }
            | TopologyError::Spill { layer, .. } => layer,
        }
    }
}

/// Which analysis layer a classification rule feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    ProviderA,
    ProviderB,
    Planned,
}

impl LayerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerRole::ProviderA => "provider_a",
            LayerRole::ProviderB => "provider_b",
            LayerRole::Planned => "planned",
        }
    }
}

/// Identifies one provider layer, e.g. `telekom/provider_a`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId {
    pub provider: String,
    pub role: LayerRole,
}

impl LayerId {
    pub fn new(provider: impl Into<String>, role: LayerRole) -> Self {
        Self {
            provider: provider.into(),
            role,
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.role.as_str())
    }
}

/// Raw, native-CRS geometries of one layer as produced by the vectorizer
#[derive(Debug, Clone)]
pub struct ProviderLayer {
    pub id: LayerId,
    pub crs: Option<Crs>,
    pub geometries: Vec<RawGeometry>,
}

impl ProviderLayer {
    pub fn new(id: LayerId, crs: Option<Crs>) -> Self {
        Self {
            id,
            crs,
            geometries: Vec::new(),
        }
    }

    pub fn push(&mut self, geometry: RawGeometry) {
        self.geometries.push(geometry);
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }
}

/// Summary of one cleaning run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningStats {
    pub input_geometries: usize,
    pub repaired: usize,
    pub rejected: usize,
    pub slivers_discarded: usize,
    pub sliver_area: f64,
    pub dissolved_area: f64,
    pub cleaned_area: f64,
    pub output_polygons: usize,
}

/// Dissolved and repaired layer, still in its native CRS
#[derive(Debug, Clone)]
pub struct CleanedLayer {
    pub id: LayerId,
    pub crs: Option<Crs>,
    pub geometry: MultiPolygon<f64>,
    pub stats: CleaningStats,
}

/// Cleaned layer in the analysis CRS; the only form the algebra accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedLayer {
    pub id: LayerId,
    pub crs: Crs,
    pub geometry: MultiPolygon<f64>,
}

impl ProjectedLayer {
    /// Wrap geometry already expressed in `crs`
    pub fn new(id: LayerId, crs: Crs, geometry: MultiPolygon<f64>) -> Self {
        Self { id, crs, geometry }
    }

    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.geometry.0
    }
}

//! Layer reprojection into the analysis CRS

use geo::{Coord, MapCoords, MultiPolygon};
use tracing::info;

use super::projection::Projection;
use super::types::{Crs, ReprojectionError};
use crate::topology::{CleanedLayer, ProjectedLayer};

/// Per-vertex transform between a fixed source and target CRS
#[derive(Debug, Clone)]
pub struct Reprojector {
    source: Projection,
    target: Projection,
}

impl Reprojector {
    pub fn new(source: Crs, target: Crs) -> Result<Self, ReprojectionError> {
        Ok(Self {
            source: Projection::new(source)?,
            target: Projection::new(target)?,
        })
    }

    pub fn source(&self) -> Crs {
        self.source.crs()
    }

    pub fn target(&self) -> Crs {
        self.target.crs()
    }

    /// Transform in the opposite direction
    pub fn inverse(&self) -> Reprojector {
        Reprojector {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.source() == self.target()
    }

    pub fn transform_coord(&self, c: Coord<f64>) -> Result<Coord<f64>, ReprojectionError> {
        if self.is_identity() {
            return Ok(c);
        }
        self.source.transform_to(&self.target, c)
    }

    pub fn transform(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, ReprojectionError> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.transform_coord(c))
    }

    /// Move a cleaned layer into the target CRS, consuming it
    pub fn reproject_layer(&self, layer: CleanedLayer) -> Result<ProjectedLayer, ReprojectionError> {
        let source = layer.crs.ok_or_else(|| ReprojectionError::SourceCrsUnset {
            layer: layer.id.clone(),
        })?;
        if source != self.source() {
            return Err(ReprojectionError::Layer {
                layer: layer.id.clone(),
                source: Box::new(ReprojectionError::UnsupportedCrs(format!(
                    "layer is in {}, reprojector expects {}",
                    source,
                    self.source()
                ))),
            });
        }

        let geometry = self
            .transform(&layer.geometry)
            .map_err(|e| ReprojectionError::Layer {
                layer: layer.id.clone(),
                source: Box::new(e),
            })?;

        info!(
            "Reprojected layer {} from {} to {} ({} polygons)",
            layer.id,
            self.source(),
            self.target(),
            geometry.0.len()
        );

        Ok(ProjectedLayer::new(layer.id, self.target(), geometry))
    }
}

/// Reproject a cleaned layer from its own CRS into `target`
pub fn reproject_layer(layer: CleanedLayer, target: Crs) -> Result<ProjectedLayer, ReprojectionError> {
    let source = layer.crs.ok_or_else(|| ReprojectionError::SourceCrsUnset {
        layer: layer.id.clone(),
    })?;
    Reprojector::new(source, target)?.reproject_layer(layer)
}

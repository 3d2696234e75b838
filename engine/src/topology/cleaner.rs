//! Buffer-dissolve-unbuffer cleaning of provider layers
//!
//! Raw geometries are validated (and repaired by self-union where possible),
//! dissolved in bounded batches, closed with a `+ε` / `−ε` buffer pair and
//! exploded into polygons. Polygons below the sliver threshold are dropped.

use geo::{Area, BoundingRect, CoordsIter, MultiPolygon, Polygon, Validation, unary_union};
use metrics::counter;
use tracing::{debug, info, warn};

use super::types::{CleanedLayer, CleaningStats, LayerId, ProviderLayer, TopologyError};
use crate::config::CleaningConfig;
use crate::crs::Crs;
use crate::raster::close_polygons;
use crate::vector::{RawGeometry, SpillError};

/// Result of cleaning one layer
#[derive(Debug)]
pub struct CleanOutcome {
    pub layer: CleanedLayer,
    /// Geometries that could not be repaired; none of them reached the layer
    pub rejected: Vec<TopologyError>,
}

/// Rebuilds an invalid polygon into simple parts
type RepairFn = fn(&Polygon<f64>) -> MultiPolygon<f64>;

fn self_union(polygon: &Polygon<f64>) -> MultiPolygon<f64> {
    unary_union(std::iter::once(polygon))
}

/// Cleans provider layers with fixed, read-only settings
#[derive(Debug, Clone)]
pub struct TopologyCleaner {
    config: CleaningConfig,
    dissolve_batch: usize,
    repair: RepairFn,
}

impl TopologyCleaner {
    pub fn new(config: CleaningConfig, dissolve_batch: usize) -> Self {
        Self {
            config,
            dissolve_batch: dissolve_batch.max(1),
            repair: self_union,
        }
    }

    #[cfg(test)]
    fn with_repair(mut self, repair: RepairFn) -> Self {
        self.repair = repair;
        self
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Clean an in-memory provider layer
    pub fn clean(&self, layer: ProviderLayer) -> Result<CleanOutcome, TopologyError> {
        let ProviderLayer { id, crs, geometries } = layer;
        self.clean_stream(id, crs, geometries.into_iter().map(Ok))
    }

    /// Clean a one-pass stream of raw geometries (e.g. read back from a spill)
    pub fn clean_stream<I>(&self, id: LayerId, crs: Option<Crs>, geometries: I) -> Result<CleanOutcome, TopologyError>
    where
        I: IntoIterator<Item = Result<RawGeometry, SpillError>>,
    {
        let mut stats = CleaningStats::default();
        let mut rejected = Vec::new();
        let mut dissolver = Dissolver::new(self.dissolve_batch);

        for item in geometries {
            let raw = item.map_err(|e| TopologyError::Spill {
                layer: id.clone(),
                message: e.to_string(),
            })?;
            stats.input_geometries += 1;

            match repair(&raw.polygon, self.repair) {
                Ok(Repaired { parts, changed }) => {
                    if changed {
                        stats.repaired += 1;
                        debug!("Repaired invalid geometry from tile {} in {}", raw.tile_id, id);
                    }
                    parts.into_iter().for_each(|p| dissolver.push(p));
                }
                Err(reason) => {
                    warn!(
                        "Rejecting geometry from tile {} in layer {}: {}",
                        raw.tile_id, id, reason
                    );
                    counter!("coverage_geometries_rejected_total").increment(1);
                    stats.rejected += 1;
                    rejected.push(TopologyError::Unrepairable {
                        layer: id.clone(),
                        tile_id: raw.tile_id,
                        reason,
                    });
                }
            }
        }

        let dissolved = dissolver.finish();
        let layer = self.close_and_filter(id, crs, dissolved, stats)?;
        Ok(CleanOutcome { layer, rejected })
    }

    /// Run an already cleaned layer through the cycle again
    pub fn reclean(&self, layer: &CleanedLayer) -> Result<CleanedLayer, TopologyError> {
        let stats = CleaningStats {
            input_geometries: layer.geometry.0.len(),
            ..CleaningStats::default()
        };
        let dissolved = unary_union(layer.geometry.0.iter());
        self.close_and_filter(layer.id.clone(), layer.crs, dissolved, stats)
    }

    fn close_and_filter(
        &self,
        id: LayerId,
        crs: Option<Crs>,
        dissolved: MultiPolygon<f64>,
        mut stats: CleaningStats,
    ) -> Result<CleanedLayer, TopologyError> {
        stats.dissolved_area = dissolved.unsigned_area();
        let closed = close_polygons(&dissolved, self.config.epsilon);

        let mut kept = Vec::with_capacity(closed.0.len());
        for polygon in closed {
            let area = polygon.unsigned_area();
            if area < self.config.min_sliver_area {
                stats.slivers_discarded += 1;
                stats.sliver_area += area;
                continue;
            }
            kept.extend(self.ensure_valid(&id, polygon)?);
        }

        let geometry = MultiPolygon::new(kept);
        stats.cleaned_area = geometry.unsigned_area();
        stats.output_polygons = geometry.0.len();
        check_area(&id, &stats, self.config.max_area_loss_ratio)?;

        info!(
            "Cleaned layer {}: {} inputs -> {} polygons, area {:.1} -> {:.1} ({} slivers, {} rejected)",
            id,
            stats.input_geometries,
            stats.output_polygons,
            stats.dissolved_area,
            stats.cleaned_area,
            stats.slivers_discarded,
            stats.rejected
        );

        Ok(CleanedLayer {
            id,
            crs,
            geometry,
            stats,
        })
    }
}

/// Net loss beyond the discarded slivers and the configured ratio is a defect
fn check_area(id: &LayerId, stats: &CleaningStats, max_loss_ratio: f64) -> Result<(), TopologyError> {
    let allowed = stats.dissolved_area * max_loss_ratio + stats.sliver_area;
    if stats.cleaned_area < stats.dissolved_area - allowed {
        return Err(TopologyError::AreaRegression {
            layer: id.clone(),
            before: stats.dissolved_area,
            after: stats.cleaned_area,
            allowed,
        });
    }
    Ok(())
}

struct Repaired {
    parts: Vec<Polygon<f64>>,
    changed: bool,
}

fn repair(polygon: &Polygon<f64>, rebuild: RepairFn) -> Result<Repaired, String> {
    if polygon.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err("non-finite coordinate".to_string());
    }
    if polygon.is_valid() && polygon.unsigned_area() > 0.0 {
        return Ok(Repaired {
            parts: vec![polygon.clone()],
            changed: false,
        });
    }

    let parts: Vec<Polygon<f64>> = rebuild(polygon)
        .into_iter()
        .filter(|p| p.unsigned_area() > 0.0)
        .collect();
    if parts.is_empty() {
        return Err("ring collapses to zero area".to_string());
    }
    if !parts.iter().all(|p| p.is_valid()) {
        return Err("self-intersection persists after repair".to_string());
    }
    Ok(Repaired {
        parts,
        changed: true,
    })
}

impl TopologyCleaner {
    /// Closed output must be valid; one more self-union is allowed before giving up
    fn ensure_valid(&self, id: &LayerId, polygon: Polygon<f64>) -> Result<Vec<Polygon<f64>>, TopologyError> {
        if polygon.is_valid() {
            return Ok(vec![polygon]);
        }
        let parts = (self.repair)(&polygon).0;
        if parts.iter().all(|p| p.is_valid()) {
            return Ok(parts);
        }
        let bounds = polygon
            .bounding_rect()
            .map(|r| [r.min().x, r.min().y, r.max().x, r.max().y])
            .unwrap_or([f64::NAN; 4]);
        warn!("Cleaned polygon of layer {} within {:?} is invalid", id, bounds);
        Err(TopologyError::InvalidAfterCleaning {
            layer: id.clone(),
            bounds,
        })
    }
}

/// Unions polygons in fixed-size batches into a running result
struct Dissolver {
    batch: Vec<Polygon<f64>>,
    batch_size: usize,
    merged: MultiPolygon<f64>,
}

impl Dissolver {
    fn new(batch_size: usize) -> Self {
        Self {
            batch: Vec::with_capacity(batch_size),
            batch_size,
            merged: MultiPolygon::new(Vec::new()),
        }
    }

    fn push(&mut self, polygon: Polygon<f64>) {
        self.batch.push(polygon);
        if self.batch.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let merged = unary_union(self.merged.0.iter().chain(self.batch.iter()));
        self.merged = merged;
        self.batch.clear();
    }

    fn finish(mut self) -> MultiPolygon<f64> {
        self.flush();
        self.merged
    }
}

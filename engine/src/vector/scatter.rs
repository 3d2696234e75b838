//! Parallel per-tile work feeding a single seam-merging aggregator
//!
//! Tiles are loaded, classified, closed and traced on blocking worker
//! threads with bounded, order-preserving concurrency. Results pass through
//! a bounded channel to one aggregator that owns the seam window, so the
//! adjacency order of the input is kept.

use futures_util::StreamExt;
use futures_util::stream;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::stream::SeamMerger;
use super::trace::trace_tile;
use super::types::{RawGeometry, StreamReport, TileFailure, TileStage};
use crate::crs::Crs;
use crate::raster::{ClassifiedMask, GapCloser, RasterClassifier, SourceError, Tile, TileJob};

/// Classification and closing settings shared by all workers of one provider.
///
/// Every tile must be in the provider's CRS. When the provider has none
/// configured, the first tile that names one fixes it for the rest.
#[derive(Debug, Clone)]
pub struct TileWorker {
    classifier: RasterClassifier,
    closer: GapCloser,
    configured_crs: Option<Crs>,
    adopted_crs: Arc<OnceLock<Crs>>,
}

impl TileWorker {
    pub fn new(classifier: RasterClassifier, closer: GapCloser) -> Self {
        Self {
            classifier,
            closer,
            configured_crs: None,
            adopted_crs: Arc::new(OnceLock::new()),
        }
    }

    /// Require tiles to be in `crs`
    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.configured_crs = crs;
        self
    }

    /// CRS of the geometry this worker produced so far
    pub fn crs(&self) -> Option<Crs> {
        self.configured_crs.or_else(|| self.adopted_crs.get().copied())
    }

    fn check_crs(&self, tile: &Tile) -> Result<(), SourceError> {
        let Some(found) = tile.crs else {
            return Ok(());
        };
        let expected = match self.configured_crs {
            Some(crs) => crs,
            None => *self.adopted_crs.get_or_init(|| found),
        };
        if found != expected {
            return Err(SourceError::CrsMismatch {
                tile: tile.id.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Classify a tile and close gaps in its mask
    pub fn classify(&self, tile: &Tile) -> Result<ClassifiedMask, TileFailure> {
        self.check_crs(tile)
            .map_err(|e| TileFailure::source(tile.id.clone(), &e))?;
        let mask = self
            .classifier
            .classify(tile)
            .map_err(|e| TileFailure::classify(tile.id.clone(), &e))?;
        Ok(self.closer.close(&mask))
    }

    /// Load a tile and produce its closed mask
    pub fn load_and_classify(&self, job: TileJob) -> Result<(Tile, ClassifiedMask), TileFailure> {
        let id = job.id.clone();
        let tile = job.load().map_err(|e| TileFailure::source(id, &e))?;
        let mask = self.classify(&tile)?;
        Ok((tile, mask))
    }

    /// Load, classify, close and trace one tile
    pub fn process(&self, job: TileJob) -> Result<Vec<RawGeometry>, TileFailure> {
        let (tile, mask) = self.load_and_classify(job)?;
        trace_tile(&tile, &mask).map_err(|e| TileFailure::vectorize(tile.id.clone(), &e))
    }
}

/// Concurrency limits of one scatter-gather run
#[derive(Debug, Clone, Copy)]
pub struct ScatterOptions {
    pub workers: usize,
    pub channel_capacity: usize,
    pub window_tiles: usize,
}

/// Run all jobs through `worker` in parallel and hand every final geometry to `sink`.
///
/// A sink error stops the run: the channel is closed, in-flight tiles are
/// abandoned and the error is returned.
pub async fn scatter_gather<S, F, E>(
    jobs: S,
    worker: Arc<TileWorker>,
    options: ScatterOptions,
    mut sink: F,
) -> Result<StreamReport, E>
where
    S: Iterator<Item = TileJob> + Send + 'static,
    F: FnMut(RawGeometry) -> Result<(), E>,
{
    let (tx, mut rx) = mpsc::channel(options.channel_capacity.max(1));
    let workers = options.workers.max(1);

    let producer = tokio::spawn(async move {
        let mut results = stream::iter(jobs)
            .map(|job| {
                let worker = worker.clone();
                let id = job.id.clone();
                async move {
                    tokio::task::spawn_blocking(move || worker.process(job))
                        .await
                        .unwrap_or_else(|e| {
                            Err(TileFailure {
                                tile_id: id,
                                stage: TileStage::Vectorize,
                                message: format!("worker task failed: {}", e),
                            })
                        })
                }
            })
            .buffered(workers);

        while let Some(result) = results.next().await {
            if tx.send(result).await.is_err() {
                break;
            }
        }
    });

    let mut merger = SeamMerger::new(options.window_tiles);
    let mut report = StreamReport::default();

    while let Some(result) = rx.recv().await {
        match result {
            Ok(geometries) => {
                report.record_tile();
                for geometry in merger.push_tile(geometries) {
                    report.geometries_emitted += 1;
                    sink(geometry)?;
                }
            }
            Err(failure) => report.record_failure(failure),
        }
    }
    for geometry in merger.flush() {
        report.geometries_emitted += 1;
        sink(geometry)?;
    }
    report.seam_merges = merger.merges();

    if let Err(e) = producer.await {
        warn!("Tile producer task failed: {}", e);
    }

    info!(
        "Scatter-gather finished: {} tiles, {} failed, {} geometries, {} seam merges",
        report.tiles_processed,
        report.failed_tiles.len(),
        report.geometries_emitted,
        report.seam_merges
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassRule, Matcher};
    use crate::raster::{Affine, PixelFormat, SourceError, TileId};
    use crate::test_utils::gray_tile;
    use crate::topology::LayerRole;
    use geo::Area;
    use std::convert::Infallible;

    fn worker(radius: u32) -> Arc<TileWorker> {
        let rules = vec![ClassRule {
            name: "on".into(),
            role: LayerRole::ProviderA,
            matcher: Matcher::Value { min: 1, max: 255 },
        }];
        let classifier = RasterClassifier::new(&rules, PixelFormat::Gray8).unwrap();
        Arc::new(TileWorker::new(classifier, GapCloser::new(radius)))
    }

    fn options() -> ScatterOptions {
        ScatterOptions {
            workers: 4,
            channel_capacity: 2,
            window_tiles: 4,
        }
    }

    #[tokio::test]
    async fn test_row_of_tiles_merges_into_one() {
        let jobs: Vec<TileJob> = (0..6)
            .map(|i| {
                let tile = gray_tile(
                    &format!("t{}", i),
                    &["1111", "1111"],
                    Affine::north_up(i as f64 * 4.0, 0.0, 1.0),
                );
                TileJob::ready(tile)
            })
            .collect();

        let mut out = Vec::new();
        let report = scatter_gather(jobs.into_iter(), worker(0), options(), |g| {
            out.push(g);
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

        assert_eq!(report.tiles_processed, 6);
        assert_eq!(out.len(), 1);
        assert!((out[0].polygon.unsigned_area() - 48.0).abs() < 1e-9);
        assert_eq!(out[0].merged_from.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_job_reported() {
        let jobs = vec![
            TileJob::new(TileId::new("broken"), || {
                Err(SourceError::Decode {
                    tile: TileId::new("broken"),
                    message: "truncated".into(),
                })
            }),
            TileJob::ready(gray_tile("ok", &["010"], Affine::north_up(0.0, 0.0, 1.0))),
        ];

        let mut count = 0;
        let report = scatter_gather(jobs.into_iter(), worker(0), options(), |_| {
            count += 1;
            Ok::<_, Infallible>(())
        })
        .await
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(report.failed_tiles.len(), 1);
        assert_eq!(report.failed_tiles[0].stage, TileStage::Source);
        assert_eq!(report.failed_tiles[0].tile_id, TileId::new("broken"));
    }

    #[tokio::test]
    async fn test_sink_error_stops_run() {
        let jobs: Vec<TileJob> = (0..3)
            .map(|i| {
                TileJob::ready(gray_tile(
                    &format!("t{}", i),
                    &["000", "010", "000"],
                    Affine::north_up(i as f64 * 10.0, 0.0, 1.0),
                ))
            })
            .collect();

        let result = scatter_gather(jobs.into_iter(), worker(0), options(), |_| Err("disk full")).await;
        assert_eq!(result.unwrap_err(), "disk full");
    }

    #[test]
    fn test_tile_in_other_crs_is_rejected() {
        let tile = gray_tile("t0", &["11", "11"], Affine::north_up(0.0, 0.0, 1.0));
        assert_eq!(tile.crs, Some(Crs::etrs89_utm(33)));

        let strict = Arc::unwrap_or_clone(worker(0)).with_crs(Some(Crs::WEB_MERCATOR));
        let failure = strict.classify(&tile).unwrap_err();
        assert_eq!(failure.stage, TileStage::Source);
        assert_eq!(failure.tile_id, TileId::new("t0"));
        assert!(failure.message.contains("EPSG:25833"), "{}", failure.message);

        let matching = Arc::unwrap_or_clone(worker(0)).with_crs(Some(Crs::etrs89_utm(33)));
        assert!(matching.classify(&tile).is_ok());
    }

    #[test]
    fn test_unconfigured_worker_adopts_first_tile_crs() {
        let adopting = worker(0);
        assert_eq!(adopting.crs(), None);

        let mut untagged = gray_tile("bare", &["1"], Affine::north_up(0.0, 0.0, 1.0));
        untagged.crs = None;
        assert!(adopting.classify(&untagged).is_ok());
        assert_eq!(adopting.crs(), None);

        let first = gray_tile("t0", &["1"], Affine::north_up(0.0, 0.0, 1.0));
        assert!(adopting.classify(&first).is_ok());
        assert_eq!(adopting.crs(), Some(Crs::etrs89_utm(33)));

        let mut other = gray_tile("t1", &["1"], Affine::north_up(1.0, 0.0, 1.0));
        other.crs = Some(Crs::WEB_MERCATOR);
        let failure = adopting.classify(&other).unwrap_err();
        assert_eq!(failure.tile_id, TileId::new("t1"));
        assert_eq!(adopting.crs(), Some(Crs::etrs89_utm(33)));
    }

    #[test]
    fn test_worker_closes_before_tracing() {
        let tile = gray_tile("gap", &["11111", "11011", "11111"], Affine::north_up(0.0, 0.0, 1.0));
        let open = worker(0).process(TileJob::ready(tile.clone())).unwrap();
        let closed = worker(1).process(TileJob::ready(tile)).unwrap();
        assert_eq!(open[0].polygon.interiors().len(), 1);
        assert!(closed[0].polygon.interiors().is_empty());
    }
}

//! Pipeline orchestration
//!
//! Per provider: tiles are classified, closed and traced into raw geometry,
//! routed by rule role into layers (in memory or spilled to disk), then each
//! layer is cleaned and reprojected. The projected layers of all providers
//! feed one algebra run and one area report.

use geo::{BooleanOps, MultiPolygon};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::outcome::{LayerFailure, LayerStage, PipelineOutcome, RejectedGeometry};
use crate::area::{AreaReport, AreaReporter, GroupPolygon, Grouping};
use crate::config::{ConfigError, PipelineConfig, ProviderConfig};
use crate::coverage::{AlgebraInput, Boundary, CoverageMap, compute_coverage_with_tolerance};
use crate::crs::{Crs, ReprojectionError, Reprojector, reproject_layer};
use crate::raster::{DirectoryTileSource, GapCloser, RasterClassifier, SourceError, Tile, TileJob};
use crate::topology::{
    CleanOutcome, CleaningStats, LayerId, LayerRole, ProjectedLayer, ProviderLayer, TopologyCleaner,
    TopologyError,
};
use crate::vector::{
    RawGeometry, ScatterOptions, SpillError, SpillReader, SpillSummary, SpillWriter, StreamReport,
    StreamingVectorizer, TileFailure, TileWorker, remove_spill_dir, scatter_gather,
};

/// Lazy sequence of tile jobs for one provider
pub type TileJobs = Box<dyn Iterator<Item = TileJob> + Send>;

/// Tiles of one provider, in an adjacency-preserving order
pub struct ProviderInput {
    pub provider: String,
    pub jobs: TileJobs,
}

impl ProviderInput {
    pub fn new<I>(provider: impl Into<String>, jobs: I) -> Self
    where
        I: IntoIterator<Item = TileJob>,
        I::IntoIter: Send + 'static,
    {
        Self {
            provider: provider.into(),
            jobs: Box::new(jobs.into_iter()),
        }
    }

    /// Tiles already decoded in memory
    pub fn from_tiles(provider: impl Into<String>, tiles: Vec<Tile>) -> Self {
        Self::new(provider, tiles.into_iter().map(TileJob::ready))
    }

    /// Tiles read lazily from the provider's configured directory
    pub fn from_directory(config: &ProviderConfig) -> Result<Self, SourceError> {
        let dir = config.tile_dir.as_deref().ok_or_else(|| SourceError::Directory {
            path: PathBuf::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("provider '{}' has no tile_dir", config.name),
            ),
        })?;
        let source = DirectoryTileSource::open(dir, config.source_crs, config.pixel_format)?;
        Ok(Self::new(config.name.clone(), source.into_jobs()))
    }
}

/// Optional analysis geometries; reprojected to the target CRS when needed
#[derive(Debug, Clone, Default)]
pub struct AnalysisInputs {
    pub boundary: Option<Boundary>,
    pub grouping: Option<Grouping>,
}

/// Runs the geometry pipeline with one immutable configuration
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage on the calling thread
    pub fn run(&self, inputs: Vec<ProviderInput>, analysis: AnalysisInputs) -> PipelineOutcome {
        let spill = self.spill_root();
        let mut state = RunState::default();

        for input in inputs {
            let Some(provider) = self.provider_for(&input, &mut state) else {
                continue;
            };
            let (worker, mut router) = match prepare(provider, spill.as_ref()) {
                Ok(prepared) => prepared,
                Err(failure) => {
                    state.fail(failure);
                    continue;
                }
            };

            info!("Vectorizing provider {}", provider.name);
            let pairs = input.jobs.map(|job| worker.load_and_classify(job));
            let mut stream = StreamingVectorizer::new(pairs, self.config.window_tiles);
            let mut sink_error = None;
            for raw in stream.by_ref() {
                if let Err(e) = router.push(raw) {
                    sink_error = Some(e);
                    break;
                }
            }
            state.record_stream(&provider.name, stream.into_report());
            if let Some(e) = sink_error {
                state.fail(LayerFailure::provider(&provider.name, LayerStage::Vectorize, e));
                continue;
            }

            let sources = match router.finish(worker.crs()) {
                Ok(sources) => sources,
                Err(e) => {
                    state.fail(LayerFailure::provider(&provider.name, LayerStage::Vectorize, e));
                    continue;
                }
            };
            let cleaner = TopologyCleaner::new(provider.cleaning.clone(), self.config.dissolve_batch);
            for source in sources {
                state.record_layer(process_layer(&cleaner, source, self.config.target_crs));
            }
        }

        drop(spill);
        assemble(&self.config, state, analysis)
    }

    /// Run with parallel tile workers and blocking threads for the layer stages
    pub async fn run_parallel(&self, inputs: Vec<ProviderInput>, analysis: AnalysisInputs) -> PipelineOutcome {
        let spill = self.spill_root();
        let mut state = RunState::default();
        let options = ScatterOptions {
            workers: self.config.workers,
            channel_capacity: self.config.channel_capacity,
            window_tiles: self.config.window_tiles,
        };

        for input in inputs {
            let Some(provider) = self.provider_for(&input, &mut state) else {
                continue;
            };
            let (worker, mut router) = match prepare(provider, spill.as_ref()) {
                Ok(prepared) => prepared,
                Err(failure) => {
                    state.fail(failure);
                    continue;
                }
            };

            info!(
                "Vectorizing provider {} with {} workers",
                provider.name, options.workers
            );
            let worker = Arc::new(worker);
            let streamed = scatter_gather(input.jobs, worker.clone(), options, |raw| router.push(raw)).await;
            match streamed {
                Ok(report) => state.record_stream(&provider.name, report),
                Err(e) => {
                    state.fail(LayerFailure::provider(&provider.name, LayerStage::Vectorize, e));
                    continue;
                }
            }

            let sources = match router.finish(worker.crs()) {
                Ok(sources) => sources,
                Err(e) => {
                    state.fail(LayerFailure::provider(&provider.name, LayerStage::Vectorize, e));
                    continue;
                }
            };

            let cleaner = TopologyCleaner::new(provider.cleaning.clone(), self.config.dissolve_batch);
            let target = self.config.target_crs;
            let handles: Vec<_> = sources
                .into_iter()
                .map(|source| {
                    let cleaner = cleaner.clone();
                    tokio::task::spawn_blocking(move || process_layer(&cleaner, source, target))
                })
                .collect();

            for handle in handles {
                match handle.await {
                    Ok(result) => state.record_layer(result),
                    Err(e) => state.fail(LayerFailure::provider(
                        &provider.name,
                        LayerStage::Clean,
                        format!("layer task failed: {}", e),
                    )),
                }
            }
        }

        drop(spill);
        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || assemble(&config, state, analysis));
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Analysis task failed: {}", e);
                let mut state = RunState::default();
                state.fail(LayerFailure::shared(
                    LayerStage::Algebra,
                    format!("analysis task failed: {}", e),
                ));
                state.into_outcome(None, None)
            }
        }
    }

    fn provider_for<'a>(&'a self, input: &ProviderInput, state: &mut RunState) -> Option<&'a ProviderConfig> {
        let provider = self.config.provider(&input.provider);
        if provider.is_none() {
            state.fail(LayerFailure::provider(
                &input.provider,
                LayerStage::Setup,
                "provider is not configured",
            ));
        }
        provider
    }

    /// Fresh per-run spill directory, if spilling is enabled
    fn spill_root(&self) -> Option<SpillRun> {
        self.config.spill.as_ref().map(|spill| {
            let root = spill.dir.join(format!("run-{}", Uuid::new_v4()));
            info!("Spilling raw geometry under {:?}", root);
            SpillRun {
                root,
                batch_size: spill.batch_size,
            }
        })
    }
}

/// Spill directory of one run; removed with its contents when dropped
struct SpillRun {
    root: PathBuf,
    batch_size: usize,
}

impl Drop for SpillRun {
    fn drop(&mut self) {
        match remove_spill_dir(&self.root) {
            Ok(()) => info!("Removed spill directory {:?}", self.root),
            Err(e) => warn!("Failed to remove spill directory: {}", e),
        }
    }
}

fn prepare(
    provider: &ProviderConfig,
    spill: Option<&SpillRun>,
) -> Result<(TileWorker, RoleRouter), LayerFailure> {
    let classifier = RasterClassifier::new(&provider.rules, provider.pixel_format)
        .map_err(|e| LayerFailure::provider(&provider.name, LayerStage::Setup, e))?;
    let worker =
        TileWorker::new(classifier, GapCloser::new(provider.closing.radius_px)).with_crs(provider.source_crs);
    let router = RoleRouter::new(provider, spill)
        .map_err(|e| LayerFailure::provider(&provider.name, LayerStage::Setup, e))?;
    Ok((worker, router))
}

/// Where one layer's raw geometry accumulates during vectorization
enum LayerSink {
    Memory(ProviderLayer),
    Spill {
        id: LayerId,
        crs: Option<Crs>,
        writer: SpillWriter,
    },
}

/// Raw geometry of one layer, ready for cleaning
enum LayerSource {
    Memory(ProviderLayer),
    Spilled {
        id: LayerId,
        crs: Option<Crs>,
        summary: SpillSummary,
    },
}

impl LayerSource {
    fn id(&self) -> &LayerId {
        match self {
            LayerSource::Memory(layer) => &layer.id,
            LayerSource::Spilled { id, .. } => id,
        }
    }
}

/// Routes raw geometry to the layer of its rule's role
struct RoleRouter {
    roles: Vec<LayerRole>,
    sinks: BTreeMap<LayerRole, LayerSink>,
}

impl RoleRouter {
    fn new(provider: &ProviderConfig, spill: Option<&SpillRun>) -> Result<Self, SpillError> {
        let roles = provider.roles();
        let mut sinks = BTreeMap::new();
        for role in roles.iter().copied().collect::<BTreeSet<_>>() {
            let id = LayerId::new(provider.name.clone(), role);
            let sink = match spill {
                Some(run) => LayerSink::Spill {
                    writer: SpillWriter::create(&spill_dir(&run.root, &id), run.batch_size)?,
                    crs: provider.source_crs,
                    id,
                },
                None => LayerSink::Memory(ProviderLayer::new(id, provider.source_crs)),
            };
            sinks.insert(role, sink);
        }
        Ok(Self { roles, sinks })
    }

    fn push(&mut self, raw: RawGeometry) -> Result<(), SpillError> {
        let Some(role) = raw.label.rule_index().and_then(|i| self.roles.get(i)) else {
            return Ok(());
        };
        match self.sinks.get_mut(role) {
            Some(LayerSink::Memory(layer)) => layer.push(raw),
            Some(LayerSink::Spill { writer, .. }) => writer.push(raw)?,
            None => {}
        }
        Ok(())
    }

    /// Close all sinks; layers without a configured CRS take the one the tiles carried
    fn finish(self, tile_crs: Option<Crs>) -> Result<Vec<LayerSource>, SpillError> {
        self.sinks
            .into_values()
            .map(|sink| match sink {
                LayerSink::Memory(mut layer) => {
                    layer.crs = layer.crs.or(tile_crs);
                    Ok(LayerSource::Memory(layer))
                }
                LayerSink::Spill { id, crs, writer } => Ok(LayerSource::Spilled {
                    id,
                    crs: crs.or(tile_crs),
                    summary: writer.finish()?,
                }),
            })
            .collect()
    }
}

struct LayerResult {
    result: Result<(ProjectedLayer, CleaningStats), LayerFailure>,
    rejected: Vec<TopologyError>,
}

/// Clean then reproject one layer; blocking
fn process_layer(cleaner: &TopologyCleaner, source: LayerSource, target: Crs) -> LayerResult {
    let id = source.id().clone();
    let cleaned = match source {
        LayerSource::Memory(layer) => cleaner.clean(layer),
        LayerSource::Spilled { id, crs, summary } => {
            info!(
                "Cleaning layer {} from {} spilled geometries in {} parts",
                id, summary.geometries, summary.parts
            );
            let cleaned = match SpillReader::open(&summary.dir) {
                Ok(reader) => cleaner.clean_stream(id, crs, reader),
                Err(e) => Err(TopologyError::Spill {
                    layer: id,
                    message: e.to_string(),
                }),
            };
            if let Err(e) = summary.discard() {
                warn!("Failed to remove spilled layer: {}", e);
            }
            cleaned
        }
    };

    let CleanOutcome { layer, rejected } = match cleaned {
        Ok(outcome) => outcome,
        Err(e) => {
            return LayerResult {
                result: Err(LayerFailure::layer(id, LayerStage::Clean, e)),
                rejected: Vec::new(),
            };
        }
    };

    let stats = layer.stats.clone();
    let result = reproject_layer(layer, target)
        .map(|projected| (projected, stats))
        .map_err(|e| LayerFailure::layer(id, LayerStage::Reproject, e));
    LayerResult { result, rejected }
}

/// Accumulated results across providers
#[derive(Default)]
struct RunState {
    streams: IndexMap<String, StreamReport>,
    tile_failures: Vec<TileFailure>,
    rejected: Vec<RejectedGeometry>,
    cleaning: IndexMap<String, CleaningStats>,
    layers: Vec<ProjectedLayer>,
    layer_failures: Vec<LayerFailure>,
}

impl RunState {
    fn fail(&mut self, failure: LayerFailure) {
        let scope = match (&failure.layer, &failure.provider) {
            (Some(layer), _) => layer.to_string(),
            (None, Some(provider)) => provider.clone(),
            (None, None) => "all layers".to_string(),
        };
        error!("{} stage failed for {}: {}", failure.stage, scope, failure.error);
        self.layer_failures.push(failure);
    }

    fn record_stream(&mut self, provider: &str, report: StreamReport) {
        self.tile_failures.extend(report.failed_tiles.iter().cloned());
        self.streams.insert(provider.to_string(), report);
    }

    fn record_layer(&mut self, result: LayerResult) {
        self.rejected
            .extend(result.rejected.iter().filter_map(RejectedGeometry::from_error));
        match result.result {
            Ok((layer, stats)) => {
                self.cleaning.insert(layer.id.to_string(), stats);
                self.layers.push(layer);
            }
            Err(failure) => self.fail(failure),
        }
    }

    fn into_outcome(self, coverage: Option<CoverageMap>, report: Option<AreaReport>) -> PipelineOutcome {
        let status = PipelineOutcome::classify(
            report.is_some(),
            coverage.as_ref().is_some_and(|c| c.partition_exceeded),
            &self.tile_failures,
            &self.rejected,
            &self.layer_failures,
        );
        PipelineOutcome {
            status,
            streams: self.streams,
            tile_failures: self.tile_failures,
            rejected: self.rejected,
            cleaning: self.cleaning,
            layers: self.layers,
            layer_failures: self.layer_failures,
            coverage,
            report,
        }
    }
}

/// Algebra and area report over the projected layers; blocking
fn assemble(config: &PipelineConfig, mut state: RunState, analysis: AnalysisInputs) -> PipelineOutcome {
    let target = config.target_crs;

    let provider_a = merge_role(&state.layers, LayerRole::ProviderA);
    let provider_b = merge_role(&state.layers, LayerRole::ProviderB);
    let planned = merge_role(&state.layers, LayerRole::Planned);

    let boundary = match analysis.boundary.map(|b| project_boundary(b, target)).transpose() {
        Ok(boundary) => boundary,
        Err(e) => {
            state.fail(LayerFailure::shared(LayerStage::Reproject, format!("boundary: {}", e)));
            return state.into_outcome(None, None);
        }
    };

    let (Some(provider_a), Some(provider_b)) = (provider_a, provider_b) else {
        state.fail(LayerFailure::shared(
            LayerStage::Algebra,
            "both provider A and provider B layers are required",
        ));
        return state.into_outcome(None, None);
    };

    let input = AlgebraInput {
        provider_a: &provider_a,
        provider_b: &provider_b,
        planned: planned.as_ref(),
        boundary: boundary.as_ref(),
    };
    let coverage = match compute_coverage_with_tolerance(input, config.area_tolerance) {
        Ok(map) => map,
        Err(e) => {
            state.fail(LayerFailure::shared(LayerStage::Algebra, e));
            return state.into_outcome(None, None);
        }
    };

    let grouping = match analysis.grouping.map(|g| project_grouping(g, target)).transpose() {
        Ok(grouping) => grouping,
        Err(e) => {
            state.fail(LayerFailure::shared(LayerStage::Reproject, format!("grouping: {}", e)));
            return state.into_outcome(Some(coverage), None);
        }
    };

    let report = AreaReporter::new(target).and_then(|reporter| reporter.report(&coverage, grouping.as_ref()));
    let report = match report {
        Ok(mut report) => {
            report.mark_incomplete(&state.tile_failures);
            if !state.rejected.is_empty() {
                report.incomplete = true;
            }
            info!("Coverage areas in {}:\n{}", target, report.summary_table());
            Some(report)
        }
        Err(e) => {
            state.fail(LayerFailure::shared(LayerStage::Area, e));
            None
        }
    };

    let outcome = state.into_outcome(Some(coverage), report);
    if !outcome.tile_failures.is_empty() {
        warn!(
            "{} tiles were skipped; statistics are incomplete",
            outcome.tile_failures.len()
        );
    }
    info!("Pipeline finished with status {:?}", outcome.status);
    outcome
}

/// One layer per role; layers of several providers with the same role are unioned
fn merge_role(layers: &[ProjectedLayer], role: LayerRole) -> Option<ProjectedLayer> {
    let mut matching = layers.iter().filter(|l| l.id.role == role);
    let first = matching.next()?.clone();
    Some(matching.fold(first, |acc, layer| {
        let geometry: MultiPolygon<f64> = acc.geometry.union(&layer.geometry);
        let provider = format!("{}+{}", acc.id.provider, layer.id.provider);
        ProjectedLayer::new(LayerId::new(provider, role), acc.crs, geometry)
    }))
}

fn project_boundary(boundary: Boundary, target: Crs) -> Result<Boundary, ReprojectionError> {
    let geometry = Reprojector::new(boundary.crs, target)?.transform(&boundary.geometry)?;
    Ok(Boundary::new(target, geometry))
}

fn project_grouping(grouping: Grouping, target: Crs) -> Result<Grouping, ReprojectionError> {
    let reprojector = Reprojector::new(grouping.crs, target)?;
    let groups = grouping
        .groups
        .into_iter()
        .map(|group| {
            Ok(GroupPolygon {
                geometry: reprojector.transform(&group.geometry)?,
                key: group.key,
            })
        })
        .collect::<Result<Vec<_>, ReprojectionError>>()?;
    Ok(Grouping {
        crs: target,
        groups,
    })
}

fn spill_dir(root: &Path, layer: &LayerId) -> PathBuf {
    root.join(format!("{}_{}", layer.provider, layer.role.as_str()))
}

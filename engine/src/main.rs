use anyhow::Context;
use coverage_engine::area::{GroupPolygon, Grouping};
use coverage_engine::config::PipelineConfig;
use coverage_engine::coverage::Boundary;
use coverage_engine::pipeline::{AnalysisInputs, Pipeline, ProviderInput, RunStatus};
use geo::MultiPolygon;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {:?}", path))
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> anyhow::Result<()> {
    let path = dir.join(name);
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, text).with_context(|| format!("writing {:?}", path))?;
    info!("Wrote {:?}", path);
    Ok(())
}

fn load_analysis(config: &PipelineConfig) -> anyhow::Result<AnalysisInputs> {
    let boundary = match &config.inputs.boundary {
        Some(path) => {
            let geometry: MultiPolygon<f64> = read_json(path)?;
            let crs = config.inputs.boundary_crs.unwrap_or(config.target_crs);
            info!("Loaded boundary from {:?} ({})", path, crs);
            Some(Boundary::new(crs, geometry))
        }
        None => {
            warn!("No boundary configured; white spots will not be reported");
            None
        }
    };

    let grouping = match &config.inputs.groups {
        Some(path) => {
            let groups: Vec<GroupPolygon> = read_json(path)?;
            info!("Loaded {} grouping polygons from {:?}", groups.len(), path);
            Some(Grouping {
                crs: config.target_crs,
                groups,
            })
        }
        None => None,
    };

    Ok(AnalysisInputs { boundary, grouping })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coverage=info,coverage_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env().context("loading configuration")?;
    info!(
        "Loaded configuration: target_crs={}, workers={}, providers={}",
        config.target_crs,
        config.workers,
        config.providers.len()
    );

    let mut inputs = Vec::new();
    for provider in &config.providers {
        match ProviderInput::from_directory(provider) {
            Ok(input) => inputs.push(input),
            Err(e) => warn!("Skipping provider {}: {}", provider.name, e),
        }
    }

    let analysis = load_analysis(&config)?;
    let output_dir = config
        .inputs
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&output_dir).with_context(|| format!("creating {:?}", output_dir))?;

    let pipeline = Pipeline::new(config).context("validating configuration")?;
    let outcome = pipeline.run_parallel(inputs, analysis).await;

    write_json(&output_dir, "layers.json", &outcome.layers)?;
    if let Some(coverage) = &outcome.coverage {
        write_json(&output_dir, "coverage.json", coverage)?;
    }
    if let Some(report) = &outcome.report {
        write_json(&output_dir, "area_report.json", report)?;
        println!("{}", report.summary_table());
    }
    write_json(&output_dir, "outcome.json", &outcome)?;

    match outcome.status {
        RunStatus::Complete => info!("Run complete"),
        RunStatus::Partial => warn!(
            "Run partial: {} failed tiles, {} rejected geometries, {} failed layers",
            outcome.tile_failures.len(),
            outcome.rejected.len(),
            outcome.layer_failures.len()
        ),
        RunStatus::Failed => {
            for failure in &outcome.layer_failures {
                error!("{} failed: {}", failure.stage, failure.error);
            }
            anyhow::bail!("no coverage statistics produced");
        }
    }

    Ok(())
}

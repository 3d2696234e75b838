//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use coverage_engine::config::{
    ClassRule, CleaningConfig, ClosingConfig, Matcher, PipelineConfig, ProviderConfig,
};
use coverage_engine::coverage::Boundary;
use coverage_engine::crs::Crs;
use coverage_engine::raster::{Affine, ClassifiedMask, PixelFormat, Tile, TileId};
use coverage_engine::topology::{LayerId, LayerRole, ProjectedLayer};
use geo::{LineString, MultiPolygon, Polygon};

/// Analysis CRS used throughout the tests
pub const UTM33: Crs = Crs::etrs89_utm(33);

/// Top-left corner of the test tiles, well inside UTM zone 33
pub const ORIGIN_X: f64 = 500_000.0;
pub const ORIGIN_Y: f64 = 5_800_000.0;

/// Pixel edge length in metres
pub const PIXEL: f64 = 10.0;

pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
        vec![],
    )
}

pub fn layer(role: LayerRole, polygons: Vec<Polygon<f64>>) -> ProjectedLayer {
    ProjectedLayer::new(LayerId::new("test", role), UTM33, MultiPolygon::new(polygons))
}

pub fn boundary(polygons: Vec<Polygon<f64>>) -> Boundary {
    Boundary::new(UTM33, MultiPolygon::new(polygons))
}

fn digits(rows: &[&str]) -> (u32, u32, Vec<u8>) {
    let height = rows.len() as u32;
    let width = rows.first().map(|r| r.len()).unwrap_or(0) as u32;
    let values = rows
        .iter()
        .flat_map(|r| r.chars().map(|c| c.to_digit(10).unwrap_or(0) as u8))
        .collect();
    (width, height, values)
}

/// Gray8 tile from digit rows; `col` and `row` place it on the tile grid
pub fn tile(id: &str, rows: &[&str], col: u32, row: u32) -> Tile {
    let (width, height, pixels) = digits(rows);
    let transform = Affine::north_up(
        ORIGIN_X + (col * width) as f64 * PIXEL,
        ORIGIN_Y - (row * height) as f64 * PIXEL,
        PIXEL,
    );
    Tile {
        id: TileId::new(id),
        width,
        height,
        format: PixelFormat::Gray8,
        pixels,
        transform,
        crs: Some(UTM33),
    }
}

pub fn mask(rows: &[&str]) -> ClassifiedMask {
    let (width, height, labels) = digits(rows);
    ClassifiedMask::new(TileId::new("mask"), width, height, labels)
}

/// Rectangle spanning whole pixels of tile (0, 0)
pub fn pixel_rect(col0: u32, row0: u32, col1: u32, row1: u32) -> Polygon<f64> {
    rect(
        ORIGIN_X + col0 as f64 * PIXEL,
        ORIGIN_Y - row1 as f64 * PIXEL,
        ORIGIN_X + col1 as f64 * PIXEL,
        ORIGIN_Y - row0 as f64 * PIXEL,
    )
}

/// Gray8 provider whose non-zero pixels feed `role`
pub fn provider(name: &str, role: LayerRole, radius_px: u32, epsilon: f64) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        tile_dir: None,
        source_crs: Some(UTM33),
        pixel_format: PixelFormat::Gray8,
        closing: ClosingConfig {
            radius_px,
            min_feature_gap_px: None,
        },
        cleaning: CleaningConfig {
            epsilon,
            min_sliver_area: 1.0,
            max_area_loss_ratio: 0.01,
            min_feature_gap: None,
        },
        rules: vec![ClassRule {
            name: format!("{} coverage", name),
            role,
            matcher: Matcher::Value { min: 1, max: 255 },
        }],
    }
}

pub fn config(providers: Vec<ProviderConfig>) -> PipelineConfig {
    PipelineConfig {
        target_crs: UTM33,
        window_tiles: 4,
        workers: 2,
        channel_capacity: 2,
        dissolve_batch: 8,
        providers,
        ..PipelineConfig::default()
    }
}

/// Number of 4-connected regions of non-background pixels
pub fn regions(mask: &ClassifiedMask) -> usize {
    let (w, h) = (mask.width as usize, mask.height as usize);
    let mut seen = vec![false; w * h];
    let mut count = 0;
    for start in 0..w * h {
        if seen[start] || mask.labels[start] == 0 {
            continue;
        }
        count += 1;
        seen[start] = true;
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            let (x, y) = (i % w, i / w);
            let mut neighbours = Vec::with_capacity(4);
            if x > 0 {
                neighbours.push(i - 1);
            }
            if x + 1 < w {
                neighbours.push(i + 1);
            }
            if y > 0 {
                neighbours.push(i - w);
            }
            if y + 1 < h {
                neighbours.push(i + w);
            }
            for n in neighbours {
                if !seen[n] && mask.labels[n] != 0 {
                    seen[n] = true;
                    stack.push(n);
                }
            }
        }
    }
    count
}

pub fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

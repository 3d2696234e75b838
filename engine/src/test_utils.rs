//! Test Utilities Module
//!
//! Fixtures for building masks, tiles and layers from compact literals.
//! This module is only compiled when running tests.

#![cfg(test)]

use geo::{LineString, MultiPolygon, Polygon};

use crate::crs::Crs;
use crate::raster::{Affine, ClassifiedMask, Label, PixelFormat, Tile, TileId};
use crate::topology::{LayerId, LayerRole, ProjectedLayer};
use crate::vector::RawGeometry;

/// Digit value of each character; anything else is background
fn digits(row: &str) -> impl Iterator<Item = u8> + '_ {
    row.chars().map(|c| c.to_digit(10).unwrap_or(0) as u8)
}

/// Mask from rows of digits, one label per character
pub fn mask_from_rows(rows: &[&str]) -> ClassifiedMask {
    let height = rows.len() as u32;
    let width = rows.first().map(|r| r.chars().count()).unwrap_or(0) as u32;
    let labels: Vec<u8> = rows.iter().flat_map(|r| digits(r)).collect();
    ClassifiedMask::new(TileId::new("mask"), width, height, labels)
}

/// Gray tile whose pixel values equal the mask labels
pub fn tile_for_mask(mask: &ClassifiedMask, transform: Affine) -> Tile {
    Tile {
        id: mask.tile_id.clone(),
        width: mask.width,
        height: mask.height,
        format: PixelFormat::Gray8,
        pixels: mask.labels.clone(),
        transform,
        crs: Some(Crs::etrs89_utm(33)),
    }
}

/// Gray tile from rows of digits used as pixel values
pub fn gray_tile(id: &str, rows: &[&str], transform: Affine) -> Tile {
    let mask = mask_from_rows(rows);
    Tile {
        id: TileId::new(id),
        ..tile_for_mask(&mask, transform)
    }
}

pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
        vec![],
    )
}

pub fn raw(tile_id: &str, polygon: Polygon<f64>) -> RawGeometry {
    RawGeometry {
        label: Label(1),
        tile_id: TileId::new(tile_id),
        polygon,
        touches_border: false,
        merged_from: Vec::new(),
    }
}

/// Projected layer of provider "test" in UTM zone 33
pub fn projected(role: LayerRole, polygons: Vec<Polygon<f64>>) -> ProjectedLayer {
    ProjectedLayer::new(
        LayerId::new("test", role),
        Crs::etrs89_utm(33),
        MultiPolygon::new(polygons),
    )
}

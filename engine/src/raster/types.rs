//! Raster tile types and error definitions

use geo::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crs::Crs;

/// Errors that can occur while classifying a tile
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Tile {tile}: pixel format {actual:?} does not match configured {expected:?}")]
    FormatMismatch {
        tile: TileId,
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Tile {tile}: pixel buffer has {actual} bytes, expected {expected}")]
    BufferSize {
        tile: TileId,
        expected: usize,
        actual: usize,
    },

    #[error("Rule '{rule}' cannot be evaluated on {format:?} pixels")]
    IncompatibleRule { rule: String, format: PixelFormat },

    #[error("Too many classification rules: {count} (max {max})")]
    TooManyRules { count: usize, max: usize },
}

/// Errors raised by a tile source while reading tiles
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Tile directory {path:?} unreadable: {source}")]
    Directory {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error reading tile {tile}: {source}")]
    Io {
        tile: TileId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode tile {tile}: {message}")]
    Decode { tile: TileId, message: String },

    #[error("Invalid world file for tile {tile}: {message}")]
    WorldFile { tile: TileId, message: String },

    #[error("Tile {tile} is in {found}, provider expects {expected}")]
    CrsMismatch { tile: TileId, expected: Crs, found: Crs },
}

impl SourceError {
    /// Tile the error refers to, if any
    pub fn tile(&self) -> Option<&TileId> {
        match self {
            SourceError::Directory { .. } => None,
            SourceError::Io { tile, .. }
            | SourceError::Decode { tile, .. }
            | SourceError::WorldFile { tile, .. }
            | SourceError::CrsMismatch { tile, .. } => Some(tile),
        }
    }
}

/// Identifier of a raster tile, unique within a provider's tile set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pixel layout of a decoded tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    /// Number of bands (bytes) per pixel
    pub fn bands(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Affine pixel→CRS transform using the GDAL/rasterio coefficient order:
/// `x = c + a·col + b·row`, `y = f + d·col + e·row`, where (col, row) are
/// pixel corner coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with square pixels and origin at the top-left corner
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self::new(pixel_size, 0.0, origin_x, 0.0, -pixel_size, origin_y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Zero, non-finite or non-invertible transforms cannot map pixels to space
    pub fn is_degenerate(&self) -> bool {
        let coefficients = [self.a, self.b, self.c, self.d, self.e, self.f];
        coefficients.iter().any(|v| !v.is_finite()) || self.determinant() == 0.0
    }

    /// Map a pixel-corner position to CRS coordinates
    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        Coord {
            x: self.c + self.a * col + self.b * row,
            y: self.f + self.d * col + self.e * row,
        }
    }

    /// Area of one pixel in squared CRS units
    pub fn pixel_area(&self) -> f64 {
        self.determinant().abs()
    }
}

/// A rectangular raster chunk with its transform and native CRS
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major interleaved pixel bytes
    pub pixels: Vec<u8>,
    pub transform: Affine,
    pub crs: Option<Crs>,
}

impl Tile {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Expected byte length of the pixel buffer
    pub fn expected_len(&self) -> usize {
        self.pixel_count() * self.format.bands()
    }
}

/// Classification label of a pixel. Label 0 is the reserved background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u8);

impl Label {
    pub const BACKGROUND: Label = Label(0);

    /// Label assigned to the rule at `index` in configuration order
    pub fn for_rule(index: usize) -> Label {
        Label((index + 1) as u8)
    }

    /// Index of the rule that produced this label
    pub fn rule_index(&self) -> Option<usize> {
        (self.0 > 0).then(|| self.0 as usize - 1)
    }

    pub fn is_background(&self) -> bool {
        self.0 == 0
    }
}

/// Tile-shaped array of labels, one per pixel
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedMask {
    pub tile_id: TileId,
    pub width: u32,
    pub height: u32,
    /// Row-major label values
    pub labels: Vec<u8>,
}

impl ClassifiedMask {
    pub fn new(tile_id: TileId, width: u32, height: u32, labels: Vec<u8>) -> Self {
        debug_assert_eq!(labels.len(), width as usize * height as usize);
        Self {
            tile_id,
            width,
            height,
            labels,
        }
    }

    /// Mask filled with background
    pub fn empty(tile_id: TileId, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self::new(tile_id, width, height, vec![0; len])
    }

    pub fn get(&self, col: i64, row: i64) -> Label {
        if col < 0 || row < 0 || col >= self.width as i64 || row >= self.height as i64 {
            return Label::BACKGROUND;
        }
        Label(self.labels[row as usize * self.width as usize + col as usize])
    }

    pub fn set(&mut self, col: u32, row: u32, label: Label) {
        let idx = row as usize * self.width as usize + col as usize;
        self.labels[idx] = label.0;
    }

    /// Distinct non-background labels present, ascending
    pub fn present_labels(&self) -> Vec<Label> {
        let mut seen = [false; 256];
        for &l in &self.labels {
            seen[l as usize] = true;
        }
        (1..256)
            .filter(|&l| seen[l])
            .map(|l| Label(l as u8))
            .collect()
    }

    /// Number of pixels carrying `label`
    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|&&l| l == label.0).count()
    }
}

//! Raster side of the pipeline
//!
//! Provides:
//! - Tile and mask types with their affine pixel transform
//! - Color/value classification of pixels into labels
//! - Morphological gap closing of classified masks
//! - A directory tile source for georeferenced PNG tiles

mod classify;
mod morphology;
mod source;
mod types;

pub use classify::RasterClassifier;
pub use morphology::{GapCloser, close_polygons};
pub use source::{DirectoryTileSource, TileJob, format_world_file, parse_world_file};
pub use types::*;

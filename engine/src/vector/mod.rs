//! Raster-to-vector conversion
//!
//! Provides:
//! - Boundary tracing of labelled pixel regions into polygons
//! - A lazy streaming vectorizer with a bounded seam-merge window
//! - Batched on-disk spill of raw geometry
//! - Parallel scatter-gather over tile workers

mod scatter;
mod spill;
mod stream;
mod trace;
mod types;

pub use scatter::{ScatterOptions, TileWorker, scatter_gather};
pub use spill::{SpillReader, SpillSummary, SpillWriter, remove_spill_dir};
pub use stream::{SeamMerger, StreamingVectorizer};
pub use trace::{PixelPolygon, trace_label, trace_tile};
pub use types::*;

//! Coordinate reference systems and reprojection
//!
//! Provides:
//! - EPSG-coded CRS identifiers, classified from their proj4 definitions
//! - proj4rs projection handles
//! - The layer reprojector used between cleaning and algebra

mod projection;
mod reproject;
mod types;

pub use projection::Projection;
pub use reproject::{Reprojector, reproject_layer};
pub use types::*;

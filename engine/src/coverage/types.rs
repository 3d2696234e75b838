//! Coverage status types and algebra errors

use geo::{Area, MultiPolygon};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crs::Crs;

/// Errors raised by the spatial algebra
#[derive(Debug, Error)]
pub enum AlgebraError {
    #[error("Input {input} is in {found}, expected {expected}")]
    CrsMismatch {
        input: String,
        expected: Crs,
        found: Crs,
    },

    #[error("Boundary has zero area")]
    DegenerateBoundary,
}

/// Mutually exclusive classification of a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    ExclusiveProviderA,
    ExclusiveProviderB,
    Competition,
    WhiteSpot,
    Planned,
}

impl CoverageStatus {
    pub const ALL: [CoverageStatus; 5] = [
        CoverageStatus::ExclusiveProviderA,
        CoverageStatus::ExclusiveProviderB,
        CoverageStatus::Competition,
        CoverageStatus::WhiteSpot,
        CoverageStatus::Planned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::ExclusiveProviderA => "exclusive_provider_a",
            CoverageStatus::ExclusiveProviderB => "exclusive_provider_b",
            CoverageStatus::Competition => "competition",
            CoverageStatus::WhiteSpot => "white_spot",
            CoverageStatus::Planned => "planned",
        }
    }
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Study-area clip polygon in a known CRS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boundary {
    pub crs: Crs,
    pub geometry: MultiPolygon<f64>,
}

impl Boundary {
    pub fn new(crs: Crs, geometry: MultiPolygon<f64>) -> Self {
        Self { crs, geometry }
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Status polygons produced by one algebra run, all in `crs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageMap {
    pub crs: Crs,
    pub boundary_area: Option<f64>,
    pub statuses: IndexMap<CoverageStatus, MultiPolygon<f64>>,
    /// Status areas missed the boundary area by more than the run's tolerance
    #[serde(default)]
    pub partition_exceeded: bool,
}

impl CoverageMap {
    pub fn get(&self, status: CoverageStatus) -> Option<&MultiPolygon<f64>> {
        self.statuses.get(&status)
    }

    /// Area of one status in squared CRS units (0 if the status is absent)
    pub fn area(&self, status: CoverageStatus) -> f64 {
        self.get(status).map(|g| g.unsigned_area()).unwrap_or(0.0)
    }

    pub fn total_area(&self) -> f64 {
        self.statuses.values().map(|g| g.unsigned_area()).sum()
    }

    /// `|Σ status areas − boundary area| / boundary area`, when a boundary was given
    pub fn partition_residual(&self) -> Option<f64> {
        let boundary = self.boundary_area?;
        Some((self.total_area() - boundary).abs() / boundary)
    }
}

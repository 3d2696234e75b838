//! Area report types and error definitions

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::coverage::CoverageStatus;
use crate::crs::Crs;
use crate::vector::TileFailure;

/// Square metres per square kilometre
pub const M2_PER_KM2: f64 = 1_000_000.0;

/// Errors raised while computing areas
#[derive(Debug, Error)]
pub enum AreaError {
    #[error("CRS {0} is not suitable for area computation (needs a projected, metric, non-Mercator CRS)")]
    NotAreaSuitable(Crs),

    #[error("{input} is in {found}, reporter works in {expected}")]
    CrsMismatch {
        input: String,
        expected: Crs,
        found: Crs,
    },
}

/// Aggregation key of an area record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    /// The whole study area
    StudyArea,
    /// An external grouping polygon, e.g. a district
    Group(String),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::StudyArea => f.pad("study area"),
            GroupKey::Group(key) => f.pad(key),
        }
    }
}

/// One grouping polygon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPolygon {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
}

/// Grouping layer (e.g. administrative districts) in a known CRS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grouping {
    pub crs: Crs,
    pub groups: Vec<GroupPolygon>,
}

/// Area of one status within one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    pub status: CoverageStatus,
    pub group: GroupKey,
    pub area_km2: f64,
}

/// Tabular area summary handed to downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaReport {
    pub crs: Crs,
    pub records: Vec<AreaRecord>,
    /// Set when tiles were skipped; totals then understate coverage
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tiles: Vec<TileFailure>,
}

impl AreaReport {
    /// Study-area total of `status`, if reported
    pub fn study_area_km2(&self, status: CoverageStatus) -> Option<f64> {
        self.records
            .iter()
            .find(|r| r.status == status && r.group == GroupKey::StudyArea)
            .map(|r| r.area_km2)
    }

    pub fn group_km2(&self, status: CoverageStatus, key: &str) -> Option<f64> {
        self.records
            .iter()
            .find(|r| r.status == status && matches!(&r.group, GroupKey::Group(k) if k == key))
            .map(|r| r.area_km2)
    }

    /// Annotate the report with tiles skipped upstream
    pub fn mark_incomplete(&mut self, failures: &[TileFailure]) {
        if failures.is_empty() {
            return;
        }
        self.incomplete = true;
        self.failed_tiles.extend(failures.iter().cloned());
    }

    /// Plain-text table of the study-area totals
    pub fn summary_table(&self) -> String {
        let mut out = format!("{:<22} {:>14}\n", "status", "area [km²]");
        for record in self.records.iter().filter(|r| r.group == GroupKey::StudyArea) {
            out.push_str(&format!("{:<22} {:>14.4}\n", record.status, record.area_km2));
        }
        if self.incomplete {
            out.push_str(&format!(
                "(incomplete: {} tiles skipped)\n",
                self.failed_tiles.len()
            ));
        }
        out
    }
}

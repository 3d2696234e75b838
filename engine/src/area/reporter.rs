//! Per-status and per-group area summation

use geo::{Area, BooleanOps, BoundingRect};
use metrics::gauge;
use tracing::{debug, info};

use super::index::GroupIndex;
use super::types::{AreaError, AreaRecord, AreaReport, GroupKey, Grouping, M2_PER_KM2};
use crate::coverage::CoverageMap;
use crate::crs::Crs;

/// Sums planar polygon areas in an area-suitable CRS and converts them to km²
#[derive(Debug, Clone, Copy)]
pub struct AreaReporter {
    crs: Crs,
}

impl AreaReporter {
    /// Fails for geographic (angular) or Web Mercator systems
    pub fn new(crs: Crs) -> Result<Self, AreaError> {
        if !crs.is_area_suitable() {
            return Err(AreaError::NotAreaSuitable(crs));
        }
        Ok(Self { crs })
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Study-area totals for every status, plus status × group when `grouping` is given
    pub fn report(&self, coverage: &CoverageMap, grouping: Option<&Grouping>) -> Result<AreaReport, AreaError> {
        if coverage.crs != self.crs {
            return Err(AreaError::CrsMismatch {
                input: "coverage map".to_string(),
                expected: self.crs,
                found: coverage.crs,
            });
        }
        if let Some(grouping) = grouping
            && grouping.crs != self.crs
        {
            return Err(AreaError::CrsMismatch {
                input: "grouping layer".to_string(),
                expected: self.crs,
                found: grouping.crs,
            });
        }

        let mut records = Vec::new();
        for (status, geometry) in &coverage.statuses {
            let area_km2 = geometry.unsigned_area() / M2_PER_KM2;
            gauge!("coverage_status_area_km2", "status" => status.as_str()).set(area_km2);
            records.push(AreaRecord {
                status: *status,
                group: GroupKey::StudyArea,
                area_km2,
            });
        }

        if let Some(grouping) = grouping {
            let index = GroupIndex::new(&grouping.groups);
            for (status, geometry) in &coverage.statuses {
                let mut sums = vec![0.0; grouping.groups.len()];
                for polygon in geometry {
                    let Some(bounds) = polygon.bounding_rect() else {
                        continue;
                    };
                    for i in index.candidates(&bounds) {
                        let overlap = polygon.intersection(&index.group(i).geometry);
                        sums[i] += overlap.unsigned_area();
                    }
                }
                for (group, sum) in grouping.groups.iter().zip(sums) {
                    records.push(AreaRecord {
                        status: *status,
                        group: GroupKey::Group(group.key.clone()),
                        area_km2: sum / M2_PER_KM2,
                    });
                }
            }
            debug!(
                "Aggregated {} statuses over {} groups",
                coverage.statuses.len(),
                grouping.groups.len()
            );
        }

        info!("Area report: {} records in {}", records.len(), self.crs);

        Ok(AreaReport {
            crs: self.crs,
            records,
            incomplete: false,
            failed_tiles: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::GroupPolygon;
    use crate::coverage::CoverageStatus;
    use crate::test_utils::rect;
    use crate::vector::{TileFailure, TileStage};
    use crate::raster::TileId;
    use geo::MultiPolygon;
    use indexmap::IndexMap;

    const UTM: Crs = Crs::etrs89_utm(33);

    fn coverage() -> CoverageMap {
        let mut statuses = IndexMap::new();
        // 2 km × 1 km exclusive A, 1 km × 1 km competition
        statuses.insert(
            CoverageStatus::ExclusiveProviderA,
            MultiPolygon::new(vec![rect(0.0, 0.0, 2000.0, 1000.0)]),
        );
        statuses.insert(
            CoverageStatus::Competition,
            MultiPolygon::new(vec![rect(2000.0, 0.0, 3000.0, 1000.0)]),
        );
        CoverageMap {
            crs: UTM,
            boundary_area: None,
            statuses,
            partition_exceeded: false,
        }
    }

    #[test]
    fn test_rejects_unsuitable_crs() {
        assert!(matches!(
            AreaReporter::new(Crs::WGS84),
            Err(AreaError::NotAreaSuitable(_))
        ));
        assert!(AreaReporter::new(Crs::WEB_MERCATOR).is_err());
        assert!(AreaReporter::new(UTM).is_ok());
    }

    #[test]
    fn test_study_area_totals_in_km2() {
        let report = AreaReporter::new(UTM).unwrap().report(&coverage(), None).unwrap();
        assert_eq!(report.records.len(), 2);
        assert!((report.study_area_km2(CoverageStatus::ExclusiveProviderA).unwrap() - 2.0).abs() < 1e-9);
        assert!((report.study_area_km2(CoverageStatus::Competition).unwrap() - 1.0).abs() < 1e-9);
        assert!(!report.incomplete);
    }

    #[test]
    fn test_group_split() {
        let grouping = Grouping {
            crs: UTM,
            groups: vec![
                GroupPolygon {
                    key: "west".into(),
                    geometry: MultiPolygon::new(vec![rect(0.0, 0.0, 1500.0, 1000.0)]),
                },
                GroupPolygon {
                    key: "east".into(),
                    geometry: MultiPolygon::new(vec![rect(1500.0, 0.0, 5000.0, 1000.0)]),
                },
            ],
        };
        let report = AreaReporter::new(UTM)
            .unwrap()
            .report(&coverage(), Some(&grouping))
            .unwrap();

        assert_eq!(report.records.len(), 2 + 2 * 2);
        assert!((report.group_km2(CoverageStatus::ExclusiveProviderA, "west").unwrap() - 1.5).abs() < 1e-9);
        assert!((report.group_km2(CoverageStatus::ExclusiveProviderA, "east").unwrap() - 0.5).abs() < 1e-9);
        assert!(report.group_km2(CoverageStatus::Competition, "west").unwrap().abs() < 1e-9);
        assert!((report.group_km2(CoverageStatus::Competition, "east").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_crs_mismatch() {
        let mut map = coverage();
        map.crs = Crs::etrs89_utm(32);
        assert!(matches!(
            AreaReporter::new(UTM).unwrap().report(&map, None),
            Err(AreaError::CrsMismatch { .. })
        ));
    }

    #[test]
    fn test_incomplete_annotation() {
        let mut report = AreaReporter::new(UTM).unwrap().report(&coverage(), None).unwrap();
        report.mark_incomplete(&[TileFailure {
            tile_id: TileId::new("t9"),
            stage: TileStage::Classify,
            message: "bad pixels".into(),
        }]);
        assert!(report.incomplete);
        assert!(report.summary_table().contains("incomplete: 1 tiles skipped"));
        assert!(report.summary_table().contains("exclusive_provider_a"));
    }
}

//! Coverage-status partition by polygon set operations
//!
//! With provider layers A and B, optional planned layer P and optional
//! boundary G (every input clipped to G first):
//!
//! - Competition = A ∩ B
//! - ExclusiveProviderA = A − B
//! - ExclusiveProviderB = B − A
//! - Planned = P − (A ∪ B)
//! - WhiteSpot = G − (A ∪ B) − Planned
//!
//! The five sets are pairwise disjoint and, with a boundary, cover it.

use geo::{Area, BooleanOps, MultiPolygon};
use indexmap::IndexMap;
use tracing::{info, warn};

use super::types::{AlgebraError, Boundary, CoverageMap, CoverageStatus};
use crate::crs::Crs;
use crate::topology::ProjectedLayer;

/// Inputs of one algebra run
#[derive(Debug, Clone, Copy)]
pub struct AlgebraInput<'a> {
    pub provider_a: &'a ProjectedLayer,
    pub provider_b: &'a ProjectedLayer,
    pub planned: Option<&'a ProjectedLayer>,
    pub boundary: Option<&'a Boundary>,
}

/// Relative tolerance used when checking that statuses cover the boundary
pub const DEFAULT_PARTITION_TOLERANCE: f64 = 1e-6;

/// Classify the plane into coverage statuses
pub fn compute_coverage(input: AlgebraInput<'_>) -> Result<CoverageMap, AlgebraError> {
    compute_coverage_with_tolerance(input, DEFAULT_PARTITION_TOLERANCE)
}

pub fn compute_coverage_with_tolerance(
    input: AlgebraInput<'_>,
    tolerance: f64,
) -> Result<CoverageMap, AlgebraError> {
    let crs = input.provider_a.crs;
    check_crs(crs, &input.provider_b.id.to_string(), input.provider_b.crs)?;
    if let Some(planned) = input.planned {
        check_crs(crs, &planned.id.to_string(), planned.crs)?;
    }

    let boundary = match input.boundary {
        Some(boundary) => {
            check_crs(crs, "boundary", boundary.crs)?;
            let area = boundary.area();
            if !(area.is_finite() && area > 0.0) {
                return Err(AlgebraError::DegenerateBoundary);
            }
            Some(&boundary.geometry)
        }
        None => None,
    };

    let clip = |geometry: &MultiPolygon<f64>| match boundary {
        Some(b) => geometry.intersection(b),
        None => geometry.clone(),
    };

    let a = clip(&input.provider_a.geometry);
    let b = clip(&input.provider_b.geometry);

    let mut statuses = IndexMap::new();
    statuses.insert(CoverageStatus::ExclusiveProviderA, a.difference(&b));
    statuses.insert(CoverageStatus::ExclusiveProviderB, b.difference(&a));
    statuses.insert(CoverageStatus::Competition, a.intersection(&b));

    let covered = a.union(&b);
    let planned = input
        .planned
        .map(|p| clip(&p.geometry).difference(&covered));

    if let Some(boundary) = boundary {
        let mut white_spot = boundary.difference(&covered);
        if let Some(planned) = &planned {
            white_spot = white_spot.difference(planned);
        }
        statuses.insert(CoverageStatus::WhiteSpot, white_spot);
    }
    if let Some(planned) = planned {
        statuses.insert(CoverageStatus::Planned, planned);
    }

    let mut map = CoverageMap {
        crs,
        boundary_area: boundary.map(|b| b.unsigned_area()),
        statuses,
        partition_exceeded: false,
    };

    for (status, geometry) in &map.statuses {
        info!(
            "Status {}: {} polygons, area {:.3}",
            status,
            geometry.0.len(),
            geometry.unsigned_area()
        );
    }
    if let Some(residual) = map.partition_residual()
        && residual > tolerance
    {
        warn!(
            "Status areas deviate from boundary area by {:.3e} (tolerance {:.1e})",
            residual, tolerance
        );
        map.partition_exceeded = true;
    }

    Ok(map)
}

fn check_crs(expected: Crs, input: &str, found: Crs) -> Result<(), AlgebraError> {
    if expected != found {
        return Err(AlgebraError::CrsMismatch {
            input: input.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{projected, rect};
    use crate::topology::LayerRole;

    const UTM: Crs = Crs::etrs89_utm(33);

    fn boundary(x0: f64, y0: f64, x1: f64, y1: f64) -> Boundary {
        Boundary::new(UTM, MultiPolygon::new(vec![rect(x0, y0, x1, y1)]))
    }

    #[test]
    fn test_disjoint_providers() {
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        let b = projected(LayerRole::ProviderB, vec![rect(2.0, 0.0, 3.0, 1.0)]);
        let g = boundary(0.0, 0.0, 3.0, 1.0);
        let map = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: Some(&g),
        })
        .unwrap();

        assert!(map.area(CoverageStatus::Competition).abs() < 1e-9);
        assert!((map.area(CoverageStatus::ExclusiveProviderA) - 1.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::ExclusiveProviderB) - 1.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::WhiteSpot) - 1.0).abs() < 1e-9);
        assert!(map.partition_residual().unwrap() < 1e-6);
        assert!(map.get(CoverageStatus::Planned).is_none());
    }

    #[test]
    fn test_identical_providers() {
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        let b = projected(LayerRole::ProviderB, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        let map = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: None,
        })
        .unwrap();

        assert!((map.area(CoverageStatus::Competition) - 1.0).abs() < 1e-9);
        assert!(map.area(CoverageStatus::ExclusiveProviderA).abs() < 1e-9);
        assert!(map.area(CoverageStatus::ExclusiveProviderB).abs() < 1e-9);
        assert!(map.get(CoverageStatus::WhiteSpot).is_none());
        assert!(map.partition_residual().is_none());
    }

    #[test]
    fn test_planned_excludes_covered_and_white_spot_excludes_planned() {
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 4.0, 4.0)]);
        let b = projected(LayerRole::ProviderB, vec![rect(2.0, 0.0, 6.0, 4.0)]);
        let p = projected(LayerRole::Planned, vec![rect(5.0, 0.0, 8.0, 4.0)]);
        let g = boundary(0.0, 0.0, 10.0, 4.0);
        let map = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: Some(&p),
            boundary: Some(&g),
        })
        .unwrap();

        assert!((map.area(CoverageStatus::Competition) - 8.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::ExclusiveProviderA) - 8.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::ExclusiveProviderB) - 8.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::Planned) - 8.0).abs() < 1e-9);
        assert!((map.area(CoverageStatus::WhiteSpot) - 8.0).abs() < 1e-9);
        assert!(map.partition_residual().unwrap() < 1e-9);
    }

    #[test]
    fn test_inputs_clipped_to_boundary() {
        let a = projected(LayerRole::ProviderA, vec![rect(-5.0, -5.0, 5.0, 5.0)]);
        let b = projected(LayerRole::ProviderB, vec![]);
        let g = boundary(0.0, 0.0, 2.0, 2.0);
        let map = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: Some(&g),
        })
        .unwrap();

        assert!((map.area(CoverageStatus::ExclusiveProviderA) - 4.0).abs() < 1e-9);
        assert!(map.area(CoverageStatus::WhiteSpot).abs() < 1e-9);
    }

    #[test]
    fn test_overlapping_boundary_parts_exceed_partition() {
        // Parts of the boundary overlap, so its summed area counts the overlap twice
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 4.0, 10.0)]);
        let b = projected(LayerRole::ProviderB, vec![rect(11.0, 0.0, 15.0, 10.0)]);
        let boundary = Boundary::new(
            UTM,
            MultiPolygon::new(vec![rect(0.0, 0.0, 10.0, 10.0), rect(5.0, 0.0, 15.0, 10.0)]),
        );
        let map = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: Some(&boundary),
        })
        .unwrap();

        assert!(map.partition_exceeded);
        let residual = map.partition_residual().unwrap();
        assert!(residual > 0.2, "residual {}", residual);
    }

    #[test]
    fn test_crs_mismatch() {
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        let mut b = projected(LayerRole::ProviderB, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        b.crs = Crs::WEB_MERCATOR;
        let err = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: None,
        })
        .unwrap_err();
        match err {
            AlgebraError::CrsMismatch { found, .. } => assert_eq!(found, Crs::WEB_MERCATOR),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_zero_area_boundary() {
        let a = projected(LayerRole::ProviderA, vec![rect(0.0, 0.0, 1.0, 1.0)]);
        let b = projected(LayerRole::ProviderB, vec![]);
        let g = Boundary::new(UTM, MultiPolygon::new(vec![]));
        let err = compute_coverage(AlgebraInput {
            provider_a: &a,
            provider_b: &b,
            planned: None,
            boundary: Some(&g),
        })
        .unwrap_err();
        assert!(matches!(err, AlgebraError::DegenerateBoundary));
    }
}

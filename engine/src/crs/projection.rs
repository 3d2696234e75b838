//! proj4 projection handles for EPSG systems
//!
//! Definitions come from the bundled EPSG catalogue and are evaluated by
//! proj4rs. Geographic coordinates are exchanged in degrees and converted
//! to the radians proj4rs works in at this boundary.

use geo::Coord;
use proj4rs::Proj;
use std::fmt;
use std::sync::Arc;

use super::types::{Crs, ReprojectionError, proj4_definition};

/// One CRS with its proj4 parameters parsed once
#[derive(Clone)]
pub struct Projection {
    crs: Crs,
    proj: Arc<Proj>,
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection").field("crs", &self.crs).finish()
    }
}

impl Projection {
    pub fn new(crs: Crs) -> Result<Self, ReprojectionError> {
        let code = u16::try_from(crs.epsg())
            .map_err(|_| ReprojectionError::UnsupportedCrs(crs.to_string()))?;
        let definition = proj4_definition(code)?;
        let proj = Proj::from_proj_string(definition)
            .map_err(|e| ReprojectionError::UnsupportedCrs(format!("{}: {}", crs, e)))?;
        Ok(Self {
            crs,
            proj: Arc::new(proj),
        })
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Transform a single coordinate from this system into `target`
    pub fn transform_to(&self, target: &Projection, c: Coord<f64>) -> Result<Coord<f64>, ReprojectionError> {
        let out_of_domain = || ReprojectionError::OutOfDomain {
            crs: self.crs,
            x: c.x,
            y: c.y,
        };
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(out_of_domain());
        }

        let mut point = if self.crs.is_geographic() {
            if c.x.abs() > 180.0 || c.y.abs() > 90.0 {
                return Err(out_of_domain());
            }
            (c.x.to_radians(), c.y.to_radians(), 0.0)
        } else {
            (c.x, c.y, 0.0)
        };

        proj4rs::transform::transform(&self.proj, &target.proj, &mut point).map_err(|_| out_of_domain())?;

        let (x, y) = if target.crs.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(out_of_domain());
        }
        Ok(Coord { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Coord<f64>, b: Coord<f64>, tol: f64) -> bool {
        (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol
    }

    #[test]
    fn test_utm_central_meridian() {
        // On the central meridian easting is the false easting
        let wgs = Projection::new(Crs::WGS84).unwrap();
        let utm = Projection::new(Crs::etrs89_utm(33)).unwrap();
        let c = wgs.transform_to(&utm, Coord { x: 15.0, y: 0.0 }).unwrap();
        assert!(close(c, Coord { x: 500_000.0, y: 0.0 }, 1e-3), "{:?}", c);
    }

    #[test]
    fn test_web_mercator_known_point() {
        let wgs = Projection::new(Crs::WGS84).unwrap();
        let merc = Projection::new(Crs::WEB_MERCATOR).unwrap();
        let c = wgs.transform_to(&merc, Coord { x: 90.0, y: 0.0 }).unwrap();
        assert!(close(c, Coord { x: 10_018_754.171_394_622, y: 0.0 }, 1e-3), "{:?}", c);
    }

    #[test]
    fn test_lambert93_round_trip() {
        let wgs = Projection::new(Crs::WGS84).unwrap();
        let lambert = Projection::new(Crs::from_epsg(2154).unwrap()).unwrap();
        let paris = Coord { x: 2.35, y: 48.85 };
        let there = wgs.transform_to(&lambert, paris).unwrap();
        assert!(close(there, Coord { x: 652_000.0, y: 6_862_000.0 }, 2_000.0), "{:?}", there);
        let back = lambert.transform_to(&wgs, there).unwrap();
        assert!(close(back, paris, 1e-7), "{:?}", back);
    }

    #[test]
    fn test_invalid_latitude_is_out_of_domain() {
        let wgs = Projection::new(Crs::WGS84).unwrap();
        let utm = Projection::new(Crs::etrs89_utm(33)).unwrap();
        let err = wgs.transform_to(&utm, Coord { x: 15.0, y: 95.0 }).unwrap_err();
        assert!(matches!(err, ReprojectionError::OutOfDomain { .. }));
        let err = wgs.transform_to(&utm, Coord { x: f64::NAN, y: 0.0 }).unwrap_err();
        assert!(matches!(err, ReprojectionError::OutOfDomain { .. }));
    }
}

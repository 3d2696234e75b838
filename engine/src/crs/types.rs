//! Coordinate reference system identifiers and reprojection errors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use crate::topology::LayerId;

/// Errors that can occur while transforming coordinates between reference systems
#[derive(Debug, Error)]
pub enum ReprojectionError {
    #[error("Layer {layer} has no source CRS")]
    SourceCrsUnset { layer: LayerId },

    #[error("Unsupported CRS identifier: {0}")]
    UnsupportedCrs(String),

    #[error("Coordinate ({x}, {y}) lies outside the valid domain of {crs}")]
    OutOfDomain { crs: Crs, x: f64, y: f64 },

    #[error("Transform of layer {layer} failed: {source}")]
    Layer {
        layer: LayerId,
        #[source]
        source: Box<ReprojectionError>,
    },
}

/// How coordinates of a CRS relate to ground distances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    /// Longitude/latitude in degrees
    Geographic,
    /// Mercator family: metric units, scale grows with latitude
    Mercator,
    /// Projected in metres with bounded scale error
    Metric,
    /// Projected in some other linear unit
    OtherUnits,
}

impl CrsKind {
    /// Classify a proj4 definition string
    fn from_proj4(definition: &str) -> Self {
        let mut proj = None;
        let mut units = None;
        let mut to_meter = None;
        for token in definition.split_whitespace() {
            if let Some(v) = token.strip_prefix("+proj=") {
                proj = Some(v);
            } else if let Some(v) = token.strip_prefix("+units=") {
                units = Some(v);
            } else if let Some(v) = token.strip_prefix("+to_meter=") {
                to_meter = v.parse::<f64>().ok();
            }
        }
        match proj {
            Some("longlat" | "latlong" | "lonlat" | "latlon") => CrsKind::Geographic,
            Some("merc") => CrsKind::Mercator,
            _ => match (units, to_meter) {
                (Some("m") | None, None) => CrsKind::Metric,
                (_, Some(f)) if f == 1.0 => CrsKind::Metric,
                _ => CrsKind::OtherUnits,
            },
        }
    }
}

/// A coordinate reference system identified by its EPSG code.
///
/// Only the code takes part in equality and hashing. The kind is looked
/// up once from the EPSG definition so callers can tell geographic from
/// projected systems without consulting the catalogue again.
#[derive(Debug, Clone, Copy)]
pub struct Crs {
    code: u16,
    kind: CrsKind,
}

impl Crs {
    /// EPSG:4326, WGS84 longitude/latitude
    pub const WGS84: Crs = Crs {
        code: 4326,
        kind: CrsKind::Geographic,
    };

    /// EPSG:3857, spherical Web Mercator
    pub const WEB_MERCATOR: Crs = Crs {
        code: 3857,
        kind: CrsKind::Mercator,
    };

    /// EPSG:258zz, ETRS89 / UTM zone zz north
    pub const fn etrs89_utm(zone: u8) -> Crs {
        Crs {
            code: 25800 + zone as u16,
            kind: CrsKind::Metric,
        }
    }

    /// Look up a CRS from its EPSG code
    pub fn from_epsg(code: u32) -> Result<Self, ReprojectionError> {
        let code = match code {
            900913 => 3857,
            other => u16::try_from(other)
                .map_err(|_| ReprojectionError::UnsupportedCrs(format!("EPSG:{}", other)))?,
        };
        let definition = proj4_definition(code)?;
        Ok(Crs {
            code,
            kind: CrsKind::from_proj4(definition),
        })
    }

    /// EPSG code of this CRS
    pub fn epsg(&self) -> u32 {
        self.code as u32
    }

    pub fn kind(&self) -> CrsKind {
        self.kind
    }

    /// Angular (degree-based) systems
    pub fn is_geographic(&self) -> bool {
        self.kind == CrsKind::Geographic
    }

    /// Projected systems whose linear unit is the metre
    pub fn is_projected_metric(&self) -> bool {
        matches!(self.kind, CrsKind::Mercator | CrsKind::Metric)
    }

    /// Whether planar areas in this CRS are meaningful for reporting.
    ///
    /// Mercator systems are metric but their scale error grows with latitude
    /// (factor ~2.7 at 52°N), so they are rejected alongside geographic systems.
    pub fn is_area_suitable(&self) -> bool {
        self.kind == CrsKind::Metric
    }
}

/// proj4 definition of an EPSG code
pub(crate) fn proj4_definition(code: u16) -> Result<&'static str, ReprojectionError> {
    crs_definitions::from_code(code)
        .map(|def| def.proj4)
        .ok_or_else(|| ReprojectionError::UnsupportedCrs(format!("EPSG:{}", code)))
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Crs {}

impl Hash for Crs {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = ReprojectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code: u32 = code
            .parse()
            .map_err(|_| ReprojectionError::UnsupportedCrs(s.to_string()))?;
        Crs::from_epsg(code)
    }
}

impl Serialize for Crs {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg_strings() {
        assert_eq!("EPSG:3857".parse::<Crs>().unwrap(), Crs::WEB_MERCATOR);
        assert_eq!("EPSG:25833".parse::<Crs>().unwrap(), Crs::etrs89_utm(33));
        assert_eq!("32733".parse::<Crs>().unwrap().epsg(), 32733);
        assert!("EPSG:70000".parse::<Crs>().is_err());
        assert!("not-a-crs".parse::<Crs>().is_err());
    }

    #[test]
    fn test_national_grids_are_supported() {
        // Lambert-93, Dutch RD New, British National Grid
        for code in [2154, 28992, 27700] {
            let crs = Crs::from_epsg(code).unwrap();
            assert!(crs.is_area_suitable(), "EPSG:{} should be usable for areas", code);
        }
    }

    #[test]
    fn test_kind_from_definition() {
        assert_eq!(Crs::from_epsg(4326).unwrap().kind(), CrsKind::Geographic);
        assert_eq!(Crs::from_epsg(4258).unwrap().kind(), CrsKind::Geographic);
        assert_eq!(Crs::from_epsg(3857).unwrap().kind(), CrsKind::Mercator);
        assert_eq!(Crs::from_epsg(900913).unwrap(), Crs::WEB_MERCATOR);
        assert_eq!(Crs::from_epsg(25833).unwrap().kind(), CrsKind::Metric);
        // NAD83 / Texas Central in US survey feet
        assert_eq!(Crs::from_epsg(2277).unwrap().kind(), CrsKind::OtherUnits);
    }

    #[test]
    fn test_display_round_trips() {
        for code in [4326, 3857, 25832, 25833, 32632, 32733, 2154] {
            let crs = Crs::from_epsg(code).unwrap();
            assert_eq!(crs.to_string().parse::<Crs>().unwrap(), crs);
        }
    }

    #[test]
    fn test_area_suitability() {
        assert!(!Crs::WGS84.is_area_suitable());
        assert!(!Crs::WEB_MERCATOR.is_area_suitable());
        assert!(Crs::WEB_MERCATOR.is_projected_metric());
        assert!(Crs::etrs89_utm(33).is_area_suitable());
    }

    #[test]
    fn test_constants_match_catalogue() {
        for crs in [Crs::WGS84, Crs::WEB_MERCATOR, Crs::etrs89_utm(32), Crs::etrs89_utm(33)] {
            assert_eq!(Crs::from_epsg(crs.epsg()).unwrap().kind(), crs.kind());
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Crs::etrs89_utm(33)).unwrap();
        assert_eq!(json, "\"EPSG:25833\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Crs::etrs89_utm(33));
    }
}

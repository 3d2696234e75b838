//! Pipeline configuration
//!
//! Configuration is built once before a run: defaults, then an optional JSON
//! file (`COVERAGE_CONFIG`), then environment overrides. The resulting value is
//! immutable and passed explicitly to every component.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crs::Crs;
use crate::raster::PixelFormat;
use crate::topology::LayerRole;

/// Maximum number of classification rules per provider (labels are u8, 0 is background)
pub const MAX_RULES: usize = 255;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Projected, metric CRS used for algebra and area reporting
    pub target_crs: Crs,
    /// Number of tiles held for cross-tile region merging
    pub window_tiles: usize,
    /// Parallel tile workers
    pub workers: usize,
    /// Capacity of the worker → aggregator channel
    pub channel_capacity: usize,
    /// Polygons unioned per incremental dissolve step
    pub dissolve_batch: usize,
    /// Relative tolerance for the status-area partition check
    pub area_tolerance: f64,
    /// Spill raw geometry to disk while streaming
    pub spill: Option<SpillConfig>,
    /// Optional file inputs consumed by the binary
    pub inputs: InputConfig,
    pub providers: Vec<ProviderConfig>,
}

/// Incremental on-disk spill of vectorized geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillConfig {
    pub dir: PathBuf,
    /// Geometries per part file
    #[serde(default = "default_spill_batch")]
    pub batch_size: usize,
}

fn default_spill_batch() -> usize {
    5000
}

/// Boundary, grouping and output locations used by the binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// JSON MultiPolygon clip boundary (in `boundary_crs`)
    pub boundary: Option<PathBuf>,
    pub boundary_crs: Option<Crs>,
    /// JSON list of `{ "key": .., "geometry": .. }` grouping polygons in the target CRS
    pub groups: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Per-provider raster interpretation and repair settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Directory of PNG tiles with world files
    #[serde(default)]
    pub tile_dir: Option<PathBuf>,
    /// Native CRS of the provider's tiles
    #[serde(default)]
    pub source_crs: Option<Crs>,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub closing: ClosingConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    pub rules: Vec<ClassRule>,
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Rgba8
}

/// Raster morphological closing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosingConfig {
    /// Square structuring element half-size in pixels (0 disables closing)
    pub radius_px: u32,
    /// Smallest gap between distinct real features, in pixels
    pub min_feature_gap_px: Option<u32>,
}

impl Default for ClosingConfig {
    fn default() -> Self {
        Self {
            radius_px: 1,
            min_feature_gap_px: None,
        }
    }
}

/// Latitude at which the default Web Mercator widths are converted from ground metres
pub const DEFAULT_REFERENCE_LATITUDE: f64 = 52.5;

/// Web Mercator units spanning `metres` of ground distance at `latitude` degrees
pub fn web_mercator_units(metres: f64, latitude: f64) -> f64 {
    metres / latitude.to_radians().cos()
}

/// Buffer-dissolve-unbuffer settings, in native CRS units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Buffer width ε; seams narrower than 2ε are closed
    pub epsilon: f64,
    /// Polygons below this area are discarded as slivers
    pub min_sliver_area: f64,
    /// Largest tolerated net area loss relative to the dissolved input
    pub max_area_loss_ratio: f64,
    /// Smallest separation between distinct real features
    pub min_feature_gap: Option<f64>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            epsilon: web_mercator_units(7.0, DEFAULT_REFERENCE_LATITUDE),
            min_sliver_area: 1.0,
            max_area_loss_ratio: 0.01,
            min_feature_gap: None,
        }
    }
}

/// Maps a pixel value or color to a layer role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub name: String,
    pub role: LayerRole,
    pub matcher: Matcher,
}

/// Pixel predicate of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Matcher {
    /// Exact color (± per-channel tolerance) with an alpha floor
    Color {
        color: Rgba,
        #[serde(default)]
        tolerance: u8,
        #[serde(default = "default_min_alpha")]
        min_alpha: u8,
    },
    /// Inclusive single-band value range
    Value { min: u8, max: u8 },
}

fn default_min_alpha() -> u8 {
    101
}

impl Matcher {
    /// Exact color match with the default alpha floor
    pub fn color(hex: &str) -> Result<Self, ConfigError> {
        Ok(Matcher::Color {
            color: Rgba::from_hex(hex)?,
            tolerance: 0,
            min_alpha: default_min_alpha(),
        })
    }

    /// Whether this matcher can evaluate pixels of `format`
    pub fn supports(&self, format: PixelFormat) -> bool {
        match self {
            Matcher::Color { .. } => matches!(format, PixelFormat::Rgba8 | PixelFormat::Rgb8),
            Matcher::Value { .. } => format == PixelFormat::Gray8,
        }
    }
}

/// RGBA color, written as `#RRGGBB` or `#RRGGBBAA`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub fn from_hex(hex: &str) -> Result<Self, ConfigError> {
        let digits = hex.trim().trim_start_matches('#');
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(ConfigError::Invalid(format!("bad color '{}'", hex)));
        }
        let mut rgba = [255u8; 4];
        for (i, slot) in rgba.iter_mut().enumerate().take(digits.len() / 2) {
            *slot = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| ConfigError::Invalid(format!("bad color '{}'", hex)))?;
        }
        Ok(Rgba(rgba))
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

impl Serialize for Rgba {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgba::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            target_crs: Crs::etrs89_utm(33),
            window_tiles: 64,
            workers,
            channel_capacity: 16,
            dissolve_batch: 512,
            area_tolerance: 1e-6,
            spill: None,
            inputs: InputConfig::default(),
            providers: default_providers(),
        }
    }
}

/// Telekom and Vodafone fiber coverage legends
fn default_providers() -> Vec<ProviderConfig> {
    let rule = |name: &str, role: LayerRole, color: [u8; 3]| ClassRule {
        name: name.to_string(),
        role,
        matcher: Matcher::Color {
            color: Rgba([color[0], color[1], color[2], 255]),
            tolerance: 0,
            min_alpha: default_min_alpha(),
        },
    };

    vec![
        ProviderConfig {
            name: "telekom".to_string(),
            tile_dir: None,
            source_crs: Some(Crs::WEB_MERCATOR),
            pixel_format: PixelFormat::Rgba8,
            closing: ClosingConfig::default(),
            // 7 m of ground at the reference latitude
            cleaning: CleaningConfig {
                epsilon: web_mercator_units(7.0, DEFAULT_REFERENCE_LATITUDE),
                ..CleaningConfig::default()
            },
            rules: vec![
                rule("2000 Mbit", LayerRole::ProviderA, [0x61, 0x03, 0x32]),
                rule("1000 Mbit", LayerRole::ProviderA, [0x7D, 0x44, 0x43]),
                rule("Geplant", LayerRole::Planned, [0x31, 0x4E, 0xA5]),
            ],
        },
        ProviderConfig {
            name: "vodafone".to_string(),
            tile_dir: None,
            source_crs: Some(Crs::WEB_MERCATOR),
            pixel_format: PixelFormat::Rgba8,
            closing: ClosingConfig::default(),
            // 3 m of ground at the reference latitude
            cleaning: CleaningConfig {
                epsilon: web_mercator_units(3.0, DEFAULT_REFERENCE_LATITUDE),
                ..CleaningConfig::default()
            },
            rules: vec![rule("1000 Mbit", LayerRole::ProviderB, [0x7F, 0x00, 0x00])],
        },
    ]
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load configuration from `COVERAGE_CONFIG` (if set) and environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var("COVERAGE_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the current values
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("COVERAGE_TARGET_CRS")
            && !val.is_empty()
        {
            self.target_crs = val.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "COVERAGE_TARGET_CRS",
                value: val.clone(),
            })?;
        }
        if let Ok(val) = env::var("COVERAGE_WINDOW_TILES") {
            self.window_tiles = parse_env("COVERAGE_WINDOW_TILES", &val)?;
        }
        if let Ok(val) = env::var("COVERAGE_WORKERS") {
            self.workers = parse_env("COVERAGE_WORKERS", &val)?;
        }
        if let Ok(val) = env::var("COVERAGE_CHANNEL_CAPACITY") {
            self.channel_capacity = parse_env("COVERAGE_CHANNEL_CAPACITY", &val)?;
        }
        if let Ok(dir) = env::var("COVERAGE_SPILL_DIR")
            && !dir.is_empty()
        {
            let batch_size = self
                .spill
                .as_ref()
                .map(|s| s.batch_size)
                .unwrap_or_else(default_spill_batch);
            self.spill = Some(SpillConfig {
                dir: PathBuf::from(dir),
                batch_size,
            });
        }
        if let Ok(val) = env::var("COVERAGE_SPILL_BATCH")
            && let Some(spill) = self.spill.as_mut()
        {
            spill.batch_size = parse_env("COVERAGE_SPILL_BATCH", &val)?;
        }
        if let Ok(path) = env::var("COVERAGE_BOUNDARY")
            && !path.is_empty()
        {
            self.inputs.boundary = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("COVERAGE_GROUPS")
            && !path.is_empty()
        {
            self.inputs.groups = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("COVERAGE_OUTPUT_DIR")
            && !path.is_empty()
        {
            self.inputs.output_dir = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Check invariants that components rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_crs.is_projected_metric() {
            return Err(ConfigError::Invalid(format!(
                "target CRS {} is not a projected metric CRS",
                self.target_crs
            )));
        }
        if self.window_tiles == 0 {
            return Err(ConfigError::Invalid("window_tiles must be >= 1".into()));
        }
        if self.workers == 0 || self.channel_capacity == 0 || self.dissolve_batch == 0 {
            return Err(ConfigError::Invalid(
                "workers, channel_capacity and dissolve_batch must be >= 1".into(),
            ));
        }
        if let Some(spill) = &self.spill
            && spill.batch_size == 0
        {
            return Err(ConfigError::Invalid("spill.batch_size must be >= 1".into()));
        }
        if !(self.area_tolerance >= 0.0) {
            return Err(ConfigError::Invalid("area_tolerance must be >= 0".into()));
        }
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::Invalid(format!("provider '{}': {}", self.name, msg));

        if self.rules.is_empty() {
            return Err(invalid("no classification rules".into()));
        }
        if self.rules.len() > MAX_RULES {
            return Err(invalid(format!("more than {} rules", MAX_RULES)));
        }
        for rule in &self.rules {
            if !rule.matcher.supports(self.pixel_format) {
                return Err(invalid(format!(
                    "rule '{}' does not apply to {:?} pixels",
                    rule.name, self.pixel_format
                )));
            }
            if let Matcher::Value { min, max } = rule.matcher
                && min > max
            {
                return Err(invalid(format!("rule '{}' has min > max", rule.name)));
            }
        }
        if let Some(gap) = self.closing.min_feature_gap_px
            && self.closing.radius_px.saturating_mul(2) > gap
        {
            return Err(invalid(format!(
                "closing radius {} px exceeds half the minimum feature gap {} px",
                self.closing.radius_px, gap
            )));
        }

        let cleaning = &self.cleaning;
        if !(cleaning.epsilon >= 0.0) || !cleaning.epsilon.is_finite() {
            return Err(invalid("cleaning.epsilon must be a finite value >= 0".into()));
        }
        if !(cleaning.min_sliver_area >= 0.0) {
            return Err(invalid("cleaning.min_sliver_area must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&cleaning.max_area_loss_ratio) {
            return Err(invalid("cleaning.max_area_loss_ratio must be in [0, 1]".into()));
        }
        if let Some(gap) = cleaning.min_feature_gap
            && cleaning.epsilon * 2.0 > gap
        {
            return Err(invalid(format!(
                "epsilon {} exceeds half the minimum feature gap {}",
                cleaning.epsilon, gap
            )));
        }
        Ok(())
    }

    /// Rule roles indexed by rule order
    pub fn roles(&self) -> Vec<LayerRole> {
        self.rules.iter().map(|r| r.role).collect()
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

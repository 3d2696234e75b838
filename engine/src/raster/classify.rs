//! Pixel classification against configured color/value rules

use super::types::{ClassificationError, ClassifiedMask, Label, PixelFormat, Tile};
use crate::config::{ClassRule, MAX_RULES, Matcher};

/// Maps tile pixels to labels; rule *i* produces `Label::for_rule(i)`.
///
/// Rules are tested in configuration order and the first match wins, so a
/// pixel matched by several rules takes the lowest label.
#[derive(Debug, Clone)]
pub struct RasterClassifier {
    rules: Vec<Matcher>,
    format: PixelFormat,
}

impl RasterClassifier {
    pub fn new(rules: &[ClassRule], format: PixelFormat) -> Result<Self, ClassificationError> {
        if rules.len() > MAX_RULES {
            return Err(ClassificationError::TooManyRules {
                count: rules.len(),
                max: MAX_RULES,
            });
        }
        for rule in rules {
            if !rule.matcher.supports(format) {
                return Err(ClassificationError::IncompatibleRule {
                    rule: rule.name.clone(),
                    format,
                });
            }
        }

        Ok(Self {
            rules: rules.iter().map(|r| r.matcher.clone()).collect(),
            format,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Produce a mask of the same shape as `tile`
    pub fn classify(&self, tile: &Tile) -> Result<ClassifiedMask, ClassificationError> {
        if tile.format != self.format {
            return Err(ClassificationError::FormatMismatch {
                tile: tile.id.clone(),
                expected: self.format,
                actual: tile.format,
            });
        }
        if tile.pixels.len() != tile.expected_len() {
            return Err(ClassificationError::BufferSize {
                tile: tile.id.clone(),
                expected: tile.expected_len(),
                actual: tile.pixels.len(),
            });
        }

        let labels = tile
            .pixels
            .chunks_exact(self.format.bands())
            .map(|px| self.label_of(px).0)
            .collect();

        Ok(ClassifiedMask::new(tile.id.clone(), tile.width, tile.height, labels))
    }

    fn label_of(&self, px: &[u8]) -> Label {
        self.rules
            .iter()
            .position(|m| pixel_matches(m, px))
            .map(Label::for_rule)
            .unwrap_or(Label::BACKGROUND)
    }
}

fn pixel_matches(matcher: &Matcher, px: &[u8]) -> bool {
    match matcher {
        Matcher::Color {
            color,
            tolerance,
            min_alpha,
        } => {
            // Rgb8 pixels are opaque
            let alpha = px.get(3).copied().unwrap_or(u8::MAX);
            alpha >= *min_alpha
                && px[..3]
                    .iter()
                    .zip(&color.0[..3])
                    .all(|(p, c)| p.abs_diff(*c) <= *tolerance)
        }
        Matcher::Value { min, max } => (*min..=*max).contains(&px[0]),
    }
}

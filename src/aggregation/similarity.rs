//! Per-kind distance between tokens.

use crate::tokens::{delta_e_2000, parse_px, DesignToken, Rgb, TokenKind};

/// Default CIEDE2000 distance under which two colors count as the same.
pub const DEFAULT_COLOR_THRESHOLD: f64 = 2.3;

/// Default pixel difference under which two lengths count as the same.
pub const DEFAULT_DIMENSION_THRESHOLD: f64 = 0.5;

/// Merge thresholds by metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityThresholds {
    /// Max ΔE00 for colors.
    pub color: f64,
    /// Max px difference for dimension, spacing and radius tokens.
    pub dimension: f64,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR_THRESHOLD,
            dimension: DEFAULT_DIMENSION_THRESHOLD,
        }
    }
}

impl SimilarityThresholds {
    /// Threshold that applies to `kind`. Kinds compared by equality use 0.
    pub fn for_kind(&self, kind: TokenKind) -> f64 {
        match kind {
            TokenKind::Color => self.color,
            kind if kind.is_length() => self.dimension,
            _ => 0.0,
        }
    }
}

/// Distance between two tokens, or infinity when they are not comparable.
///
/// Colors use CIEDE2000, lengths use absolute px difference and all other
/// kinds use canonical value equality. Values that fail to parse fall back
/// to equality as well.
pub fn token_distance(a: &DesignToken, b: &DesignToken) -> f64 {
    if a.kind != b.kind {
        return f64::INFINITY;
    }

    match a.kind {
        TokenKind::Color => {
            let parsed = (
                a.value.as_str().and_then(Rgb::parse),
                b.value.as_str().and_then(Rgb::parse),
            );
            if let (Some(x), Some(y)) = parsed {
                return delta_e_2000(x.to_lab(), y.to_lab());
            }
        }
        kind if kind.is_length() => {
            if let (Some(x), Some(y)) = (parse_px(&a.value), parse_px(&b.value)) {
                return (x - y).abs();
            }
        }
        _ => {}
    }

    if a.canonical_value() == b.canonical_value() {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Returns the distance when `a` and `b` are close enough to merge.
pub fn within_threshold(
    a: &DesignToken,
    b: &DesignToken,
    thresholds: &SimilarityThresholds,
) -> Option<f64> {
    let distance = token_distance(a, b);
    (distance <= thresholds.for_kind(a.kind)).then_some(distance)
}

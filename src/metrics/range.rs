// Range algebra over f64 bounds with empty / ignored / unbounded sentinels

use crate::metrics::{MetricError, MetricUnit};
use std::fmt;

/// Canonical value stored for an ignored bound
pub const IGNORED_VALUE: f64 = -1.0;

/// Slack used when rounding bounds outward, absorbs binary representation error
/// (e.g. `0.95 * 100.0 == 94.999...`)
const ROUNDING_SLACK: f64 = 1e-9;

/// A `[min, max]` range of metric values
///
/// # Example
/// ```
/// use limitador::metrics::MetricRange;
///
/// let stored = MetricRange::create(Some(1.8), Some(2.2)).unwrap();
/// let actual = MetricRange::create(Some(1.99), Some(2.01)).unwrap();
/// assert!(stored.fits(&actual));
/// assert!(stored.union(&actual) == stored);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MetricRange {
    min: f64,
    max: f64,
}

impl MetricRange {
    /// Both bounds unset
    pub const EMPTY: MetricRange = MetricRange {
        min: f64::NAN,
        max: f64::NAN,
    };

    /// Both bounds ignored
    pub const IGNORED: MetricRange = MetricRange {
        min: IGNORED_VALUE,
        max: IGNORED_VALUE,
    };

    /// Unbounded on both sides
    pub const INFINITE: MetricRange = MetricRange {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    /// Create a range, missing bounds default to `-inf` / `+inf`
    pub fn create(min: Option<f64>, max: Option<f64>) -> Result<Self, MetricError> {
        Self::new(min.unwrap_or(f64::NEG_INFINITY), max.unwrap_or(f64::INFINITY))
    }

    /// Create a range from raw bounds (sentinels allowed)
    pub fn new(min: f64, max: f64) -> Result<Self, MetricError> {
        let range = Self { min, max };
        if range.is_comparable(min) && range.is_comparable(max) && min > max {
            return Err(MetricError::InvertedRange { min, max });
        }
        Ok(range)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// True when both bounds are unset
    pub fn is_empty(&self) -> bool {
        self.min.is_nan() && self.max.is_nan()
    }

    /// True when both bounds are ignored
    pub fn is_ignored(&self) -> bool {
        is_ignored(self.min) && is_ignored(self.max)
    }

    pub fn min_is_ignored(&self) -> bool {
        is_ignored(self.min)
    }

    pub fn max_is_ignored(&self) -> bool {
        is_ignored(self.max)
    }

    fn is_comparable(&self, value: f64) -> bool {
        !value.is_nan() && !is_ignored(value)
    }

    /// Widest range covering both operands
    ///
    /// Empty bounds are neutral and ignored bounds absorb everything. When
    /// `self` already contains `other` the result equals `self`.
    pub fn union(&self, other: &MetricRange) -> MetricRange {
        MetricRange {
            min: union_bound(self.min, other.min, f64::min),
            max: union_bound(self.max, other.max, f64::max),
        }
    }

    /// Interval containment
    ///
    /// An empty range is contained only by another empty range. Unset bounds
    /// of `inner` need no coverage, ignored bounds of `outer` cover anything.
    pub fn contains(&self, inner: &MetricRange) -> bool {
        if inner.is_empty() {
            return self.is_empty();
        }
        if self.is_empty() {
            return false;
        }

        let lower = covers_bound(self.min, inner.min, |outer, inner| outer <= inner);
        let upper = covers_bound(self.max, inner.max, |outer, inner| outer >= inner);
        lower && upper
    }

    /// Limit check: does the measured `actual` range fit this stored limit?
    ///
    /// Unlike [`contains`](Self::contains), an unset or ignored limit bound
    /// never fails.
    pub fn fits(&self, actual: &MetricRange) -> bool {
        let lower = fits_bound(self.min, actual.min, |limit, value| limit <= value);
        let upper = fits_bound(self.max, actual.max, |limit, value| limit >= value);
        lower && upper
    }

    /// Round finite bounds outward (min down, max up) to `digits` decimals
    pub fn round_outward(&self, digits: u32) -> MetricRange {
        let factor = 10f64.powi(digits as i32);
        let round = |value: f64, up: bool| {
            if !value.is_finite() || is_ignored(value) {
                value
            } else if up {
                (value * factor - ROUNDING_SLACK).ceil() / factor
            } else {
                (value * factor + ROUNDING_SLACK).floor() / factor
            }
        };
        MetricRange {
            min: round(self.min, false),
            max: round(self.max, true),
        }
    }

    /// Magnitude used to pick a display unit: the smaller absolute bound
    ///
    /// Unset, ignored and infinite bounds are skipped.
    pub fn unit_probe(&self) -> Option<f64> {
        [self.min, self.max]
            .into_iter()
            .filter(|v| v.is_finite() && !is_ignored(*v))
            .map(f64::abs)
            .reduce(f64::min)
    }

    /// Render using a display unit, e.g. `[1.20..1.35]us`
    pub fn format_with(&self, unit: Option<&MetricUnit>) -> String {
        if self.is_empty() {
            return "[empty]".to_string();
        }
        let render = |value: f64| match unit {
            _ if value.is_nan() => "?".to_string(),
            _ if is_ignored(value) => "ignored".to_string(),
            _ if value.is_infinite() => (if value > 0.0 { "inf" } else { "-inf" }).to_string(),
            Some(unit) => unit.format_value(value),
            None => format!("{value:.2}"),
        };
        let suffix = unit.map(|u| u.display_name.as_str()).unwrap_or("");
        format!("[{}..{}]{}", render(self.min), render(self.max), suffix)
    }
}

impl Default for MetricRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Bound-wise equality where two empty (NaN) bounds compare equal
impl PartialEq for MetricRange {
    fn eq(&self, other: &Self) -> bool {
        bound_eq(self.min, other.min) && bound_eq(self.max, other.max)
    }
}

impl fmt::Display for MetricRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(None))
    }
}

fn is_ignored(value: f64) -> bool {
    value.is_finite() && value < 0.0
}

fn bound_eq(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (is_ignored(a) && is_ignored(b)) || a == b
}

fn union_bound(a: f64, b: f64, pick: fn(f64, f64) -> f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if is_ignored(a) {
        a
    } else if is_ignored(b) {
        b
    } else {
        pick(a, b)
    }
}

fn covers_bound(outer: f64, inner: f64, cmp: fn(f64, f64) -> bool) -> bool {
    if inner.is_nan() || is_ignored(outer) {
        true
    } else if outer.is_nan() || is_ignored(inner) {
        false
    } else {
        cmp(outer, inner)
    }
}

fn fits_bound(limit: f64, value: f64, cmp: fn(f64, f64) -> bool) -> bool {
    if limit.is_nan() || is_ignored(limit) || value.is_nan() || is_ignored(value) {
        true
    } else {
        cmp(limit, value)
    }
}

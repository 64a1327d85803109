// Display units and unit scales
//
// A scale is an ordered list of units, each applying from a threshold
// (in base units). The unit for a value is the last one whose threshold
// does not exceed the value's magnitude; the lowest unit also covers 0.

use crate::metrics::{MetricError, MetricRange};
use serde::{Deserialize, Serialize};

/// Default number of decimals used when a unit does not specify one
const DEFAULT_ROUNDING_DIGITS: u32 = 2;

/// A single display unit, e.g. `us` = 1 000 ns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUnit {
    /// Suffix shown after values (`ns`, `us`, empty for ratios)
    pub display_name: String,

    /// Stable identifier of the unit
    pub tag: String,

    /// Base units per one display unit
    pub scale_coefficient: f64,

    /// Smallest magnitude (in base units) this unit is used for
    pub applies_from: f64,

    /// Decimals to render, defaults to 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding_digits: Option<u32>,
}

impl MetricUnit {
    pub fn new(display_name: &str, tag: &str, scale_coefficient: f64, applies_from: f64) -> Self {
        Self {
            display_name: display_name.to_string(),
            tag: tag.to_string(),
            scale_coefficient,
            applies_from,
            rounding_digits: None,
        }
    }

    pub fn with_rounding_digits(mut self, digits: u32) -> Self {
        self.rounding_digits = Some(digits);
        self
    }

    /// Convert a base-unit value into this unit
    pub fn scale(&self, value: f64) -> f64 {
        value / self.scale_coefficient
    }

    /// Render a base-unit value in this unit (number only, no suffix)
    pub fn format_value(&self, value: f64) -> String {
        let digits = self.rounding_digits.unwrap_or(DEFAULT_ROUNDING_DIGITS) as usize;
        format!("{:.*}", digits, self.scale(value))
    }
}

/// Ordered, non-overlapping set of units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<MetricUnit>", into = "Vec<MetricUnit>")]
pub struct MetricUnitScale {
    units: Vec<MetricUnit>,
}

impl MetricUnitScale {
    /// Build a scale, thresholds must be strictly increasing
    pub fn new(units: Vec<MetricUnit>) -> Result<Self, MetricError> {
        if units.is_empty() {
            return Err(MetricError::EmptyScale);
        }

        for pair in units.windows(2) {
            if pair[1].applies_from <= pair[0].applies_from {
                return Err(MetricError::NonIncreasingScale {
                    unit: pair[1].tag.clone(),
                    threshold: pair[1].applies_from,
                    previous: pair[0].applies_from,
                });
            }
        }

        Ok(Self { units })
    }

    /// Nanosecond-based time scale: ns, us, ms, s
    pub fn time() -> Self {
        Self {
            units: vec![
                MetricUnit::new("ns", "nanoseconds", 1.0, 0.0),
                MetricUnit::new("us", "microseconds", 1e3, 1e3),
                MetricUnit::new("ms", "milliseconds", 1e6, 1e6),
                MetricUnit::new("s", "seconds", 1e9, 1e9),
            ],
        }
    }

    /// Unit-less ratio scale
    pub fn ratio() -> Self {
        Self {
            units: vec![MetricUnit::new("", "ratio", 1.0, 0.0)],
        }
    }

    pub fn units(&self) -> &[MetricUnit] {
        &self.units
    }

    /// Base (lowest) unit of the scale
    pub fn base_unit(&self) -> &MetricUnit {
        // `new` and the built-in constructors never produce an empty scale
        &self.units[0]
    }

    /// Unit for a measured value
    pub fn unit_for(&self, value: f64) -> &MetricUnit {
        if value.is_nan() {
            return self.base_unit();
        }
        let magnitude = value.abs();
        self.units
            .iter()
            .rev()
            .find(|unit| unit.applies_from <= magnitude)
            .unwrap_or_else(|| self.base_unit())
    }

    /// Unit for a range, driven by the smaller magnitude bound
    pub fn unit_for_range(&self, range: &MetricRange) -> &MetricUnit {
        match range.unit_probe() {
            Some(probe) => self.unit_for(probe),
            None => self.base_unit(),
        }
    }
}

impl TryFrom<Vec<MetricUnit>> for MetricUnitScale {
    type Error = MetricError;

    fn try_from(units: Vec<MetricUnit>) -> Result<Self, Self::Error> {
        Self::new(units)
    }
}

impl From<MetricUnitScale> for Vec<MetricUnit> {
    fn from(scale: MetricUnitScale) -> Self {
        scale.units
    }
}

//! Metric ranges, display units and metric definitions
//!
//! A metric value is always a `[min, max]` range over `f64`. Three sentinels
//! travel inside the bounds themselves:
//!
//! - `NaN`: the bound is empty (unset, will be filled by the next union)
//! - a finite negative value: the bound is ignored and never fails a check
//! - `-inf` / `+inf`: the side is unbounded
//!
//! Measured metrics (durations, ratios) are never negative, which is what
//! makes the negative sentinel safe.

mod info;
mod range;
mod unit;

pub use info::{AnnotationKeys, MetricInfo, TIME_SAMPLE_KEY};
pub use range::{MetricRange, IGNORED_VALUE};
pub use unit::{MetricUnit, MetricUnitScale};

use thiserror::Error;

/// Errors raised while building ranges or unit scales
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Invalid range: min {min} is greater than max {max}")]
    InvertedRange { min: f64, max: f64 },

    #[error("Unit scale must contain at least one unit")]
    EmptyScale,

    #[error(
        "Unit scale thresholds must be strictly increasing: {unit} applies from {threshold} \
         after a unit applying from {previous}"
    )]
    NonIncreasingScale {
        unit: String,
        threshold: f64,
        previous: f64,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}

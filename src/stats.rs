//! Percentile-based range estimation for raw benchmark samples
//!
//! A [`PercentileCalculator`] turns the per-iteration samples produced by the
//! benchmarking harness into two ranges:
//!
//! - **actual values**: percentiles at `mean ± actual_delta`, what this run measured
//! - **limit values**: percentiles at `mean ± limit_delta`, wider, used when a
//!   stored limit has to be (re)written so it tolerates run-to-run noise
//!
//! Relative variants divide each percentile by the same percentile of the
//! baseline's samples, producing ratios.

use crate::metrics::MetricRange;
use thiserror::Error;

/// Floor applied before taking logarithms of samples
pub const LOG_EPSILON: f64 = 1e-9;

/// Errors raised for invalid calculator parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalculatorError {
    #[error("{name} must be in [0, 100], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("limit_delta ({limit_delta}) must be >= actual_delta ({actual_delta})")]
    LimitNarrowerThanActual { actual_delta: f64, limit_delta: f64 },
}

/// Percentile estimator parameterized by `(mean_percentile, actual_delta, limit_delta)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileCalculator {
    mean_percentile: f64,
    actual_delta: f64,
    limit_delta: f64,
}

impl Default for PercentileCalculator {
    fn default() -> Self {
        Self {
            mean_percentile: 50.0,
            actual_delta: 5.0,
            limit_delta: 10.0,
        }
    }
}

impl PercentileCalculator {
    pub fn new(
        mean_percentile: f64,
        actual_delta: f64,
        limit_delta: f64,
    ) -> Result<Self, CalculatorError> {
        for (name, value) in [
            ("mean_percentile", mean_percentile),
            ("actual_delta", actual_delta),
            ("limit_delta", limit_delta),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CalculatorError::OutOfRange { name, value });
            }
        }

        if limit_delta < actual_delta {
            return Err(CalculatorError::LimitNarrowerThanActual {
                actual_delta,
                limit_delta,
            });
        }

        Ok(Self {
            mean_percentile,
            actual_delta,
            limit_delta,
        })
    }

    pub fn mean_percentile(&self) -> f64 {
        self.mean_percentile
    }

    /// Percentile `mean_percentile` of the samples, `None` if there are none
    pub fn try_get_mean_value(&self, samples: &[f64]) -> Option<f64> {
        let sorted = sorted(samples)?;
        Some(calculate_percentile(&sorted, self.mean_percentile))
    }

    /// Ratio of the mean percentiles, `None` without data or for a zero baseline
    ///
    /// # Example
    /// ```
    /// use limitador::stats::PercentileCalculator;
    ///
    /// let calc = PercentileCalculator::default();
    /// let ratio = calc
    ///     .try_get_relative_mean_value(&[200.0, 202.0, 198.0], &[100.0, 101.0, 99.0])
    ///     .unwrap();
    /// assert!((ratio - 2.0).abs() < 0.01);
    /// assert_eq!(calc.try_get_relative_mean_value(&[1.0], &[0.0, 0.0, 0.0]), None);
    /// ```
    pub fn try_get_relative_mean_value(&self, samples: &[f64], baseline: &[f64]) -> Option<f64> {
        let value = self.try_get_mean_value(samples)?;
        let base = self.try_get_mean_value(baseline)?;
        if base == 0.0 {
            return None;
        }
        Some(value / base)
    }

    /// Range of percentiles at `mean ± actual_delta`
    pub fn try_get_actual_values(&self, samples: &[f64]) -> MetricRange {
        self.percentile_range(samples, self.actual_delta)
    }

    /// Range of percentiles at `mean ± limit_delta`
    pub fn try_get_limit_values(&self, samples: &[f64]) -> MetricRange {
        self.percentile_range(samples, self.limit_delta)
    }

    /// Actual values as ratios against the baseline
    pub fn try_get_relative_actual_values(&self, samples: &[f64], baseline: &[f64]) -> MetricRange {
        self.relative_range(samples, baseline, self.actual_delta)
    }

    /// Limit values as ratios against the baseline
    pub fn try_get_relative_limit_values(&self, samples: &[f64], baseline: &[f64]) -> MetricRange {
        self.relative_range(samples, baseline, self.limit_delta)
    }

    /// Variance of the ratio `samples / baseline`, estimated in log space
    ///
    /// Both sample sets are mapped through `ln(max(x, LOG_EPSILON))`. Sets of
    /// equal length are paired sample by sample: `μ` and `σ²` are the mean and
    /// population variance of `ln x_i - ln b_i`. Sets of different length
    /// cannot be paired and are treated as independent, with
    /// `μ = mean(ln X) - mean(ln B)` and `σ² = var(ln X) + var(ln B)`. Either
    /// way the log-normal variance is `e^(2μ+2σ²) - e^(2μ+σ²)`.
    pub fn relative_variance(&self, samples: &[f64], baseline: &[f64]) -> Option<f64> {
        if samples.is_empty() || baseline.is_empty() {
            return None;
        }

        let log_x = floored_logs(samples);
        let log_b = floored_logs(baseline);
        let (mu, sigma2) = if log_x.len() == log_b.len() {
            let differences: Vec<f64> = log_x.iter().zip(&log_b).map(|(x, b)| x - b).collect();
            moments(&differences)
        } else {
            let (mean_x, var_x) = moments(&log_x);
            let (mean_b, var_b) = moments(&log_b);
            (mean_x - mean_b, var_x + var_b)
        };
        Some((2.0 * mu + 2.0 * sigma2).exp() - (2.0 * mu + sigma2).exp())
    }

    fn bounds(&self, delta: f64) -> (f64, f64) {
        (
            (self.mean_percentile - delta).clamp(0.0, 100.0),
            (self.mean_percentile + delta).clamp(0.0, 100.0),
        )
    }

    fn percentile_pair(&self, samples: &[f64], delta: f64) -> Option<(f64, f64)> {
        let sorted = sorted(samples)?;
        let (lower, upper) = self.bounds(delta);
        Some((
            calculate_percentile(&sorted, lower),
            calculate_percentile(&sorted, upper),
        ))
    }

    fn percentile_range(&self, samples: &[f64], delta: f64) -> MetricRange {
        self.percentile_pair(samples, delta)
            .and_then(|(min, max)| MetricRange::new(min, max).ok())
            .unwrap_or(MetricRange::EMPTY)
    }

    fn relative_range(&self, samples: &[f64], baseline: &[f64], delta: f64) -> MetricRange {
        let (Some((min, max)), Some((base_min, base_max))) = (
            self.percentile_pair(samples, delta),
            self.percentile_pair(baseline, delta),
        ) else {
            return MetricRange::EMPTY;
        };

        if base_min == 0.0 || base_max == 0.0 {
            return MetricRange::EMPTY;
        }

        let (lo, hi) = (min / base_min, max / base_max);
        // Dividing by different baseline percentiles can swap the order
        MetricRange::new(lo.min(hi), lo.max(hi)).unwrap_or(MetricRange::EMPTY)
    }
}

fn floored_logs(samples: &[f64]) -> Vec<f64> {
    samples.iter().map(|&x| x.max(LOG_EPSILON).ln()).collect()
}

/// Mean and population variance of a non-empty slice
fn moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

fn sorted(samples: &[f64]) -> Option<Vec<f64>> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(sorted)
}

/// Calculate percentile from sorted data (linear interpolation between closest ranks)
fn calculate_percentile(sorted_data: &[f64], percentile: f64) -> f64 {
    if sorted_data.len() == 1 {
        return sorted_data[0];
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] + (sorted_data[upper] - sorted_data[lower]) * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE: [f64; 5] = [100.0, 102.0, 98.0, 101.0, 99.0];
    const BENCHMARK: [f64; 5] = [190.0, 205.0, 198.0, 200.0, 202.0];

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            PercentileCalculator::new(120.0, 5.0, 10.0),
            Err(CalculatorError::OutOfRange { name: "mean_percentile", .. })
        ));
        assert_eq!(
            PercentileCalculator::new(50.0, 10.0, 5.0),
            Err(CalculatorError::LimitNarrowerThanActual {
                actual_delta: 10.0,
                limit_delta: 5.0
            })
        );
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(calculate_percentile(&sorted, 0.0), 1.0);
        assert_eq!(calculate_percentile(&sorted, 100.0), 4.0);
        assert_eq!(calculate_percentile(&sorted, 50.0), 2.5);
        assert_eq!(calculate_percentile(&[7.0], 90.0), 7.0);
    }

    #[test]
    fn test_mean_value() {
        let calc = PercentileCalculator::default();
        assert_eq!(calc.try_get_mean_value(&BASELINE), Some(100.0));
        assert_eq!(calc.try_get_mean_value(&[]), None);
    }

    #[test]
    fn test_relative_mean_value_ratio() {
        let calc = PercentileCalculator::default();
        let ratio = calc.try_get_relative_mean_value(&BENCHMARK, &BASELINE).unwrap();
        assert!((ratio - 2.0).abs() < 1e-9, "ratio {ratio}");
    }

    #[test]
    fn test_relative_mean_value_zero_baseline() {
        let calc = PercentileCalculator::default();
        assert_eq!(calc.try_get_relative_mean_value(&BENCHMARK, &[0.0, 0.0, 0.0]), None);
        assert_eq!(calc.try_get_relative_mean_value(&BENCHMARK, &[]), None);
        assert_eq!(calc.try_get_relative_mean_value(&[], &BASELINE), None);
    }

    #[test]
    fn test_actual_values() {
        let calc = PercentileCalculator::default();
        let actual = calc.try_get_actual_values(&BASELINE);
        // sorted: 98 99 100 101 102, P45 = 99.8, P55 = 100.2
        assert!((actual.min() - 99.8).abs() < 1e-9);
        assert!((actual.max() - 100.2).abs() < 1e-9);
        assert!(calc.try_get_actual_values(&[]).is_empty());
    }

    #[test]
    fn test_limit_contains_actual() {
        let calc = PercentileCalculator::default();
        let actual = calc.try_get_actual_values(&BENCHMARK);
        let limit = calc.try_get_limit_values(&BENCHMARK);
        assert!(limit.contains(&actual));
    }

    #[test]
    fn test_deltas_are_clamped() {
        let calc = PercentileCalculator::new(95.0, 10.0, 10.0).unwrap();
        let actual = calc.try_get_actual_values(&[1.0, 2.0, 3.0]);
        assert_eq!(actual.max(), 3.0);
    }

    #[test]
    fn test_relative_actual_values() {
        let calc = PercentileCalculator::default();
        let actual = calc.try_get_relative_actual_values(&BENCHMARK, &BASELINE);
        assert!((actual.min() - 2.0).abs() < 0.01, "{actual}");
        assert!((actual.max() - 2.0).abs() < 0.01, "{actual}");

        let stored = MetricRange::new(1.8, 2.2).unwrap();
        assert!(stored.fits(&actual));
        let stale = MetricRange::new(1.0, 1.5).unwrap();
        assert!(!stale.fits(&actual));
    }

    #[test]
    fn test_relative_values_zero_baseline_is_empty() {
        let calc = PercentileCalculator::default();
        assert!(calc
            .try_get_relative_limit_values(&BENCHMARK, &[0.0, 0.0, 0.0])
            .is_empty());
    }

    #[test]
    fn test_relative_variance() {
        let calc = PercentileCalculator::default();
        let variance = calc.relative_variance(&BENCHMARK, &BASELINE).unwrap();
        assert!(variance > 0.0);
        // ratio ~2.0 with ~1-2% noise on each side
        assert!(variance < 0.01, "variance {variance}");

        let constant = calc.relative_variance(&[2.0, 2.0], &[1.0, 1.0]).unwrap();
        assert!(constant.abs() < 1e-6);

        assert_eq!(calc.relative_variance(&[], &BASELINE), None);
    }

    #[test]
    fn test_relative_variance_pairs_equal_length_sets() {
        let calc = PercentileCalculator::default();

        // Every pair has ratio 2: no spread, although each set varies
        let steady = calc.relative_variance(&[2.0, 4.0, 8.0], &[1.0, 2.0, 4.0]).unwrap();
        assert!(steady.abs() < 1e-12, "variance {steady}");

        // Log differences 1 and 3: μ = 2, σ² = 1
        let spread = calc
            .relative_variance(&[1f64.exp(), 3f64.exp()], &[1.0, 1.0])
            .unwrap();
        let expected = 6f64.exp() - 5f64.exp();
        assert!((spread - expected).abs() < 1e-9 * expected, "variance {spread}");
    }

    #[test]
    fn test_relative_variance_unpaired_sets_add_variances() {
        let calc = PercentileCalculator::default();

        // ln X = {1, 3}, ln B = {0}: μ = 2, σ² = 1 + 0
        let variance = calc
            .relative_variance(&[1f64.exp(), 3f64.exp()], &[1.0])
            .unwrap();
        let expected = 6f64.exp() - 5f64.exp();
        assert!((variance - expected).abs() < 1e-9 * expected);

        // ln X = {ln 2, ln 4}, ln B = {0, ln 2, ln 4}: both spreads count
        let independent = calc.relative_variance(&[2.0, 4.0], &[1.0, 2.0, 4.0]).unwrap();
        assert!(independent > 0.1, "variance {independent}");
    }

    #[test]
    fn test_relative_variance_floors_non_positive_samples() {
        let calc = PercentileCalculator::default();
        let variance = calc.relative_variance(&[0.0, -5.0, 1.0], &[1.0, 1.0, 1.0]);
        assert!(variance.is_some_and(f64::is_finite));
    }
}

//! Property-based tests for range algebra, percentiles and directive patching
//!
//! Samples are integer-valued so percentile interpolation is exact enough
//! for ordering comparisons.

use limitador::annotations::{find_directive, parse_args, DirectiveArgs};
use limitador::metrics::MetricRange;
use limitador::stats::PercentileCalculator;
use proptest::prelude::*;

fn finite_range() -> impl Strategy<Value = MetricRange> {
    (0.0f64..1000.0, 0.0f64..1000.0)
        .prop_map(|(a, b)| MetricRange::new(a.min(b), a.max(b)).unwrap())
}

fn samples() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((1u32..100_000).prop_map(f64::from), 1..200)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_union_is_idempotent(range in finite_range()) {
        prop_assert_eq!(range.union(&range), range);
    }

    #[test]
    fn prop_union_contains_both_operands(a in finite_range(), b in finite_range()) {
        let merged = a.union(&b);
        prop_assert!(merged.contains(&a));
        prop_assert!(merged.contains(&b));
        prop_assert_eq!(merged, b.union(&a));
    }

    #[test]
    fn prop_union_with_contained_range_is_unchanged(outer in finite_range(), t in 0.0f64..1.0) {
        let point = outer.min() + (outer.max() - outer.min()) * t;
        let inner = MetricRange::new(point, point).unwrap();
        prop_assume!(outer.contains(&inner));
        prop_assert_eq!(outer.union(&inner), outer);
    }

    #[test]
    fn prop_contained_range_fits(a in finite_range(), b in finite_range()) {
        let merged = a.union(&b);
        prop_assert!(merged.fits(&a));
    }

    #[test]
    fn prop_round_outward_never_narrows(range in finite_range(), digits in 0u32..4) {
        let rounded = range.round_outward(digits);
        prop_assert!(rounded.min() <= range.min() + 1e-9);
        prop_assert!(rounded.max() >= range.max() - 1e-9);
        prop_assert_eq!(rounded.round_outward(digits), rounded);
    }

    #[test]
    fn prop_limit_values_contain_actual_values(samples in samples()) {
        let calculator = PercentileCalculator::default();
        let actual = calculator.try_get_actual_values(&samples);
        let limit = calculator.try_get_limit_values(&samples);
        prop_assert!(limit.contains(&actual));
        prop_assert!(limit.fits(&actual));
    }

    #[test]
    fn prop_mean_lies_inside_actual_values(samples in samples()) {
        let calculator = PercentileCalculator::default();
        let mean = calculator.try_get_mean_value(&samples).unwrap();
        let actual = calculator.try_get_actual_values(&samples);
        prop_assert!(actual.min() <= mean && mean <= actual.max());
    }

    #[test]
    fn prop_patched_directive_parses_back(a in 0u32..100_000, b in 0u32..100_000) {
        // Two-decimal bounds survive a patch/parse cycle exactly
        let (lo, hi) = (f64::from(a.min(b)) / 100.0, f64::from(a.max(b)) / 100.0);
        let range = MetricRange::new(lo, hi).unwrap();
        let lines = vec![
            "#[competition_bench(1.00, 2.00)]\n".to_string(),
            "fn quick_sort() {}\n".to_string(),
        ];

        let found = find_directive(&lines, 2).unwrap();
        let patched = found.patch_line(&lines[0], &range);
        let reparsed = find_directive(&[patched, lines[1].clone()], 2).unwrap();

        match reparsed.args {
            Ok(DirectiveArgs::Limits(parsed)) => {
                prop_assert!((parsed.min() - lo).abs() < 1e-9);
                prop_assert!((parsed.max() - hi).abs() < 1e-9);
            }
            other => prop_assert!(false, "unexpected args {:?}", other),
        }
    }

    #[test]
    fn prop_parse_args_never_panics(text in "\\PC{0,40}") {
        let _ = parse_args(&text);
    }
}

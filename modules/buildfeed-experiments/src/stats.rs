//! Hypothesis tests and interval estimates over aggregate counts.
//!
//! Every function is pure. Degenerate inputs (empty samples, zero variance)
//! produce a non-significant zero-effect result rather than NaN or Infinity.

use std::f64::consts::SQRT_2;

use serde::Serialize;

use crate::special::{beta_inc, erfc};

/// Two-tailed threshold for significance.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfidenceLevel {
    Ninety,
    #[default]
    NinetyFive,
    NinetyNine,
}

impl ConfidenceLevel {
    /// Two-sided critical value of the standard normal.
    pub fn z_star(self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 1.645,
            ConfidenceLevel::NinetyFive => 1.96,
            ConfidenceLevel::NinetyNine => 2.576,
        }
    }

    pub fn as_fraction(self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 0.90,
            ConfidenceLevel::NinetyFive => 0.95,
            ConfidenceLevel::NinetyNine => 0.99,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestOutcome {
    /// Test statistic (z or t).
    pub statistic: f64,
    pub p_value: f64,
    pub is_significant: bool,
    /// Difference of the second sample from the first.
    pub effect: f64,
}

impl TestOutcome {
    fn null() -> Self {
        Self {
            statistic: 0.0,
            p_value: 1.0,
            is_significant: false,
            effect: 0.0,
        }
    }

    fn from_statistic(statistic: f64, p_value: f64, effect: f64) -> Self {
        if !statistic.is_finite() || !p_value.is_finite() {
            return Self::null();
        }
        let p_value = p_value.clamp(0.0, 1.0);
        Self {
            statistic,
            p_value,
            is_significant: p_value < SIGNIFICANCE_LEVEL,
            effect,
        }
    }
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

/// Two-tailed p-value of a standard normal statistic.
pub fn normal_two_tailed(z: f64) -> f64 {
    erfc(z.abs() / SQRT_2)
}

/// Two-tailed p-value of a Student-t statistic with `df` degrees of freedom.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    if df.is_nan() || df <= 0.0 || !t.is_finite() {
        return 1.0;
    }
    beta_inc(df / 2.0, 0.5, df / (df + t * t))
}

/// Pooled two-proportion z-test of `successes_b / total_b` against
/// `successes_a / total_a`.
pub fn z_test_proportions(successes_a: u64, total_a: u64, successes_b: u64, total_b: u64) -> TestOutcome {
    if total_a == 0 || total_b == 0 {
        return TestOutcome::null();
    }
    let (sa, na) = (successes_a as f64, total_a as f64);
    let (sb, nb) = (successes_b as f64, total_b as f64);
    let pa = sa / na;
    let pb = sb / nb;
    let pooled = (sa + sb) / (na + nb);
    let se = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();
    if se.is_nan() || se <= 0.0 {
        return TestOutcome::null();
    }
    let z = (pb - pa) / se;
    TestOutcome::from_statistic(z, normal_two_tailed(z), pb - pa)
}

/// Wald interval for a proportion, clamped to [0, 1].
pub fn proportion_ci(p: f64, n: u64, level: ConfidenceLevel) -> Interval {
    if n == 0 || !p.is_finite() {
        return Interval { lower: 0.0, upper: 0.0 };
    }
    let margin = level.z_star() * (p * (1.0 - p) / n as f64).max(0.0).sqrt();
    Interval {
        lower: (p - margin).clamp(0.0, 1.0),
        upper: (p + margin).clamp(0.0, 1.0),
    }
}

/// `(value - baseline) / baseline`, or 0 when there is no baseline.
pub fn relative_change(value: f64, baseline: f64) -> f64 {
    if baseline == 0.0 || !baseline.is_finite() || !value.is_finite() {
        return 0.0;
    }
    (value - baseline) / baseline
}

/// Summary of a continuous sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SampleStats {
    pub mean: f64,
    /// Unbiased sample variance.
    pub variance: f64,
    pub n: u64,
}

/// Welch's unequal-variance t-test of `b` against `a`.
pub fn welch_t_test(a: SampleStats, b: SampleStats) -> TestOutcome {
    if a.n < 2 || b.n < 2 {
        return TestOutcome::null();
    }
    let (na, nb) = (a.n as f64, b.n as f64);
    let va = a.variance.max(0.0) / na;
    let vb = b.variance.max(0.0) / nb;
    let se2 = va + vb;
    if !se2.is_finite() || se2 <= 0.0 {
        return TestOutcome::null();
    }
    let t = (b.mean - a.mean) / se2.sqrt();
    // Welch–Satterthwaite
    let df = se2 * se2 / (va * va / (na - 1.0) + vb * vb / (nb - 1.0));
    TestOutcome::from_statistic(t, student_t_two_tailed(t, df), b.mean - a.mean)
}

/// Normal-approximation interval for a mean.
pub fn mean_ci(sample: SampleStats, level: ConfidenceLevel) -> Interval {
    if sample.n == 0 || !sample.mean.is_finite() {
        return Interval { lower: 0.0, upper: 0.0 };
    }
    let margin = level.z_star() * sample.variance.max(0.0).sqrt() / (sample.n as f64).sqrt();
    Interval {
        lower: sample.mean - margin,
        upper: sample.mean + margin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!(close(normal_cdf(0.0), 0.5, 1e-15));
        assert!(close(normal_cdf(1.96), 0.975_002_104_851_780, 1e-12));
        assert!(close(normal_cdf(-1.0), 0.158_655_253_931_457, 1e-12));
        assert!(close(normal_two_tailed(1.96), 0.049_995_790_296_44, 1e-10));
    }

    #[test]
    fn student_t_matches_tables() {
        // Cauchy: P(|T| > 1) = 1/2
        assert!(close(student_t_two_tailed(1.0, 1.0), 0.5, 1e-12));
        // t(10) critical value at 5% two-tailed
        assert!(close(student_t_two_tailed(2.228_138_851_986_5, 10.0), 0.05, 1e-8));
        // Small samples are not optimistic: the same t is less significant at low df.
        assert!(student_t_two_tailed(2.1, 3.0) > normal_two_tailed(2.1));
    }

    #[test]
    fn z_test_with_empty_arm_is_null() {
        let outcome = z_test_proportions(0, 0, 10, 100);
        assert_eq!(outcome.p_value, 1.0);
        assert!(!outcome.is_significant);
        assert_eq!(outcome.effect, 0.0);
    }

    #[test]
    fn z_test_with_zero_standard_error_is_null() {
        let outcome = z_test_proportions(0, 50, 0, 50);
        assert!(!outcome.is_significant);
        assert_eq!(outcome.statistic, 0.0);
    }

    #[test]
    fn z_test_detects_lift() {
        let outcome = z_test_proportions(10, 100, 25, 100);
        assert!(outcome.is_significant);
        assert!(close(outcome.statistic, 2.791, 1e-3));
        assert!(outcome.p_value < 0.01);
        assert!(close(outcome.effect, 0.15, 1e-12));
    }

    #[test]
    fn identical_proportions_are_not_significant() {
        let outcome = z_test_proportions(30, 200, 30, 200);
        assert_eq!(outcome.statistic, 0.0);
        assert!(close(outcome.p_value, 1.0, 1e-12));
        assert!(!outcome.is_significant);
    }

    #[test]
    fn relative_change_guards_zero_baseline() {
        assert_eq!(relative_change(0.25, 0.0), 0.0);
        assert!(close(relative_change(0.25, 0.1), 1.5, 1e-12));
        assert!(close(relative_change(0.05, 0.1), -0.5, 1e-12));
    }

    #[test]
    fn proportion_ci_is_clamped() {
        let ci = proportion_ci(0.01, 10, ConfidenceLevel::NinetyFive);
        assert_eq!(ci.lower, 0.0);
        assert!(ci.upper > 0.01);
        assert_eq!(
            proportion_ci(0.5, 0, ConfidenceLevel::NinetyFive),
            Interval { lower: 0.0, upper: 0.0 }
        );
        let wide = proportion_ci(0.5, 100, ConfidenceLevel::NinetyNine);
        let narrow = proportion_ci(0.5, 100, ConfidenceLevel::Ninety);
        assert!(wide.upper - wide.lower > narrow.upper - narrow.lower);
    }

    #[test]
    fn welch_handles_degenerate_samples() {
        let single = SampleStats { mean: 3.0, variance: 0.0, n: 1 };
        let flat = SampleStats { mean: 3.0, variance: 0.0, n: 20 };
        assert!(!welch_t_test(single, flat).is_significant);
        assert_eq!(welch_t_test(flat, flat).p_value, 1.0);
    }

    #[test]
    fn welch_detects_shifted_means() {
        let a = SampleStats { mean: 1000.0, variance: 250_000.0, n: 50 };
        let b = SampleStats { mean: 1400.0, variance: 360_000.0, n: 50 };
        let outcome = welch_t_test(a, b);
        assert!(outcome.is_significant);
        assert!(outcome.statistic > 0.0);

        let same = welch_t_test(a, a);
        assert!(!same.is_significant);
        assert!(close(same.p_value, 1.0, 1e-12));
    }

    #[test]
    fn mean_ci_widens_with_variance() {
        let tight = mean_ci(SampleStats { mean: 10.0, variance: 4.0, n: 16 }, ConfidenceLevel::NinetyFive);
        assert!(close(tight.lower, 10.0 - 1.96 * 0.5, 1e-12));
        assert!(close(tight.upper, 10.0 + 1.96 * 0.5, 1e-12));
    }
}

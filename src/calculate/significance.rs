//! Hypothesis tests, multiple-comparison correction and power analysis.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, Discrete};

use super::{normal_quantile, round_to, RATE_PRECISION};

/// Default family-wise significance level.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Default statistical power for sample-size planning.
pub const DEFAULT_POWER: f64 = 0.80;

/// Relative tolerance when comparing probabilities for the two-sided test.
const PMF_TOLERANCE: f64 = 1.0 + 1e-7;

/// Outcome of a single significance test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Two-sided p-value, rounded to 4 places
    pub p_value: f64,
    /// `p_value < alpha`, decided on the unrounded p-value
    pub significant: bool,
}

/// Exact two-sided binomial test of `H0: p = expected_wr`.
///
/// The p-value sums the probability of every outcome that is no more likely
/// than the observed one. With no games there is nothing to test and the
/// result is `p = 1`.
pub fn binomial_test(wins: u32, total: u32, expected_wr: f64, alpha: f64) -> SignificanceResult {
    let p_value = binomial_p_value(wins.min(total), total, expected_wr.clamp(0.0, 1.0));

    SignificanceResult {
        p_value: round_to(p_value, RATE_PRECISION),
        significant: p_value < alpha,
    }
}

fn binomial_p_value(wins: u32, total: u32, p: f64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    if p == 0.0 {
        return if wins == 0 { 1.0 } else { 0.0 };
    }
    if p == 1.0 {
        return if wins == total { 1.0 } else { 0.0 };
    }

    let dist = match Binomial::new(p, u64::from(total)) {
        Ok(dist) => dist,
        Err(_) => return f64::NAN,
    };

    let threshold = dist.pmf(u64::from(wins)) * PMF_TOLERANCE;
    let p_value: f64 = (0..=u64::from(total))
        .map(|k| dist.pmf(k))
        .filter(|pmf| *pmf <= threshold)
        .sum();

    p_value.min(1.0)
}

/// Bonferroni-adjusted decisions for one family of tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonferroniCorrection {
    /// `alpha / N`, rounded to 6 places
    pub corrected_alpha: f64,
    /// Per-test decision, in input order
    pub significant: Vec<bool>,
}

/// Apply the Bonferroni correction across exactly the p-values given.
///
/// An empty family leaves `alpha` unchanged.
pub fn bonferroni_correction(p_values: &[f64], alpha: f64) -> BonferroniCorrection {
    if p_values.is_empty() {
        return BonferroniCorrection {
            corrected_alpha: alpha,
            significant: Vec::new(),
        };
    }

    let corrected_alpha = alpha / p_values.len() as f64;

    BonferroniCorrection {
        corrected_alpha: round_to(corrected_alpha, 6),
        significant: p_values.iter().map(|p| *p < corrected_alpha).collect(),
    }
}

/// Games needed to detect a synergy of `effect_size` above `baseline_wr`.
///
/// Normal-approximation sample size for a proportion test against a fixed
/// baseline:
///
/// ```text
/// n = ((z_a * sqrt(p0(1-p0)) + z_b * sqrt(p1(1-p1))) / effect)^2
/// ```
///
/// with `p1 = p0 + effect` and the one-sided critical value `z_a = z(1 - alpha)`,
/// since the question asked is whether a pair beats its baseline by at least
/// the effect. Returns `u32::MAX` for a zero effect.
pub fn required_sample_size(baseline_wr: f64, effect_size: f64, alpha: f64, power: f64) -> u32 {
    let effect = effect_size.abs();
    if effect == 0.0 {
        return u32::MAX;
    }

    let z_alpha = normal_quantile(1.0 - alpha);
    let z_beta = normal_quantile(power);

    let p0 = baseline_wr.clamp(0.0, 1.0);
    let p1 = (p0 + effect).clamp(0.0, 1.0);

    let n = ((z_alpha * (p0 * (1.0 - p0)).sqrt() + z_beta * (p1 * (1.0 - p1)).sqrt()) / effect)
        .powi(2);

    n.ceil().min(u32::MAX as f64) as u32
}

/// Power summary for one hero's synergy family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerAnalysis {
    pub current_max_samples: u32,
    pub required_for_3pct_synergy: u32,
    pub required_for_5pct_synergy: u32,
    pub required_for_10pct_synergy: u32,
    pub can_detect_effects: String,
}

/// Which synergy sizes the largest pair sample can resolve.
pub fn power_analysis(max_games_together: u32, baseline_wr: f64) -> PowerAnalysis {
    let required_3 = required_sample_size(baseline_wr, 0.03, DEFAULT_ALPHA, DEFAULT_POWER);
    let required_5 = required_sample_size(baseline_wr, 0.05, DEFAULT_ALPHA, DEFAULT_POWER);
    let required_10 = required_sample_size(baseline_wr, 0.10, DEFAULT_ALPHA, DEFAULT_POWER);

    let detectable = if max_games_together >= required_3 {
        ">=3%"
    } else if max_games_together >= required_5 {
        ">=5%"
    } else if max_games_together >= required_10 {
        ">=10%"
    } else {
        ">10% (low power)"
    };

    PowerAnalysis {
        current_max_samples: max_games_together,
        required_for_3pct_synergy: required_3,
        required_for_5pct_synergy: required_5,
        required_for_10pct_synergy: required_10,
        can_detect_effects: detectable.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binomial_clearly_significant() {
        let result = binomial_test(65, 100, 0.5, DEFAULT_ALPHA);
        assert!(result.significant);
        assert!(result.p_value < 0.01, "p = {}", result.p_value);
    }

    #[test]
    fn test_binomial_not_significant() {
        let result = binomial_test(52, 100, 0.5, DEFAULT_ALPHA);
        assert!(!result.significant);
        assert!(result.p_value > 0.5);
    }

    #[test]
    fn test_binomial_exact_match_to_expected() {
        let result = binomial_test(50, 100, 0.5, DEFAULT_ALPHA);
        assert!(!result.significant);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_binomial_small_exact_value() {
        // Bin(10, 0.5), observed 9: P(X <= 1) + P(X >= 9) = 22/1024
        let result = binomial_test(9, 10, 0.5, DEFAULT_ALPHA);
        assert_eq!(result.p_value, round_to(22.0 / 1024.0, 4));
        assert!(result.significant);
    }

    #[test]
    fn test_binomial_degenerate_inputs() {
        assert_eq!(binomial_test(0, 0, 0.5, DEFAULT_ALPHA).p_value, 1.0);
        assert_eq!(binomial_test(0, 10, 0.0, DEFAULT_ALPHA).p_value, 1.0);
        assert_eq!(binomial_test(3, 10, 0.0, DEFAULT_ALPHA).p_value, 0.0);
        assert_eq!(binomial_test(10, 10, 1.0, DEFAULT_ALPHA).p_value, 1.0);
    }

    #[test]
    fn test_binomial_moderate_sample_synergy() {
        // 124 wins in 207 games against a 0.535 baseline
        let result = binomial_test(124, 207, 0.535, DEFAULT_ALPHA);
        assert!(result.p_value > 0.01 && result.p_value < 0.2, "p = {}", result.p_value);
        assert!((result.p_value - 0.07).abs() < 0.005, "p = {}", result.p_value);
        assert!(!result.significant);
    }

    #[test]
    fn test_binomial_symmetric_tails_are_equal() {
        // Bin(20, 0.5): 15 and 5 wins sit on mirrored tails
        let high = binomial_test(15, 20, 0.5, DEFAULT_ALPHA);
        let low = binomial_test(5, 20, 0.5, DEFAULT_ALPHA);
        assert_eq!(high.p_value, low.p_value);
        assert_eq!(high.p_value, 0.0414);
    }

    #[test]
    fn test_bonferroni_three_comparisons() {
        let correction = bonferroni_correction(&[0.01, 0.04, 0.10], 0.05);

        assert_eq!(correction.corrected_alpha, 0.016667);
        assert_eq!(correction.significant, vec![true, false, false]);
    }

    #[test]
    fn test_bonferroni_edge_cases() {
        let empty = bonferroni_correction(&[], 0.05);
        assert!(empty.significant.is_empty());
        assert_eq!(empty.corrected_alpha, 0.05);

        let single = bonferroni_correction(&[0.03], 0.05);
        assert_eq!(single.corrected_alpha, 0.05);
        assert_eq!(single.significant, vec![true]);
    }

    #[test]
    fn test_required_sample_size_five_percent() {
        let n = required_sample_size(0.5, 0.05, 0.05, 0.80);
        assert!((600..=700).contains(&n), "n = {}", n);
        assert_eq!(n, 617);
    }

    #[test]
    fn test_required_sample_size_monotonic() {
        let n = required_sample_size(0.5, 0.05, 0.05, 0.80);

        assert!(required_sample_size(0.5, 0.03, 0.05, 0.80) > n);
        assert!(required_sample_size(0.5, 0.10, 0.05, 0.80) < n);
        assert!(required_sample_size(0.5, 0.05, 0.05, 0.90) > n);
        assert!(required_sample_size(0.5, 0.05, 0.01, 0.80) > n);
        assert_eq!(required_sample_size(0.5, 0.0, 0.05, 0.80), u32::MAX);
    }

    #[test]
    fn test_power_analysis_tiers() {
        let low = power_analysis(80, 0.5);
        assert_eq!(low.can_detect_effects, ">10% (low power)");

        let mid = power_analysis(700, 0.5);
        assert_eq!(mid.can_detect_effects, ">=5%");

        let high = power_analysis(5000, 0.5);
        assert_eq!(high.can_detect_effects, ">=3%");
        assert!(high.required_for_3pct_synergy > high.required_for_5pct_synergy);
    }
}

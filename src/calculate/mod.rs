//! Statistics calculation engine.
//!
//! Pure functions used by the analyzers:
//! - Win rates and Wilson score confidence intervals
//! - Baseline (expected) win rates for hero pairs
//! - Exact binomial significance tests with Bonferroni correction
//! - Required sample sizes for power reporting
//!
//! Every value returned here is a plain `f64`/`u32`, rounded where the
//! stored representation is rounded, so results can be written or
//! serialized without further conversion.

mod significance;

pub use significance::*;

use statrs::distribution::{ContinuousCDF, Normal};

use crate::models::BaselineModel;

/// Decimal places kept for rates, bounds and scores.
pub const RATE_PRECISION: u32 = 4;

/// Default confidence level for intervals.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

fn round_rate(value: f64) -> f64 {
    round_to(value, RATE_PRECISION)
}

/// Win rate as a fraction, rounded to 4 places. Zero games gives 0.0.
pub fn calculate_win_rate(wins: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_rate(wins as f64 / total as f64)
    }
}

/// Quantile of the standard normal distribution.
///
/// NaN outside `[0, 1]`.
pub fn normal_quantile(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(dist) => dist.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Two-sided critical value for a confidence level (1.96 for 0.95).
pub fn z_critical(confidence: f64) -> f64 {
    normal_quantile(1.0 - (1.0 - confidence) / 2.0)
}

/// Wilson score interval for a binomial proportion.
///
/// ```text
/// CI = (p + z^2/(2n) +/- z * sqrt(p(1-p)/n + z^2/(4n^2))) / (1 + z^2/n)
/// ```
///
/// Bounds are clamped to `[0, 1]` and rounded to 4 places. Returns
/// `(0.0, 0.0)` when `total == 0`.
pub fn wilson_confidence_interval(successes: u32, total: u32, confidence: f64) -> (f64, f64) {
    if total == 0 {
        return (0.0, 0.0);
    }

    let n = total as f64;
    let p = successes as f64 / n;
    let z = z_critical(confidence);
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = p + z2 / (2.0 * n);
    let spread = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();

    let lower = ((center - spread) / denom).max(0.0);
    let upper = ((center + spread) / denom).min(1.0);

    (round_rate(lower), round_rate(upper))
}

/// Average baseline: both heroes contribute equally.
pub fn expected_wr_average(wr_a: f64, wr_b: f64) -> f64 {
    round_rate((wr_a + wr_b) / 2.0)
}

/// Additive baseline: each hero's deviation from 50% stacks.
///
/// Clamped to `[0, 1]` so the result is always a valid proportion.
pub fn expected_wr_additive(wr_a: f64, wr_b: f64) -> f64 {
    let result = 0.5 + (wr_a - 0.5) + (wr_b - 0.5);
    round_rate(result.clamp(0.0, 1.0))
}

/// Expected pair win rate under the chosen baseline model.
pub fn expected_win_rate(model: BaselineModel, wr_a: f64, wr_b: f64) -> f64 {
    match model {
        BaselineModel::Average => expected_wr_average(wr_a, wr_b),
        BaselineModel::Additive => expected_wr_additive(wr_a, wr_b),
    }
}

/// Synergy score: actual minus expected, rounded to 4 places.
pub fn synergy_score(actual_wr: f64, expected_wr: f64) -> f64 {
    round_rate(actual_wr - expected_wr)
}

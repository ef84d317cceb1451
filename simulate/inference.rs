//! Hypothesis tests used to decide whether an age effect was detected.
//!
//! - Wald z-test for a single coefficient.
//! - Likelihood-ratio test for a block of coefficients (the spline term).
//! - Pearson chi-squared test of a 2x2 table (the cutpoint search metric).

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

// =============================================================================
// P-Value Calculation
// =============================================================================

/// Two-tailed p-value of a standard normal statistic: `2 * P(Z > |z|)`.
/// Returns NaN for a non-finite statistic.
pub fn pvalue_z(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.sf(z.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Wald test of `estimate = 0` given its standard error.
pub fn wald_p_value(estimate: f64, standard_error: f64) -> f64 {
    if !estimate.is_finite() || !standard_error.is_finite() || standard_error <= 0.0 {
        return f64::NAN;
    }
    pvalue_z(estimate / standard_error)
}

/// Upper-tail probability of a chi-squared statistic with `df` degrees of freedom.
///
/// Uses the survival function directly so that very small p-values keep their
/// resolution instead of collapsing to `1 - 1 = 0`.
pub fn chi_squared_p_value(statistic: f64, df: f64) -> f64 {
    if statistic.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if statistic <= 0.0 {
        return 1.0;
    }
    match ChiSquared::new(df) {
        Ok(dist) => dist.sf(statistic),
        Err(_) => f64::NAN,
    }
}

// =============================================================================
// Likelihood-Ratio Test
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LikelihoodRatioTest {
    /// Deviance drop from the reduced to the full model, floored at zero.
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Compares nested models by their deviances. `df` is the number of extra
/// coefficients in the full model. A negative deviance drop (possible only
/// through rounding) is treated as no improvement.
pub fn likelihood_ratio_test(
    reduced_deviance: f64,
    full_deviance: f64,
    df: usize,
) -> LikelihoodRatioTest {
    let statistic = (reduced_deviance - full_deviance).max(0.0);
    LikelihoodRatioTest {
        statistic,
        df,
        p_value: chi_squared_p_value(statistic, df as f64),
    }
}

// =============================================================================
// 2x2 Contingency Tables
// =============================================================================

/// Counts of a binary grouping against a binary outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TwoByTwo {
    pub below_events: usize,
    pub below_non_events: usize,
    pub above_events: usize,
    pub above_non_events: usize,
}

impl TwoByTwo {
    pub fn below_total(&self) -> usize {
        self.below_events + self.below_non_events
    }

    pub fn above_total(&self) -> usize {
        self.above_events + self.above_non_events
    }

    pub fn total(&self) -> usize {
        self.below_total() + self.above_total()
    }

    /// True when every margin is non-zero, so the chi-squared statistic exists.
    pub fn has_full_margins(&self) -> bool {
        self.below_total() > 0
            && self.above_total() > 0
            && self.below_events + self.above_events > 0
            && self.below_non_events + self.above_non_events > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquaredTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Pearson chi-squared test of independence on a 2x2 table (1 df), with
/// optional Yates continuity correction. `None` when a margin is empty.
pub fn pearson_chi_squared(table: &TwoByTwo, continuity_correction: bool) -> Option<ChiSquaredTest> {
    if !table.has_full_margins() {
        return None;
    }
    let a = table.below_events as f64;
    let b = table.below_non_events as f64;
    let c = table.above_events as f64;
    let d = table.above_non_events as f64;
    let n = a + b + c + d;

    let mut cross = (a * d - b * c).abs();
    if continuity_correction {
        cross = (cross - 0.5 * n).max(0.0);
    }
    let denominator = (a + b) * (c + d) * (a + c) * (b + d);
    let statistic = n * cross * cross / denominator;
    Some(ChiSquaredTest {
        statistic,
        p_value: chi_squared_p_value(statistic, 1.0),
    })
}

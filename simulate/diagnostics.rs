//! # Per-Fit Diagnostics
//!
//! One routine turns any fitted model into the five reported statistics, so the
//! four model kinds share a single ROC and likelihood code path.

use crate::config::SignalStrength;
use crate::model::FittedModel;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticsError {
    #[error("Got {scores} scores but {outcomes} outcomes.")]
    LengthMismatch { scores: usize, outcomes: usize },
    #[error("ROC area needs both classes; found {events} events and {non_events} non-events.")]
    SingleClass { events: usize, non_events: usize },
    #[error("Scores contain non-finite values.")]
    NonFiniteScores,
}

// =============================================================================
// ROC Curve
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocPoint {
    /// Rows with score at or above this value are classified positive.
    pub threshold: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

/// Empirical ROC curve with one point per distinct score.
///
/// Thresholds sweep the distinct scores in descending order. Tied scores enter
/// together, so ties contribute a diagonal segment. The curve starts at (0, 0)
/// and ends at (1, 1), and points come out in nondecreasing FPR order.
pub fn roc_curve(
    scores: ArrayView1<f64>,
    outcomes: ArrayView1<f64>,
) -> Result<Vec<RocPoint>, DiagnosticsError> {
    if scores.len() != outcomes.len() {
        return Err(DiagnosticsError::LengthMismatch {
            scores: scores.len(),
            outcomes: outcomes.len(),
        });
    }
    if !scores.iter().all(|s| s.is_finite()) {
        return Err(DiagnosticsError::NonFiniteScores);
    }

    let events = outcomes.iter().filter(|&&y| y > 0.5).count();
    let non_events = outcomes.len() - events;
    if events == 0 || non_events == 0 {
        return Err(DiagnosticsError::SingleClass { events, non_events });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut points = Vec::with_capacity(order.len() + 1);
    points.push(RocPoint {
        threshold: f64::INFINITY,
        false_positive_rate: 0.0,
        true_positive_rate: 0.0,
    });

    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if outcomes[order[i]] > 0.5 {
                true_positives += 1;
            } else {
                false_positives += 1;
            }
            i += 1;
        }
        points.push(RocPoint {
            threshold,
            false_positive_rate: false_positives as f64 / non_events as f64,
            true_positive_rate: true_positives as f64 / events as f64,
        });
    }
    Ok(points)
}

/// Trapezoidal area under a polyline.
///
/// Segments are accumulated with their signed width and the magnitude of the
/// total is returned, so traversing the same points in reverse gives the same
/// area.
pub fn trapezoid_area(x: &[f64], y: &[f64]) -> f64 {
    let signed: f64 = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[1] + ys[0]) * 0.5)
        .sum();
    signed.abs()
}

/// Area under the empirical ROC curve of `scores` against 0/1 `outcomes`.
pub fn roc_area(scores: ArrayView1<f64>, outcomes: ArrayView1<f64>) -> Result<f64, DiagnosticsError> {
    let curve = roc_curve(scores, outcomes)?;
    let fpr: Vec<f64> = curve.iter().map(|p| p.false_positive_rate).collect();
    let tpr: Vec<f64> = curve.iter().map(|p| p.true_positive_rate).collect();
    Ok(trapezoid_area(&fpr, &tpr))
}

// =============================================================================
// Likelihood-Based Measures
// =============================================================================

/// McFadden pseudo-R²: `1 - ll / ll_null`. Not clipped; a zero null
/// log-likelihood gives a non-finite value.
pub fn pseudo_r2(log_likelihood: f64, null_log_likelihood: f64) -> f64 {
    1.0 - log_likelihood / null_log_likelihood
}

// =============================================================================
// Diagnostic Records
// =============================================================================

/// Rows of the reported table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Diagnostic {
    RocArea,
    Deviance,
    Aic,
    PseudoR2,
    EffectDetected,
}

impl Diagnostic {
    pub const ALL: [Diagnostic; 5] = [
        Diagnostic::RocArea,
        Diagnostic::Deviance,
        Diagnostic::Aic,
        Diagnostic::PseudoR2,
        Diagnostic::EffectDetected,
    ];

    pub fn index(self) -> usize {
        match self {
            Diagnostic::RocArea => 0,
            Diagnostic::Deviance => 1,
            Diagnostic::Aic => 2,
            Diagnostic::PseudoR2 => 3,
            Diagnostic::EffectDetected => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Diagnostic::RocArea => "roc-area",
            Diagnostic::Deviance => "deviance",
            Diagnostic::Aic => "aic",
            Diagnostic::PseudoR2 => "pseudo-r2",
            Diagnostic::EffectDetected => "effect-detected",
        }
    }

    /// Row label in a rendered table. The detection row reads as power under a
    /// true effect and as type I error without one.
    pub fn label(self, signal: SignalStrength) -> &'static str {
        match self {
            Diagnostic::RocArea => "ROC area",
            Diagnostic::Deviance => "deviance",
            Diagnostic::Aic => "AIC",
            Diagnostic::PseudoR2 => "pseudo R2",
            Diagnostic::EffectDetected => signal.detection_label(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The five statistics for one fitted model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticRecord {
    pub roc_area: f64,
    pub deviance: f64,
    pub aic: f64,
    pub pseudo_r2: f64,
    pub effect_detected: bool,
}

impl DiagnosticRecord {
    /// Values in `Diagnostic::ALL` order, with detection as 0 or 1.
    pub fn values(&self) -> [f64; 5] {
        [
            self.roc_area,
            self.deviance,
            self.aic,
            self.pseudo_r2,
            if self.effect_detected { 1.0 } else { 0.0 },
        ]
    }
}

/// Computes the diagnostics of `model` against the observed outcome.
///
/// `null_log_likelihood` comes from the intercept-only fit of the same outcome;
/// pass NaN when that fit failed and the pseudo-R² cell will be dropped.
pub fn diagnose(
    model: &FittedModel,
    outcome: ArrayView1<f64>,
    null_log_likelihood: f64,
    significance_level: f64,
) -> Result<DiagnosticRecord, DiagnosticsError> {
    Ok(DiagnosticRecord {
        roc_area: roc_area(model.fitted(), outcome)?,
        deviance: model.deviance(),
        aic: model.aic(),
        pseudo_r2: pseudo_r2(model.log_likelihood(), null_log_likelihood),
        effect_detected: model.effect_p_value < significance_level,
    })
}

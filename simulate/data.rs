//! # Synthetic Data Generation
//!
//! Produces one replication's dataset: a rounded, folded-normal age that is
//! standardized over the whole sample, a Bernoulli sex indicator, and a binary
//! outcome drawn from the scenario's true logistic model.
//!
//! Standardization couples the rows: the realized scale and median depend on
//! the entire sample, so every downstream consumer (cutpoint search, spline
//! basis, the true cutpoint scenarios) sees the same standardized column.

use crate::config::{Configuration, StudyConfig};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Cannot standardize {0} values; at least 2 are required.")]
    InsufficientSamples(usize),
    #[error("Cannot standardize a column with zero variance (every value equals {0}).")]
    ZeroVariance(f64),
    #[error("Invalid distribution parameters: {0}")]
    InvalidDistribution(String),
}

/// One replication's data. All columns have the same length.
#[derive(Debug, Clone)]
pub struct SimulatedDataset {
    /// Standardized age (sample mean 0, sample standard deviation 1).
    pub age: Array1<f64>,
    /// Age before standardization, in whole years.
    pub age_raw: Array1<f64>,
    /// Sex indicator, 0 or 1.
    pub sex: Array1<f64>,
    /// Binary outcome, 0 or 1.
    pub outcome: Array1<f64>,
    /// The true event probability each outcome was drawn from.
    pub true_probability: Array1<f64>,
}

impl SimulatedDataset {
    pub fn len(&self) -> usize {
        self.outcome.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcome.is_empty()
    }

    /// Sample median of the standardized age column.
    pub fn age_median(&self) -> f64 {
        median(self.age.view())
    }
}

/// Draws one dataset of `n` rows for the given configuration.
///
/// Draw order is fixed (all ages, then all sexes, then all outcomes) so a
/// given RNG state always reproduces the same dataset.
pub fn generate<R: Rng>(
    n: usize,
    configuration: Configuration,
    config: &StudyConfig,
    rng: &mut R,
) -> Result<SimulatedDataset, DataError> {
    let age_dist = Normal::new(config.age_mean, config.age_sd)
        .map_err(|e| DataError::InvalidDistribution(e.to_string()))?;
    let sex_dist = Bernoulli::new(config.sex_probability)
        .map_err(|e| DataError::InvalidDistribution(e.to_string()))?;

    let age_raw: Array1<f64> = (0..n)
        .map(|_| age_dist.sample(rng).abs().round())
        .collect();
    let age = standardize(age_raw.view())?;
    let sex: Array1<f64> = (0..n)
        .map(|_| if sex_dist.sample(rng) { 1.0 } else { 0.0 })
        .collect();

    let age_median = median(age.view());
    let age_coefficient = configuration.signal.age_coefficient(config);
    let true_probability: Array1<f64> = age
        .iter()
        .zip(sex.iter())
        .map(|(&a, &s)| {
            let eta = configuration.scenario.linear_predictor(
                a,
                s,
                age_median,
                age_coefficient,
                config.sex_coefficient,
                config.cutpoint_offset,
            );
            inverse_logit(eta)
        })
        .collect();

    let outcome: Array1<f64> = true_probability
        .iter()
        .map(|&p| if rng.gen_bool(p) { 1.0 } else { 0.0 })
        .collect();

    Ok(SimulatedDataset {
        age,
        age_raw,
        sex,
        outcome,
        true_probability,
    })
}

pub fn inverse_logit(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// Z-scores a column using the sample (n - 1) standard deviation.
pub fn standardize(values: ArrayView1<f64>) -> Result<Array1<f64>, DataError> {
    let n = values.len();
    if n < 2 {
        return Err(DataError::InsufficientSamples(n));
    }
    let mean = values.sum() / n as f64;
    let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    let sd = variance.sqrt();
    if !(sd > 0.0) {
        return Err(DataError::ZeroVariance(values[0]));
    }
    Ok(values.mapv(|v| (v - mean) / sd))
}

/// Sample median; the mean of the two middle values for even lengths.
/// Returns NaN for an empty input.
pub fn median(values: ArrayView1<f64>) -> f64 {
    let mut sorted = values.to_vec();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

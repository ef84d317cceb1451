//! # Single-Draw Illustration
//!
//! One large dataset per configuration, fitted with all four models, so the
//! shape of each fitted age curve can be plotted against the true probability.

use crate::config::{Configuration, StudyConfig};
use crate::data::{DataError, generate};
use crate::model::{ModelKind, fit_all};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IllustrateError {
    #[error("Failed to generate the illustration dataset: {0}")]
    Data(#[from] DataError),
}

/// One row of the illustration dataset with every model's fitted probability.
#[derive(Debug, Clone, PartialEq)]
pub struct IllustrationRow {
    pub age: f64,
    pub age_raw: f64,
    pub sex: f64,
    pub outcome: f64,
    pub true_probability: f64,
    /// `None` where the model failed to fit.
    pub fitted: [Option<f64>; 4],
}

/// How one model came out on the illustration dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct IllustrationModel {
    pub kind: ModelKind,
    pub coefficients: Option<Vec<f64>>,
    pub cutpoint: Option<f64>,
    pub effect_p_value: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Illustration {
    pub configuration: Configuration,
    pub rows: Vec<IllustrationRow>,
    pub models: Vec<IllustrationModel>,
}

/// Draws `illustration_sample_size` rows with the base seed and fits every model.
pub fn illustrate(
    configuration: Configuration,
    config: &StudyConfig,
) -> Result<Illustration, IllustrateError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = generate(config.illustration_sample_size, configuration, config, &mut rng)?;
    let fits = fit_all(&dataset, config);

    let models: Vec<IllustrationModel> = fits
        .iter()
        .map(|(kind, result)| match result {
            Ok(model) => IllustrationModel {
                kind,
                coefficients: Some(model.fit.coefficients.to_vec()),
                cutpoint: model.cutpoint,
                effect_p_value: Some(model.effect_p_value),
                error: None,
            },
            Err(e) => {
                log::warn!("[{configuration}] {kind} model failed on the illustration dataset: {e}");
                IllustrationModel {
                    kind,
                    coefficients: None,
                    cutpoint: None,
                    effect_p_value: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    let rows = (0..dataset.len())
        .map(|i| IllustrationRow {
            age: dataset.age[i],
            age_raw: dataset.age_raw[i],
            sex: dataset.sex[i],
            outcome: dataset.outcome[i],
            true_probability: dataset.true_probability[i],
            fitted: ModelKind::ALL.map(|kind| fits.get(kind).as_ref().ok().map(|m| m.fit.fitted[i])),
        })
        .collect();

    log::info!(
        "[{configuration}] illustration fitted on {} rows",
        dataset.len()
    );
    Ok(Illustration {
        configuration,
        rows,
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Scenario, SignalStrength};

    #[test]
    fn illustration_has_one_row_per_draw_and_every_model() {
        let config = StudyConfig {
            illustration_sample_size: 2000,
            ..StudyConfig::default()
        };
        let configuration = Configuration::new(Scenario::OffMedianCutpoint, SignalStrength::Strong);
        let illustration = illustrate(configuration, &config).unwrap();

        assert_eq!(illustration.rows.len(), 2000);
        assert_eq!(illustration.models.len(), 4);
        assert!(illustration.models.iter().all(|m| m.error.is_none()));
        for row in &illustration.rows {
            assert!(row.fitted.iter().all(|p| p.is_some_and(|p| p > 0.0 && p < 1.0)));
        }

        let median = &illustration.models[ModelKind::MedianCutpoint.index()];
        assert!(median.cutpoint.is_some());
        assert_eq!(median.coefficients.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn illustration_is_reproducible() {
        let config = StudyConfig {
            illustration_sample_size: 500,
            ..StudyConfig::default()
        };
        let configuration = Configuration::new(Scenario::Continuous, SignalStrength::Weak);
        let a = illustrate(configuration, &config).unwrap();
        let b = illustrate(configuration, &config).unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.models, b.models);
    }
}

//! # The Four Competing Models
//!
//! Each replication fits the same outcome four ways, differing only in how age
//! enters the linear predictor:
//!
//! | kind       | design columns                  | effect test            |
//! |------------|---------------------------------|------------------------|
//! | continuous | 1, sex, age                     | Wald on age            |
//! | median     | 1, I(age >= median), sex        | Wald on the indicator  |
//! | optimal    | 1, I(age >= c*), sex            | Wald on the indicator  |
//! | spline     | 1, ns(age, df), sex             | LRT against 1, sex     |
//!
//! Fits fail independently: a separated optimal-cutpoint fit does not prevent
//! the other three from being reported.

use crate::basis::{BasisError, natural_spline_basis};
use crate::config::StudyConfig;
use crate::cutpoint::{CutpointError, find_optimal_cutpoint};
use crate::data::SimulatedDataset;
use crate::inference::likelihood_ratio_test;
use crate::irls::{FitError, LogisticFit, fit_logistic, fit_null_model};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How age enters the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Continuous,
    #[serde(rename = "median")]
    MedianCutpoint,
    #[serde(rename = "optimal")]
    OptimalCutpoint,
    Spline,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Continuous,
        ModelKind::MedianCutpoint,
        ModelKind::OptimalCutpoint,
        ModelKind::Spline,
    ];

    /// Column position in the diagnostics matrix.
    pub fn index(self) -> usize {
        match self {
            ModelKind::Continuous => 0,
            ModelKind::MedianCutpoint => 1,
            ModelKind::OptimalCutpoint => 2,
            ModelKind::Spline => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Continuous => "continuous",
            ModelKind::MedianCutpoint => "median",
            ModelKind::OptimalCutpoint => "optimal",
            ModelKind::Spline => "spline",
        }
    }

    /// Whether the model dichotomizes age at a chosen cutpoint.
    pub fn is_cutpoint(self) -> bool {
        matches!(self, ModelKind::MedianCutpoint | ModelKind::OptimalCutpoint)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Logistic regression failed: {0}")]
    Fit(#[from] FitError),
    #[error("Cutpoint search failed: {0}")]
    Cutpoint(#[from] CutpointError),
    #[error("Spline basis construction failed: {0}")]
    Basis(#[from] BasisError),
}

impl ModelError {
    /// Short stable name used when tallying failures.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::Fit(e) => e.kind(),
            ModelError::Cutpoint(CutpointError::NoValidCutpoint { .. }) => "no-valid-cutpoint",
            ModelError::Cutpoint(_) => "cutpoint",
            ModelError::Basis(_) => "basis",
        }
    }
}

/// One successfully fitted model.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub kind: ModelKind,
    pub fit: LogisticFit,
    /// Threshold on standardized age, for the two cutpoint models.
    pub cutpoint: Option<f64>,
    /// Coefficient on the single age term; `None` for the spline.
    pub age_coefficient: Option<f64>,
    /// Wald p-value of the age term, or the spline's likelihood-ratio p-value.
    pub effect_p_value: f64,
}

impl FittedModel {
    pub fn fitted(&self) -> ArrayView1<'_, f64> {
        self.fit.fitted.view()
    }

    pub fn deviance(&self) -> f64 {
        self.fit.deviance
    }

    pub fn aic(&self) -> f64 {
        self.fit.aic
    }

    pub fn log_likelihood(&self) -> f64 {
        self.fit.log_likelihood
    }
}

/// All four fits of one dataset plus the shared intercept-only fit.
#[derive(Debug)]
pub struct FittedModels {
    models: [Result<FittedModel, ModelError>; 4],
    /// Log-likelihood of the intercept-only model on the same outcome.
    pub null_log_likelihood: Result<f64, FitError>,
}

impl FittedModels {
    pub fn get(&self, kind: ModelKind) -> &Result<FittedModel, ModelError> {
        &self.models[kind.index()]
    }

    /// Models in `ModelKind::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (ModelKind, &Result<FittedModel, ModelError>)> {
        ModelKind::ALL.into_iter().zip(self.models.iter())
    }
}

/// Fits every model to `dataset`.
pub fn fit_all(dataset: &SimulatedDataset, config: &StudyConfig) -> FittedModels {
    let models = ModelKind::ALL.map(|kind| fit_model(kind, dataset, config));
    let null_log_likelihood =
        fit_null_model(dataset.outcome.view(), &config.solver).map(|fit| fit.log_likelihood);
    FittedModels {
        models,
        null_log_likelihood,
    }
}

/// Fits a single model kind.
pub fn fit_model(
    kind: ModelKind,
    dataset: &SimulatedDataset,
    config: &StudyConfig,
) -> Result<FittedModel, ModelError> {
    let age = dataset.age.view();
    let sex = dataset.sex.view();
    let y = dataset.outcome.view();
    let solver = &config.solver;

    match kind {
        ModelKind::Continuous => {
            let x = design_matrix(&[sex, age]);
            let fit = fit_logistic(x.view(), y, solver)?;
            Ok(single_term_model(kind, fit, 2, None))
        }
        ModelKind::MedianCutpoint => {
            let cutpoint = dataset.age_median();
            let indicator = dichotomize(age, cutpoint);
            let x = design_matrix(&[indicator.view(), sex]);
            let fit = fit_logistic(x.view(), y, solver)?;
            Ok(single_term_model(kind, fit, 1, Some(cutpoint)))
        }
        ModelKind::OptimalCutpoint => {
            let search = find_optimal_cutpoint(age, y, &config.cutpoint)?;
            log::debug!(
                "Optimal cutpoint {:.4} (chi-squared {:.3}, p = {:.3e}) from {} candidates",
                search.cutpoint,
                search.statistic,
                search.p_value,
                search.candidates_evaluated
            );
            let indicator = dichotomize(age, search.cutpoint);
            let x = design_matrix(&[indicator.view(), sex]);
            let fit = fit_logistic(x.view(), y, solver)?;
            Ok(single_term_model(kind, fit, 1, Some(search.cutpoint)))
        }
        ModelKind::Spline => {
            let spline = natural_spline_basis(age, config.spline_df)?;
            let mut columns: Vec<ArrayView1<f64>> = spline.basis.axis_iter(Axis(1)).collect();
            columns.push(sex);
            let full = design_matrix(&columns);
            let reduced = design_matrix(&[sex]);

            let fit = fit_logistic(full.view(), y, solver)?;
            let reduced_fit = fit_logistic(reduced.view(), y, solver)?;
            let lrt = likelihood_ratio_test(reduced_fit.deviance, fit.deviance, spline.basis.ncols());
            Ok(FittedModel {
                kind,
                fit,
                cutpoint: None,
                age_coefficient: None,
                effect_p_value: lrt.p_value,
            })
        }
    }
}

/// `0` below the cutpoint, `1` at or above it.
pub fn dichotomize(values: ArrayView1<f64>, cutpoint: f64) -> Array1<f64> {
    values.mapv(|v| if v < cutpoint { 0.0 } else { 1.0 })
}

/// Prepends an intercept column to the given covariates.
pub fn design_matrix(columns: &[ArrayView1<f64>]) -> Array2<f64> {
    let n = columns.first().map_or(0, |c| c.len());
    let mut x = Array2::<f64>::ones((n, columns.len() + 1));
    for (j, column) in columns.iter().enumerate() {
        x.column_mut(j + 1).assign(column);
    }
    x
}

fn single_term_model(
    kind: ModelKind,
    fit: LogisticFit,
    term: usize,
    cutpoint: Option<f64>,
) -> FittedModel {
    let effect_p_value = fit.wald_p_value(term);
    let age_coefficient = Some(fit.coefficients[term]);
    FittedModel {
        kind,
        fit,
        cutpoint,
        age_coefficient,
        effect_p_value,
    }
}

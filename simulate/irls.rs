//! # Logistic Regression by IRLS
//!
//! Maximum-likelihood fitting of a binomial GLM with logit link. The loop is the
//! classic Fisher scoring iteration: form working weights and a working response
//! from the current linear predictor, solve the weighted normal equations by
//! Cholesky, and halve the step whenever the deviance fails to decrease.
//!
//! The design matrix passed in must already contain the intercept column.

use crate::config::SolverConfig;
use crate::inference::wald_p_value;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_linalg::{InverseC, SolveC};
use thiserror::Error;

/// Working weights never drop below this, keeping XᵀWX positive definite.
const MIN_WEIGHT: f64 = 1e-6;
/// Fitted probabilities are kept this far from 0 and 1.
const PROB_EPS: f64 = 1e-8;
const MAX_STEP_HALVINGS: usize = 30;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Design matrix has {rows} rows but the response has {response} values.")]
    DimensionMismatch { rows: usize, response: usize },

    #[error("Design column {column} is constant; its coefficient is not identifiable.")]
    ConstantCovariate { column: usize },

    #[error("The information matrix XᵀWX is not positive definite at iteration {iteration}.")]
    SingularInformation { iteration: usize },

    #[error("Fitted linear predictor reached {max_abs_eta:.1}; the data appear separated.")]
    PerfectSeparation { max_abs_eta: f64 },

    #[error(
        "IRLS did not converge within {max_iterations} iterations. Last relative deviance change was {last_change:.6e}."
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Non-finite values appeared in the IRLS state at iteration {iteration}.")]
    NonFiniteState { iteration: usize },
}

impl FitError {
    /// Short stable name used when tallying failures.
    pub fn kind(&self) -> &'static str {
        match self {
            FitError::DimensionMismatch { .. } => "dimension-mismatch",
            FitError::ConstantCovariate { .. } => "constant-covariate",
            FitError::SingularInformation { .. } => "singular-information",
            FitError::PerfectSeparation { .. } => "separation",
            FitError::DidNotConverge { .. } => "no-convergence",
            FitError::NonFiniteState { .. } => "non-finite",
        }
    }
}

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// Step halving could not lower the deviance any further, but the score
    /// vector at the current point vanishes to working precision.
    StalledAtValidMinimum,
}

/// A converged logistic regression fit.
#[derive(Clone, Debug)]
pub struct LogisticFit {
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub covariance: Array2<f64>,
    pub linear_predictor: Array1<f64>,
    pub fitted: Array1<f64>,
    /// Binomial deviance, `-2 * log_likelihood` for 0/1 outcomes.
    pub deviance: f64,
    pub log_likelihood: f64,
    /// `deviance + 2 * number_of_coefficients`.
    pub aic: f64,
    pub iterations: usize,
    pub status: FitStatus,
}

impl LogisticFit {
    pub fn num_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// Two-sided Wald test p-value for coefficient `index`.
    pub fn wald_p_value(&self, index: usize) -> f64 {
        wald_p_value(self.coefficients[index], self.standard_errors[index])
    }
}

/// Fits `y ~ x` by IRLS. `y` must hold 0/1 values.
pub fn fit_logistic(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &SolverConfig,
) -> Result<LogisticFit, FitError> {
    if x.nrows() != y.len() {
        return Err(FitError::DimensionMismatch {
            rows: x.nrows(),
            response: y.len(),
        });
    }
    check_identifiable_columns(x)?;

    let p = x.ncols();
    let mut beta = Array1::<f64>::zeros(p);
    let mut eta = x.dot(&beta);
    let (mut mu, mut weights, mut z) = update_glm_vectors(y, &eta);
    let mut last_deviance = calculate_deviance(y, &mu);
    let mut last_change = f64::INFINITY;
    let mut status = None;
    let mut iterations = 0;

    for iter in 1..=config.max_iterations {
        iterations = iter;

        if !z.iter().all(|v| v.is_finite()) || !weights.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteState { iteration: iter });
        }

        let (xtwx, xtwz) = weighted_normal_equations(x, weights.view(), z.view());
        let beta_proposal = xtwx
            .solvec(&xtwz)
            .map_err(|_| FitError::SingularInformation { iteration: iter })?;
        if !beta_proposal.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFiniteState { iteration: iter });
        }

        let beta_current = beta.clone();
        let mut beta_trial = beta_proposal;
        let mut eta_trial = x.dot(&beta_trial);
        let (mut mu_trial, _, _) = update_glm_vectors(y, &eta_trial);
        let mut deviance_trial = calculate_deviance(y, &mu_trial);

        let mut step_halving_count = 0;
        while (!deviance_trial.is_finite() || deviance_trial > last_deviance)
            && step_halving_count < MAX_STEP_HALVINGS
        {
            beta_trial = &beta_current + 0.5 * (&beta_trial - &beta_current);
            eta_trial = x.dot(&beta_trial);
            mu_trial = update_glm_vectors(y, &eta_trial).0;
            deviance_trial = calculate_deviance(y, &mu_trial);
            step_halving_count += 1;
        }

        if !deviance_trial.is_finite() || deviance_trial > last_deviance {
            status = Some(resolve_stall(x, y, &mu, last_deviance, last_change, config)?);
            log::debug!("IRLS stalled at a valid minimum after {iter} iterations");
            break;
        }

        if step_halving_count > 0 {
            log::debug!("Step halving successful after {step_halving_count} attempts");
        }

        beta = beta_trial;
        eta = eta_trial;
        last_change = (deviance_trial - last_deviance).abs() / (deviance_trial.abs() + 0.1);
        last_deviance = deviance_trial;
        (mu, weights, z) = update_glm_vectors(y, &eta);

        let max_abs_eta = eta.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if max_abs_eta > config.separation_threshold {
            return Err(FitError::PerfectSeparation { max_abs_eta });
        }

        log::debug!(
            "[IRLS Iter #{iter}] deviance: {last_deviance:.8e}, relative change: {last_change:.3e}"
        );

        if last_change < config.convergence_tolerance {
            status = Some(FitStatus::Converged);
            break;
        }
    }

    let status = status.ok_or(FitError::DidNotConverge {
        max_iterations: config.max_iterations,
        last_change,
    })?;

    let (xtwx, _) = weighted_normal_equations(x, weights.view(), z.view());
    let covariance = xtwx
        .invc()
        .map_err(|_| FitError::SingularInformation {
            iteration: iterations,
        })?;
    let standard_errors = covariance.diag().mapv(f64::sqrt);
    if !standard_errors.iter().all(|v| v.is_finite()) {
        return Err(FitError::NonFiniteState {
            iteration: iterations,
        });
    }

    let deviance = last_deviance;
    Ok(LogisticFit {
        coefficients: beta,
        standard_errors,
        covariance,
        linear_predictor: eta,
        fitted: mu,
        deviance,
        log_likelihood: -0.5 * deviance,
        aic: deviance + 2.0 * p as f64,
        iterations,
        status,
    })
}

/// Fits the intercept-only model on `y`.
pub fn fit_null_model(y: ArrayView1<f64>, config: &SolverConfig) -> Result<LogisticFit, FitError> {
    let x = Array2::<f64>::ones((y.len(), 1));
    fit_logistic(x.view(), y, config)
}

/// Decides a fit whose step halving ran out. The current point is accepted
/// only when its score vector vanishes to working precision.
fn resolve_stall(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    mu: &Array1<f64>,
    deviance: f64,
    last_change: f64,
    config: &SolverConfig,
) -> Result<FitStatus, FitError> {
    let score = relative_score_norm(x, y, mu, deviance);
    if score < config.convergence_tolerance.sqrt() {
        Ok(FitStatus::StalledAtValidMinimum)
    } else {
        log::debug!("Step halving exhausted away from the optimum (relative score {score:.3e})");
        Err(FitError::DidNotConverge {
            max_iterations: config.max_iterations,
            last_change,
        })
    }
}

/// Largest component of `Xᵀ(y - mu)`, relative to the deviance scale.
fn relative_score_norm(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    mu: &Array1<f64>,
    deviance: f64,
) -> f64 {
    let score = x.t().dot(&(&y - mu));
    let largest = score.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
    largest / (deviance.abs() + 0.1)
}

/// Rejects non-intercept columns with zero variance. Column 0 is the intercept.
fn check_identifiable_columns(x: ArrayView2<f64>) -> Result<(), FitError> {
    for (column, values) in x.axis_iter(Axis(1)).enumerate().skip(1) {
        let first = values.first().copied().unwrap_or(0.0);
        if values.iter().all(|&v| v == first) {
            return Err(FitError::ConstantCovariate { column });
        }
    }
    Ok(())
}

/// Forms `XᵀWX` and `XᵀWz`.
fn weighted_normal_equations(
    x: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    z: ArrayView1<f64>,
) -> (Array2<f64>, Array1<f64>) {
    let xw = &x * &weights.insert_axis(Axis(1));
    let xtwx = xw.t().dot(&x);
    let xtwz = xw.t().dot(&z);
    (xtwx, xtwz)
}

/// Returns `(mu, weights, z)` for the logit link at linear predictor `eta`.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    // Clamp eta to prevent overflow in exp
    let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
    let mut mu = eta_clamped.mapv(|e| 1.0 / (1.0 + (-e).exp()));
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
    let z = &eta_clamped + &((&y - &mu) / &weights);
    (mu, weights, z)
}

/// Binomial deviance of fitted probabilities `mu` against `y`.
pub fn calculate_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total_residual = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS {
            yi * (yi.ln() - mui_c.ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total_residual
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, array, s};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn simulate_logistic(n: usize, beta: &[f64], seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::ones((n, beta.len()));
        for j in 1..beta.len() {
            for i in 0..n {
                x[[i, j]] = rng.r#gen::<f64>() * 4.0 - 2.0;
            }
        }
        let eta = x.dot(&Array1::from(beta.to_vec()));
        let y = eta.mapv(|e| {
            let p = 1.0 / (1.0 + (-e).exp());
            if rng.r#gen::<f64>() < p { 1.0 } else { 0.0 }
        });
        (x, y)
    }

    #[test]
    fn recovers_known_coefficients() {
        let (x, y) = simulate_logistic(20_000, &[-0.5, 1.2, -0.7], 42);
        let fit = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert!((fit.coefficients[0] + 0.5).abs() < 0.08);
        assert!((fit.coefficients[1] - 1.2).abs() < 0.08);
        assert!((fit.coefficients[2] + 0.7).abs() < 0.08);
        assert!(fit.fitted.iter().all(|&m| m > 0.0 && m < 1.0));
    }

    #[test]
    fn score_equations_hold_at_convergence() {
        // At the MLE, Xᵀ(y - mu) = 0.
        let (x, y) = simulate_logistic(800, &[0.3, 0.8], 7);
        let fit = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap();
        let score = x.t().dot(&(&y - &fit.fitted));
        assert!(score.iter().all(|s| s.abs() < 1e-5), "score {score:?}");
    }

    #[test]
    fn deviance_aic_and_log_likelihood_are_consistent() {
        let (x, y) = simulate_logistic(500, &[0.0, 1.0], 9);
        let fit = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap();
        assert_relative_eq!(fit.log_likelihood, -0.5 * fit.deviance, epsilon = 1e-12);
        assert_relative_eq!(fit.aic, fit.deviance + 4.0, epsilon = 1e-12);
        let direct: f64 = y
            .iter()
            .zip(fit.fitted.iter())
            .map(|(&yi, &mi)| yi * mi.ln() + (1.0 - yi) * (1.0 - mi).ln())
            .sum();
        assert_relative_eq!(fit.log_likelihood, direct, epsilon = 1e-8);
    }

    #[test]
    fn null_model_matches_closed_form() {
        let y = array![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0];
        let fit = fit_null_model(y.view(), &SolverConfig::default()).unwrap();
        let p: f64 = 5.0 / 8.0;
        assert_relative_eq!(fit.coefficients[0], (p / (1.0 - p)).ln(), epsilon = 1e-7);
        let expected_ll = 5.0 * p.ln() + 3.0 * (1.0 - p).ln();
        assert_relative_eq!(fit.log_likelihood, expected_ll, epsilon = 1e-9);
    }

    #[test]
    fn standard_error_matches_two_group_formula() {
        // For a single binary covariate the slope SE is sqrt(1/a + 1/b + 1/c + 1/d).
        let mut x = Array2::ones((100, 2));
        x.slice_mut(s![50.., 1]).fill(0.0);
        let mut y = Array1::zeros(100);
        y.slice_mut(s![0..30]).fill(1.0); // 30/50 events in group 1
        y.slice_mut(s![50..60]).fill(1.0); // 10/50 events in group 0
        let fit = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap();
        let expected = (1.0 / 30.0 + 1.0 / 20.0 + 1.0 / 10.0 + 1.0 / 40.0_f64).sqrt();
        assert_relative_eq!(fit.standard_errors[1], expected, epsilon = 1e-6);
        let log_or = ((30.0 / 20.0) / (10.0 / 40.0_f64)).ln();
        assert_relative_eq!(fit.coefficients[1], log_or, epsilon = 1e-6);
        assert!(fit.wald_p_value(1) < 1e-3);
    }

    #[test]
    fn exhausted_step_halving_is_accepted_only_at_the_optimum() {
        let (x, y) = simulate_logistic(1000, &[0.2, 1.5], 11);
        let config = SolverConfig::default();
        let fit = fit_logistic(x.view(), y.view(), &config).unwrap();
        let at_optimum = resolve_stall(x.view(), y.view(), &fit.fitted, fit.deviance, 1e-3, &config);
        assert_eq!(at_optimum, Ok(FitStatus::StalledAtValidMinimum));

        // Every fitted probability at one half is the starting point, far from
        // the optimum for a slope of 1.5.
        let start = Array1::from_elem(y.len(), 0.5);
        let start_deviance = calculate_deviance(y.view(), &start);
        let far = resolve_stall(x.view(), y.view(), &start, start_deviance, 1e-3, &config);
        assert_eq!(
            far,
            Err(FitError::DidNotConverge {
                max_iterations: config.max_iterations,
                last_change: 1e-3,
            })
        );
    }

    #[test]
    fn constant_covariate_is_rejected() {
        let mut x = Array2::ones((10, 2));
        x.column_mut(1).fill(0.0);
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let err = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap_err();
        assert_eq!(err, FitError::ConstantCovariate { column: 1 });
        assert_eq!(err.kind(), "constant-covariate");
    }

    #[test]
    fn separated_data_is_reported() {
        let x = array![[1.0, -2.0], [1.0, -1.0], [1.0, -0.5], [1.0, 0.5], [1.0, 1.0], [1.0, 2.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let err = fit_logistic(x.view(), y.view(), &SolverConfig::default()).unwrap_err();
        assert!(
            matches!(
                err,
                FitError::PerfectSeparation { .. } | FitError::DidNotConverge { .. }
            ),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let x = Array2::ones((4, 1));
        let y = array![0.0, 1.0, 1.0];
        assert!(matches!(
            fit_logistic(x.view(), y.view(), &SolverConfig::default()),
            Err(FitError::DimensionMismatch { rows: 4, response: 3 })
        ));
    }

    #[test]
    fn deviance_is_zero_for_perfect_predictions() {
        let y = array![0.0, 1.0, 1.0];
        let mu = array![0.0, 1.0, 1.0];
        assert!(calculate_deviance(y.view(), &mu) < 1e-6);
    }
}

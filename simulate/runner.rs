//! # Simulation Runner
//!
//! Drives the replications of each configuration and reduces their diagnostics
//! into per-cell means without keeping the per-replication matrices.
//!
//! Replication `r` draws from its own `StdRng` seeded with `seed + r`, so the
//! aggregate does not depend on how rayon schedules the work, and every
//! configuration sees the same replication seeds.
//!
//! A failed fit removes one model from one replication; the other three models
//! still contribute. Every cell therefore carries its own effective N, and a
//! non-finite diagnostic value is dropped from its cell alone.

use crate::config::{Configuration, StudyConfig};
use crate::data::generate;
use crate::diagnostics::{Diagnostic, DiagnosticRecord, diagnose};
use crate::model::{ModelKind, fit_all};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Failure tag used when the dataset itself could not be generated.
pub const DATA_GENERATION_FAILURE: &str = "data-generation";
/// Failure tag used when a fit succeeded but its ROC area could not be computed.
pub const DIAGNOSTICS_FAILURE: &str = "diagnostics";

const NUM_DIAGNOSTICS: usize = Diagnostic::ALL.len();
const NUM_MODELS: usize = ModelKind::ALL.len();

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid progress bar template: {0}")]
    ProgressTemplate(#[from] indicatif::style::TemplateError),
}

// =============================================================================
// Rate-Limited Failure Warnings
// =============================================================================
// The first failure of each model kind is always logged, then every Nth.

pub const FAILURE_LOG_INTERVAL: usize = 50;

static FAILURE_LOG_COUNTS: [AtomicUsize; NUM_MODELS] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

/// Returns (should_log, count) for one more failure of `kind`.
fn should_log_failure(kind: ModelKind) -> (bool, usize) {
    let count = FAILURE_LOG_COUNTS[kind.index()].fetch_add(1, Ordering::Relaxed) + 1;
    (count == 1 || count % FAILURE_LOG_INTERVAL == 0, count)
}

fn log_failure(kind: ModelKind, configuration: Configuration, replication: usize, reason: &str) {
    let (emit, count) = should_log_failure(kind);
    if emit {
        log::warn!(
            "[{configuration}] {kind} model failed in replication {replication} ({count} failures of this model so far): {reason}"
        );
    }
}

// =============================================================================
// One Replication
// =============================================================================

/// What one model contributed to one replication.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationCell {
    pub record: DiagnosticRecord,
    pub cutpoint: Option<f64>,
    pub age_coefficient: Option<f64>,
}

/// Per-model results of one replication, in `ModelKind::ALL` order. Failures
/// carry the short error kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationResult {
    pub cells: [Result<ReplicationCell, &'static str>; NUM_MODELS],
}

impl ReplicationResult {
    fn all_failed(kind: &'static str) -> Self {
        ReplicationResult {
            cells: std::array::from_fn(|_| Err(kind)),
        }
    }
}

/// Generates, fits and diagnoses replication `index` of `configuration`.
pub fn run_replication(
    configuration: Configuration,
    config: &StudyConfig,
    index: usize,
) -> ReplicationResult {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
    let dataset = match generate(config.sample_size, configuration, config, &mut rng) {
        Ok(dataset) => dataset,
        Err(e) => {
            for kind in ModelKind::ALL {
                log_failure(kind, configuration, index, &e.to_string());
            }
            return ReplicationResult::all_failed(DATA_GENERATION_FAILURE);
        }
    };

    let models = fit_all(&dataset, config);
    let null_log_likelihood = match &models.null_log_likelihood {
        Ok(ll) => *ll,
        Err(e) => {
            log::debug!("[{configuration}] intercept-only fit failed in replication {index}: {e}");
            f64::NAN
        }
    };

    let cells = ModelKind::ALL.map(|kind| match models.get(kind) {
        Ok(model) => diagnose(
            model,
            dataset.outcome.view(),
            null_log_likelihood,
            config.significance_level,
        )
        .map(|record| ReplicationCell {
            record,
            cutpoint: model.cutpoint,
            age_coefficient: model.age_coefficient,
        })
        .map_err(|e| {
            log_failure(kind, configuration, index, &e.to_string());
            DIAGNOSTICS_FAILURE
        }),
        Err(e) => {
            log_failure(kind, configuration, index, &e.to_string());
            Err(e.kind())
        }
    });

    ReplicationResult { cells }
}

// =============================================================================
// Streaming Reduction
// =============================================================================

/// Count, sum and sum of squares of a scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    pub count: u64,
    pub sum: f64,
    pub sum_squares: f64,
}

impl RunningMoments {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    pub fn merge(&mut self, other: &RunningMoments) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    /// `None` when nothing was recorded.
    pub fn summary(&self) -> Option<Summary> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let sd = if self.count > 1 {
            ((self.sum_squares - n * mean * mean) / (n - 1.0)).max(0.0).sqrt()
        } else {
            f64::NAN
        };
        Some(Summary {
            count: self.count,
            mean,
            sd,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub mean: f64,
    /// Sample standard deviation; NaN for a single observation.
    pub sd: f64,
}

/// Running totals for one configuration.
#[derive(Debug, Clone)]
pub struct Accumulator {
    sums: Array2<f64>,
    effective_n: Array2<u64>,
    failures: [BTreeMap<&'static str, u64>; NUM_MODELS],
    cutpoints: [RunningMoments; NUM_MODELS],
    age_coefficients: [RunningMoments; NUM_MODELS],
    replications: u64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator {
            sums: Array2::zeros((NUM_DIAGNOSTICS, NUM_MODELS)),
            effective_n: Array2::zeros((NUM_DIAGNOSTICS, NUM_MODELS)),
            failures: Default::default(),
            cutpoints: [RunningMoments::default(); NUM_MODELS],
            age_coefficients: [RunningMoments::default(); NUM_MODELS],
            replications: 0,
        }
    }

    pub fn add(&mut self, result: &ReplicationResult) {
        self.replications += 1;
        for (col, cell) in result.cells.iter().enumerate() {
            match cell {
                Ok(cell) => {
                    for (row, value) in cell.record.values().into_iter().enumerate() {
                        if value.is_finite() {
                            self.sums[[row, col]] += value;
                            self.effective_n[[row, col]] += 1;
                        }
                    }
                    if let Some(c) = cell.cutpoint.filter(|c| c.is_finite()) {
                        self.cutpoints[col].add(c);
                    }
                    if let Some(b) = cell.age_coefficient.filter(|b| b.is_finite()) {
                        self.age_coefficients[col].add(b);
                    }
                }
                Err(kind) => {
                    *self.failures[col].entry(*kind).or_insert(0) += 1;
                }
            }
        }
    }

    pub fn merge(mut self, other: Accumulator) -> Accumulator {
        self.sums += &other.sums;
        self.effective_n += &other.effective_n;
        for (mine, theirs) in self.failures.iter_mut().zip(other.failures) {
            for (kind, count) in theirs {
                *mine.entry(kind).or_insert(0) += count;
            }
        }
        for (mine, theirs) in self.cutpoints.iter_mut().zip(other.cutpoints.iter()) {
            mine.merge(theirs);
        }
        for (mine, theirs) in self.age_coefficients.iter_mut().zip(other.age_coefficients.iter()) {
            mine.merge(theirs);
        }
        self.replications += other.replications;
        self
    }

    /// Divides each cell by its own effective N. Empty cells are NaN.
    pub fn finish(self, configuration: Configuration) -> AggregateResult {
        let mut means = Array2::from_elem((NUM_DIAGNOSTICS, NUM_MODELS), f64::NAN);
        ndarray::Zip::from(&mut means)
            .and(&self.sums)
            .and(&self.effective_n)
            .for_each(|mean, &sum, &n| {
                if n > 0 {
                    *mean = sum / n as f64;
                }
            });
        AggregateResult {
            configuration,
            replications: self.replications,
            means,
            effective_n: self.effective_n,
            failures: self.failures.map(|f| {
                f.into_iter()
                    .map(|(kind, count)| (kind.to_string(), count))
                    .collect()
            }),
            cutpoints: self.cutpoints.map(|m| m.summary()),
            age_coefficients: self.age_coefficients.map(|m| m.summary()),
        }
    }
}

// =============================================================================
// Aggregate Result
// =============================================================================

/// Mean diagnostics of one configuration.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub configuration: Configuration,
    pub replications: u64,
    /// `Diagnostic::ALL` rows by `ModelKind::ALL` columns.
    pub means: Array2<f64>,
    pub effective_n: Array2<u64>,
    /// Failure counts by error kind, per model.
    pub failures: [BTreeMap<String, u64>; NUM_MODELS],
    /// Chosen cutpoints in standardized age units; `None` for models without one.
    pub cutpoints: [Option<Summary>; NUM_MODELS],
    /// Fitted age-term coefficient; `None` for the spline.
    pub age_coefficients: [Option<Summary>; NUM_MODELS],
}

impl AggregateResult {
    pub fn mean(&self, diagnostic: Diagnostic, model: ModelKind) -> f64 {
        self.means[[diagnostic.index(), model.index()]]
    }

    pub fn effective_n(&self, diagnostic: Diagnostic, model: ModelKind) -> u64 {
        self.effective_n[[diagnostic.index(), model.index()]]
    }

    pub fn failures(&self, model: ModelKind) -> &BTreeMap<String, u64> {
        &self.failures[model.index()]
    }

    pub fn total_failures(&self, model: ModelKind) -> u64 {
        self.failures(model).values().sum()
    }

    pub fn cutpoint(&self, model: ModelKind) -> Option<Summary> {
        self.cutpoints[model.index()]
    }

    pub fn age_coefficient(&self, model: ModelKind) -> Option<Summary> {
        self.age_coefficients[model.index()]
    }
}

// =============================================================================
// Drivers
// =============================================================================

/// Progress bar over the replications of one configuration. Hidden when
/// `visible` is false or stderr is not a terminal.
pub fn create_progress_bar(len: u64, message: &str, visible: bool) -> Result<ProgressBar, RunnerError> {
    let draw_target = if visible && std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    pb.set_style(
        ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )?
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}

/// Runs every replication of one configuration on the current rayon pool.
pub fn run(configuration: Configuration, config: &StudyConfig, progress: &ProgressBar) -> AggregateResult {
    let start = Instant::now();
    log::info!(
        "[{configuration}] running {} replications of n = {}",
        config.replications,
        config.sample_size
    );

    let accumulator = (0..config.replications)
        .into_par_iter()
        .fold(Accumulator::new, |mut acc, index| {
            acc.add(&run_replication(configuration, config, index));
            progress.inc(1);
            acc
        })
        .reduce(Accumulator::new, Accumulator::merge);

    let result = accumulator.finish(configuration);
    progress.finish_and_clear();

    let failed: u64 = ModelKind::ALL.iter().map(|&m| result.total_failures(m)).sum();
    log::info!(
        "[{configuration}] finished in {:.2?} with {failed} failed model fits",
        start.elapsed()
    );
    result
}

/// Runs the given configurations in order, on a dedicated pool when
/// `config.threads` is set.
pub fn run_study(
    config: &StudyConfig,
    configurations: &[Configuration],
    show_progress: bool,
) -> Result<Vec<AggregateResult>, RunnerError> {
    let run_all = || -> Result<Vec<AggregateResult>, RunnerError> {
        configurations
            .iter()
            .map(|&configuration| {
                let pb = create_progress_bar(
                    config.replications as u64,
                    &configuration.to_string(),
                    show_progress,
                )?;
                Ok(run(configuration, config, &pb))
            })
            .collect()
    };

    match config.threads {
        Some(threads) => {
            log::info!("Using a dedicated pool of {threads} worker threads");
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            pool.install(run_all)
        }
        None => run_all(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Scenario, SignalStrength};

    fn small_config(replications: usize, threads: Option<usize>) -> StudyConfig {
        StudyConfig {
            replications,
            sample_size: 300,
            threads,
            ..StudyConfig::default()
        }
    }

    fn cell(roc: f64, pseudo_r2: f64, detected: bool) -> Result<ReplicationCell, &'static str> {
        Ok(ReplicationCell {
            record: DiagnosticRecord {
                roc_area: roc,
                deviance: 400.0,
                aic: 406.0,
                pseudo_r2,
                effect_detected: detected,
            },
            cutpoint: Some(0.1),
            age_coefficient: Some(0.4),
        })
    }

    #[test]
    fn failures_and_non_finite_values_shrink_effective_n() {
        let mut acc = Accumulator::new();
        acc.add(&ReplicationResult {
            cells: [cell(0.6, 0.02, true), cell(0.7, f64::NAN, false), Err("separation"), cell(0.5, 0.0, false)],
        });
        acc.add(&ReplicationResult {
            cells: [cell(0.8, 0.04, false), cell(0.7, 0.01, true), Err("separation"), Err("no-convergence")],
        });
        let result = acc.finish(Configuration::new(Scenario::Continuous, SignalStrength::Strong));

        assert_eq!(result.replications, 2);
        assert_eq!(result.effective_n(Diagnostic::RocArea, ModelKind::Continuous), 2);
        assert!((result.mean(Diagnostic::RocArea, ModelKind::Continuous) - 0.7).abs() < 1e-12);
        assert_eq!(result.mean(Diagnostic::EffectDetected, ModelKind::Continuous), 0.5);

        assert_eq!(result.effective_n(Diagnostic::PseudoR2, ModelKind::MedianCutpoint), 1);
        assert_eq!(result.effective_n(Diagnostic::RocArea, ModelKind::MedianCutpoint), 2);

        assert_eq!(result.effective_n(Diagnostic::RocArea, ModelKind::OptimalCutpoint), 0);
        assert!(result.mean(Diagnostic::RocArea, ModelKind::OptimalCutpoint).is_nan());
        assert_eq!(result.failures(ModelKind::OptimalCutpoint).get("separation"), Some(&2));
        assert_eq!(result.total_failures(ModelKind::Spline), 1);
        assert!(result.cutpoint(ModelKind::OptimalCutpoint).is_none());
    }

    #[test]
    fn merge_matches_sequential_accumulation() {
        let config = small_config(6, None);
        let configuration = Configuration::new(Scenario::OffMedianCutpoint, SignalStrength::Strong);
        let results: Vec<ReplicationResult> =
            (0..6).map(|r| run_replication(configuration, &config, r)).collect();

        let mut sequential = Accumulator::new();
        for r in &results {
            sequential.add(r);
        }
        let mut left = Accumulator::new();
        let mut right = Accumulator::new();
        for (i, r) in results.iter().enumerate() {
            if i % 2 == 0 { left.add(r) } else { right.add(r) }
        }
        let merged = right.merge(left).finish(configuration);
        let sequential = sequential.finish(configuration);

        assert_eq!(merged.effective_n, sequential.effective_n);
        assert_eq!(merged.failures, sequential.failures);
        for (a, b) in merged.means.iter().zip(sequential.means.iter()) {
            assert!((a - b).abs() < 1e-9 || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn replications_are_reproducible() {
        let config = small_config(1, None);
        let configuration = Configuration::new(Scenario::MedianCutpoint, SignalStrength::Weak);
        assert_eq!(
            run_replication(configuration, &config, 7),
            run_replication(configuration, &config, 7)
        );
    }

    #[test]
    fn aggregate_does_not_depend_on_thread_count() {
        let configuration = Configuration::new(Scenario::Continuous, SignalStrength::Strong);
        let single = run_study(&small_config(16, Some(1)), &[configuration], false).unwrap();
        let several = run_study(&small_config(16, Some(3)), &[configuration], false).unwrap();
        assert_eq!(single[0].effective_n, several[0].effective_n);
        for (a, b) in single[0].means.iter().zip(several[0].means.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn summaries_track_cutpoints_and_coefficients() {
        let config = small_config(8, None);
        let configuration = Configuration::new(Scenario::MedianCutpoint, SignalStrength::Strong);
        let result = run(configuration, &config, &ProgressBar::hidden());
        let median = result.cutpoint(ModelKind::MedianCutpoint).unwrap();
        assert_eq!(median.count, result.effective_n(Diagnostic::Deviance, ModelKind::MedianCutpoint));
        assert!(median.mean.abs() < 0.5);
        assert!(result.cutpoint(ModelKind::Continuous).is_none());
        assert!(result.age_coefficient(ModelKind::Continuous).is_some());
        assert!(result.age_coefficient(ModelKind::Spline).is_none());
    }

    #[test]
    fn moments_give_sample_standard_deviation() {
        let mut m = RunningMoments::default();
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.add(v);
        }
        let s = m.summary().unwrap();
        assert_eq!(s.mean, 2.5);
        assert!((s.sd - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(RunningMoments::default().summary().is_none());
    }
}

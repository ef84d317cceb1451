//! # Optimal Cutpoint Search
//!
//! Finds the threshold on a continuous variable whose two-group split shows the
//! strongest association with a binary outcome, measured by the Pearson
//! chi-squared p-value of the resulting 2x2 table.
//!
//! Candidates are the midpoints between consecutive distinct sorted values. A
//! row belongs to the lower group when its value is strictly below the cutpoint.
//! Candidates are excluded when either group is smaller than the configured
//! minimum, or when the outcome is constant over the whole sample so no test
//! exists. A group with a constant outcome is a valid split: a clean step in
//! the outcome is found at its true location, and any separation it causes is
//! left for the logistic fit to report.
//!
//! Ties are broken deterministically: smallest p-value first, then the earliest
//! candidate. One exception departs from plain first-minimum order: p-values
//! that underflow to the same value (usually zero) are separated by the larger
//! chi-squared statistic before falling back to candidate order.

use crate::config::CutpointConfig;
use crate::inference::{TwoByTwo, pearson_chi_squared};
use itertools::Itertools;
use ndarray::ArrayView1;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CutpointError {
    #[error("Predictor has {predictor} values but the outcome has {outcome}.")]
    LengthMismatch { predictor: usize, outcome: usize },
    #[error("Predictor contains non-finite values.")]
    NonFinitePredictor,
    #[error("Predictor has fewer than two distinct values; there is nothing to split.")]
    NoCandidates,
    #[error("All {excluded} candidate cutpoints are below the minimum group size or have no test.")]
    NoValidCutpoint { excluded: usize },
}

/// Result of a cutpoint search.
#[derive(Debug, Clone, PartialEq)]
pub struct CutpointSearch {
    pub cutpoint: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub table: TwoByTwo,
    /// Candidates that produced a valid test.
    pub candidates_evaluated: usize,
    /// Candidates skipped as degenerate.
    pub candidates_excluded: usize,
}

/// Midpoints between consecutive distinct values, ascending.
pub fn candidate_cutpoints(x: ArrayView1<f64>) -> Vec<f64> {
    x.iter()
        .copied()
        .sorted_by(f64::total_cmp)
        .dedup()
        .tuple_windows()
        .map(|(lo, hi)| 0.5 * (lo + hi))
        .collect()
}

/// Cross-tabulates `x < cutpoint` against the 0/1 outcome.
pub fn split_table(x: ArrayView1<f64>, y: ArrayView1<f64>, cutpoint: f64) -> TwoByTwo {
    let mut table = TwoByTwo::default();
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        match (xi < cutpoint, yi > 0.5) {
            (true, true) => table.below_events += 1,
            (true, false) => table.below_non_events += 1,
            (false, true) => table.above_events += 1,
            (false, false) => table.above_non_events += 1,
        }
    }
    table
}

/// Searches every candidate cutpoint in one sorted sweep.
pub fn find_optimal_cutpoint(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    config: &CutpointConfig,
) -> Result<CutpointSearch, CutpointError> {
    if x.len() != y.len() {
        return Err(CutpointError::LengthMismatch {
            predictor: x.len(),
            outcome: y.len(),
        });
    }
    if !x.iter().all(|v| v.is_finite()) {
        return Err(CutpointError::NonFinitePredictor);
    }

    let sorted: Vec<(f64, bool)> = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| (xi, yi > 0.5))
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .collect();

    let total_events = sorted.iter().filter(|(_, event)| *event).count();
    let total = sorted.len();

    let mut best: Option<CutpointSearch> = None;
    let mut evaluated = 0;
    let mut excluded = 0;
    let mut below_events = 0;
    let mut below_total = 0;

    // Each chunk is one distinct value; the boundary after it is a candidate
    // unless it is the last value.
    let chunks = sorted.iter().chunk_by(|(xi, _)| *xi);
    let mut iter = chunks.into_iter().peekable();
    while let Some((value, rows)) = iter.next() {
        for (_, event) in rows {
            below_total += 1;
            if *event {
                below_events += 1;
            }
        }
        let Some((next_value, _)) = iter.peek() else {
            break;
        };
        let cutpoint = 0.5 * (value + *next_value);

        let table = TwoByTwo {
            below_events,
            below_non_events: below_total - below_events,
            above_events: total_events - below_events,
            above_non_events: (total - below_total) - (total_events - below_events),
        };

        if is_degenerate(&table, config.min_group_size) {
            excluded += 1;
            continue;
        }
        let Some(test) = pearson_chi_squared(&table, config.continuity_correction) else {
            excluded += 1;
            continue;
        };
        evaluated += 1;

        let better = match &best {
            None => true,
            Some(current) => compare_tests(test.p_value, test.statistic, current) == Ordering::Less,
        };
        if better {
            best = Some(CutpointSearch {
                cutpoint,
                statistic: test.statistic,
                p_value: test.p_value,
                table,
                candidates_evaluated: 0,
                candidates_excluded: 0,
            });
        }
    }

    if evaluated + excluded == 0 {
        return Err(CutpointError::NoCandidates);
    }
    let mut search = best.ok_or(CutpointError::NoValidCutpoint { excluded })?;
    search.candidates_evaluated = evaluated;
    search.candidates_excluded = excluded;
    Ok(search)
}

fn is_degenerate(table: &TwoByTwo, min_group_size: usize) -> bool {
    table.below_total() < min_group_size || table.above_total() < min_group_size
}

/// Orders a candidate against the current best; `Less` means the candidate wins.
fn compare_tests(p_value: f64, statistic: f64, current: &CutpointSearch) -> Ordering {
    p_value
        .total_cmp(&current.p_value)
        .then_with(|| current.statistic.total_cmp(&statistic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand::seq::SliceRandom;

    /// Outcome is mostly 1 below 40 and mostly 0 from 40 up, with exceptions
    /// kept away from the true boundary.
    fn noisy_step() -> (Array1<f64>, Array1<f64>) {
        let x: Array1<f64> = (0..100).map(|i| i as f64).collect();
        let y: Array1<f64> = (0..100)
            .map(|i| {
                let exception = i % 5 == 2;
                let high = i < 40;
                if high != exception { 1.0 } else { 0.0 }
            })
            .collect();
        (x, y)
    }

    #[test]
    fn candidates_are_midpoints_of_distinct_values() {
        let x = array![3.0, 1.0, 2.0, 2.0, 1.0];
        assert_eq!(candidate_cutpoints(x.view()), vec![1.5, 2.5]);
        assert!(candidate_cutpoints(array![4.0, 4.0].view()).is_empty());
    }

    #[test]
    fn split_table_uses_strict_lower_group() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        let y = array![1.0, 0.0, 1.0, 0.0];
        let table = split_table(x.view(), y.view(), 3.0);
        assert_eq!(table.below_total(), 2);
        assert_eq!(table.below_events, 1);
        assert_eq!(table.above_events, 1);
    }

    #[test]
    fn recovers_true_step_location() {
        let (x, y) = noisy_step();
        let config = CutpointConfig::default();
        let search = find_optimal_cutpoint(x.view(), y.view(), &config).unwrap();
        assert!(
            (search.cutpoint - 39.5).abs() <= 1.0,
            "found cutpoint {}",
            search.cutpoint
        );
        let again = find_optimal_cutpoint(x.view(), y.view(), &config).unwrap();
        assert_eq!(search, again);
    }

    #[test]
    fn constant_outcome_on_one_side_is_a_valid_split() {
        // Events only from 60 up, with a few non-events mixed in there: the
        // lower group is all non-events at the true boundary.
        let x: Array1<f64> = (0..100).map(|i| i as f64).collect();
        let y: Array1<f64> = (0..100)
            .map(|i| if i >= 60 && i % 7 != 0 { 1.0 } else { 0.0 })
            .collect();
        let search = find_optimal_cutpoint(x.view(), y.view(), &CutpointConfig::default()).unwrap();
        assert_eq!(search.cutpoint, 59.5);
        assert_eq!(search.table.below_events, 0);
        assert_eq!(search.candidates_excluded, 0);
        assert_eq!(search.candidates_evaluated, 99);
    }

    #[test]
    fn row_order_does_not_matter() {
        let (x, y) = noisy_step();
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(4));
        let xs: Array1<f64> = order.iter().map(|&i| x[i]).collect();
        let ys: Array1<f64> = order.iter().map(|&i| y[i]).collect();
        let config = CutpointConfig::default();
        let a = find_optimal_cutpoint(x.view(), y.view(), &config).unwrap();
        let b = find_optimal_cutpoint(xs.view(), ys.view(), &config).unwrap();
        assert_eq!(a.cutpoint, b.cutpoint);
        assert_eq!(a.table, b.table);
    }

    #[test]
    fn sweep_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(21);
        let x: Array1<f64> = (0..300).map(|_| (rng.r#gen::<f64>() * 30.0).round()).collect();
        let y: Array1<f64> = (0..300)
            .map(|_| if rng.gen_bool(0.4) { 1.0 } else { 0.0 })
            .collect();
        let config = CutpointConfig::default();
        let search = find_optimal_cutpoint(x.view(), y.view(), &config).unwrap();

        let mut best: Option<(f64, f64, f64)> = None;
        for c in candidate_cutpoints(x.view()) {
            let table = split_table(x.view(), y.view(), c);
            if is_degenerate(&table, 1) {
                continue;
            }
            let test = pearson_chi_squared(&table, false).unwrap();
            let replace = match best {
                None => true,
                Some((p, stat, _)) => test.p_value < p || (test.p_value == p && test.statistic > stat),
            };
            if replace {
                best = Some((test.p_value, test.statistic, c));
            }
        }
        let (p, _, c) = best.unwrap();
        assert_eq!(search.cutpoint, c);
        assert_eq!(search.p_value, p);
        assert_eq!(search.table, split_table(x.view(), y.view(), c));
    }

    #[test]
    fn minimum_group_size_excludes_small_splits() {
        let (x, y) = noisy_step();
        let config = CutpointConfig {
            min_group_size: 45,
            ..CutpointConfig::default()
        };
        let search = find_optimal_cutpoint(x.view(), y.view(), &config).unwrap();
        assert!(search.table.below_total() >= 45 && search.table.above_total() >= 45);
        assert!(search.candidates_excluded > 0);
    }

    #[test]
    fn degenerate_inputs_are_reported() {
        let config = CutpointConfig::default();
        assert_eq!(
            find_optimal_cutpoint(array![2.0, 2.0, 2.0].view(), array![0.0, 1.0, 0.0].view(), &config),
            Err(CutpointError::NoCandidates)
        );
        assert!(matches!(
            find_optimal_cutpoint(array![1.0, 2.0, 3.0].view(), array![1.0, 1.0, 1.0].view(), &config),
            Err(CutpointError::NoValidCutpoint { excluded: 2 })
        ));
        assert!(matches!(
            find_optimal_cutpoint(array![1.0, 2.0].view(), array![1.0].view(), &config),
            Err(CutpointError::LengthMismatch { .. })
        ));
    }
}

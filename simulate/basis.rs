use ndarray::{Array1, Array2, ArrayView1, s};
use ndarray_linalg::SVD;
use thiserror::Error;

/// Degree of the polynomial pieces in a natural spline basis.
const CUBIC: usize = 3;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("Data range is invalid: start ({0}) must be less than end ({1}).")]
    InvalidRange(f64, f64),

    #[error("A natural spline needs at least 1 degree of freedom, but {0} was requested.")]
    InvalidDegreesOfFreedom(usize),

    #[error("Cannot compute {num_quantiles} quantiles from only {num_points} data points.")]
    InsufficientDataForQuantiles {
        num_quantiles: usize,
        num_points: usize,
    },

    #[error("Input data contains non-finite values.")]
    NonFiniteData,

    #[error("Natural boundary constraints left {found} columns, expected {expected}.")]
    ConstraintRankMismatch { found: usize, expected: usize },

    #[error("SVD failed while applying constraints: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// A natural cubic spline basis evaluated on a sample, plus everything needed
/// to rebuild it.
#[derive(Debug, Clone)]
pub struct NaturalSplineBasis {
    /// Basis matrix, shape `[n, df]`. Carries no intercept column.
    pub basis: Array2<f64>,
    /// Full cubic B-spline knot vector, boundary knots repeated four times.
    pub knots: Array1<f64>,
    /// Maps the B-spline basis (first column dropped) onto the natural subspace.
    pub transform: Array2<f64>,
}

/// Creates a B-spline basis expansion matrix and its corresponding knot vector.
///
/// * `data`: points to evaluate at. Points outside `data_range` are evaluated on
///   the nearest boundary polynomial piece.
/// * `data_range`: `(min, max)` boundary knots.
/// * `interior_knots`: strictly inside the range, in increasing order.
/// * `degree`: polynomial degree (3 for cubic).
///
/// Returns the `[data.len(), interior_knots.len() + degree + 1]` basis matrix and
/// the full knot vector.
pub fn create_bspline_basis(
    data: ArrayView1<f64>,
    data_range: (f64, f64),
    interior_knots: ArrayView1<f64>,
    degree: usize,
) -> Result<(Array2<f64>, Array1<f64>), BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    if !(data_range.0 < data_range.1) {
        return Err(BasisError::InvalidRange(data_range.0, data_range.1));
    }

    let knot_vector = internal::generate_full_knot_vector(data_range, interior_knots, degree);
    let num_basis_functions = knot_vector.len() - degree - 1;

    let mut basis_matrix = Array2::zeros((data.len(), num_basis_functions));
    for (i, &x) in data.iter().enumerate() {
        let basis_row = internal::evaluate_splines_at_point(x, degree, knot_vector.view());
        basis_matrix.row_mut(i).assign(&basis_row);
    }

    Ok((basis_matrix, knot_vector))
}

/// Evaluates the `order`-th derivative of every B-spline basis function of the
/// given degree at each point. Shape `[points.len(), num_basis]`.
pub fn bspline_derivative_basis(
    points: ArrayView1<f64>,
    knots: ArrayView1<f64>,
    degree: usize,
    order: usize,
) -> Array2<f64> {
    let num_basis = knots.len() - degree - 1;
    let mut out = Array2::zeros((points.len(), num_basis));
    for (i, &x) in points.iter().enumerate() {
        let row = internal::evaluate_derivatives_at_point(x, degree, knots, order);
        out.row_mut(i).assign(&row);
    }
    out
}

/// Natural cubic spline basis with `df` columns and no intercept.
///
/// Boundary knots sit at the sample range and `df - 1` interior knots at the
/// evenly spaced sample quantiles (the median when `df = 2`). The cubic
/// B-spline basis loses its first column, then is projected onto the subspace
/// whose second derivative vanishes at both boundary knots. Any basis of that
/// subspace gives identical fitted values, so the projection only has to span it.
pub fn natural_spline_basis(
    x: ArrayView1<f64>,
    df: usize,
) -> Result<NaturalSplineBasis, BasisError> {
    if df == 0 {
        return Err(BasisError::InvalidDegreesOfFreedom(df));
    }
    if !x.iter().all(|v| v.is_finite()) {
        return Err(BasisError::NonFiniteData);
    }
    let num_interior = df - 1;
    if x.len() < num_interior.max(2) {
        return Err(BasisError::InsufficientDataForQuantiles {
            num_quantiles: num_interior,
            num_points: x.len(),
        });
    }

    let min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let interior = internal::quantiles(x, num_interior);

    let (full_basis, knots) = create_bspline_basis(x, (min, max), interior.view(), CUBIC)?;
    let basis = full_basis.slice(s![.., 1..]).to_owned();

    let boundaries = Array1::from(vec![min, max]);
    let second_derivatives = bspline_derivative_basis(boundaries.view(), knots.view(), CUBIC, 2);
    let constraints = second_derivatives.slice(s![.., 1..]).to_owned();

    let transform = internal::null_space(&constraints)?;
    if transform.ncols() != df {
        return Err(BasisError::ConstraintRankMismatch {
            found: transform.ncols(),
            expected: df,
        });
    }

    Ok(NaturalSplineBasis {
        basis: basis.dot(&transform),
        knots,
        transform,
    })
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// Singular values below this fraction of the largest are treated as zero.
    const RANK_TOLERANCE: f64 = 1e-10;

    /// Generates the full knot vector, including repeated boundary knots.
    pub(super) fn generate_full_knot_vector(
        data_range: (f64, f64),
        interior_knots: ArrayView1<f64>,
        degree: usize,
    ) -> Array1<f64> {
        let (min_val, max_val) = data_range;
        let mut knots = Vec::with_capacity(interior_knots.len() + 2 * (degree + 1));
        knots.extend(std::iter::repeat_n(min_val, degree + 1));
        knots.extend(interior_knots.iter().copied());
        knots.extend(std::iter::repeat_n(max_val, degree + 1));
        Array1::from(knots)
    }

    /// Calculates quantiles at `k / (num_quantiles + 1)` using linear
    /// interpolation (Type 7 in R).
    pub(super) fn quantiles(data: ArrayView1<f64>, num_quantiles: usize) -> Array1<f64> {
        if num_quantiles == 0 || data.is_empty() {
            return Array1::from_vec(vec![]);
        }

        let mut sorted_data = data.to_vec();
        sorted_data.sort_unstable_by(|a, b| a.total_cmp(b));

        let n = sorted_data.len();
        (1..=num_quantiles)
            .map(|k| {
                let p = k as f64 / (num_quantiles as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted_data[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted_data[lower_idx] * (1.0 - fraction) + sorted_data[upper_idx] * fraction
                }
            })
            .collect()
    }

    /// Index `mu` of the knot span used to evaluate at `x`: the last non-empty
    /// span with `knots[mu] <= x`. The right boundary belongs to the last
    /// non-empty span and points left of the range use the first one.
    pub(super) fn find_span(x: f64, degree: usize, knots: ArrayView1<f64>) -> usize {
        let num_basis = knots.len() - degree - 1;
        let mut non_empty = (degree..num_basis).filter(|&i| knots[i] < knots[i + 1]);
        let first = non_empty.next().unwrap_or(degree);
        (degree..num_basis)
            .filter(|&i| knots[i] < knots[i + 1] && knots[i] <= x)
            .last()
            .unwrap_or(first)
    }

    /// Evaluates all B-spline basis functions at a single point `x`.
    ///
    /// Uses the triangular Cox-de Boor scheme over the `degree + 1` functions
    /// that are non-zero on the span containing `x`. Degree 0 yields the
    /// indicator of that span.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
    ) -> Array1<f64> {
        let num_basis = knots.len() - degree - 1;
        let mu = find_span(x, degree, knots);

        let mut b = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        b[0] = 1.0;

        for j in 1..=degree {
            left[j] = x - knots[mu + 1 - j];
            right[j] = knots[mu + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom.abs() > 1e-12 { b[r] / denom } else { 0.0 };
                b[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            b[j] = saved;
        }

        let mut basis_values = Array1::zeros(num_basis);
        let start_index = mu - degree;
        for (i, value) in b.into_iter().enumerate() {
            basis_values[start_index + i] = value;
        }
        basis_values
    }

    /// Derivative of order `order` of every basis function at `x`, from the
    /// recurrence `B'_{i,k} = k (B_{i,k-1} / (t_{i+k} - t_i) - B_{i+1,k-1} / (t_{i+k+1} - t_{i+1}))`.
    pub(super) fn evaluate_derivatives_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
        order: usize,
    ) -> Array1<f64> {
        let num_basis = knots.len() - degree - 1;
        if order == 0 {
            return evaluate_splines_at_point(x, degree, knots);
        }
        if order > degree {
            return Array1::zeros(num_basis);
        }

        // One degree lower on the same knots has one more basis function.
        let lower = evaluate_derivatives_at_point(x, degree - 1, knots, order - 1);

        let k = degree as f64;
        Array1::from_shape_fn(num_basis, |i| {
            let left_denom = knots[i + degree] - knots[i];
            let right_denom = knots[i + degree + 1] - knots[i + 1];
            let left = if left_denom > 1e-12 { lower[i] / left_denom } else { 0.0 };
            let right = if right_denom > 1e-12 { lower[i + 1] / right_denom } else { 0.0 };
            k * (left - right)
        })
    }

    /// Orthonormal basis of the null space of `c` (rows are constraints), as columns.
    pub(super) fn null_space(c: &Array2<f64>) -> Result<Array2<f64>, BasisError> {
        let ncols = c.ncols();
        let (_, singular_values, vt) = c.svd(false, true)?;
        let vt = vt.ok_or(BasisError::ConstraintRankMismatch {
            found: 0,
            expected: ncols,
        })?;
        let largest = singular_values.iter().copied().fold(0.0, f64::max);
        let rank = singular_values
            .iter()
            .filter(|&&sv| sv > RANK_TOLERANCE * largest.max(1.0))
            .count();
        Ok(vt.slice(s![rank.., ..]).t().to_owned())
    }

    /// Sum of each basis row; used by tests to check the partition of unity.
    #[cfg(test)]
    pub(super) fn row_sums(basis: &Array2<f64>) -> Array1<f64> {
        basis.sum_axis(ndarray::Axis(1))
    }
}

use munkres::{solve_assignment, WeightMatrix};
use nalgebra::DMatrix;

use crate::error::{MatchError, MatchResult};
use crate::precision::Real;

/// Maximum-weight linear assignment between the rows and columns of `scores`.
///
/// Returns `(row, column)` pairs sorted by row. Rectangular matrices are padded
/// to a square with the smallest score, so `min(rows, columns)` pairs are
/// returned and every row and column is used at most once.
///
/// The Hungarian solver of the `munkres` crate minimizes cost, so scores are
/// turned into costs as `max − score` (in `f64`).
///
/// # Errors
/// Returns [MatchError::Assignment] for non-finite scores or when the solver
/// fails.
pub fn max_weight_assignment<T: Real>(scores: &DMatrix<T>) -> MatchResult<Vec<(usize, usize)>> {
    let (nrows, ncols) = scores.shape();
    if nrows == 0 || ncols == 0 {
        return Ok(Vec::new());
    }
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for &score in scores.iter() {
        let score = score.widen();
        if !score.is_finite() {
            return Err(MatchError::Assignment(format!("non-finite score {score}")));
        }
        max = max.max(score);
        min = min.min(score);
    }

    let n = nrows.max(ncols);
    let padding = max - min;
    let mut costs = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            if i < nrows && j < ncols {
                costs.push(max - scores[(i, j)].widen());
            } else {
                costs.push(padding);
            }
        }
    }

    let mut weights = WeightMatrix::from_row_vec(n, costs);
    let positions = solve_assignment(&mut weights)
        .map_err(|error| MatchError::Assignment(format!("{error:?}")))?;
    let mut pairs: Vec<(usize, usize)> = positions
        .into_iter()
        .map(|position| (position.row, position.column))
        .filter(|&(row, column)| row < nrows && column < ncols)
        .collect();
    pairs.sort_unstable();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_best_permutation() {
        // the greedy choice (0, 0) is worse than the anti-diagonal
        let scores = DMatrix::from_row_slice(2, 2, &[0.9f64, 0.8, 0.7, 0.1]);
        assert_eq!(max_weight_assignment(&scores).unwrap(), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn rectangular_matrices_use_each_column_once() {
        let scores = DMatrix::from_row_slice(3, 2, &[0.1f32, 0.2, 0.9, 0.3, 0.2, 0.8]);
        assert_eq!(max_weight_assignment(&scores).unwrap(), vec![(1, 0), (2, 1)]);
        let wide = scores.transpose();
        assert_eq!(max_weight_assignment(&wide).unwrap(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn empty_matrix_has_no_pairs() {
        assert!(max_weight_assignment(&DMatrix::<f64>::zeros(0, 3)).unwrap().is_empty());
    }

    #[test]
    fn rejects_nan_scores() {
        let scores = DMatrix::from_row_slice(1, 2, &[f64::NAN, 0.5]);
        assert!(matches!(max_weight_assignment(&scores), Err(MatchError::Assignment(_))));
    }
}

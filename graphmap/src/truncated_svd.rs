use nalgebra::{DMatrix, SVD};
use tracing::warn;

use crate::error::{MatchError, MatchResult};
use crate::precision::Real;

/// Linear dimensionality reduction keeping the top right-singular vectors of
/// the (uncentred) data matrix.
///
/// Used to embed the shared features of both graphs in one common space before
/// comparing them.
pub struct TruncatedSvd<T: Real> {
    /// `k × p` matrix whose rows are the retained right-singular vectors.
    components: DMatrix<T>,
    /// Fraction of the total column variance captured by each component.
    explained_variance_ratio: Vec<T>,
}

impl<T: Real> TruncatedSvd<T> {
    /// Fits the reduction on `data` (`n × p`) with `n_components` components.
    ///
    /// The component count is capped at `min(n, p)`; a warning is logged when
    /// it has to be reduced.
    ///
    /// # Errors
    /// Returns [MatchError::Numerical] if the singular vectors cannot be
    /// computed, and [MatchError::InsufficientSamples] for empty data.
    pub fn fit(data: &DMatrix<T>, n_components: usize) -> MatchResult<Self> {
        let available = data.nrows().min(data.ncols());
        if available == 0 {
            return Err(MatchError::InsufficientSamples {
                required: 1,
                provided: 0,
            });
        }
        let n_components = if n_components > available {
            warn!(
                "Requested {} SVD components but only {} are available, continuing with {}",
                n_components, available, available
            );
            available
        } else {
            n_components
        };

        let svd = SVD::new(data.clone(), false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| MatchError::Numerical("right singular vectors not computed".into()))?;

        // Singular values are not guaranteed to be sorted.
        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut components = v_t.select_rows(order[..n_components].iter());
        // Flip each component so that its largest-magnitude loading is positive.
        for mut row in components.row_iter_mut() {
            let mut largest = T::zero();
            for &value in row.iter() {
                if value * value > largest * largest {
                    largest = value;
                }
            }
            if largest < T::zero() {
                row.neg_mut();
            }
        }

        let projected = data * components.transpose();
        let total_variance: T = column_variances(data).into_iter().fold(T::zero(), |a, b| a + b);
        let explained_variance_ratio = column_variances(&projected)
            .into_iter()
            .map(|variance| {
                if total_variance > T::zero() {
                    variance / total_variance
                } else {
                    T::zero()
                }
            })
            .collect();

        Ok(TruncatedSvd {
            components,
            explained_variance_ratio,
        })
    }

    /// Projects `data` (`m × p`) onto the retained components (`m × k`).
    pub fn transform(&self, data: &DMatrix<T>) -> DMatrix<T> {
        data * self.components.transpose()
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn components(&self) -> &DMatrix<T> {
        &self.components
    }

    pub fn explained_variance_ratio(&self) -> &[T] {
        &self.explained_variance_ratio
    }
}

/// Population variance of each column.
fn column_variances<T: Real>(data: &DMatrix<T>) -> Vec<T> {
    let n = T::cast(data.nrows().max(1) as f64);
    data.column_iter()
        .map(|column| {
            let mean = column.sum() / n;
            column
                .iter()
                .fold(T::zero(), |acc, &value| acc + (value - mean) * (value - mean))
                / n
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_dominant_direction() {
        // points spread along (1, 1) with small noise along (1, -1)
        let data = DMatrix::from_row_slice(
            5,
            2,
            &[-2.0, -2.1, -1.0, -0.9, 0.0, 0.05, 1.0, 1.1, 2.0, 1.9f64],
        );
        let svd = TruncatedSvd::fit(&data, 1).unwrap();
        let component = svd.components().row(0);
        assert_relative_eq!(component[0], component[1], epsilon = 0.05);
        assert!(component[0] > 0.0);
        assert!(svd.explained_variance_ratio()[0] > 0.99);
        assert_eq!(svd.transform(&data).shape(), (5, 1));
    }

    #[test]
    fn caps_component_count() {
        let data = DMatrix::<f32>::from_fn(6, 3, |i, j| (i * 3 + j) as f32);
        let svd = TruncatedSvd::fit(&data, 10).unwrap();
        assert_eq!(svd.n_components(), 3);
    }
}

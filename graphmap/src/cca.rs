use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::{MatchError, MatchResult};
use crate::feature_table::{apply_standardization, column_mean_and_std};
use crate::precision::Real;

/// Fitting parameters of a [Cca].
#[derive(Debug, Clone, Copy)]
pub struct CcaParams {
    /// Number of canonical components to extract.
    pub n_components: usize,
    /// Maximum power-method iterations per component.
    pub max_iter: usize,
    /// Convergence tolerance on the squared change of the x weights.
    pub tol: f64,
}

/// Canonical correlation analysis between two feature spaces with paired rows.
///
/// Finds projections of `x` (`n × p`) and `y` (`n × q`) whose scores are
/// maximally correlated, component by component. Both inputs are centred and
/// scaled to unit sample variance first. Components are extracted with the
/// NIPALS power method in canonical mode: each component's weights come from
/// alternating least-squares projections through the pseudo-inverses of the
/// residual blocks, after which both blocks are deflated by their scores.
///
/// The fitted model embeds *any* rows of the two spaces with
/// [transform_x](Cca::transform_x) and [transform_y](Cca::transform_y), which
/// is what makes feature tables with different columns comparable.
pub struct Cca<T: Real> {
    x_means: Vec<T>,
    x_stds: Vec<T>,
    y_means: Vec<T>,
    y_stds: Vec<T>,
    /// `p × k` rotation mapping standardized x rows to scores.
    x_rotations: DMatrix<T>,
    /// `q × k` rotation mapping standardized y rows to scores.
    y_rotations: DMatrix<T>,
    /// Correlation between the x and y scores of each component on the
    /// training rows.
    canonical_correlations: Vec<T>,
}

impl<T: Real> Cca<T> {
    /// Fits the model on paired rows of `x` and `y`.
    ///
    /// The component count is reduced to the number of columns of the smaller
    /// block (with a warning) and extraction stops early once the y residual
    /// is constant.
    ///
    /// # Errors
    /// - [MatchError::InsufficientSamples] with fewer than two rows.
    /// - [MatchError::InvalidGraph] when `x` and `y` have different row counts.
    /// - [MatchError::Numerical] if a pseudo-inverse cannot be computed.
    pub fn fit(x: &DMatrix<T>, y: &DMatrix<T>, params: CcaParams) -> MatchResult<Self> {
        let n = x.nrows();
        if y.nrows() != n {
            return Err(MatchError::InvalidGraph(format!(
                "cannot pair {} source rows with {} target rows",
                n,
                y.nrows()
            )));
        }
        if n < 2 {
            return Err(MatchError::InsufficientSamples {
                required: 2,
                provided: n,
            });
        }
        let available = x.ncols().min(y.ncols());
        let mut n_components = params.n_components;
        if n_components > available {
            warn!(
                "Requested {} CCA components but the feature spaces only support {}, continuing with {}",
                n_components, available, available
            );
            n_components = available;
        }

        let (x_means, x_stds) = column_mean_and_std(x);
        let (y_means, y_stds) = column_mean_and_std(y);
        let mut xk = apply_standardization(x, &x_means, &x_stds);
        let mut yk = apply_standardization(y, &y_means, &y_stds);
        let x_standardized = xk.clone();
        let y_standardized = yk.clone();

        let tol = T::cast(params.tol);
        let y_residual_eps = T::EPSILON * T::cast(10.0);
        let mut x_weights_all: Vec<DVector<T>> = Vec::with_capacity(n_components);
        let mut y_weights_all: Vec<DVector<T>> = Vec::with_capacity(n_components);
        let mut x_loadings_all: Vec<DVector<T>> = Vec::with_capacity(n_components);
        let mut y_loadings_all: Vec<DVector<T>> = Vec::with_capacity(n_components);

        for component in 0..n_components {
            if yk.iter().all(|&value| value.abs() < y_residual_eps) {
                warn!("Y residual is constant at component {}, stopping early", component);
                break;
            }
            let (mut x_weights, mut y_weights, iterations) =
                first_singular_vectors(&xk, &yk, params.max_iter, tol)?;
            if iterations == params.max_iter {
                warn!("Maximum number of CCA iterations reached at component {}", component);
            }

            // sign convention: the largest x weight is positive
            let mut largest = T::zero();
            for &value in x_weights.iter() {
                if value.abs() > largest.abs() {
                    largest = value;
                }
            }
            if largest < T::zero() {
                x_weights.neg_mut();
                y_weights.neg_mut();
            }

            let x_scores = &xk * &x_weights;
            let y_ss = y_weights.dot(&y_weights);
            let y_scores = (&yk * &y_weights) / y_ss;

            let x_loadings = xk.tr_mul(&x_scores) / x_scores.dot(&x_scores);
            xk -= &x_scores * x_loadings.transpose();
            let y_loadings = yk.tr_mul(&y_scores) / y_scores.dot(&y_scores);
            yk -= &y_scores * y_loadings.transpose();

            x_weights_all.push(x_weights);
            y_weights_all.push(y_weights);
            x_loadings_all.push(x_loadings);
            y_loadings_all.push(y_loadings);
        }

        if x_weights_all.is_empty() {
            return Err(MatchError::Numerical("no canonical component could be extracted".into()));
        }

        let x_weights = DMatrix::from_columns(&x_weights_all);
        let y_weights = DMatrix::from_columns(&y_weights_all);
        let x_loadings = DMatrix::from_columns(&x_loadings_all);
        let y_loadings = DMatrix::from_columns(&y_loadings_all);
        let x_rotations = &x_weights * pseudo_inverse(x_loadings.tr_mul(&x_weights))?;
        let y_rotations = &y_weights * pseudo_inverse(y_loadings.tr_mul(&y_weights))?;

        let x_scores = &x_standardized * &x_rotations;
        let y_scores = &y_standardized * &y_rotations;
        let canonical_correlations = (0..x_scores.ncols())
            .map(|k| pearson(x_scores.column(k).clone_owned().as_slice(), y_scores.column(k).clone_owned().as_slice()))
            .collect();

        let cca = Cca {
            x_means,
            x_stds,
            y_means,
            y_stds,
            x_rotations,
            y_rotations,
            canonical_correlations,
        };
        debug!(
            "CCA: {} components, canonical correlations mean={:.6}",
            cca.n_components(),
            cca.mean_canonical_correlation().widen()
        );
        Ok(cca)
    }

    /// Embeds rows of the x space (`m × p`) into canonical scores (`m × k`).
    pub fn transform_x(&self, x: &DMatrix<T>) -> DMatrix<T> {
        apply_standardization(x, &self.x_means, &self.x_stds) * &self.x_rotations
    }

    /// Embeds rows of the y space (`m × q`) into canonical scores (`m × k`).
    pub fn transform_y(&self, y: &DMatrix<T>) -> DMatrix<T> {
        apply_standardization(y, &self.y_means, &self.y_stds) * &self.y_rotations
    }

    pub fn n_components(&self) -> usize {
        self.x_rotations.ncols()
    }

    /// Correlation of the paired scores of each component on the training rows.
    pub fn canonical_correlations(&self) -> &[T] {
        &self.canonical_correlations
    }

    /// Mean of [canonical_correlations](Cca::canonical_correlations).
    pub fn mean_canonical_correlation(&self) -> T {
        let sum = self
            .canonical_correlations
            .iter()
            .fold(T::zero(), |acc, &value| acc + value);
        sum / T::cast(self.canonical_correlations.len() as f64)
    }
}

/// Power method for the first pair of canonical weight vectors of the
/// residual blocks `x` and `y`. Returns `(x_weights, y_weights, iterations)`.
fn first_singular_vectors<T: Real>(
    x: &DMatrix<T>,
    y: &DMatrix<T>,
    max_iter: usize,
    tol: T,
) -> MatchResult<(DVector<T>, DVector<T>, usize)> {
    let eps = T::EPSILON;
    let start = y
        .column_iter()
        .position(|column| column.iter().any(|&value| value.abs() > eps))
        .unwrap_or(0);
    let mut y_score: DVector<T> = y.column(start).into_owned();

    let x_pinv = pseudo_inverse(x.clone())?;
    let y_pinv = pseudo_inverse(y.clone())?;

    let mut x_weights = DVector::zeros(x.ncols());
    let mut y_weights = DVector::zeros(y.ncols());
    let mut x_weights_old = DVector::from_element(x.ncols(), T::cast(100.0));
    let mut iterations = 0;
    for _ in 0..max_iter {
        iterations += 1;
        x_weights = &x_pinv * &y_score;
        x_weights /= x_weights.norm() + eps;
        let x_score = x * &x_weights;
        y_weights = &y_pinv * &x_score;
        y_weights /= y_weights.norm() + eps;
        y_score = (y * &y_weights) / (y_weights.dot(&y_weights) + eps);
        let diff = &x_weights - &x_weights_old;
        if diff.dot(&diff) < tol || y.ncols() == 1 {
            break;
        }
        x_weights_old.copy_from(&x_weights);
    }
    Ok((x_weights, y_weights, iterations))
}

/// Moore-Penrose pseudo-inverse, discarding singular values below
/// `max(n, m) · eps · σ_max`.
pub(crate) fn pseudo_inverse<T: Real>(matrix: DMatrix<T>) -> MatchResult<DMatrix<T>> {
    let (nrows, ncols) = matrix.shape();
    let svd = matrix.svd(true, true);
    let largest = svd
        .singular_values
        .iter()
        .fold(T::zero(), |acc, &value| if value > acc { value } else { acc });
    let cutoff = largest * T::EPSILON * T::cast(nrows.max(ncols) as f64);
    svd.pseudo_inverse(cutoff)
        .map_err(|message| MatchError::Numerical(format!("pseudo-inverse: {message}")))
}

/// Pearson correlation of two equally long sequences; zero when either is
/// constant.
pub(crate) fn pearson<T: Real>(a: &[T], b: &[T]) -> T {
    let mut n = T::zero();
    let mut sum_a = T::zero();
    let mut sum_b = T::zero();
    for (&va, &vb) in a.iter().zip(b) {
        n += T::one();
        sum_a += va;
        sum_b += vb;
    }
    if n == T::zero() {
        return T::zero();
    }
    let mean_a = sum_a / n;
    let mean_b = sum_b / n;
    let mut cov = T::zero();
    let mut var_a = T::zero();
    let mut var_b = T::zero();
    for (&va, &vb) in a.iter().zip(b) {
        let da = va - mean_a;
        let db = vb - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denominator = (var_a * var_b).sqrt();
    if denominator > T::zero() {
        cov / denominator
    } else {
        T::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn params(n_components: usize) -> CcaParams {
        CcaParams {
            n_components,
            max_iter: 500,
            tol: 1e-10,
        }
    }

    /// Two views of the same latent signals, mixed differently and with noise.
    fn paired_views(n: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let latent = DMatrix::from_fn(n, 2, |_, _| rng.gen_range(-1.0..1.0));
        let mix_x = DMatrix::from_row_slice(2, 3, &[1.0, 0.5, -0.3, 0.2, -1.0, 0.8]);
        let mix_y = DMatrix::from_row_slice(2, 4, &[0.4, 1.0, 0.0, -0.6, 1.2, 0.1, 0.9, 0.3]);
        let noise_x = DMatrix::from_fn(n, 3, |_, _| rng.gen_range(-0.01..0.01));
        let noise_y = DMatrix::from_fn(n, 4, |_, _| rng.gen_range(-0.01..0.01));
        (&latent * mix_x + noise_x, &latent * mix_y + noise_y)
    }

    #[test]
    fn shared_latent_signals_are_highly_correlated() {
        let (x, y) = paired_views(200);
        let cca = Cca::fit(&x, &y, params(2)).unwrap();
        assert_eq!(cca.n_components(), 2);
        for &correlation in cca.canonical_correlations() {
            assert!(correlation > 0.99, "correlation {correlation}");
        }
    }

    #[test]
    fn transform_embeds_training_rows_into_correlated_scores() {
        let (x, y) = paired_views(100);
        let cca = Cca::fit(&x, &y, params(1)).unwrap();
        let xs = cca.transform_x(&x);
        let ys = cca.transform_y(&y);
        assert_eq!(xs.shape(), (100, 1));
        let r = pearson(xs.column(0).clone_owned().as_slice(), ys.column(0).clone_owned().as_slice());
        assert_relative_eq!(r, cca.canonical_correlations()[0], epsilon = 1e-9);
    }

    #[test]
    fn component_count_is_capped_by_smaller_space() {
        let (x, y) = paired_views(50);
        let cca = Cca::fit(&x, &y, params(10)).unwrap();
        assert!(cca.n_components() <= 3);
    }

    #[test]
    fn needs_two_samples() {
        let x = DMatrix::<f64>::zeros(1, 2);
        let err = Cca::fit(&x, &x, params(1)).err().unwrap();
        assert!(matches!(err, MatchError::InsufficientSamples { provided: 1, .. }));
    }

    #[test]
    fn pearson_of_constant_sequence_is_zero() {
        let a = [1.0f64, 1.0, 1.0];
        let b = [1.0f64, 2.0, 3.0];
        assert_eq!(pearson(&a, &b), 0.0);
        assert_relative_eq!(pearson(&b, &b), 1.0);
    }
}

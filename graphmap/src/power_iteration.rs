use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::{MatchError, MatchResult};
use crate::kron_operator::{row_major_vector, SparseOperator};
use crate::precision::Real;

/// Lifecycle of a [PowerIteration].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerState {
    /// More steps are allowed and the tolerance has not been reached.
    Running,
    /// The last step changed the scores by less than the tolerance.
    Converged,
    /// The iteration budget is used up.
    Exhausted,
}

/// Parameters of the damped random walk.
#[derive(Debug, Clone, Copy)]
pub struct PowerIterationParams {
    /// Weight of the structural term against the prior.
    pub alpha: f64,
    /// Maximum number of steps.
    pub max_iter: usize,
    /// Convergence threshold on the L2 norm of the score change.
    pub tol: f64,
}

/// Outcome of [PowerIteration::run].
#[derive(Debug, Clone)]
pub struct OptimizationResult<T: Real> {
    /// Scores of all product nodes, row-major over node pairs.
    pub scores: DVector<T>,
    pub iterations: usize,
    pub converged: bool,
    /// Score change of the last step, if any step was taken.
    pub last_loss: Option<T>,
}

/// Damped random walk over the product graph.
///
/// Each step computes `s ← alpha · W_norm s + (1 − alpha) · h`, where `W_norm`
/// is the degree-normalized operator and `h` the prior distribution. All
/// arithmetic stays in `T`.
///
/// A walk [restricted](PowerIteration::restricted_to) to a set of product
/// nodes propagates no mass into the excluded ones: their score stays at the
/// prior floor `(1 − alpha) · h`.
pub struct PowerIteration<'o, 'p, T: Real> {
    operator: &'o SparseOperator<'p, T>,
    prior: DVector<T>,
    /// Product nodes that may receive propagated mass; all when `None`.
    support: Option<Vec<bool>>,
    scores: DVector<T>,
    alpha: T,
    tol: T,
    max_iter: usize,
    iteration: usize,
    last_loss: Option<T>,
    state: OptimizerState,
}

impl<'o, 'p, T: Real> PowerIteration<'o, 'p, T> {
    /// Prepares a walk starting from `initial`.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidGraph] if the prior or the initial scores do
    /// not have one entry per product node.
    pub fn new(
        operator: &'o SparseOperator<'p, T>,
        prior: DVector<T>,
        initial: DVector<T>,
        params: PowerIterationParams,
    ) -> MatchResult<Self> {
        let dim = operator.pattern().dim();
        if prior.len() != dim || initial.len() != dim {
            return Err(MatchError::InvalidGraph(format!(
                "prior of length {} and initial scores of length {} for {} product nodes",
                prior.len(),
                initial.len(),
                dim
            )));
        }
        let state = if params.max_iter == 0 {
            OptimizerState::Exhausted
        } else {
            OptimizerState::Running
        };
        Ok(PowerIteration {
            operator,
            prior,
            support: None,
            scores: initial,
            alpha: T::cast(params.alpha),
            tol: T::cast(params.tol),
            max_iter: params.max_iter,
            iteration: 0,
            last_loss: None,
            state,
        })
    }

    /// Limits propagation to the product nodes flagged in `support`.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidGraph] if `support` does not have one flag
    /// per product node.
    pub fn restricted_to(mut self, support: Vec<bool>) -> MatchResult<Self> {
        if support.len() != self.prior.len() {
            return Err(MatchError::InvalidGraph(format!(
                "support of length {} for {} product nodes",
                support.len(),
                self.prior.len()
            )));
        }
        self.support = Some(support);
        Ok(self)
    }

    /// Performs one step and returns the resulting state.
    ///
    /// Steps after convergence or exhaustion leave the scores untouched.
    pub fn step(&mut self) -> OptimizerState {
        if self.state != OptimizerState::Running {
            return self.state;
        }
        let mut next = self.operator.mul_vec(&self.scores) * self.alpha;
        if let Some(support) = &self.support {
            for (value, &allowed) in next.iter_mut().zip(support) {
                if !allowed {
                    *value = T::zero();
                }
            }
        }
        next.axpy(T::one() - self.alpha, &self.prior, T::one());
        let loss = (&next - &self.scores).norm();
        self.scores = next;
        self.iteration += 1;
        self.last_loss = Some(loss);
        debug!("Optimizer iteration {}: loss={:e}", self.iteration, loss.widen());

        self.state = if loss < self.tol {
            OptimizerState::Converged
        } else if self.iteration >= self.max_iter {
            OptimizerState::Exhausted
        } else {
            OptimizerState::Running
        };
        self.state
    }

    /// Steps until convergence or exhaustion.
    pub fn run(mut self) -> OptimizationResult<T> {
        while self.step() == OptimizerState::Running {}
        let converged = self.state == OptimizerState::Converged;
        if !converged {
            warn!(
                "Optimization did not converge after {} iterations (last loss: {:?})",
                self.iteration,
                self.last_loss.map(|loss| loss.widen())
            );
        }
        OptimizationResult {
            scores: self.scores,
            iterations: self.iteration,
            converged,
            last_loss: self.last_loss,
        }
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn scores(&self) -> &DVector<T> {
        &self.scores
    }
}

/// Uniform distribution over `dim` product nodes.
pub fn uniform_distribution<T: Real>(dim: usize) -> DVector<T> {
    DVector::from_element(dim, T::one() / T::cast(dim.max(1) as f64))
}

/// Soft spatial prior `1 − clamp((spatial / thres)², 0, 1)`, normalized to sum
/// to one.
///
/// Falls back to the uniform distribution (with a warning) when no node pair
/// is closer than `thres`.
pub fn spatial_prior<T: Real>(spatial: &DMatrix<T>, thres: T) -> DVector<T> {
    let mut prior = row_major_vector(spatial);
    for value in prior.iter_mut() {
        let ratio = *value / thres;
        *value = T::one() - (ratio * ratio).clamp(T::zero(), T::one());
    }
    let total = prior.sum();
    if total > T::zero() {
        prior / total
    } else {
        warn!("No node pair lies within the spatial prior threshold, using a uniform prior");
        uniform_distribution(spatial.len())
    }
}

/// Uniform distribution over the node pairs at most `max_dist` apart, zero
/// elsewhere.
///
/// # Errors
/// Returns [MatchError::InvalidConfig] if no node pair is within `max_dist`.
pub fn spatial_mask<T: Real>(spatial: &DMatrix<T>, max_dist: T) -> MatchResult<DVector<T>> {
    let mut mask = row_major_vector(spatial);
    let mut count = 0usize;
    for value in mask.iter_mut() {
        if *value <= max_dist {
            *value = T::one();
            count += 1;
        } else {
            *value = T::zero();
        }
    }
    if count == 0 {
        return Err(MatchError::InvalidConfig(format!(
            "no node pair lies within max_spatial_cdist = {}",
            max_dist.widen()
        )));
    }
    Ok(mask / T::cast(count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kron_operator::KronPattern;
    use approx::assert_relative_eq;

    fn path(n: usize) -> DMatrix<bool> {
        DMatrix::from_fn(n, n, |i, j| i + 1 == j || j + 1 == i)
    }

    fn params(max_iter: usize) -> PowerIterationParams {
        PowerIterationParams {
            alpha: 0.85,
            max_iter,
            tol: 1e-9,
        }
    }

    #[test]
    fn priors_sum_to_one() {
        let spatial = DMatrix::from_row_slice(2, 3, &[0.0f64, 1.0, 5.0, 2.0, 0.5, 9.0]);
        assert_relative_eq!(uniform_distribution::<f32>(7).sum(), 1.0, epsilon = 1e-6);
        let prior = spatial_prior(&spatial, 3.0);
        assert_relative_eq!(prior.sum(), 1.0, epsilon = 1e-6);
        // pairs beyond the threshold get nothing
        assert_eq!(prior[2], 0.0);
        assert!(prior[0] > prior[1]);
        let far = spatial_prior(&spatial, 1e-3);
        assert_relative_eq!(far.sum(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn mask_keeps_close_pairs() {
        let spatial = DMatrix::from_row_slice(2, 2, &[1.0f64, 10.0, 10.0, 2.0]);
        let mask = spatial_mask(&spatial, 2.0).unwrap();
        assert_eq!(mask.as_slice(), &[0.5, 0.0, 0.0, 0.5]);
        assert!(spatial_mask(&spatial, 0.5).is_err());
    }

    #[test]
    fn walk_converges_on_small_paths() {
        let pattern = KronPattern::new(&path(3), &path(3));
        let op = SparseOperator::<f64>::zeros(&pattern).degree_normalized();
        let walk = PowerIteration::new(&op, uniform_distribution(9), uniform_distribution(9), params(500)).unwrap();
        let result = walk.run();
        assert!(result.converged);
        assert!(result.iterations > 1);
        assert!(result.last_loss.unwrap() < 1e-9);
    }

    #[test]
    fn single_step_budget_is_exhausted() {
        let pattern = KronPattern::new(&path(3), &path(3));
        let op = SparseOperator::<f32>::zeros(&pattern).degree_normalized();
        let mut walk = PowerIteration::new(&op, uniform_distribution(9), uniform_distribution(9), params(1)).unwrap();
        assert_eq!(walk.state(), OptimizerState::Running);
        assert_eq!(walk.step(), OptimizerState::Exhausted);
        assert_eq!(walk.step(), OptimizerState::Exhausted);
        assert_eq!(walk.iteration(), 1);
    }

    #[test]
    fn zero_budget_returns_initial_scores() {
        let pattern = KronPattern::new(&path(2), &path(2));
        let op = SparseOperator::<f64>::zeros(&pattern).degree_normalized();
        let initial = DVector::from_row_slice(&[1.0, 0.0, 0.0, 0.0]);
        let result = PowerIteration::new(&op, uniform_distribution(4), initial.clone(), params(0))
            .unwrap()
            .run();
        assert_eq!(result.scores, initial);
        assert_eq!(result.iterations, 0);
        assert!(!result.converged);
    }

    #[test]
    fn excluded_nodes_stay_at_the_prior_floor() {
        let pattern = KronPattern::new(&path(3), &path(3));
        let op = SparseOperator::<f64>::zeros(&pattern).degree_normalized();
        let mut support = vec![true; 9];
        support[2] = false;
        support[4] = false;
        let prior = uniform_distribution(9);
        let result = PowerIteration::new(&op, prior.clone(), uniform_distribution(9), params(500))
            .unwrap()
            .restricted_to(support)
            .unwrap()
            .run();
        assert!(result.converged);
        let floor = 0.15 * prior[0];
        assert_relative_eq!(result.scores[2], floor, epsilon = 1e-12);
        assert_relative_eq!(result.scores[4], floor, epsilon = 1e-12);
        assert!(result.scores[0] > floor);
    }

    #[test]
    fn support_must_cover_every_product_node() {
        let pattern = KronPattern::new(&path(2), &path(2));
        let op = SparseOperator::<f64>::zeros(&pattern).degree_normalized();
        let walk = PowerIteration::new(&op, uniform_distribution(4), uniform_distribution(4), params(5)).unwrap();
        assert!(walk.restricted_to(vec![true; 3]).is_err());
    }

    #[test]
    fn rejects_wrong_prior_length() {
        let pattern = KronPattern::new(&path(2), &path(2));
        let op = SparseOperator::<f64>::zeros(&pattern).degree_normalized();
        assert!(PowerIteration::new(&op, uniform_distribution(3), uniform_distribution(4), params(5)).is_err());
    }
}

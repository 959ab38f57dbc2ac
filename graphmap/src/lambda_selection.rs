//! Choice of the mixing weight between shared-feature and all-feature
//! distances.
//!
//! Each candidate weight yields a score matrix. Its quality is judged by how
//! well the features of the matched nodes agree across the two graphs: a CCA
//! is fitted on the feature rows of the assigned node pairs, and the mean
//! canonical correlation is the quality.

use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::assignment::max_weight_assignment;
use crate::cca::{Cca, CcaParams};
use crate::error::{MatchError, MatchResult};
use crate::feature_table::FeatureTable;
use crate::precision::Real;

/// Score matrix and optimizer diagnostics of one evaluated weight.
#[derive(Debug, Clone)]
pub struct CandidateRun<T: Real> {
    pub scores: DMatrix<T>,
    pub iterations: usize,
    pub converged: bool,
}

/// The winning weight of a sweep.
#[derive(Debug, Clone)]
pub struct LambdaSelection<T: Real> {
    pub lambda: f64,
    /// Mean canonical correlation; `None` if it could not be computed.
    pub quality: Option<f64>,
    pub run: CandidateRun<T>,
}

/// `steps` evenly spaced values from 0 to 1, both included.
///
/// # Examples
/// ```
/// # use graphmap::lambda_selection::linspace;
/// assert_eq!(linspace(5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
/// ```
pub fn linspace(steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let last = (steps - 1) as f64;
            (0..steps).map(|step| step as f64 / last).collect()
        }
    }
}

/// Mean canonical correlation between the features of assigned node pairs.
///
/// Nodes are paired by a maximum-weight assignment on `scores`; pairs with a
/// non-positive score are dropped. Returns `None` when fewer than two pairs
/// remain.
///
/// # Errors
/// Propagates assignment and numerical failures.
pub fn assignment_quality<T: Real>(
    scores: &DMatrix<T>,
    features1: &FeatureTable<T>,
    features2: &FeatureTable<T>,
    cca: CcaParams,
) -> MatchResult<Option<f64>> {
    let (rows, cols): (Vec<usize>, Vec<usize>) = max_weight_assignment(scores)?
        .into_iter()
        .filter(|&(row, col)| scores[(row, col)] > T::zero())
        .unzip();
    let x = features1.select_rows(&rows);
    let y = features2.select_rows(&cols);
    match Cca::fit(&x, &y, cca) {
        Ok(fitted) => Ok(Some(fitted.mean_canonical_correlation().widen())),
        Err(MatchError::InsufficientSamples { provided, .. }) => {
            debug!("Only {} assigned pairs, quality undefined", provided);
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// Evaluates every weight of `linspace(steps)` and keeps the best.
///
/// `evaluate` runs the walk for one weight. The first candidate is always
/// kept; a later one replaces it only with a strictly higher quality, so ties
/// keep the lower weight. A candidate with undefined quality never replaces a
/// kept one, but is itself replaced by any candidate with a defined quality.
///
/// # Errors
/// Returns [MatchError::InvalidConfig] for fewer than two steps, and
/// propagates errors of `evaluate` and of the quality computation.
pub fn select_lambda<T, F>(
    steps: usize,
    features1: &FeatureTable<T>,
    features2: &FeatureTable<T>,
    cca: CcaParams,
    mut evaluate: F,
) -> MatchResult<LambdaSelection<T>>
where
    T: Real,
    F: FnMut(f64) -> MatchResult<CandidateRun<T>>,
{
    if steps < 2 {
        return Err(MatchError::InvalidConfig(format!(
            "a lambda sweep needs at least two steps, got {steps}"
        )));
    }
    let mut best: Option<LambdaSelection<T>> = None;
    for lambda in linspace(steps) {
        info!("Evaluating lambda={:.3}", lambda);
        let run = evaluate(lambda)?;
        let quality = assignment_quality(&run.scores, features1, features2, cca)?;
        debug!("lambda={:.3}: quality={:?}", lambda, quality);
        let better = match (&best, quality) {
            (None, _) => true,
            (Some(kept), Some(quality)) => kept.quality.map_or(true, |kept| quality > kept),
            (Some(_), None) => false,
        };
        if better {
            best = Some(LambdaSelection { lambda, quality, run });
        }
    }
    best.ok_or_else(|| MatchError::InvalidConfig("empty lambda sweep".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cca_params() -> CcaParams {
        CcaParams {
            n_components: 2,
            max_iter: 500,
            tol: 1e-9,
        }
    }

    fn tables(n: usize) -> (FeatureTable<f64>, FeatureTable<f64>) {
        let mut rng = StdRng::seed_from_u64(5);
        let source = DMatrix::from_fn(n, 2, |_, _| rng.gen_range(0.0..1.0));
        let target = source.map(|value| 2.0 * value + 1.0);
        (
            FeatureTable::new(vec!["a".into(), "b".into()], source).unwrap(),
            FeatureTable::new(vec!["c".into(), "d".into()], target).unwrap(),
        )
    }

    fn run(scores: DMatrix<f64>) -> CandidateRun<f64> {
        CandidateRun {
            scores,
            iterations: 3,
            converged: true,
        }
    }

    #[test]
    fn linspace_includes_endpoints() {
        assert_eq!(linspace(2), vec![0.0, 1.0]);
        assert_eq!(linspace(11)[5], 0.5);
        assert!(linspace(0).is_empty());
    }

    #[test]
    fn correct_assignment_has_high_quality() {
        let (t1, t2) = tables(8);
        let identity = DMatrix::<f64>::identity(8, 8);
        let quality = assignment_quality(&identity, &t1, &t2, cca_params()).unwrap().unwrap();
        assert!(quality > 0.99);
    }

    #[test]
    fn too_few_positive_pairs_give_undefined_quality() {
        let (t1, t2) = tables(4);
        let mut scores = DMatrix::<f64>::zeros(4, 4);
        scores[(0, 0)] = 1.0;
        assert_eq!(assignment_quality(&scores, &t1, &t2, cca_params()).unwrap(), None);
    }

    #[test]
    fn sweep_keeps_the_best_candidate() {
        let (t1, t2) = tables(8);
        let good = DMatrix::<f64>::identity(8, 8);
        // reversed pairing destroys the feature correspondence
        let bad = DMatrix::from_fn(8, 8, |i, j| if i + j == 7 { 1.0 } else { 0.0 });
        let selection = select_lambda(3, &t1, &t2, cca_params(), |lambda| {
            Ok(run(if lambda == 0.5 { good.clone() } else { bad.clone() }))
        })
        .unwrap();
        assert_eq!(selection.lambda, 0.5);
        assert!(selection.quality.unwrap() > 0.99);
    }

    #[test]
    fn ties_keep_the_lowest_weight() {
        let (t1, t2) = tables(8);
        let good = DMatrix::<f64>::identity(8, 8);
        let selection = select_lambda(4, &t1, &t2, cca_params(), |_| Ok(run(good.clone()))).unwrap();
        assert_eq!(selection.lambda, 0.0);
    }

    #[test]
    fn defined_quality_replaces_undefined_one() {
        let (t1, t2) = tables(8);
        let good = DMatrix::<f64>::identity(8, 8);
        let empty = DMatrix::<f64>::zeros(8, 8);
        let selection = select_lambda(2, &t1, &t2, cca_params(), |lambda| {
            Ok(run(if lambda == 0.0 { empty.clone() } else { good.clone() }))
        })
        .unwrap();
        assert_eq!(selection.lambda, 1.0);
    }

    #[test]
    fn single_step_is_not_a_sweep() {
        let (t1, t2) = tables(4);
        let result = select_lambda(1, &t1, &t2, cca_params(), |_| Ok(run(DMatrix::zeros(4, 4))));
        assert!(matches!(result, Err(MatchError::InvalidConfig(_))));
    }
}

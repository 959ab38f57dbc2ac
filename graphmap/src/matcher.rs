use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheKey, CrossDistanceCache, MatchCache};
use crate::cca::CcaParams;
use crate::config::MatcherConfig;
use crate::cross_distance::{self, AllFeatureParams};
use crate::error::{MatchError, MatchResult};
use crate::graph::Graph;
use crate::kron_operator::{row_major_matrix, KronPattern, SparseOperator};
use crate::lambda_selection::{select_lambda, CandidateRun};
use crate::power_iteration::{
    spatial_mask, spatial_prior, uniform_distribution, PowerIteration, PowerIterationParams,
};
use crate::precision::Real;
use crate::registry::GraphMatchingAlgorithm;
use crate::score_matrix::ScoreMatrix;

/// Diagnostics of one match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchInfo {
    /// Steps taken by the optimizer for the returned scores.
    pub opt_iterations: usize,
    /// Whether the optimizer reached its tolerance.
    pub opt_converged: bool,
    /// Selected mixing weight, present only when it was swept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
}

/// Graph matcher based on a random walk over the Kronecker product graph.
///
/// Matching two graphs goes through these stages:
/// 1. **Cross-distances**: the node-pair (and edge-pair) distances enabled by
///    the configuration are computed, or taken from the cache.
/// 2. **Operator**: the distances are combined into one sparse weight matrix
///    on the product graph, which is then degree-normalized.
/// 3. **Walk**: a damped power iteration spreads score mass over the product
///    graph, pulled towards a uniform or spatial prior. With
///    `max_spatial_cdist` the walk starts on, and only propagates into, the
///    node pairs within the cutoff.
/// 4. **Lambda sweep** (optional): when both feature distances are available
///    and a sweep is configured, stages 2 and 3 are repeated for every mixing
///    weight and the candidate whose matched features agree best is kept.
///
/// The matcher itself is stateless between calls. Reuse of cross-distances
/// across calls goes through an explicit [CrossDistanceCache].
#[derive(Debug, Clone)]
pub struct KronWalkMatcher {
    config: MatcherConfig,
}

/// Everything a walk needs apart from the intensity term.
struct WalkInputs<'a, T: Real> {
    pattern: &'a KronPattern,
    degree: Option<&'a DMatrix<T>>,
    distance: Option<&'a [T]>,
    prior: DVector<T>,
    initial: DVector<T>,
    /// Product nodes within `max_spatial_cdist`, when a cutoff is set.
    support: Option<Vec<bool>>,
}

impl KronWalkMatcher {
    /// Name under which the matcher is registered.
    pub const NAME: &'static str = "kron_walk";

    /// Creates a matcher after validating `config`.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidConfig] for out-of-range values.
    pub fn new(config: MatcherConfig) -> MatchResult<Self> {
        config.validate()?;
        Ok(KronWalkMatcher { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Scores every source node against every target node.
    ///
    /// # Parameters
    /// - `source`, `target`: the graphs to match. Which optional parts they need
    ///   depends on the enabled cross-distance terms.
    /// - `cache`: cross-distances kept between calls. Missing entries are
    ///   computed and inserted. Without a cache everything is computed for
    ///   this call only.
    ///
    /// # Returns
    /// The diagnostics of the match and the `n1 × n2` score matrix.
    ///
    /// # Errors
    /// - [MatchError::InvalidGraph] if either graph is empty.
    /// - [MatchError::MissingInput] / [MatchError::NoSharedFeatures] if an
    ///   enabled term cannot be computed.
    /// - [MatchError::StaleCache] if a cached entry does not fit the graphs.
    /// - Numerical and assignment failures of the embeddings.
    pub fn match_graphs<T: Real>(
        &self,
        source: &Graph<T>,
        target: &Graph<T>,
        cache: Option<&mut dyn CrossDistanceCache<T>>,
    ) -> MatchResult<(MatchInfo, ScoreMatrix<T>)> {
        match cache {
            Some(cache) => self.match_with_cache(source, target, cache),
            None => {
                let mut cache = MatchCache::new();
                self.match_with_cache(source, target, &mut cache)
            }
        }
    }

    fn match_with_cache<T: Real>(
        &self,
        source: &Graph<T>,
        target: &Graph<T>,
        cache: &mut dyn CrossDistanceCache<T>,
    ) -> MatchResult<(MatchInfo, ScoreMatrix<T>)> {
        let n1 = source.num_nodes();
        let n2 = target.num_nodes();
        if n1 == 0 || n2 == 0 {
            return Err(MatchError::InvalidGraph(format!(
                "cannot match graphs with {n1} and {n2} nodes"
            )));
        }
        info!("Matching {} source nodes to {} target nodes", n1, n2);
        let pattern = KronPattern::new(source.adjacency(), target.adjacency());
        debug!(
            "Product graph: {} nodes, {} non-zeros",
            pattern.dim(),
            pattern.nnz()
        );

        self.populate_cache(source, target, &pattern, cache)?;
        let cache: &dyn CrossDistanceCache<T> = cache;

        let config = &self.config;
        let lmd = config.intensity_interp_lmd;
        let shape = (n1, n2);
        let intensity_enabled = config.intensity_weight > 0.0;
        let degree = dense_term(cache, CacheKey::DegreeCdist, shape, config.degree_weight > 0.0)?;
        let shared = dense_term(
            cache,
            CacheKey::IntensityCdistShared,
            shape,
            intensity_enabled && lmd.uses_shared(),
        )?;
        let all = dense_term(
            cache,
            CacheKey::IntensityCdistAll,
            shape,
            intensity_enabled && lmd.uses_all(),
        )?;
        let distance = sparse_term(
            cache,
            CacheKey::DistanceCdist,
            pattern.nnz(),
            config.distance_weight > 0.0,
        )?;
        let spatial = dense_term(cache, CacheKey::SpatialCdist, shape, self.needs_spatial())?;

        let prior = match (spatial, config.spatial_cdist_prior_thres) {
            (Some(spatial), Some(thres)) if config.alpha != 1.0 => spatial_prior(spatial, T::cast(thres)),
            _ => uniform_distribution(pattern.dim()),
        };
        let (initial, support) = match (spatial, config.max_spatial_cdist) {
            (Some(spatial), Some(max_dist)) => {
                let mask = spatial_mask(spatial, T::cast(max_dist))?;
                let support: Vec<bool> = mask.iter().map(|&value| value > T::zero()).collect();
                (mask, Some(support))
            }
            _ => (uniform_distribution(pattern.dim()), None),
        };
        let inputs = WalkInputs {
            pattern: &pattern,
            degree,
            distance,
            prior,
            initial,
            support,
        };

        let (run, lambda) = if let (Some(shared), Some(all), Some(steps)) = (shared, all, lmd.sweep_steps()) {
            let features1 = require(source.features(), "shared-feature", "features")?;
            let features2 = require(target.features(), "shared-feature", "features")?;
            let cca = CcaParams {
                n_components: config.intensity_interp_cca_n_components,
                max_iter: config.cca_max_iter,
                tol: config.cca_tol,
            };
            let selection = select_lambda(steps, features1, features2, cca, |lambda| {
                self.walk(&inputs, Some(&interpolate(shared, all, lambda)))
            })?;
            info!(
                "Selected lambda={:.3} (quality: {:?})",
                selection.lambda, selection.quality
            );
            (selection.run, Some(selection.lambda))
        } else {
            let mixed;
            let intensity = match (shared, all) {
                (Some(shared), Some(all)) => {
                    mixed = interpolate(shared, all, lmd.fixed().unwrap_or_default());
                    Some(&mixed)
                }
                (shared, all) => shared.or(all),
            };
            (self.walk(&inputs, intensity)?, None)
        };

        let info = MatchInfo {
            opt_iterations: run.iterations,
            opt_converged: run.converged,
            lambda,
        };
        let scores = ScoreMatrix::new(source.node_ids().to_vec(), target.node_ids().to_vec(), run.scores)?;
        Ok((info, scores))
    }

    /// Computes every cross-distance term the cache does not hold yet.
    /// Disabled terms are recorded as [CacheEntry::Skipped].
    fn populate_cache<T: Real>(
        &self,
        source: &Graph<T>,
        target: &Graph<T>,
        pattern: &KronPattern,
        cache: &mut dyn CrossDistanceCache<T>,
    ) -> MatchResult<()> {
        let config = &self.config;
        let lmd = config.intensity_interp_lmd;
        let intensity_enabled = config.intensity_weight > 0.0;

        fill(cache, CacheKey::DegreeCdist, config.degree_weight > 0.0, || {
            info!("Computing degree cross-distance");
            Ok(CacheEntry::Dense(cross_distance::degree_cdist(
                &source.degrees(),
                &target.degrees(),
                T::cast(config.degree_cdiff_thres),
            )))
        })?;

        fill(
            cache,
            CacheKey::IntensityCdistShared,
            intensity_enabled && lmd.uses_shared(),
            || {
                info!("Computing shared-feature cross-distance");
                let features1 = require(source.features(), "shared-feature", "features")?;
                let features2 = require(target.features(), "shared-feature", "features")?;
                Ok(CacheEntry::Dense(cross_distance::shared_feature_cdist(
                    features1,
                    features2,
                    config.intensity_shared_pca_n_components,
                )?))
            },
        )?;

        fill(
            cache,
            CacheKey::IntensityCdistAll,
            intensity_enabled && lmd.uses_all(),
            || {
                info!("Computing all-feature cross-distance");
                let features1 = require(source.features(), "all-feature", "features")?;
                let features2 = require(target.features(), "all-feature", "features")?;
                let points1 = require(source.points(), "all-feature", "points")?;
                let points2 = require(target.points(), "all-feature", "points")?;
                let params = AllFeatureParams {
                    k_closest: config.intensity_all_cca_fit_k_closest,
                    k_most_certain: config.intensity_all_cca_fit_k_most_certain,
                    cca: CcaParams {
                        n_components: config.intensity_all_cca_n_components,
                        max_iter: config.cca_max_iter,
                        tol: config.cca_tol,
                    },
                };
                Ok(CacheEntry::Dense(cross_distance::all_feature_cdist(
                    features1, features2, points1, points2, params,
                )?))
            },
        )?;

        fill(cache, CacheKey::DistanceCdist, config.distance_weight > 0.0, || {
            info!("Computing edge-length cross-distance");
            let distances1 = require(source.distances(), "edge-length", "distances")?;
            let distances2 = require(target.distances(), "edge-length", "distances")?;
            Ok(CacheEntry::Sparse(cross_distance::edge_length_cdist(
                pattern,
                distances1,
                distances2,
                T::cast(config.distance_cdiff_thres),
            )))
        })?;

        fill(cache, CacheKey::SpatialCdist, self.needs_spatial(), || {
            info!("Computing spatial cross-distance");
            let points1 = require(source.points(), "spatial", "points")?;
            let points2 = require(target.points(), "spatial", "points")?;
            Ok(CacheEntry::Dense(cross_distance::spatial_cdist(points1, points2)))
        })
    }

    /// Spatial distances feed the soft prior and the hard cutoff.
    fn needs_spatial(&self) -> bool {
        let config = &self.config;
        (config.alpha != 1.0 && config.spatial_cdist_prior_thres.is_some()) || config.max_spatial_cdist.is_some()
    }

    /// Builds the operator from the enabled terms and runs the power iteration.
    fn walk<T: Real>(&self, inputs: &WalkInputs<'_, T>, intensity: Option<&DMatrix<T>>) -> MatchResult<CandidateRun<T>> {
        let config = &self.config;
        let mut operator = SparseOperator::zeros(inputs.pattern);
        let mut total_weight = 0.0;
        for (term, weight) in [(inputs.degree, config.degree_weight), (intensity, config.intensity_weight)] {
            if let Some(term) = term {
                operator.add_row_broadcast(T::cast(weight), term);
                operator.add_col_broadcast(T::cast(weight), term);
                total_weight += 2.0 * weight;
            }
        }
        if let Some(distance) = inputs.distance {
            operator.add_aligned(T::cast(config.distance_weight), distance);
            total_weight += config.distance_weight;
        }
        if total_weight > 0.0 {
            operator.scale(T::cast(1.0 / total_weight));
        }
        let operator = operator.degree_normalized();

        let params = PowerIterationParams {
            alpha: config.alpha,
            max_iter: config.opt_max_iter,
            tol: config.opt_tol,
        };
        let mut walk = PowerIteration::new(&operator, inputs.prior.clone(), inputs.initial.clone(), params)?;
        if let Some(support) = &inputs.support {
            walk = walk.restricted_to(support.clone())?;
        }
        let result = walk.run();
        let (n1, n2) = inputs.pattern.factor_sizes();
        Ok(CandidateRun {
            scores: row_major_matrix(&result.scores, n1, n2),
            iterations: result.iterations,
            converged: result.converged,
        })
    }
}

impl<T: Real> GraphMatchingAlgorithm<T> for KronWalkMatcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn configure(&mut self, config: MatcherConfig) -> MatchResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn match_graphs(
        &self,
        source: &Graph<T>,
        target: &Graph<T>,
        cache: Option<&mut dyn CrossDistanceCache<T>>,
    ) -> MatchResult<(MatchInfo, ScoreMatrix<T>)> {
        KronWalkMatcher::match_graphs(self, source, target, cache)
    }
}

/// Inserts `key` computed by `compute` if the term is enabled, or
/// [CacheEntry::Skipped] otherwise, unless the cache already holds it.
fn fill<T, F>(cache: &mut dyn CrossDistanceCache<T>, key: CacheKey, enabled: bool, compute: F) -> MatchResult<()>
where
    T: Real,
    F: FnOnce() -> MatchResult<CacheEntry<T>>,
{
    if cache.contains(key) {
        debug!("Using cached {}", key);
        return Ok(());
    }
    let entry = if enabled { compute()? } else { CacheEntry::Skipped };
    cache.insert(key, entry);
    Ok(())
}

fn require<'g, V: ?Sized>(value: Option<&'g V>, term: &'static str, input: &'static str) -> MatchResult<&'g V> {
    value.ok_or(MatchError::MissingInput { term, input })
}

/// The dense term under `key` if it is `needed`; a needed term must be
/// present with the node-pair shape.
fn dense_term<'c, T: Real>(
    cache: &'c dyn CrossDistanceCache<T>,
    key: CacheKey,
    shape: (usize, usize),
    needed: bool,
) -> MatchResult<Option<&'c DMatrix<T>>> {
    if !needed {
        return Ok(None);
    }
    match cache.get(key).and_then(CacheEntry::as_dense) {
        Some(matrix) if matrix.shape() == shape => Ok(Some(matrix)),
        _ => Err(MatchError::StaleCache(key)),
    }
}

/// Like [dense_term], for terms aligned with the product pattern.
fn sparse_term<'c, T: Real>(
    cache: &'c dyn CrossDistanceCache<T>,
    key: CacheKey,
    nnz: usize,
    needed: bool,
) -> MatchResult<Option<&'c [T]>> {
    if !needed {
        return Ok(None);
    }
    match cache.get(key).and_then(CacheEntry::as_sparse) {
        Some(values) if values.len() == nnz => Ok(Some(values)),
        _ => Err(MatchError::StaleCache(key)),
    }
}

/// `lambda · shared + (1 − lambda) · all`
fn interpolate<T: Real>(shared: &DMatrix<T>, all: &DMatrix<T>, lambda: f64) -> DMatrix<T> {
    shared * T::cast(lambda) + all * T::cast(1.0 - lambda)
}

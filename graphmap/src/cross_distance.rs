//! Node-pair distances between a source and a target graph.
//!
//! Every distance lies in `[0, 1]`, where 0 means "looks like the same
//! object". Dense distances are `n1 × n2` matrices over node pairs; the
//! edge-length distance is defined on pairs of edges and is stored aligned
//! with the entries of a [KronPattern].

use nalgebra::{DMatrix, Point2};
use tracing::{debug, warn};

use crate::cca::{Cca, CcaParams};
use crate::error::{MatchError, MatchResult};
use crate::feature_table::FeatureTable;
use crate::kron_operator::KronPattern;
use crate::point_index::PointIndex;
use crate::precision::Real;
use crate::truncated_svd::TruncatedSvd;

/// Parameters of [all_feature_cdist].
#[derive(Debug, Clone, Copy)]
pub struct AllFeatureParams {
    /// Source nodes with the closest nearest target that are considered.
    pub k_closest: usize,
    /// Of those, the nodes with the most distinct nearest target used to fit.
    pub k_most_certain: usize,
    /// CCA settings for the fit.
    pub cca: CcaParams,
}

/// Squared, thresholded degree difference of every node pair.
///
/// `clamp(((deg1[i] − deg2[j]) / thres)², 0, 1)`
pub fn degree_cdist<T: Real>(deg1: &[usize], deg2: &[usize], thres: T) -> DMatrix<T> {
    DMatrix::from_fn(deg1.len(), deg2.len(), |i, j| {
        let diff = (T::cast(deg1[i] as f64) - T::cast(deg2[j] as f64)) / thres;
        (diff * diff).clamp(T::zero(), T::one())
    })
}

/// Distance between node features over the columns both graphs measure.
///
/// Both tables are restricted to their shared columns and z-scored
/// separately. A truncated SVD fitted on the stacked tables gives a common
/// low-dimensional embedding, in which nodes are compared with the
/// correlation distance (halved to land in `[0, 1]`).
///
/// # Errors
/// Returns [MatchError::NoSharedFeatures] if the tables share no column.
pub fn shared_feature_cdist<T: Real>(
    features1: &FeatureTable<T>,
    features2: &FeatureTable<T>,
    n_components: usize,
) -> MatchResult<DMatrix<T>> {
    let shared = features1.shared_columns(features2);
    if shared.is_empty() {
        return Err(MatchError::NoSharedFeatures);
    }
    let mut n_components = n_components;
    if n_components > shared.len() {
        warn!(
            "Requested {} SVD components but only {} shared features, continuing with {}",
            n_components,
            shared.len(),
            shared.len()
        );
        n_components = shared.len();
    }

    let z1 = features1.select_columns(&shared)?.standardized();
    let z2 = features2.select_columns(&shared)?.standardized();
    let n1 = z1.nrows();
    let stacked = DMatrix::from_fn(n1 + z2.nrows(), shared.len(), |i, j| {
        if i < n1 {
            z1[(i, j)]
        } else {
            z2[(i - n1, j)]
        }
    });
    let svd = TruncatedSvd::fit(&stacked, n_components)?;
    debug!(
        "Shared features: {} columns, explained variance ratio {:?}",
        shared.len(),
        svd.explained_variance_ratio()
            .iter()
            .map(|ratio| ratio.widen())
            .collect::<Vec<f64>>()
    );
    let embedded1 = svd.transform(&z1);
    let embedded2 = svd.transform(&z2);
    Ok(correlation_cdist(&embedded1, &embedded2) * T::cast(0.5))
}

/// Distance between node features over all columns of both graphs.
///
/// The two feature spaces are linked through spatial proximity: each source
/// node is paired with its nearest target node. The `k_closest` source nodes
/// with the smallest nearest-neighbour distance are kept, and of those the
/// `k_most_certain` ones whose second-nearest target is furthest behind the
/// nearest. A CCA fitted on these pairs embeds every node of both graphs, and
/// nodes are compared with the correlation distance (halved).
///
/// # Errors
/// - [MatchError::InvalidGraph] if points and feature rows disagree.
/// - [MatchError::InsufficientSamples] and [MatchError::Numerical] from the CCA fit.
pub fn all_feature_cdist<T: Real>(
    features1: &FeatureTable<T>,
    features2: &FeatureTable<T>,
    points1: &[Point2<T>],
    points2: &[Point2<T>],
    params: AllFeatureParams,
) -> MatchResult<DMatrix<T>> {
    if points1.len() != features1.nrows() || points2.len() != features2.nrows() {
        return Err(MatchError::InvalidGraph(
            "points and feature rows differ in number".into(),
        ));
    }
    if points2.is_empty() {
        return Err(MatchError::InsufficientSamples {
            required: 1,
            provided: 0,
        });
    }

    let index = PointIndex::new(points2);
    let mut nearest = Vec::with_capacity(points1.len());
    let mut nearest_dist = Vec::with_capacity(points1.len());
    let mut margins = Vec::with_capacity(points1.len());
    for point in points1 {
        let found = index.nearest(point, 2);
        nearest.push(found[0].index);
        nearest_dist.push(found[0].distance);
        margins.push(found.get(1).map_or(0.0, |second| second.distance - found[0].distance));
    }

    let k_closest = clamp_count("intensity_all_cca_fit_k_closest", params.k_closest, points1.len());
    let mut closest: Vec<usize> = (0..points1.len()).collect();
    closest.sort_by(|&a, &b| nearest_dist[a].total_cmp(&nearest_dist[b]));
    closest.truncate(k_closest);

    let k_most_certain = clamp_count(
        "intensity_all_cca_fit_k_most_certain",
        params.k_most_certain,
        closest.len(),
    );
    let mut certain = closest;
    certain.sort_by(|&a, &b| margins[b].total_cmp(&margins[a]));
    certain.truncate(k_most_certain);

    let targets: Vec<usize> = certain.iter().map(|&i| nearest[i]).collect();
    let x = features1.select_rows(&certain);
    let y = features2.select_rows(&targets);
    let cca = Cca::fit(&x, &y, params.cca)?;
    debug!(
        "All features: CCA fitted on {} pairs, mean canonical correlation {:.6}",
        certain.len(),
        cca.mean_canonical_correlation().widen()
    );

    let embedded1 = cca.transform_x(features1.values());
    let embedded2 = cca.transform_y(features2.values());
    Ok(correlation_cdist(&embedded1, &embedded2) * T::cast(0.5))
}

fn clamp_count(name: &str, requested: usize, available: usize) -> usize {
    if requested > available {
        warn!(
            "{} = {} exceeds the {} available nodes, continuing with {}",
            name, requested, available, available
        );
        available
    } else {
        requested
    }
}

/// Squared, thresholded difference of the lengths of every edge pair.
///
/// For each entry `((i, j), (k, l))` of `pattern` the value is
/// `clamp(((len1[i, k] − len2[j, l]) / thres)², 0, 1)`. The result is aligned
/// with the pattern entries.
pub fn edge_length_cdist<T: Real>(
    pattern: &KronPattern,
    distances1: &DMatrix<T>,
    distances2: &DMatrix<T>,
    thres: T,
) -> Vec<T> {
    pattern.map_entries(|i, j, k, l| {
        let diff = (distances1[(i, k)] - distances2[(j, l)]) / thres;
        (diff * diff).clamp(T::zero(), T::one())
    })
}

/// Euclidean distance between every source and target point.
pub fn spatial_cdist<T: Real>(points1: &[Point2<T>], points2: &[Point2<T>]) -> DMatrix<T> {
    DMatrix::from_fn(points1.len(), points2.len(), |i, j| {
        nalgebra::distance(&points1[i], &points2[j])
    })
}

/// Correlation distance `1 − r` between every row of `x1` and every row of
/// `x2`, in `[0, 2]`.
///
/// Rows that are constant have no defined correlation; their distance to
/// anything is 1.
pub fn correlation_cdist<T: Real>(x1: &DMatrix<T>, x2: &DMatrix<T>) -> DMatrix<T> {
    let centered1 = normalized_rows(x1);
    let centered2 = normalized_rows(x2);
    let mut result = DMatrix::from_element(x1.nrows(), x2.nrows(), T::one());
    for (i, u) in centered1.iter().enumerate() {
        let Some(u) = u else { continue };
        for (j, v) in centered2.iter().enumerate() {
            let Some(v) = v else { continue };
            let r = u.iter().zip(v).fold(T::zero(), |acc, (&a, &b)| acc + a * b);
            result[(i, j)] = (T::one() - r).clamp(T::zero(), T::cast(2.0));
        }
    }
    result
}

/// Each row centred and scaled to unit norm, or `None` if it is constant.
fn normalized_rows<T: Real>(x: &DMatrix<T>) -> Vec<Option<Vec<T>>> {
    let ncols = T::cast(x.ncols() as f64);
    x.row_iter()
        .map(|row| {
            let mean = row.sum() / ncols;
            let centered: Vec<T> = row.iter().map(|&value| value - mean).collect();
            let norm = centered
                .iter()
                .fold(T::zero(), |acc, &value| acc + value * value)
                .sqrt();
            if norm > T::zero() {
                Some(centered.into_iter().map(|value| value / norm).collect())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn names(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}{i}")).collect()
    }

    fn in_unit_interval(matrix: &DMatrix<f64>) -> bool {
        matrix.iter().all(|&value| (0.0..=1.0).contains(&value))
    }

    #[test]
    fn degree_distance_is_thresholded() {
        let c = degree_cdist(&[1, 2, 5], &[2, 8], 3.0f64);
        assert_eq!(c.shape(), (3, 2));
        assert_relative_eq!(c[(0, 0)], 1.0 / 9.0);
        assert_eq!(c[(1, 0)], 0.0);
        assert_eq!(c[(0, 1)], 1.0);
        assert!(in_unit_interval(&c));
    }

    #[test]
    fn changed_edge_length_saturates() {
        let adjacency = DMatrix::from_fn(4, 4, |i, j| i + 1 == j || j + 1 == i);
        let lengths1 = DMatrix::from_fn(4, 4, |i, j| if i + 1 == j || j + 1 == i { 4.0f64 } else { 0.0 });
        let mut lengths2 = lengths1.clone();
        lengths2[(1, 2)] += 10.0;
        lengths2[(2, 1)] += 10.0;
        let pattern = KronPattern::new(&adjacency, &adjacency);
        let c = edge_length_cdist(&pattern, &lengths1, &lengths2, 5.0);
        assert_eq!(c.len(), pattern.nnz());
        let self_pairing = |a: usize, b: usize| c[pattern.entry_index(a * 4 + a, b * 4 + b).unwrap()];
        assert_eq!(self_pairing(1, 2), 1.0);
        assert_eq!(self_pairing(2, 1), 1.0);
        assert_eq!(self_pairing(0, 1), 0.0);
        assert_eq!(self_pairing(2, 3), 0.0);
        assert!(c.iter().all(|&value| (0.0..=1.0).contains(&value)));
    }

    #[test]
    fn correlation_distance_extremes() {
        let x1 = DMatrix::from_row_slice(3, 3, &[1.0f64, 2.0, 3.0, 3.0, 2.0, 1.0, 5.0, 5.0, 5.0]);
        let x2 = DMatrix::from_row_slice(1, 3, &[10.0f64, 20.0, 30.0]);
        let c = correlation_cdist(&x1, &x2);
        assert_relative_eq!(c[(0, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(c[(1, 0)], 2.0, epsilon = 1e-12);
        assert_eq!(c[(2, 0)], 1.0);
    }

    #[test]
    fn spatial_distance_is_euclidean() {
        let c = spatial_cdist(&[Point2::new(0.0f32, 0.0)], &[Point2::new(3.0, 4.0), Point2::new(0.0, 0.0)]);
        assert_eq!(c[(0, 0)], 5.0);
        assert_eq!(c[(0, 1)], 0.0);
    }

    #[test]
    fn no_shared_columns_is_an_error() {
        let t1 = FeatureTable::<f64>::new(names("a", 2), DMatrix::zeros(3, 2)).unwrap();
        let t2 = FeatureTable::<f64>::new(names("b", 2), DMatrix::zeros(3, 2)).unwrap();
        let err = shared_feature_cdist(&t1, &t2, 5).unwrap_err();
        assert!(matches!(err, MatchError::NoSharedFeatures));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn shared_features_match_identical_nodes() {
        let mut rng = StdRng::seed_from_u64(11);
        let values = DMatrix::from_fn(12, 4, |_, _| rng.gen_range(0.0..10.0));
        let t1 = FeatureTable::new(names("m", 4), values.clone()).unwrap();
        let t2 = FeatureTable::new(names("m", 4), values).unwrap();
        let c = shared_feature_cdist(&t1, &t2, 3).unwrap();
        assert_eq!(c.shape(), (12, 12));
        assert!(in_unit_interval(&c));
        for i in 0..12 {
            assert!(c[(i, i)] < 1e-9, "diagonal {}", c[(i, i)]);
        }
    }

    #[test]
    fn all_features_link_different_panels() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 30;
        let source = DMatrix::from_fn(n, 4, |_, _| rng.gen_range(0.0..1.0));
        let mixing = DMatrix::from_row_slice(
            4,
            4,
            &[1.0, 0.2, 0.0, 0.3, 0.1, 1.0, 0.4, 0.0, 0.0, 0.3, 1.0, 0.2, 0.5, 0.0, 0.1, 1.0],
        );
        let noise = DMatrix::from_fn(n, 4, |_, _| rng.gen_range(-0.001..0.001));
        let target = &source * mixing + noise;
        let points: Vec<Point2<f64>> = (0..n)
            .map(|_| Point2::new(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
            .collect();
        let t1 = FeatureTable::new(names("a", 4), source).unwrap();
        let t2 = FeatureTable::new(names("b", 4), target).unwrap();
        let params = AllFeatureParams {
            k_closest: 500,
            k_most_certain: 100,
            cca: CcaParams {
                n_components: 4,
                max_iter: 500,
                tol: 1e-9,
            },
        };
        let c = all_feature_cdist(&t1, &t2, &points, &points, params).unwrap();
        assert!(in_unit_interval(&c));
        let diagonal: f64 = (0..n).map(|i| c[(i, i)]).sum::<f64>() / n as f64;
        let off_diagonal: f64 = (c.sum() - diagonal * n as f64) / (n * (n - 1)) as f64;
        assert!(diagonal < off_diagonal, "{diagonal} vs {off_diagonal}");
    }

    #[test]
    fn all_features_need_matching_points() {
        let t = FeatureTable::<f64>::new(names("a", 2), DMatrix::zeros(3, 2)).unwrap();
        let params = AllFeatureParams {
            k_closest: 3,
            k_most_certain: 3,
            cca: CcaParams {
                n_components: 1,
                max_iter: 10,
                tol: 1e-6,
            },
        };
        let points = vec![Point2::new(0.0, 0.0)];
        assert!(all_feature_cdist(&t, &t, &points, &points, params).is_err());
    }
}

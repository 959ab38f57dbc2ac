//! Cross-distance caching between matching rounds.
//!
//! Cross-distances are the expensive part of a match, and most of them stay
//! valid while an outer loop refines the transform between the two images.
//! The matcher therefore reads them through a [CrossDistanceCache] that the
//! caller owns and passes in explicitly.

use std::collections::HashMap;
use std::fmt;

use nalgebra::DMatrix;

use crate::precision::Real;

/// Identifies one cross-distance term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    DegreeCdist,
    IntensityCdistShared,
    IntensityCdistAll,
    DistanceCdist,
    SpatialCdist,
}

impl CacheKey {
    /// All keys, in the order the matcher fills them.
    pub const ALL: [CacheKey; 5] = [
        CacheKey::DegreeCdist,
        CacheKey::IntensityCdistShared,
        CacheKey::IntensityCdistAll,
        CacheKey::DistanceCdist,
        CacheKey::SpatialCdist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::DegreeCdist => "degree_cdist",
            CacheKey::IntensityCdistShared => "intensity_cdist_shared",
            CacheKey::IntensityCdistAll => "intensity_cdist_all",
            CacheKey::DistanceCdist => "distance_cdist",
            CacheKey::SpatialCdist => "spatial_cdist",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached cross-distance term.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<T: Real> {
    /// The term is disabled for this configuration and was not computed.
    Skipped,
    /// Node-pair distances, `n1 × n2`.
    Dense(DMatrix<T>),
    /// Values aligned with the entries of the Kronecker adjacency pattern.
    Sparse(Vec<T>),
}

impl<T: Real> CacheEntry<T> {
    pub fn as_dense(&self) -> Option<&DMatrix<T>> {
        match self {
            CacheEntry::Dense(matrix) => Some(matrix),
            _ => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&[T]> {
        match self {
            CacheEntry::Sparse(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CacheEntry::Skipped)
    }
}

/// Storage for cross-distance terms, injected into a match.
pub trait CrossDistanceCache<T: Real> {
    fn get(&self, key: CacheKey) -> Option<&CacheEntry<T>>;

    fn insert(&mut self, key: CacheKey, entry: CacheEntry<T>);

    fn remove(&mut self, key: CacheKey) -> Option<CacheEntry<T>>;

    fn contains(&self, key: CacheKey) -> bool {
        self.get(key).is_some()
    }
}

/// In-memory [CrossDistanceCache].
///
/// # Examples
/// ```
/// # use graphmap::cache::{CacheEntry, CacheKey, CrossDistanceCache, MatchCache};
/// let mut cache = MatchCache::<f32>::new();
/// cache.insert(CacheKey::DegreeCdist, CacheEntry::Skipped);
/// cache.insert(CacheKey::SpatialCdist, CacheEntry::Skipped);
/// cache.prepare_iteration(1, false);
/// assert!(cache.contains(CacheKey::DegreeCdist));
/// assert!(!cache.contains(CacheKey::SpatialCdist));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MatchCache<T: Real> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
}

impl<T: Real> MatchCache<T> {
    pub fn new() -> Self {
        MatchCache {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts the terms invalidated by a new round of the outer loop.
    ///
    /// From the second round on (`iteration > 0`) the source points have been
    /// transformed, so the spatial distances are stale. When the outlier
    /// filter changed the node sets as well (`outliers_refiltered`), every
    /// node-dependent term is evicted.
    pub fn prepare_iteration(&mut self, iteration: usize, outliers_refiltered: bool) {
        if iteration == 0 {
            return;
        }
        self.entries.remove(&CacheKey::SpatialCdist);
        if outliers_refiltered {
            for key in [
                CacheKey::DegreeCdist,
                CacheKey::IntensityCdistShared,
                CacheKey::IntensityCdistAll,
                CacheKey::DistanceCdist,
            ] {
                self.entries.remove(&key);
            }
        }
    }
}

impl<T: Real> CrossDistanceCache<T> for MatchCache<T> {
    fn get(&self, key: CacheKey) -> Option<&CacheEntry<T>> {
        self.entries.get(&key)
    }

    fn insert(&mut self, key: CacheKey, entry: CacheEntry<T>) {
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: CacheKey) -> Option<CacheEntry<T>> {
        self.entries.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> MatchCache<f64> {
        let mut cache = MatchCache::new();
        for key in CacheKey::ALL {
            cache.insert(key, CacheEntry::Dense(DMatrix::zeros(2, 2)));
        }
        cache
    }

    #[test]
    fn first_round_keeps_everything() {
        let mut cache = filled();
        cache.prepare_iteration(0, true);
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn refiltered_outliers_evict_node_terms() {
        let mut cache = filled();
        cache.prepare_iteration(3, true);
        assert!(cache.is_empty());
    }

    #[test]
    fn entry_accessors() {
        let sparse = CacheEntry::Sparse(vec![0.5f32]);
        assert_eq!(sparse.as_sparse(), Some(&[0.5f32][..]));
        assert!(sparse.as_dense().is_none());
        assert!(CacheEntry::<f32>::Skipped.is_skipped());
        assert_eq!(CacheKey::IntensityCdistAll.to_string(), "intensity_cdist_all");
    }
}

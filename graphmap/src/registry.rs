use std::collections::BTreeMap;

use crate::cache::CrossDistanceCache;
use crate::config::MatcherConfig;
use crate::error::{MatchError, MatchResult};
use crate::graph::Graph;
use crate::matcher::{KronWalkMatcher, MatchInfo};
use crate::precision::Real;
use crate::score_matrix::ScoreMatrix;

/// A graph matching algorithm usable through the [AlgorithmRegistry].
pub trait GraphMatchingAlgorithm<T: Real>: Send {
    /// Registry name of the algorithm.
    fn name(&self) -> &'static str;

    /// Replaces the configuration after validating it.
    fn configure(&mut self, config: MatcherConfig) -> MatchResult<()>;

    /// Scores every source node against every target node.
    fn match_graphs(
        &self,
        source: &Graph<T>,
        target: &Graph<T>,
        cache: Option<&mut dyn CrossDistanceCache<T>>,
    ) -> MatchResult<(MatchInfo, ScoreMatrix<T>)>;
}

/// Builds a configured algorithm.
pub type AlgorithmFactory<T> = fn(MatcherConfig) -> MatchResult<Box<dyn GraphMatchingAlgorithm<T>>>;

/// Algorithms by name.
///
/// # Examples
/// ```
/// # use graphmap::registry::AlgorithmRegistry;
/// # use graphmap::config::MatcherConfig;
/// let registry = AlgorithmRegistry::<f32>::with_builtin();
/// assert_eq!(registry.names(), vec!["kron_walk"]);
/// let algorithm = registry.create("kron_walk", MatcherConfig::default()).unwrap();
/// assert_eq!(algorithm.name(), "kron_walk");
/// ```
pub struct AlgorithmRegistry<T: Real> {
    factories: BTreeMap<&'static str, AlgorithmFactory<T>>,
}

impl<T: Real> AlgorithmRegistry<T> {
    /// A registry without any algorithm.
    pub fn new() -> Self {
        AlgorithmRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the algorithms of this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(KronWalkMatcher::NAME, kron_walk_factory::<T>);
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &'static str, factory: AlgorithmFactory<T>) {
        self.factories.insert(name, factory);
    }

    /// Creates the algorithm registered under `name`.
    ///
    /// # Errors
    /// Returns [MatchError::UnknownAlgorithm] for unregistered names, and the
    /// factory's error (typically [MatchError::InvalidConfig]) otherwise.
    pub fn create(&self, name: &str, config: MatcherConfig) -> MatchResult<Box<dyn GraphMatchingAlgorithm<T>>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| MatchError::UnknownAlgorithm(name.to_string()))?;
        factory(config)
    }

    /// Registered names in alphabetical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl<T: Real> Default for AlgorithmRegistry<T> {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn kron_walk_factory<T: Real>(config: MatcherConfig) -> MatchResult<Box<dyn GraphMatchingAlgorithm<T>>> {
    Ok(Box::new(KronWalkMatcher::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_configuration_errors() {
        let registry = AlgorithmRegistry::<f64>::default();
        let err = registry.create("icp", MatcherConfig::default()).err().unwrap();
        assert!(matches!(err, MatchError::UnknownAlgorithm(ref name) if name == "icp"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn factories_validate_the_configuration() {
        let registry = AlgorithmRegistry::<f64>::with_builtin();
        let config = MatcherConfig {
            alpha: -1.0,
            ..MatcherConfig::default()
        };
        assert!(matches!(
            registry.create("kron_walk", config).err().unwrap(),
            MatchError::InvalidConfig(_)
        ));
    }

    #[test]
    fn created_algorithms_match_and_reconfigure() {
        let registry = AlgorithmRegistry::<f64>::with_builtin();
        let mut algorithm = registry.create("kron_walk", MatcherConfig::default()).unwrap();
        let graph = Graph::from_edges(vec![1, 2, 3], &[(1, 2), (2, 3)]).unwrap();
        let (_, scores) = algorithm.match_graphs(&graph, &graph, None).unwrap();
        assert_eq!(scores.source_ids(), &[1, 2, 3]);

        let budget = MatcherConfig {
            opt_max_iter: 2,
            ..MatcherConfig::default()
        };
        algorithm.configure(budget).unwrap();
        let (info, _) = algorithm.match_graphs(&graph, &graph, None).unwrap();
        assert_eq!(info.opt_iterations, 2);
    }

    #[test]
    fn custom_algorithms_can_be_registered() {
        let mut registry = AlgorithmRegistry::<f32>::new();
        assert!(registry.names().is_empty());
        registry.register("alias", kron_walk_factory::<f32>);
        assert_eq!(registry.names(), vec!["alias"]);
        assert!(registry.create("kron_walk", MatcherConfig::default()).is_err());
    }
}

//! # GraphMap Library
//!
//! The `graphmap` library matches the objects segmented in two images. Each
//! image is described by a spatial graph (nodes are objects, edges connect
//! neighbouring objects) with optional edge lengths, per-object feature vectors
//! and object coordinates. The result is a dense score matrix telling how
//! likely each source object corresponds to each target object.
//!
//! Scores come from a damped random walk over the Kronecker product of the two
//! graphs. Node pairs whose neighbourhoods look alike (similar degrees, similar
//! edge lengths, similar features) pass more mass to each other.
//!
//! ## Overview of Modules
//!
//! - **`matcher`**: Orchestrates a match. Computes or reuses the cross-distances,
//!   builds the product-graph operator, runs the walk, and sweeps the feature
//!   mixing weight when configured.
//!
//! - **`cross_distance`**: Node-pair distances in `[0, 1]`: degree, shared
//!   features, all features (through a CCA embedding), edge lengths and
//!   spatial distance.
//!
//! - **`kron_operator`**: Sparse matrix on the Kronecker adjacency pattern,
//!   with the weighted accumulation and degree normalization of the walk.
//!
//! - **`power_iteration`**: The damped power iteration and its priors.
//!
//! - **`lambda_selection`**: Evaluates mixing weights between the two feature
//!   distances by the canonical correlation of the matched features.
//!
//! - **`graph`** and **`feature_table`**: Input graphs and their named feature
//!   columns.
//!
//! - **`score_matrix`**: The labelled result, with best-match and assignment
//!   queries.
//!
//! - **`cache`**: Cross-distance storage shared between matching rounds.
//!
//! - **`config`**: Matcher parameters with their defaults and validation.
//!
//! - **`registry`**: Matching algorithms by name.
//!
//! - **`truncated_svd`**, **`cca`**: Embeddings used by the feature distances.
//!
//! - **`point_index`**: k-d tree over node coordinates.
//!
//! - **`assignment`**: Maximum-weight linear assignment.
//!
//! - **`precision`**: The floating-point types a match can be computed in.
//!
//! - **`error`**: The crate's error type.

pub mod matcher;

pub mod assignment;
pub mod cache;
pub mod cca;
pub mod config;
pub mod cross_distance;
pub mod error;
pub mod feature_table;
pub mod graph;
pub mod kron_operator;
pub mod lambda_selection;
pub mod point_index;
pub mod power_iteration;
pub mod precision;
pub mod registry;
pub mod score_matrix;
pub mod truncated_svd;

pub use cache::{CacheEntry, CacheKey, CrossDistanceCache, MatchCache};
pub use config::{InterpolationLambda, MatcherConfig};
pub use error::{MatchError, MatchResult};
pub use graph::{Graph, NodeId};
pub use matcher::{KronWalkMatcher, MatchInfo};
pub use precision::{Precision, Real};
pub use registry::{AlgorithmRegistry, GraphMatchingAlgorithm};
pub use score_matrix::{ScoreMatrix, ScoredMatch};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

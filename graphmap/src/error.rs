//! Error types for graph matching.
//!
//! Configuration problems (a weighted term without the inputs it needs, an
//! out-of-range parameter, an unknown algorithm name) are fatal and reported
//! immediately. Reduced component counts and optimizer non-convergence are not
//! errors: they are logged and the computation continues.

use thiserror::Error;

use crate::cache::CacheKey;

/// Result type alias for matching operations.
pub type MatchResult<T> = Result<T, MatchError>;

/// Every failure the matching core can report to its caller.
#[derive(Error, Debug)]
pub enum MatchError {
    /// A cross-distance term is enabled but one of its inputs was not supplied.
    #[error("{term} cross-distance requires {input} for both graphs")]
    MissingInput {
        /// The cross-distance term that needs the input.
        term: &'static str,
        /// The missing input (features, distances or points).
        input: &'static str,
    },

    /// The feature tables of the two graphs have no column in common.
    #[error("feature tables have no shared columns")]
    NoSharedFeatures,

    /// A configuration value is outside its admissible range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No algorithm is registered under the requested name.
    #[error("unknown graph matching algorithm '{0}'")]
    UnknownAlgorithm(String),

    /// Graph inputs are inconsistent (non-square, asymmetric, mismatched sizes).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A cache entry does not fit the graphs being matched.
    #[error("cached {0:?} does not match the current graphs")]
    StaleCache(CacheKey),

    /// An embedding was fitted on too few samples.
    #[error("insufficient samples: need at least {required}, got {provided}")]
    InsufficientSamples {
        /// Minimum number of samples.
        required: usize,
        /// Number of samples available.
        provided: usize,
    },

    /// The linear-algebra backend failed.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// The linear assignment solver failed.
    #[error("linear assignment failed: {0}")]
    Assignment(String),
}

impl MatchError {
    /// Returns `true` for errors caused by how the matcher was configured or
    /// which inputs were supplied, as opposed to numerical failures.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            MatchError::MissingInput { .. }
                | MatchError::NoSharedFeatures
                | MatchError::InvalidConfig(_)
                | MatchError::UnknownAlgorithm(_)
        )
    }
}

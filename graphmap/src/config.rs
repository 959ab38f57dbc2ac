use serde::{Deserialize, Serialize};

use crate::error::{MatchError, MatchResult};
use crate::precision::Precision;

/// Mixing weight between the shared-feature and the all-feature distances.
///
/// The intensity term is `lambda · shared + (1 − lambda) · all`. The weight is
/// either fixed or chosen by sweeping a grid over `[0, 1]`.
///
/// In configuration files an integer denotes a sweep and a float a fixed
/// weight:
///
/// ```
/// # use graphmap::config::InterpolationLambda;
/// let sweep: InterpolationLambda = serde_json::from_str("11").unwrap();
/// assert_eq!(sweep, InterpolationLambda::Sweep(11));
/// let fixed: InterpolationLambda = serde_json::from_str("0.25").unwrap();
/// assert_eq!(fixed, InterpolationLambda::Fixed(0.25));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterpolationLambda {
    /// Evaluate `steps` evenly spaced weights from 0 to 1 and keep the best.
    Sweep(usize),
    /// Use this weight directly.
    Fixed(f64),
}

impl InterpolationLambda {
    /// Sweeps of zero or one step are plain weights.
    pub fn normalized(self) -> Self {
        match self {
            InterpolationLambda::Sweep(steps) if steps <= 1 => InterpolationLambda::Fixed(steps as f64),
            other => other,
        }
    }

    /// Number of sweep steps, if this is a proper sweep.
    pub fn sweep_steps(self) -> Option<usize> {
        match self.normalized() {
            InterpolationLambda::Sweep(steps) => Some(steps),
            InterpolationLambda::Fixed(_) => None,
        }
    }

    /// The fixed weight, if this is not a proper sweep.
    pub fn fixed(self) -> Option<f64> {
        match self.normalized() {
            InterpolationLambda::Fixed(lambda) => Some(lambda),
            InterpolationLambda::Sweep(_) => None,
        }
    }

    /// Whether the shared-feature distance contributes.
    pub(crate) fn uses_shared(self) -> bool {
        self.fixed() != Some(0.0)
    }

    /// Whether the all-feature distance contributes.
    pub(crate) fn uses_all(self) -> bool {
        self.fixed() != Some(1.0)
    }
}

impl Default for InterpolationLambda {
    fn default() -> Self {
        InterpolationLambda::Sweep(11)
    }
}

/// Parameters of the Kronecker random-walk matcher.
///
/// Every field has a default, so a configuration file only needs to list the
/// values it changes. Weights of zero disable the corresponding cross-distance
/// term; with all weights at zero the walk only sees the graph structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Weight of structural propagation against the prior, in `[0, 1]`.
    pub alpha: f64,
    /// Spatial distance at which the soft prior falls to zero.
    pub spatial_cdist_prior_thres: Option<f64>,
    /// Node pairs further apart start the walk with zero mass.
    pub max_spatial_cdist: Option<f64>,
    pub degree_weight: f64,
    pub degree_cdiff_thres: f64,
    pub intensity_weight: f64,
    pub intensity_interp_lmd: InterpolationLambda,
    pub intensity_interp_cca_n_components: usize,
    pub intensity_shared_pca_n_components: usize,
    pub intensity_all_cca_fit_k_closest: usize,
    pub intensity_all_cca_fit_k_most_certain: usize,
    pub intensity_all_cca_n_components: usize,
    pub distance_weight: f64,
    pub distance_cdiff_thres: f64,
    pub cca_max_iter: usize,
    pub cca_tol: f64,
    pub opt_max_iter: usize,
    pub opt_tol: f64,
    pub precision: Precision,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            alpha: 0.8,
            spatial_cdist_prior_thres: None,
            max_spatial_cdist: None,
            degree_weight: 0.0,
            degree_cdiff_thres: 3.0,
            intensity_weight: 0.0,
            intensity_interp_lmd: InterpolationLambda::default(),
            intensity_interp_cca_n_components: 10,
            intensity_shared_pca_n_components: 5,
            intensity_all_cca_fit_k_closest: 500,
            intensity_all_cca_fit_k_most_certain: 100,
            intensity_all_cca_n_components: 10,
            distance_weight: 0.0,
            distance_cdiff_thres: 5.0,
            cca_max_iter: 500,
            cca_tol: 1e-6,
            opt_max_iter: 200,
            opt_tol: 1e-6,
            precision: Precision::Float32,
        }
    }
}

impl MatcherConfig {
    /// Checks that every value is in its admissible range.
    ///
    /// # Errors
    /// Returns [MatchError::InvalidConfig] naming the first offending field.
    pub fn validate(&self) -> MatchResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return invalid(format!("alpha must be in [0, 1], got {}", self.alpha));
        }
        for (name, weight) in [
            ("degree_weight", self.degree_weight),
            ("intensity_weight", self.intensity_weight),
            ("distance_weight", self.distance_weight),
        ] {
            if !(weight >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {weight}"));
            }
        }
        for (name, threshold) in [
            ("degree_cdiff_thres", Some(self.degree_cdiff_thres)),
            ("distance_cdiff_thres", Some(self.distance_cdiff_thres)),
            ("spatial_cdist_prior_thres", self.spatial_cdist_prior_thres),
            ("max_spatial_cdist", self.max_spatial_cdist),
            ("cca_tol", Some(self.cca_tol)),
            ("opt_tol", Some(self.opt_tol)),
        ] {
            if let Some(threshold) = threshold {
                if !(threshold > 0.0) {
                    return invalid(format!("{name} must be positive, got {threshold}"));
                }
            }
        }
        for (name, count) in [
            ("intensity_interp_cca_n_components", self.intensity_interp_cca_n_components),
            ("intensity_shared_pca_n_components", self.intensity_shared_pca_n_components),
            ("intensity_all_cca_fit_k_closest", self.intensity_all_cca_fit_k_closest),
            ("intensity_all_cca_fit_k_most_certain", self.intensity_all_cca_fit_k_most_certain),
            ("intensity_all_cca_n_components", self.intensity_all_cca_n_components),
            ("cca_max_iter", self.cca_max_iter),
        ] {
            if count == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }
        if let Some(lambda) = self.intensity_interp_lmd.fixed() {
            if !(0.0..=1.0).contains(&lambda) {
                return invalid(format!("intensity_interp_lmd must be in [0, 1], got {lambda}"));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> MatchResult<()> {
    Err(MatchError::InvalidConfig(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(MatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: MatcherConfig =
            serde_json::from_str(r#"{"alpha": 0.5, "intensity_interp_lmd": 0.3, "precision": "float64"}"#)
                .unwrap();
        assert_eq!(config.alpha, 0.5);
        assert_eq!(config.intensity_interp_lmd, InterpolationLambda::Fixed(0.3));
        assert_eq!(config.precision, Precision::Float64);
        assert_eq!(config.opt_max_iter, 200);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = MatcherConfig {
            alpha: 1.5,
            ..MatcherConfig::default()
        };
        assert!(matches!(config.validate(), Err(MatchError::InvalidConfig(_))));
        config.alpha = 0.5;
        config.intensity_interp_lmd = InterpolationLambda::Fixed(2.0);
        assert!(config.validate().is_err());
        config.intensity_interp_lmd = InterpolationLambda::Fixed(1.0);
        config.degree_cdiff_thres = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_sweeps_are_fixed_weights() {
        assert_eq!(InterpolationLambda::Sweep(1).fixed(), Some(1.0));
        assert_eq!(InterpolationLambda::Sweep(0).fixed(), Some(0.0));
        assert_eq!(InterpolationLambda::Sweep(5).sweep_steps(), Some(5));
        assert!(!InterpolationLambda::Sweep(0).uses_shared());
        assert!(InterpolationLambda::Sweep(0).uses_all());
        assert!(InterpolationLambda::Sweep(3).uses_shared() && InterpolationLambda::Sweep(3).uses_all());
    }
}

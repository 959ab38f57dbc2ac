use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use sprs::MulAcc;

/// Floating-point scalar in which a match is computed.
///
/// Every intermediate matrix of a match (cross-distances, the sparse operator,
/// the score vector) is held in the same `Real` type, so choosing `f32` halves
/// memory for large product graphs. Only `f32` and `f64` implement it.
///
/// `MulAcc` lets the sparse products of `sprs` run directly on `T`.
pub trait Real: RealField + Copy + MulAcc {
    /// Machine epsilon of the type.
    const EPSILON: Self;

    /// Converts a configuration value into this precision.
    fn cast(value: f64) -> Self;

    /// Widens (or keeps) the value as `f64`, for logging and external solvers.
    fn widen(self) -> f64;
}

impl Real for f32 {
    const EPSILON: Self = f32::EPSILON;

    fn cast(value: f64) -> Self {
        value as f32
    }

    fn widen(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    const EPSILON: Self = f64::EPSILON;

    fn cast(value: f64) -> Self {
        value
    }

    fn widen(self) -> f64 {
        self
    }
}

/// Named precision, used where the scalar type is chosen at runtime
/// (configuration files, the command line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floats.
    #[default]
    Float32,
    /// 64-bit floats.
    Float64,
}

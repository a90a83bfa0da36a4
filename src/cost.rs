//! Cost functions for the output layer.
//!
//! The output layer's delta is computed directly from the network output `y`,
//! the expected value `e`, the weighted sum `z` and the output scale `s`
//! (`1 / size²` when the layer normalizes, `1` otherwise):
//!
//! ```text
//! delta = dC/dy · s · act'(z) · mask
//! ```
//!
//! - [`CostFunction::Quadratic`]: `C = ½ (y − e)²`, `dC/dy = y − e`
//! - [`CostFunction::CrossEntropy`]: `C = −e ln y − (1 − e) ln(1 − y)`,
//!   `dC/dy = (y − e) / (y (1 − y))`. With a sigmoid output and no scaling the
//!   activation derivative cancels exactly and the delta is `y − e`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::config::ConfigError;

/// Lower bound of `y (1 − y)` in the cross-entropy derivative.
pub const CROSS_ENTROPY_EPSILON: f32 = 1e-6;

/// Cost function used by backpropagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CostFunction {
    /// Half squared error.
    #[default]
    #[serde(rename = "quadratic")]
    Quadratic,
    /// Binary cross-entropy per channel.
    #[serde(rename = "cross-entropy", alias = "crossEntropy")]
    CrossEntropy,
}

impl CostFunction {
    /// Cost of a single channel value.
    pub fn value(self, y: f32, e: f32) -> f32 {
        match self {
            CostFunction::Quadratic => 0.5 * (y - e) * (y - e),
            CostFunction::CrossEntropy => {
                let y = y.clamp(CROSS_ENTROPY_EPSILON, 1.0 - CROSS_ENTROPY_EPSILON);
                -e * y.ln() - (1.0 - e) * (1.0 - y).ln()
            }
        }
    }

    /// Output-layer delta for one channel, before masking.
    #[inline]
    pub fn output_delta(self, activation: Activation, y: f32, e: f32, z: f32, scale: f32) -> f32 {
        match self {
            CostFunction::Quadratic => (y - e) * scale * activation.derivative(z),
            CostFunction::CrossEntropy => {
                if activation == Activation::Sigmoid && scale == 1.0 {
                    y - e
                } else {
                    let denom = (y * (1.0 - y)).max(CROSS_ENTROPY_EPSILON);
                    (y - e) / denom * scale * activation.derivative(z)
                }
            }
        }
    }

    /// Name used in configuration and export documents.
    pub fn name(self) -> &'static str {
        match self {
            CostFunction::Quadratic => "quadratic",
            CostFunction::CrossEntropy => "cross-entropy",
        }
    }
}

impl fmt::Display for CostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CostFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quadratic" => Ok(CostFunction::Quadratic),
            "cross-entropy" | "crossEntropy" => Ok(CostFunction::CrossEntropy),
            other => Err(ConfigError::unknown_kind("cost", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_delta_linear() {
        let d = CostFunction::Quadratic.output_delta(Activation::Linear, 0.8, 0.5, 0.8, 1.0);
        assert!((d - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_sigmoid_cancels() {
        let z = 0.4f32;
        let y = Activation::Sigmoid.apply(z);
        let d = CostFunction::CrossEntropy.output_delta(Activation::Sigmoid, y, 1.0, z, 1.0);
        assert_eq!(d, y - 1.0);
    }

    #[test]
    fn test_cross_entropy_matches_derivative_of_value() {
        // d/dz C(sigmoid(z)) through the general branch (scale != 1 forces it)
        let z = -0.3f32;
        let e = 0.25f32;
        let eps = 1e-3f32;
        let c = |z: f32| CostFunction::CrossEntropy.value(Activation::Sigmoid.apply(z), e);
        let numeric = (c(z + eps) - c(z - eps)) / (2.0 * eps);
        let y = Activation::Sigmoid.apply(z);
        let analytic =
            CostFunction::CrossEntropy.output_delta(Activation::Sigmoid, y, e, z, 1.0);
        assert!((numeric - analytic).abs() < 1e-3);
    }

    #[test]
    fn test_parse() {
        assert_eq!("quadratic".parse::<CostFunction>().unwrap(), CostFunction::Quadratic);
        assert_eq!(
            "cross-entropy".parse::<CostFunction>().unwrap(),
            CostFunction::CrossEntropy
        );
        assert!("hinge".parse::<CostFunction>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&CostFunction::CrossEntropy).unwrap();
        assert_eq!(json, "\"cross-entropy\"");
    }
}

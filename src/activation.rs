//! Activation functions applied channel-wise by the activation kernels.
//!
//! Each layer picks one [`Activation`]. The forward kernel evaluates
//! [`Activation::apply`] on the weighted sum `z`; backpropagation multiplies
//! incoming deltas by [`Activation::derivative`] evaluated at the same `z`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Activation kind of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activation {
    /// Identity, `a = z`.
    #[serde(alias = "copy")]
    Linear,
    /// Rectified linear unit.
    #[default]
    Relu,
    /// Exponential linear unit (alpha = 1).
    Elu,
    /// Logistic sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// `ln(1 + e^z)`.
    Softplus,
}

impl Activation {
    /// All supported activations.
    pub const ALL: [Activation; 6] = [
        Activation::Linear,
        Activation::Relu,
        Activation::Elu,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Softplus,
    ];

    /// Evaluates the activation at `z`.
    #[inline]
    pub fn apply(self, z: f32) -> f32 {
        match self {
            Activation::Linear => z,
            Activation::Relu => z.max(0.0),
            Activation::Elu => {
                if z > 0.0 {
                    z
                } else {
                    z.exp() - 1.0
                }
            }
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
            Activation::Tanh => z.tanh(),
            Activation::Softplus => {
                // ln(1 + e^z) overflows for large z; it is z there anyway.
                if z > 20.0 {
                    z
                } else {
                    z.exp().ln_1p()
                }
            }
        }
    }

    /// Evaluates `da/dz` at `z`.
    #[inline]
    pub fn derivative(self, z: f32) -> f32 {
        match self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Elu => {
                if z > 0.0 {
                    1.0
                } else {
                    z.exp()
                }
            }
            Activation::Sigmoid => {
                let s = 1.0 / (1.0 + (-z).exp());
                s * (1.0 - s)
            }
            Activation::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            Activation::Softplus => 1.0 / (1.0 + (-z).exp()),
        }
    }

    /// Name used in configuration and export documents.
    pub fn name(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Elu => "elu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softplus => "softplus",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" | "copy" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "elu" => Ok(Activation::Elu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "softplus" => Ok(Activation::Softplus),
            other => Err(ConfigError::unknown_kind("activation", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivatives_match_finite_differences() {
        let eps = 1e-3f32;
        for act in Activation::ALL {
            for &z in &[-2.0f32, -0.5, 0.3, 1.7] {
                let numeric = (act.apply(z + eps) - act.apply(z - eps)) / (2.0 * eps);
                let analytic = act.derivative(z);
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "{} at {}: numeric {} analytic {}",
                    act,
                    z,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for act in Activation::ALL {
            assert_eq!(act.name().parse::<Activation>().unwrap(), act);
        }
        assert_eq!("copy".parse::<Activation>().unwrap(), Activation::Linear);
    }

    #[test]
    fn test_unknown_activation_rejected() {
        let err = "swish".parse::<Activation>().unwrap_err();
        assert!(err.to_string().contains("swish"));
    }

    #[test]
    fn test_softplus_large_input() {
        assert_eq!(Activation::Softplus.apply(50.0), 50.0);
        assert!(Activation::Softplus.apply(-50.0) >= 0.0);
    }
}

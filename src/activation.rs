//! Activation kinds fused into operator kernels.
//!
//! Operators carry one activation from a fixed enumeration; the kind is
//! baked into the kernel build signature while its scalar parameters (cap
//! limit, slope) are passed as runtime kernel arguments.
//!
//! An activation name outside the enumeration is a graph-authoring defect
//! and is rejected when the operator is constructed, never silently
//! defaulted.

use crate::error::{EngineError, Result};
use std::fmt;

/// An activation together with its scalar parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// Pass-through.
    Noop,
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), max_limit)`.
    Relux {
        /// Upper clamp value.
        max_limit: f32,
    },
    /// `x < 0 ? alpha * x : x`.
    Prelu {
        /// Slope applied to negative inputs.
        alpha: f32,
    },
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
}

/// The parameter-free kind of an [`Activation`], used in kernel build
/// signatures and tuning keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    /// Pass-through.
    Noop,
    /// Plain ReLU.
    Relu,
    /// Capped ReLU.
    Relux,
    /// Parametric ReLU.
    Prelu,
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
}

impl ActivationKind {
    /// Stable numeric id baked into specialized kernel source.
    pub fn id(self) -> u32 {
        match self {
            ActivationKind::Noop => 0,
            ActivationKind::Relu => 1,
            ActivationKind::Relux => 2,
            ActivationKind::Prelu => 3,
            ActivationKind::Tanh => 4,
            ActivationKind::Sigmoid => 5,
        }
    }

    /// The canonical operator-definition name.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationKind::Noop => "NOOP",
            ActivationKind::Relu => "RELU",
            ActivationKind::Relux => "RELUX",
            ActivationKind::Prelu => "PRELU",
            ActivationKind::Tanh => "TANH",
            ActivationKind::Sigmoid => "SIGMOID",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Activation {
    /// Resolves an activation from operator-definition arguments: the
    /// textual kind plus the scalar parameters it may consume.
    ///
    /// # Errors
    /// [`EngineError::UnknownActivation`] for a name outside the fixed
    /// enumeration.
    pub fn from_def(name: &str, max_limit: f32, alpha: f32) -> Result<Self> {
        match name {
            "NOOP" => Ok(Activation::Noop),
            "RELU" => Ok(Activation::Relu),
            "RELUX" => Ok(Activation::Relux { max_limit }),
            "PRELU" => Ok(Activation::Prelu { alpha }),
            "TANH" => Ok(Activation::Tanh),
            "SIGMOID" => Ok(Activation::Sigmoid),
            other => Err(EngineError::UnknownActivation(other.to_string())),
        }
    }

    /// The parameter-free kind.
    pub fn kind(&self) -> ActivationKind {
        match self {
            Activation::Noop => ActivationKind::Noop,
            Activation::Relu => ActivationKind::Relu,
            Activation::Relux { .. } => ActivationKind::Relux,
            Activation::Prelu { .. } => ActivationKind::Prelu,
            Activation::Tanh => ActivationKind::Tanh,
            Activation::Sigmoid => ActivationKind::Sigmoid,
        }
    }

    /// The scalar parameters in fixed kernel-argument order:
    /// `(max_limit, alpha)`. Kinds that do not use a parameter pass 0.
    pub fn scalar_params(&self) -> (f32, f32) {
        match *self {
            Activation::Relux { max_limit } => (max_limit, 0.0),
            Activation::Prelu { alpha } => (0.0, alpha),
            _ => (0.0, 0.0),
        }
    }

    /// Reference scalar semantics. Every backend must agree with this
    /// within 1e-5 absolute tolerance.
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            Activation::Noop => x,
            Activation::Relu => x.max(0.0),
            Activation::Relux { max_limit } => x.max(0.0).min(max_limit),
            Activation::Prelu { alpha } => {
                if x < 0.0 {
                    alpha * x
                } else {
                    x
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_activation_is_rejected() {
        let err = Activation::from_def("SWISH", 0.0, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownActivation(ref name) if name == "SWISH"));
    }

    #[test]
    fn scalar_params_follow_argument_order() {
        assert_eq!(Activation::Relux { max_limit: 6.0 }.scalar_params(), (6.0, 0.0));
        assert_eq!(Activation::Prelu { alpha: 2.0 }.scalar_params(), (0.0, 2.0));
        assert_eq!(Activation::Relu.scalar_params(), (0.0, 0.0));
    }
}

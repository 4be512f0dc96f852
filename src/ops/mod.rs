//! Operator kernels and their backend dispatch.
//!
//! Each operator type is a small functor struct constructed from an
//! [`OpDef`](crate::opdef::OpDef) and invoked through the [`OpKernel`]
//! trait. `run` selects the concrete implementation from the globally
//! active backend; a backend that declines (missing feature, no usable
//! device) falls through to the scalar CPU path so a graph always
//! executes.
//!
//! Tiling quantities derived from the output shape define the *global*
//! problem size and are fixed per shape; only the *local* workgroup shape
//! is subject to tuning.

use crate::activation::Activation;
use crate::backend::{get_backend, Backend};
use crate::error::{EngineError, Result};
use crate::future::CompletionToken;
use crate::opdef::OpDef;
use crate::tensors::Tensor;

pub mod cpu;
pub mod simd;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Uniform execution contract every operator kernel implements.
///
/// Inputs are read-only; the output tensor is pre-allocated to the
/// correct shape by shape inference before the call. The returned token
/// resolves when the device has finished the work.
pub trait OpKernel {
    /// How many input tensors `run` expects.
    fn input_arity(&self) -> usize;

    /// Executes the operator on the active backend.
    fn run(&self, inputs: &[&Tensor], output: &mut Tensor) -> Result<CompletionToken>;
}

/// `x / 4`, rounded up. The device kernels process channels and width in
/// vectors of four.
#[inline]
pub fn round_up_div4(x: usize) -> u32 {
    x.div_ceil(4) as u32
}

/// Global problem size for the pointwise-convolution kernel family over
/// an NHWC output shape: `[channel_blocks, width_blocks, height * batch]`.
pub fn conv_1x1_global_size(output_shape: &[usize]) -> Result<[u32; 3]> {
    let [n, h, w, c]: [usize; 4] = output_shape
        .try_into()
        .map_err(|_| EngineError::ShapeMismatch(format!("expected NHWC output, got rank {}", output_shape.len())))?;
    Ok([round_up_div4(c), round_up_div4(w), (h * n) as u32])
}

/// Standalone elementwise activation operator.
#[derive(Debug, Clone)]
pub struct ActivationOp {
    activation: Activation,
}

impl ActivationOp {
    /// Builds the operator from its graph definition. Rejects activation
    /// names outside the fixed enumeration.
    pub fn from_def(def: &OpDef) -> Result<Self> {
        let activation = Activation::from_def(
            def.str_arg("activation", "NOOP"),
            def.f32_arg("max_limit", 0.0),
            def.f32_arg("alpha", 0.0),
        )?;
        Ok(Self { activation })
    }

    /// Directly wraps a resolved activation.
    pub fn new(activation: Activation) -> Self {
        Self { activation }
    }

    /// The fused activation.
    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl OpKernel for ActivationOp {
    fn input_arity(&self) -> usize {
        1
    }

    fn run(&self, inputs: &[&Tensor], output: &mut Tensor) -> Result<CompletionToken> {
        let [input] = take_inputs::<1>(inputs)?;
        if input.shape() != output.shape() {
            return Err(EngineError::ShapeMismatch(format!(
                "activation output shape {:?} differs from input {:?}",
                output.shape(),
                input.shape()
            )));
        }

        match get_backend() {
            Backend::Wgpu => {
                #[cfg(feature = "wgpu")]
                {
                    if let Some(result) = wgpu::activation(self.activation, input, output) {
                        return result;
                    }
                }
            }
            Backend::Simd => {
                return simd::activation(self.activation, input, output);
            }
            Backend::Cpu => {}
        }

        cpu::activation(self.activation, input, output)
    }
}

/// Pointwise (1x1) convolution with an optional bias and a fused
/// activation.
///
/// Layouts: input and output are NHWC, the weight tensor is
/// `[out_channels, in_channels]`. The bias, when present, is the third
/// input with one value per output channel.
#[derive(Debug, Clone)]
pub struct FusedConv2dOp {
    activation: Activation,
    strides: [usize; 2],
    has_bias: bool,
}

impl FusedConv2dOp {
    /// Builds the operator from its graph definition.
    ///
    /// # Errors
    /// Unknown activation names and non-positive or non-2-element stride
    /// lists are graph-authoring defects.
    pub fn from_def(def: &OpDef, has_bias: bool) -> Result<Self> {
        let activation = Activation::from_def(
            def.str_arg("activation", "NOOP"),
            def.f32_arg("max_limit", 0.0),
            def.f32_arg("alpha", 0.0),
        )?;
        let raw = def.ints_arg("strides", &[1, 1]);
        let [sh, sw]: [i64; 2] = raw.try_into().map_err(|_| {
            EngineError::ShapeMismatch(format!("strides must have 2 elements, got {}", raw.len()))
        })?;
        if sh <= 0 || sw <= 0 {
            return Err(EngineError::ShapeMismatch(format!(
                "strides must be positive, got [{sh}, {sw}]"
            )));
        }
        // A pointwise kernel has no spatial extent, so any dilation other
        // than 1 is meaningless for it.
        let dilations = def.ints_arg("dilations", &[1, 1]);
        if dilations.iter().any(|&d| d != 1) {
            return Err(EngineError::ShapeMismatch(format!(
                "pointwise convolution supports only unit dilations, got {dilations:?}"
            )));
        }
        Ok(Self {
            activation,
            strides: [sh as usize, sw as usize],
            has_bias,
        })
    }

    /// The fused activation.
    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Height and width strides.
    pub fn strides(&self) -> [usize; 2] {
        self.strides
    }

    fn check_shapes(&self, input: &Tensor, filter: &Tensor, bias: Option<&Tensor>, output: &Tensor) -> Result<()> {
        let in_shape = input.shape();
        let out_shape = output.shape();
        if in_shape.len() != 4 || out_shape.len() != 4 {
            return Err(EngineError::ShapeMismatch(format!(
                "conv expects NHWC tensors, got input rank {} and output rank {}",
                in_shape.len(),
                out_shape.len()
            )));
        }
        if in_shape[0] != out_shape[0] {
            return Err(EngineError::ShapeMismatch(format!(
                "batch mismatch: input {} vs output {}",
                in_shape[0], out_shape[0]
            )));
        }
        let expected = [
            in_shape[0],
            in_shape[1].div_ceil(self.strides[0]),
            in_shape[2].div_ceil(self.strides[1]),
            filter.dim(0)?,
        ];
        if out_shape != expected {
            return Err(EngineError::ShapeMismatch(format!(
                "conv output shape {out_shape:?}, expected {expected:?}"
            )));
        }
        if filter.rank() != 2 || filter.dim(1)? != in_shape[3] {
            return Err(EngineError::ShapeMismatch(format!(
                "filter shape {:?} incompatible with {} input channels",
                filter.shape(),
                in_shape[3]
            )));
        }
        if let Some(bias) = bias {
            if bias.len() != out_shape[3] {
                return Err(EngineError::ShapeMismatch(format!(
                    "bias has {} values for {} output channels",
                    bias.len(),
                    out_shape[3]
                )));
            }
        }
        Ok(())
    }
}

impl OpKernel for FusedConv2dOp {
    fn input_arity(&self) -> usize {
        if self.has_bias { 3 } else { 2 }
    }

    fn run(&self, inputs: &[&Tensor], output: &mut Tensor) -> Result<CompletionToken> {
        if inputs.len() != self.input_arity() {
            return Err(EngineError::ShapeMismatch(format!(
                "conv expects {} inputs, got {}",
                self.input_arity(),
                inputs.len()
            )));
        }
        let input = inputs[0];
        let filter = inputs[1];
        let bias = inputs.get(2).copied();
        self.check_shapes(input, filter, bias, output)?;

        match get_backend() {
            Backend::Wgpu => {
                #[cfg(feature = "wgpu")]
                {
                    if let Some(result) = wgpu::conv_2d_1x1(self, input, filter, bias, output) {
                        return result;
                    }
                }
            }
            Backend::Simd | Backend::Cpu => {}
        }

        cpu::conv_2d_1x1(self.activation, self.strides, input, filter, bias, output)
    }
}

fn take_inputs<'a, const N: usize>(inputs: &[&'a Tensor]) -> Result<[&'a Tensor; N]> {
    inputs.try_into().map_err(|_| {
        EngineError::ShapeMismatch(format!("expected {N} inputs, got {}", inputs.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiling_rounds_channels_and_width_up_by_four() {
        assert_eq!(round_up_div4(1), 1);
        assert_eq!(round_up_div4(4), 1);
        assert_eq!(round_up_div4(5), 2);
        assert_eq!(round_up_div4(32), 8);
    }

    #[test]
    fn global_size_follows_output_shape() {
        let gws = conv_1x1_global_size(&[2, 3, 9, 6]).unwrap();
        assert_eq!(gws, [2, 3, 6]);
        assert!(conv_1x1_global_size(&[2, 3, 9]).is_err());
    }
}

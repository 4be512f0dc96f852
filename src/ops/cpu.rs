//! Scalar CPU kernels.
//!
//! These are the reference implementations every other backend is
//! checked against, and the fallback when a device backend declines.
//! Elementwise work is split across the rayon pool in cache-friendly
//! chunks; the loops stay simple enough for the compiler to vectorize on
//! its own.

use std::time::Instant;

use rayon::prelude::*;

use crate::activation::Activation;
use crate::error::{EngineError, Result};
use crate::future::CompletionToken;
use crate::tensors::Tensor;

/// Elementwise chunk handed to one pool task.
const PAR_CHUNK: usize = 4096;

pub(crate) fn host_slice(t: &Tensor) -> Result<&[f32]> {
    t.host_data().ok_or(EngineError::StorageMismatch {
        expected: "host buffer",
    })
}

pub(crate) fn host_slice_mut(t: &mut Tensor) -> Result<&mut [f32]> {
    t.host_data_mut().ok_or(EngineError::StorageMismatch {
        expected: "host buffer",
    })
}

/// Applies `act` elementwise. Completes before returning; the token
/// carries the measured wall time.
pub fn activation(act: Activation, input: &Tensor, output: &mut Tensor) -> Result<CompletionToken> {
    let started = Instant::now();
    let src = host_slice(input)?;
    let dst = host_slice_mut(output)?;

    dst.par_chunks_mut(PAR_CHUNK)
        .zip(src.par_chunks(PAR_CHUNK))
        .for_each(|(out, inp)| {
            for (o, x) in out.iter_mut().zip(inp) {
                *o = act.apply(*x);
            }
        });

    Ok(CompletionToken::done(started.elapsed()))
}

/// Pointwise convolution over NHWC data with a `[out_channels,
/// in_channels]` weight matrix, optional per-channel bias, and a fused
/// activation. Shape agreement is the caller's responsibility.
pub fn conv_2d_1x1(
    act: Activation,
    strides: [usize; 2],
    input: &Tensor,
    filter: &Tensor,
    bias: Option<&Tensor>,
    output: &mut Tensor,
) -> Result<CompletionToken> {
    let started = Instant::now();

    let (h, w, cin) = (input.dim(1)?, input.dim(2)?, input.dim(3)?);
    let (ho, wo, cout) = (output.dim(1)?, output.dim(2)?, output.dim(3)?);
    let [sh, sw] = strides;

    let src = host_slice(input)?;
    let wgt = host_slice(filter)?;
    let bias = bias.map(host_slice).transpose()?;
    let dst = host_slice_mut(output)?;

    // A zero-sized dimension makes the row width zero, which the chunked
    // split below cannot express. Nothing to compute either way.
    if dst.is_empty() {
        return Ok(CompletionToken::done(started.elapsed()));
    }

    // One task per output row; row index enumerates (batch, height).
    dst.par_chunks_mut(wo * cout)
        .enumerate()
        .for_each(|(row, out_row)| {
            let batch = row / ho;
            let ih = (row % ho) * sh;
            for ow in 0..wo {
                let in_base = ((batch * h + ih) * w + ow * sw) * cin;
                let pixel = &src[in_base..in_base + cin];
                for oc in 0..cout {
                    let weights = &wgt[oc * cin..(oc + 1) * cin];
                    let mut acc = bias.map_or(0.0, |b| b[oc]);
                    for (x, k) in pixel.iter().zip(weights) {
                        acc += x * k;
                    }
                    out_row[ow * cout + oc] = act.apply(acc);
                }
            }
        });

    Ok(CompletionToken::done(started.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::assert_close;

    #[test]
    fn strided_pointwise_conv_samples_every_other_pixel() {
        // 1x2x4x1 input, stride 2 in width, identity filter.
        let input = Tensor::new(vec![1, 2, 4, 1], (0..8).map(|v| v as f32).collect());
        let filter = Tensor::new(vec![1, 1], vec![1.0]);
        let mut output = Tensor::zeros(vec![1, 2, 2, 1]);
        conv_2d_1x1(Activation::Noop, [1, 2], &input, &filter, None, &mut output).unwrap();
        assert_close(output.host_data().unwrap(), &[0.0, 2.0, 4.0, 6.0], 1e-6);
    }

    #[test]
    fn bias_and_activation_are_fused() {
        let input = Tensor::new(vec![1, 1, 1, 2], vec![1.0, -3.0]);
        // Two output channels: sum and negated sum.
        let filter = Tensor::new(vec![2, 2], vec![1.0, 1.0, -1.0, -1.0]);
        let bias = Tensor::new(vec![2], vec![0.5, 0.5]);
        let mut output = Tensor::zeros(vec![1, 1, 1, 2]);
        conv_2d_1x1(
            Activation::Relu,
            [1, 1],
            &input,
            &filter,
            Some(&bias),
            &mut output,
        )
        .unwrap();
        // Raw outputs are -1.5 and 2.5; ReLU clamps the first.
        assert_close(output.host_data().unwrap(), &[0.0, 2.5], 1e-6);
    }
}

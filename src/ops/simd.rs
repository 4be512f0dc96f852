//! Vectorized CPU kernels.
//!
//! When built with the `simd` feature on an AVX2 target, the clamp-family
//! activations run 8 lanes at a time with a scalar tail. Everything else,
//! and every other build, delegates to the scalar CPU path; both must
//! agree with the reference semantics within the backend tolerance.

use crate::activation::Activation;
use crate::error::Result;
use crate::future::CompletionToken;
use crate::tensors::Tensor;

use super::cpu;

/// Applies `act` elementwise, using AVX2 lanes where the build and the
/// activation kind allow it.
pub fn activation(act: Activation, input: &Tensor, output: &mut Tensor) -> Result<CompletionToken> {
    #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
    {
        if matches!(
            act,
            Activation::Relu | Activation::Relux { .. } | Activation::Prelu { .. }
        ) {
            let started = std::time::Instant::now();
            let src = cpu::host_slice(input)?;
            let dst = cpu::host_slice_mut(output)?;
            // Safety: the surrounding cfg guarantees AVX2 is enabled for
            // this compilation.
            unsafe { clamp_family_avx2(act, src, dst) };
            return Ok(CompletionToken::done(started.elapsed()));
        }
    }

    cpu::activation(act, input, output)
}

/// ReLU, capped ReLU and parametric ReLU over 8-lane registers.
///
/// The negative branch of PReLU is computed unconditionally and selected
/// with a sign-mask blend, so no lane ever diverges.
#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
#[target_feature(enable = "avx2")]
unsafe fn clamp_family_avx2(act: Activation, src: &[f32], dst: &mut [f32]) {
    use std::arch::x86_64::*;

    let lanes = src.len() / 8 * 8;
    let mut i = 0;

    unsafe {
        let zero = _mm256_setzero_ps();
        match act {
            Activation::Relu => {
                while i < lanes {
                    let x = _mm256_loadu_ps(src.as_ptr().add(i));
                    _mm256_storeu_ps(dst.as_mut_ptr().add(i), _mm256_max_ps(x, zero));
                    i += 8;
                }
            }
            Activation::Relux { max_limit } => {
                let cap = _mm256_set1_ps(max_limit);
                while i < lanes {
                    let x = _mm256_loadu_ps(src.as_ptr().add(i));
                    let y = _mm256_min_ps(_mm256_max_ps(x, zero), cap);
                    _mm256_storeu_ps(dst.as_mut_ptr().add(i), y);
                    i += 8;
                }
            }
            Activation::Prelu { alpha } => {
                let slope = _mm256_set1_ps(alpha);
                while i < lanes {
                    let x = _mm256_loadu_ps(src.as_ptr().add(i));
                    let scaled = _mm256_mul_ps(x, slope);
                    let negative = _mm256_cmp_ps::<_CMP_LT_OQ>(x, zero);
                    let y = _mm256_blendv_ps(x, scaled, negative);
                    _mm256_storeu_ps(dst.as_mut_ptr().add(i), y);
                    i += 8;
                }
            }
            _ => {}
        }
    }

    for j in i..src.len() {
        dst[j] = act.apply(src[j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::{assert_close, BACKEND_TOLERANCE};

    #[test]
    fn vector_path_matches_reference_semantics() {
        // Long enough to exercise full lanes plus a scalar tail.
        let values: Vec<f32> = (-10..11).map(|v| v as f32 * 0.5).collect();
        let input = Tensor::new(vec![values.len()], values.clone());
        for act in [
            Activation::Relu,
            Activation::Relux { max_limit: 3.0 },
            Activation::Prelu { alpha: 0.25 },
            Activation::Sigmoid,
        ] {
            let mut output = Tensor::zeros(vec![values.len()]);
            activation(act, &input, &mut output).unwrap();
            let expected: Vec<f32> = values.iter().map(|&x| act.apply(x)).collect();
            assert_close(output.host_data().unwrap(), &expected, BACKEND_TOLERANCE);
        }
    }
}

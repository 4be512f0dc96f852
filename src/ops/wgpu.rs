//! GPU kernel functors.
//!
//! Each functor derives the global problem size from the output shape,
//! requests a specialized pipeline from the runtime, and delegates the
//! workgroup-shape decision to the autotuner. Host-resident tensors are
//! uploaded around the dispatch and read back afterwards; device-resident
//! buffers are bound in place so chained operators never round-trip
//! through the host.
//!
//! A `None` return means the host has no usable GPU and the caller should
//! fall back; `Some(Err(..))` is a real failure.

use std::sync::Arc;

use crate::activation::Activation;
use crate::error::{EngineError, Result};
use crate::future::CompletionToken;
use crate::runtime::{KernelKey, KernelParams, WgpuRuntime};
use crate::tensors::{DataType, Tensor, TensorStorage};
use crate::tuner::{tuning_key, EventTimer, Tuner};

use super::{conv_1x1_global_size, FusedConv2dOp};

/// A buffer either created for this dispatch or shared from a
/// device-resident tensor.
enum GpuBuf {
    Owned(wgpu::Buffer),
    Shared(Arc<wgpu::Buffer>),
}

impl GpuBuf {
    fn raw(&self) -> &wgpu::Buffer {
        match self {
            GpuBuf::Owned(b) => b,
            GpuBuf::Shared(b) => b,
        }
    }
}

/// Binds a tensor as a linear storage buffer, uploading host data on the
/// fly.
fn bind_input(runtime: &WgpuRuntime, label: &str, t: &Tensor) -> Result<GpuBuf> {
    match t.storage() {
        TensorStorage::Host(data) => Ok(GpuBuf::Owned(runtime.storage_buffer(label, data))),
        TensorStorage::DeviceBuffer(buf) => Ok(GpuBuf::Shared(Arc::clone(buf))),
        TensorStorage::DeviceImage { .. } => Err(EngineError::StorageMismatch {
            expected: "linear buffer",
        }),
    }
}

/// Allocates or reuses the output-side buffer. The bool says whether the
/// result must be read back into host storage afterwards.
fn bind_output(runtime: &WgpuRuntime, label: &str, t: &Tensor) -> Result<(GpuBuf, bool)> {
    match t.storage() {
        TensorStorage::Host(_) => Ok((GpuBuf::Owned(runtime.output_buffer(label, t.len())), true)),
        TensorStorage::DeviceBuffer(buf) => Ok((GpuBuf::Shared(Arc::clone(buf)), false)),
        TensorStorage::DeviceImage { .. } => Err(EngineError::StorageMismatch {
            expected: "linear buffer",
        }),
    }
}

fn shape4(t: &Tensor) -> [u32; 4] {
    let mut out = [1u32; 4];
    for (slot, dim) in out.iter_mut().zip(t.shape()) {
        *slot = *dim as u32;
    }
    out
}

/// Fixed candidate workgroup shapes for elementwise kernels.
fn candidates_1d() -> Vec<Vec<u32>> {
    [32, 64, 128, 256, 512]
        .into_iter()
        .map(|x| vec![x, 1, 1])
        .collect()
}

/// Fixed candidate workgroup shapes for the convolution family: a few
/// square-ish tiles plus wide rows, filtered against the device bound by
/// the tuner.
fn candidates_3d() -> Vec<Vec<u32>> {
    vec![
        vec![4, 4, 4],
        vec![8, 4, 1],
        vec![16, 4, 1],
        vec![4, 8, 1],
        vec![8, 8, 1],
        vec![16, 8, 1],
        vec![8, 8, 4],
        vec![64, 1, 1],
        vec![128, 1, 1],
    ]
}

fn local3(params: &[u32]) -> [u32; 3] {
    [params[0], params[1], params[2]]
}

/// Elementwise activation on the GPU.
pub fn activation(
    act: Activation,
    input: &Tensor,
    output: &mut Tensor,
) -> Option<Result<CompletionToken>> {
    let runtime = WgpuRuntime::global()?;
    Some(run_activation(&runtime, act, input, output))
}

fn run_activation(
    runtime: &Arc<WgpuRuntime>,
    act: Activation,
    input: &Tensor,
    output: &mut Tensor,
) -> Result<CompletionToken> {
    let total = output.len() as u32;
    let (max_limit, alpha) = act.scalar_params();
    let params = KernelParams {
        in_shape: shape4(input),
        out_shape: shape4(output),
        stride: [1, 1, 0, 0],
        act_params: [max_limit, alpha, 0.0, 0.0],
    };

    let in_buf = bind_input(runtime, "activation_in", input)?;
    let (out_buf, writeback) = bind_output(runtime, "activation_out", output)?;
    let params_buf = runtime.uniform_buffer("activation_params", params.as_bytes());

    let key_for = |local: [u32; 3]| KernelKey {
        module: "activation",
        symbol: "main",
        data_type: DataType::F32,
        activation: act.kind(),
        bias: false,
        stride: [1, 1],
        local,
    };

    let run = |local: &[u32]| -> Result<CompletionToken> {
        let local = local3(local);
        let pipeline = runtime.kernel(&key_for(local))?;
        Ok(runtime.enqueue(
            "activation",
            &pipeline,
            &[
                in_buf.raw().as_entire_binding(),
                out_buf.raw().as_entire_binding(),
                params_buf.as_entire_binding(),
            ],
            [total, 1, 1],
            local,
        ))
    };

    let token = Tuner::global().tune_or_run(
        &tuning_key("activation", act.kind(), output.shape()),
        &[64, 1, 1],
        runtime.max_workgroup_size(),
        candidates_1d,
        run,
        &mut EventTimer,
    )?;

    if writeback {
        let data = runtime.read_buffer(out_buf.raw(), output.len())?;
        output
            .host_data_mut()
            .expect("writeback target is host-resident")
            .copy_from_slice(&data);
    }
    Ok(token)
}

/// Pointwise convolution on the GPU.
pub fn conv_2d_1x1(
    op: &FusedConv2dOp,
    input: &Tensor,
    filter: &Tensor,
    bias: Option<&Tensor>,
    output: &mut Tensor,
) -> Option<Result<CompletionToken>> {
    let runtime = WgpuRuntime::global()?;
    Some(run_conv_2d_1x1(&runtime, op, input, filter, bias, output))
}

fn run_conv_2d_1x1(
    runtime: &Arc<WgpuRuntime>,
    op: &FusedConv2dOp,
    input: &Tensor,
    filter: &Tensor,
    bias: Option<&Tensor>,
    output: &mut Tensor,
) -> Result<CompletionToken> {
    let act = op.activation();
    let [sh, sw] = op.strides();
    let global = conv_1x1_global_size(output.shape())?;
    let (max_limit, alpha) = act.scalar_params();
    let params = KernelParams {
        in_shape: shape4(input),
        out_shape: shape4(output),
        stride: [sh as u32, sw as u32, 0, 0],
        act_params: [max_limit, alpha, 0.0, 0.0],
    };

    let in_buf = bind_input(runtime, "conv_in", input)?;
    let wgt_buf = bind_input(runtime, "conv_weights", filter)?;
    // The bias slot is always bound; without a bias the kernel is
    // specialized to never read it.
    let bias_buf = match bias {
        Some(b) => bind_input(runtime, "conv_bias", b)?,
        None => GpuBuf::Owned(runtime.storage_buffer("conv_bias", &[0.0])),
    };
    let (out_buf, writeback) = bind_output(runtime, "conv_out", output)?;
    let params_buf = runtime.uniform_buffer("conv_params", params.as_bytes());

    let key_for = |local: [u32; 3]| KernelKey {
        module: "conv_2d_1x1",
        symbol: "main",
        data_type: DataType::F32,
        activation: act.kind(),
        bias: bias.is_some(),
        stride: [sh as u32, sw as u32],
        local,
    };

    let run = |local: &[u32]| -> Result<CompletionToken> {
        let local = local3(local);
        let pipeline = runtime.kernel(&key_for(local))?;
        Ok(runtime.enqueue(
            "conv_2d_1x1",
            &pipeline,
            &[
                in_buf.raw().as_entire_binding(),
                wgt_buf.raw().as_entire_binding(),
                bias_buf.raw().as_entire_binding(),
                out_buf.raw().as_entire_binding(),
                params_buf.as_entire_binding(),
            ],
            global,
            local,
        ))
    };

    let token = Tuner::global().tune_or_run(
        &tuning_key("conv_2d_1x1", act.kind(), output.shape()),
        &[8, 4, 1],
        runtime.max_workgroup_size(),
        candidates_3d,
        run,
        &mut EventTimer,
    )?;

    if writeback {
        let data = runtime.read_buffer(out_buf.raw(), output.len())?;
        output
            .host_data_mut()
            .expect("writeback target is host-resident")
            .copy_from_slice(&data);
    }
    Ok(token)
}

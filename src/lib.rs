//! corten: a device-abstracted operator execution engine with autotuned
//! kernel dispatch.
//!
//! The same operator logic runs against host memory or device-resident
//! buffers, selected at runtime through a global backend switch. Device
//! kernels are compiled from parameterized source, specialized per build
//! signature, and cached for the life of the process; the workgroup shape
//! each kernel launches with is found empirically by the autotuner and
//! remembered per (operator, shape) signature.
//!
//! # Features
//!
//! - Typed, shaped tensors over host buffers or GPU storage.
//! - Operator functors with fused activations and a uniform execution
//!   contract returning completion tokens.
//! - A specialized-program cache keyed by every axis of kernel
//!   specialization.
//! - An autotuner with validity filtering, deterministic tie-breaking,
//!   and a persistable tuning profile.
//!
//! # Backends
//!
//! - `Cpu`: scalar reference implementations, always available.
//! - `Simd`: AVX2 paths for the clamp-family activations behind the
//!   `simd` feature, scalar elsewhere.
//! - `Wgpu`: GPU compute behind the `wgpu` feature; falls back to the
//!   CPU when no usable adapter exists.
//!
//! # Example
//!
//! ```rust
//! use corten::activation::Activation;
//! use corten::ops::{ActivationOp, OpKernel};
//! use corten::tensors::Tensor;
//!
//! let input = Tensor::new(vec![4], vec![-1.0, 2.0, -3.0, 4.0]);
//! let mut output = Tensor::zeros(vec![4]);
//! let op = ActivationOp::new(Activation::Relu);
//! op.run(&[&input], &mut output).unwrap();
//! assert_eq!(output.host_data().unwrap(), &[0.0, 2.0, 0.0, 4.0]);
//! ```

pub mod activation;
pub mod approx;
pub mod backend;
pub mod cache;
pub mod error;
pub mod future;
pub mod logging;
pub mod opdef;
pub mod ops;
#[cfg(feature = "wgpu")]
pub mod runtime;
pub mod tensors;
pub mod tuner;

pub use activation::Activation;
pub use backend::{get_backend, set_backend, Backend};
pub use error::{EngineError, Result};
pub use future::CompletionToken;
pub use tensors::Tensor;

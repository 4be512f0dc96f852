//! GPU device runtime: context, specialized kernel compilation, and the
//! process-wide program cache.
//!
//! Kernel source ships as WGSL templates with substitution markers for
//! every axis of build-time specialization: workgroup shape, activation
//! kind, bias presence. The [`KernelKey`] captures those axes plus the
//! module and entry symbol; two requests with identical keys share one
//! compiled pipeline, differing keys compile distinct ones. WGSL fixes
//! the workgroup shape at compile time, so the tuned local configuration
//! is part of the key rather than a launch argument.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::activation::ActivationKind;
use crate::cache::KernelCache;
use crate::error::{EngineError, Result};
use crate::future::CompletionToken;
use crate::tensors::DataType;

const ACTIVATION_WGSL: &str = include_str!("ops/shaders/activation.wgsl");
const CONV_2D_1X1_WGSL: &str = include_str!("ops/shaders/conv_2d_1x1.wgsl");

/// Template source for a named kernel module.
fn module_source(module: &str) -> Option<&'static str> {
    match module {
        "activation" => Some(ACTIVATION_WGSL),
        "conv_2d_1x1" => Some(CONV_2D_1X1_WGSL),
        _ => None,
    }
}

/// Build signature of one compiled kernel. Every field is baked into the
/// generated source, so the key doubles as the program-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    /// Kernel module (template) name.
    pub module: &'static str,
    /// Entry symbol inside the module.
    pub symbol: &'static str,
    /// Element type the kernel is compiled for.
    pub data_type: DataType,
    /// Fused activation kind.
    pub activation: ActivationKind,
    /// Whether a bias buffer is bound.
    pub bias: bool,
    /// Height and width strides.
    pub stride: [u32; 2],
    /// Workgroup shape baked into the entry point.
    pub local: [u32; 3],
}

/// Substitutes one specialization marker, failing if the template does
/// not carry it. A missing marker is a defect in the shipped kernel
/// source, not a runtime condition.
fn substitute(source: &str, module: &'static str, marker: &str, value: &str) -> Result<String> {
    if !source.contains(marker) {
        return Err(EngineError::KernelBuild {
            module,
            detail: format!("template lacks specialization marker {marker}"),
        });
    }
    Ok(source.replace(marker, value))
}

/// Renders a module template into compilable WGSL for the given key.
fn specialize(template: &str, key: &KernelKey) -> Result<String> {
    let m = key.module;
    let mut src = substitute(template, m, "__WG_X__", &key.local[0].to_string())?;
    src = substitute(&src, m, "__WG_Y__", &key.local[1].to_string())?;
    src = substitute(&src, m, "__WG_Z__", &key.local[2].to_string())?;
    src = substitute(&src, m, "__ACTIVATION__", &key.activation.id().to_string())?;
    if src.contains("__HAS_BIAS__") {
        src = src.replace("__HAS_BIAS__", if key.bias { "1" } else { "0" });
    } else if key.bias {
        return Err(EngineError::KernelBuild {
            module: m,
            detail: "template cannot carry a bias".to_string(),
        });
    }
    Ok(src)
}

/// Holds the device and queue plus the process-lifetime pipeline cache.
///
/// Initialized once and shared by every GPU operator; acquisition failure
/// leaves the engine on its CPU backends.
pub struct WgpuRuntime {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: KernelCache<KernelKey, wgpu::ComputePipeline>,
}

impl std::fmt::Debug for WgpuRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuRuntime")
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

impl WgpuRuntime {
    /// Selects the default adapter and creates a device and queue.
    ///
    /// Uses `pollster::block_on` to drive the async acquisition calls to
    /// completion; the engine has no async surface of its own.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|err| {
                    tracing::warn!(error = %err, "no usable gpu adapter");
                    EngineError::BackendUnavailable("no usable gpu adapter")
                })?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| {
            tracing::warn!(error = %err, "gpu device acquisition failed");
            EngineError::BackendUnavailable("gpu device acquisition failed")
        })?;

        tracing::info!("gpu runtime initialized");
        Ok(Self {
            device,
            queue,
            pipelines: KernelCache::new(),
        })
    }

    /// The shared runtime, initialized on first use. `None` when the host
    /// has no usable GPU; that outcome is remembered, so the probe cost
    /// is paid once.
    pub fn global() -> Option<Arc<WgpuRuntime>> {
        lazy_static::lazy_static! {
            static ref RUNTIME: Option<Arc<WgpuRuntime>> = WgpuRuntime::new().ok().map(Arc::new);
        }
        RUNTIME.clone()
    }

    /// The underlying device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The submission queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Upper bound on the product of a workgroup shape's components.
    /// Tuning candidates beyond it are filtered before ever reaching the
    /// device.
    pub fn max_workgroup_size(&self) -> u32 {
        self.device.limits().max_compute_invocations_per_workgroup
    }

    /// How many distinct kernels have been compiled so far.
    pub fn compiled_kernel_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns the compiled pipeline for `key`, compiling it on first
    /// request and caching it for the rest of the process.
    pub fn kernel(&self, key: &KernelKey) -> Result<Arc<wgpu::ComputePipeline>> {
        self.pipelines.get_or_try_insert(key, || {
            let template = module_source(key.module).ok_or(EngineError::KernelBuild {
                module: key.module,
                detail: "unknown kernel module".to_string(),
            })?;
            let source = specialize(template, key)?;
            tracing::debug!(module = key.module, symbol = key.symbol, ?key.local, "compiling kernel");
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(key.module),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            Ok(self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(key.module),
                    layout: None,
                    module: &module,
                    entry_point: Some(key.symbol),
                    cache: None,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }))
        })
    }

    /// Uploads host data into a storage buffer.
    pub fn storage_buffer(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: as_bytes(data),
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    /// Allocates an uninitialized storage buffer the device can copy out
    /// of.
    pub fn output_buffer(&self, label: &str, elements: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (elements * DataType::F32.size_of()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Uploads small scalar parameters as a uniform buffer.
    pub fn uniform_buffer(&self, label: &str, data: &[u8]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    /// Records and submits one dispatch of `pipeline` over `global` work
    /// items, grouped by the workgroup shape baked into the pipeline.
    ///
    /// Returns immediately with a token for the submitted work; ordering
    /// against earlier submissions is guaranteed by the queue.
    pub fn enqueue(
        self: &Arc<Self>,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bindings: &[wgpu::BindingResource<'_>],
        global: [u32; 3],
        local: [u32; 3],
    ) -> CompletionToken {
        let entries: Vec<wgpu::BindGroupEntry> = bindings
            .iter()
            .enumerate()
            .map(|(i, resource)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: resource.clone(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                global[0].div_ceil(local[0]),
                global[1].div_ceil(local[1]),
                global[2].div_ceil(local[2]),
            );
        }
        self.queue.submit(Some(encoder.finish()));

        CompletionToken::device(Arc::clone(self))
    }

    /// Copies a device buffer back into host memory, blocking until the
    /// device has drained all submitted work.
    pub fn read_buffer(&self, buffer: &wgpu::Buffer, elements: usize) -> Result<Vec<f32>> {
        let size = (elements * DataType::F32.size_of()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        staging.slice(..).map_async(wgpu::MapMode::Read, |_| {});
        if let Err(err) = self.device.poll(wgpu::PollType::Wait) {
            tracing::error!(error = %err, "device wait failed during readback");
            return Err(EngineError::Device { code: -1 });
        }

        let view = staging.slice(..).get_mapped_range();
        let data = bytes_to_f32_slice(&view)?.to_vec();
        drop(view);
        staging.unmap();
        Ok(data)
    }
}

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    // Safety: T is Copy and plain-old-data here (f32/u32 parameter
    // blocks); the lifetime is tied to the input slice.
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

fn bytes_to_f32_slice(data: &[u8]) -> Result<&[f32]> {
    use std::mem::{align_of, size_of};

    if data.as_ptr() as usize % align_of::<f32>() != 0 || data.len() % size_of::<f32>() != 0 {
        return Err(EngineError::Device { code: -2 });
    }
    let len = data.len() / size_of::<f32>();
    // Safety: alignment and length were just checked; any bit pattern is
    // a valid f32.
    unsafe { Ok(std::slice::from_raw_parts(data.as_ptr() as *const f32, len)) }
}

/// Packed scalar parameters shared by the shipped kernels, uploaded as
/// one uniform block. Field order matches the WGSL struct declaration.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct KernelParams {
    /// NHWC input dimensions.
    pub in_shape: [u32; 4],
    /// NHWC output dimensions.
    pub out_shape: [u32; 4],
    /// Height and width strides, padded to 16 bytes.
    pub stride: [u32; 4],
    /// Activation scalars `(max_limit, alpha)`, padded to 16 bytes.
    pub act_params: [f32; 4],
}

impl KernelParams {
    /// Raw bytes for uniform upload.
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: repr(C) struct of u32/f32 with no padding between the
        // 16-byte rows.
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, std::mem::size_of::<Self>())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(local: [u32; 3], activation: ActivationKind, bias: bool) -> KernelKey {
        KernelKey {
            module: "conv_2d_1x1",
            symbol: "main",
            data_type: DataType::F32,
            activation,
            bias,
            stride: [1, 1],
            local,
        }
    }

    #[test]
    fn specialization_bakes_workgroup_and_activation() {
        let rendered = specialize(CONV_2D_1X1_WGSL, &key([8, 4, 1], ActivationKind::Relu, true)).unwrap();
        assert!(rendered.contains("@workgroup_size(8, 4, 1)"));
        assert!(rendered.contains("ACTIVATION: u32 = 1"));
        assert!(!rendered.contains("__WG_X__"));
        assert!(!rendered.contains("__HAS_BIAS__"));
    }

    #[test]
    fn missing_marker_is_a_build_defect() {
        let err = specialize("fn main() {}", &key([1, 1, 1], ActivationKind::Noop, false)).unwrap_err();
        assert!(matches!(err, EngineError::KernelBuild { module: "conv_2d_1x1", .. }));
    }

    #[test]
    fn distinct_locals_are_distinct_cache_keys() {
        let a = key([8, 4, 1], ActivationKind::Relu, false);
        let b = key([4, 4, 4], ActivationKind::Relu, false);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}

//! wgpu backend implementation.
//!
//! Runs the kernels as WGSL compute shaders with 16x16 workgroups, one
//! invocation per launched task.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use super::primitives::{check_launch, DeviceBuffer, DevicePrimitives};
use super::DeviceLimits;
use crate::config::KernelWindow;
use crate::partition::{GridPartition, BLOCK_DIM};
use crate::raster::Raster;
use crate::shaders;
use crate::{ComputeError, ComputeResult};

/// Bytes per stored sample (one `u32` word).
const SAMPLE_BYTES: u64 = 4;

/// Dimensions uniform: [width, height, extra, 0]
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DimsUniform {
    dims: [u32; 4],
}

/// GPU buffer handle for raster data.
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    size_bytes: u64,
}

impl DeviceBuffer for WgpuBuffer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

struct Pipelines {
    flip: wgpu::ComputePipeline,
    blur: wgpu::ComputePipeline,
}

/// wgpu GPU primitives implementation.
pub struct WgpuPrimitives {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: Pipelines,
    limits: DeviceLimits,
}

impl WgpuPrimitives {
    /// Check if wgpu is available.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Create new wgpu primitives.
    pub fn new() -> ComputeResult<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Create new wgpu primitives asynchronously.
    pub async fn new_async() -> ComputeResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ComputeError::NoAdapter)?;

        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("flipblur_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            }, None)
            .await
            .map_err(|e| ComputeError::DeviceCreation(e.to_string()))?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let adapter_info = adapter.get_info();
        let mut limits = DeviceLimits::with_memory(estimate_vram(&adapter_info, adapter_limits.max_buffer_size));
        limits.max_buffer_bytes = adapter_limits
            .max_buffer_size
            .min(adapter_limits.max_storage_buffer_binding_size as u64);

        let pipelines = Self::create_pipelines(&device)?;

        debug!(adapter = %adapter_info.name, available = limits.available_memory, "wgpu device ready");

        Ok(Self { device, queue, pipelines, limits })
    }

    /// Replace detected limits, e.g. to apply a configured memory cap.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    fn create_pipelines(device: &wgpu::Device) -> ComputeResult<Pipelines> {
        let create_pipeline = |source: &str, label: &str| -> ComputeResult<wgpu::ComputePipeline> {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

            match pollster::block_on(device.pop_error_scope()) {
                Some(e) => Err(ComputeError::ShaderCompilation(format!("{label}: {e}"))),
                None => Ok(pipeline),
            }
        };

        Ok(Pipelines {
            flip: create_pipeline(shaders::FLIP_H, "flip_pipeline")?,
            blur: create_pipeline(shaders::BOX_BLUR, "blur_pipeline")?,
        })
    }

    fn create_dims_buffer(&self, w: u32, h: u32, extra: u32) -> wgpu::Buffer {
        let uniform = DimsUniform { dims: [w, h, extra, 0] };
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dims_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    /// Storage buffer creation, with out-of-memory reported as an error.
    fn checked_buffer(&self, op: &'static str, width: u32, height: u32,
                      create: impl FnOnce(&wgpu::Device) -> wgpu::Buffer) -> ComputeResult<wgpu::Buffer> {
        if !self.limits.fits_buffer(width, height, SAMPLE_BYTES) {
            return Err(ComputeError::Allocation {
                op,
                detail: format!("{width}x{height} exceeds max buffer size {}", self.limits.max_buffer_bytes),
            });
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = create(self.device.as_ref());
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(ComputeError::Allocation { op, detail: e.to_string() }),
            None => Ok(buffer),
        }
    }

    /// Execute compute dispatch and wait.
    fn dispatch_and_wait(&self, op: &'static str, pipeline: &wgpu::ComputePipeline,
                         bind_group: &wgpu::BindGroup, partition: &GridPartition) -> ComputeResult<()> {
        if partition.block() != (BLOCK_DIM, BLOCK_DIM) {
            return Err(ComputeError::Launch {
                op,
                detail: format!("workgroup size is fixed at {BLOCK_DIM}x{BLOCK_DIM}, got {:?}", partition.block()),
            });
        }
        let (gx, gy) = partition.grid();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compute_encoder"),
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compute_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(gx, gy, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(ComputeError::Launch { op, detail: e.to_string() }),
            None => Ok(()),
        }
    }

    fn bind(&self, label: &str, pipeline: &wgpu::ComputePipeline, src: &WgpuBuffer,
            dst: &WgpuBuffer, dims: &wgpu::Buffer) -> wgpu::BindGroup {
        let layout = pipeline.get_bind_group_layout(0);
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: src.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: dst.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: dims.as_entire_binding() },
            ],
        })
    }
}

impl DevicePrimitives for WgpuPrimitives {
    type Handle = WgpuBuffer;

    fn upload(&self, raster: &Raster) -> ComputeResult<Self::Handle> {
        let (width, height) = raster.dimensions();
        let widened: Vec<u32> = raster.data().iter().map(|&v| v as u32).collect();
        let size_bytes = widened.len() as u64 * SAMPLE_BYTES;

        let buffer = self.checked_buffer("copy input to device", width, height, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("raster_buffer"),
                contents: bytemuck::cast_slice(&widened),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            })
        })?;

        Ok(WgpuBuffer { buffer, width, height, size_bytes })
    }

    fn download(&self, handle: &Self::Handle) -> ComputeResult<Raster> {
        let size = handle.size_bytes;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&handle.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| { let _ = tx.send(r); });
        self.device.poll(wgpu::Maintain::Wait);

        let transfer_err = |detail: String| ComputeError::Transfer { op: "copy result to host", detail };
        rx.recv()
            .map_err(|_| transfer_err("map channel closed".into()))?
            .map_err(|e| transfer_err(format!("map failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let data: Vec<u8> = bytemuck::cast_slice::<u8, u32>(&mapped).iter().map(|&v| v as u8).collect();
        drop(mapped);
        staging.unmap();

        Raster::from_vec(data, handle.width, handle.height)
    }

    fn allocate(&self, width: u32, height: u32) -> ComputeResult<Self::Handle> {
        let size_bytes = crate::raster::checked_len(width, height)? as u64 * SAMPLE_BYTES;

        let buffer = self.checked_buffer("allocate device buffer", width, height, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("output_buffer"),
                size: size_bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        Ok(WgpuBuffer { buffer, width, height, size_bytes })
    }

    fn exec_flip(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;
        trace!(grid = ?partition.grid(), "wgpu::flip");

        let dims_buf = self.create_dims_buffer(src.width, src.height, 0);
        let bind_group = self.bind("flip_bind_group", &self.pipelines.flip, src, dst, &dims_buf);
        self.dispatch_and_wait("flip kernel", &self.pipelines.flip, &bind_group, partition)
    }

    fn exec_blur(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 window: KernelWindow, partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;

        // The shader accumulates in a u32.
        let max_count = window.size().min(src.height) as u64 * window.size().min(src.width) as u64;
        if max_count * 255 > u32::MAX as u64 {
            return Err(ComputeError::Launch {
                op: "blur kernel",
                detail: format!("window {} too large for 32-bit accumulation", window.size()),
            });
        }
        trace!(grid = ?partition.grid(), window = window.size(), "wgpu::blur");

        let dims_buf = self.create_dims_buffer(src.width, src.height, window.radius());
        let bind_group = self.bind("blur_bind_group", &self.pipelines.blur, src, dst, &dims_buf);
        self.dispatch_and_wait("blur kernel", &self.pipelines.blur, &bind_group, partition)
    }

    fn bytes_per_sample(&self) -> u64 {
        SAMPLE_BYTES
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "wgpu"
    }
}

/// Estimate total VRAM; wgpu exposes no direct query.
fn estimate_vram(info: &wgpu::AdapterInfo, max_buffer_bytes: u64) -> u64 {
    if let Some(mb) = std::env::var("FLIPBLUR_GPU_MEMORY_MB").ok().and_then(|v| v.parse::<u64>().ok()) {
        return mb.saturating_mul(1024 * 1024);
    }

    let from_buffer = max_buffer_bytes.saturating_mul(2);

    match info.device_type {
        wgpu::DeviceType::DiscreteGpu => from_buffer.clamp(2u64 << 30, 24u64 << 30),
        wgpu::DeviceType::IntegratedGpu => from_buffer.clamp(512u64 << 20, 4u64 << 30),
        wgpu::DeviceType::VirtualGpu => from_buffer.clamp(1u64 << 30, 8u64 << 30),
        _ => from_buffer.clamp(256u64 << 20, 2u64 << 30),
    }
}

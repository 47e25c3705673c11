//! CUDA backend for the flip/blur kernels.
//!
//! Requires the `cuda` feature and an NVIDIA GPU with CUDA support. Kernels
//! are compiled at runtime via NVRTC and launched on the default stream with
//! the partition's block and grid shape.

use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg};
use tracing::{debug, trace};

use super::primitives::{check_launch, DeviceBuffer, DevicePrimitives};
use super::DeviceLimits;
use crate::config::KernelWindow;
use crate::partition::GridPartition;
use crate::raster::Raster;
use crate::{ComputeError, ComputeResult};

/// CUDA C source for the per-pixel kernels.
///
/// Both kernels take one task per output pixel on a 2D grid and return
/// early for overhang tasks.
const CUDA_KERNELS: &str = r#"
extern "C" {

__global__ void flip_h_kernel(
    const unsigned char* __restrict__ src,
    unsigned char* __restrict__ dst,
    int width, int height
) {
    int x = blockIdx.x * blockDim.x + threadIdx.x;
    int y = blockIdx.y * blockDim.y + threadIdx.y;
    if (x >= width || y >= height) return;

    dst[y * width + x] = src[y * width + (width - 1 - x)];
}

// Clipped mean: out-of-range samples count toward neither sum nor divisor.
__global__ void box_blur_kernel(
    const unsigned char* __restrict__ src,
    unsigned char* __restrict__ dst,
    int rows, int cols, int radius
) {
    int col = blockIdx.x * blockDim.x + threadIdx.x;
    int row = blockIdx.y * blockDim.y + threadIdx.y;
    if (row >= rows || col >= cols) return;

    int r0 = row - min(row, radius);
    int r1 = row + min(rows - 1 - row, radius);
    int c0 = col - min(col, radius);
    int c1 = col + min(cols - 1 - col, radius);

    unsigned long long sum = 0;
    for (int r = r0; r <= r1; r++) {
        for (int c = c0; c <= c1; c++) {
            sum += src[r * cols + c];
        }
    }
    unsigned long long count = (unsigned long long)(r1 - r0 + 1) * (unsigned long long)(c1 - c0 + 1);
    dst[row * cols + col] = (unsigned char)(sum / count);
}

} // extern "C"
"#;

/// Largest pixel count the kernels can index with 32-bit `int`.
const MAX_KERNEL_PIXELS: u64 = 1 << 31;

/// Kernel `(width, height)` arguments, rejecting images past `int` indexing.
fn kernel_dims(width: u32, height: u32) -> ComputeResult<(i32, i32)> {
    let pixels = width as u64 * height as u64;
    match (i32::try_from(width), i32::try_from(height)) {
        (Ok(w), Ok(h)) if pixels <= MAX_KERNEL_PIXELS => Ok((w, h)),
        _ => Err(ComputeError::Launch {
            op: "configure CUDA launch",
            detail: format!("{width}x{height} exceeds 32-bit kernel indexing"),
        }),
    }
}

/// CUDA buffer handle for raster data.
///
/// Memory is managed by cudarc and freed when this handle is dropped.
pub struct CudaBuffer {
    buffer: CudaSlice<u8>,
    width: u32,
    height: u32,
}

impl DeviceBuffer for CudaBuffer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// CUDA primitives.
pub struct CudaPrimitives {
    /// CUDA context - kept alive for the lifetime of primitives.
    #[allow(dead_code)]
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    /// Compiled CUDA module - kept alive for kernel lifetime.
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    k_flip: CudaFunction,
    k_blur: CudaFunction,
    limits: DeviceLimits,
}

impl CudaPrimitives {
    /// Create new CUDA primitives on device 0.
    pub fn new() -> ComputeResult<Self> {
        let ctx = CudaContext::new(0).map_err(|e| {
            ComputeError::DeviceCreation(format!("CUDA init failed: {e:?}"))
        })?;

        let stream = ctx.default_stream();
        let limits = query_limits();

        let ptx = cudarc::nvrtc::compile_ptx(CUDA_KERNELS).map_err(|e| {
            ComputeError::ShaderCompilation(format!("CUDA kernel compile failed: {e:?}"))
        })?;

        let module = ctx.load_module(ptx).map_err(|e| {
            ComputeError::ShaderCompilation(format!("CUDA module load failed: {e:?}"))
        })?;

        let load_err = |name: &str, e: cudarc::driver::result::DriverError| {
            ComputeError::ShaderCompilation(format!("Failed to load {name}: {e:?}"))
        };

        let k_flip = module.load_function("flip_h_kernel").map_err(|e| load_err("flip_h_kernel", e))?;
        let k_blur = module.load_function("box_blur_kernel").map_err(|e| load_err("box_blur_kernel", e))?;

        debug!(available = limits.available_memory, "CUDA device ready");

        Ok(Self { ctx, stream, module, k_flip, k_blur, limits })
    }

    /// Replace detected limits, e.g. to apply a configured memory cap.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Check if CUDA is available.
    pub fn is_available() -> bool {
        CudaContext::new(0).is_ok()
    }

    fn launch_config(partition: &GridPartition) -> LaunchConfig {
        let (bx, by) = partition.block();
        let (gx, gy) = partition.grid();
        LaunchConfig {
            block_dim: (bx, by, 1),
            grid_dim: (gx, gy, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Block until every queued launch has finished, surfacing async faults.
    fn sync(&self, op: &'static str) -> ComputeResult<()> {
        self.stream.synchronize().map_err(|e| ComputeError::Launch {
            op,
            detail: format!("{e:?}"),
        })
    }
}

impl DevicePrimitives for CudaPrimitives {
    type Handle = CudaBuffer;

    fn upload(&self, raster: &Raster) -> ComputeResult<Self::Handle> {
        let buffer = self.stream.clone_htod(raster.data()).map_err(|e| ComputeError::Transfer {
            op: "copy input to device",
            detail: format!("{e:?}"),
        })?;
        Ok(CudaBuffer { buffer, width: raster.width(), height: raster.height() })
    }

    fn download(&self, handle: &Self::Handle) -> ComputeResult<Raster> {
        let data = self.stream.clone_dtoh(&handle.buffer).map_err(|e| ComputeError::Transfer {
            op: "copy result to host",
            detail: format!("{e:?}"),
        })?;
        Raster::from_vec(data, handle.width, handle.height)
    }

    fn allocate(&self, width: u32, height: u32) -> ComputeResult<Self::Handle> {
        let size = crate::raster::checked_len(width, height)?;
        let buffer: CudaSlice<u8> = self.stream.alloc_zeros(size).map_err(|e| ComputeError::Allocation {
            op: "allocate device buffer",
            detail: format!("{e:?}"),
        })?;
        Ok(CudaBuffer { buffer, width, height })
    }

    fn exec_flip(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;
        let (w, h) = kernel_dims(src.width, src.height)?;
        let cfg = Self::launch_config(partition);
        trace!(grid = ?cfg.grid_dim, "cuda::flip");

        let mut builder = self.stream.launch_builder(&self.k_flip);
        builder.arg(&src.buffer);
        builder.arg(&mut dst.buffer);
        builder.arg(&w);
        builder.arg(&h);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(|e| ComputeError::Launch {
            op: "launch flip kernel",
            detail: format!("{e:?}"),
        })?;

        self.sync("flip kernel")
    }

    fn exec_blur(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 window: KernelWindow, partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;
        let (cols, rows) = kernel_dims(src.width, src.height)?;
        let radius = i32::try_from(window.radius()).unwrap_or(i32::MAX);
        let cfg = Self::launch_config(partition);
        trace!(grid = ?cfg.grid_dim, window = window.size(), "cuda::blur");

        let mut builder = self.stream.launch_builder(&self.k_blur);
        builder.arg(&src.buffer);
        builder.arg(&mut dst.buffer);
        builder.arg(&rows);
        builder.arg(&cols);
        builder.arg(&radius);

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(|e| ComputeError::Launch {
            op: "launch blur kernel",
            detail: format!("{e:?}"),
        })?;

        self.sync("blur kernel")
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "CUDA"
    }
}

/// Query device memory from the CUDA driver, falling back to defaults.
fn query_limits() -> DeviceLimits {
    use cudarc::driver::sys as cuda_sys;

    let mut free: usize = 0;
    let mut total: usize = 0;

    #[allow(unsafe_code)]
    let result = unsafe {
        cuda_sys::cuMemGetInfo_v2(&raw mut free, &raw mut total)
    };

    if result == cuda_sys::CUresult::CUDA_SUCCESS {
        let mut limits = DeviceLimits::with_memory(total as u64);
        limits.available_memory = limits.available_memory.min(free as u64);
        limits
    } else {
        DeviceLimits::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_dims() {
        assert_eq!(kernel_dims(1024, 768).unwrap(), (1024, 768));
        assert_eq!(kernel_dims(1 << 16, 1 << 15).unwrap(), (1 << 16, 1 << 15));
    }

    #[test]
    fn test_kernel_dims_rejects_wide_images() {
        for (w, h) in [(1 << 31, 1), (1, u32::MAX), (1 << 16, (1 << 15) + 1), (u32::MAX, u32::MAX)] {
            let err = kernel_dims(w, h).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Launch, "{w}x{h}");
        }
    }
}

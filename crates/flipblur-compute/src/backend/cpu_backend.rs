//! CPU backend using rayon for parallelization.
//!
//! The block grid is emulated: each block row of the partition becomes one
//! rayon task that owns a disjoint band of output rows, and every thread slot
//! of every block in that row runs the per-pixel kernel.

use rayon::prelude::*;
use tracing::trace;

use super::primitives::{check_launch, DeviceBuffer, DevicePrimitives};
use super::DeviceLimits;
use crate::config::KernelWindow;
use crate::kernels::{blur_pixel, flip_pixel};
use crate::partition::GridPartition;
use crate::raster::{Raster, RasterView};
use crate::ComputeResult;

/// CPU buffer - data stored in RAM.
pub struct CpuBuffer {
    raster: Raster,
}

impl CpuBuffer {
    pub fn data(&self) -> &[u8] {
        self.raster.data()
    }
}

impl DeviceBuffer for CpuBuffer {
    fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }
}

/// CPU primitives implementation.
pub struct CpuPrimitives {
    limits: DeviceLimits,
}

impl CpuPrimitives {
    pub fn new() -> Self {
        // Get system RAM (fallback to 4GB if detection fails)
        let available = sys_info::mem_info()
            .map(|m| m.avail * 1024)
            .unwrap_or(4 * 1024 * 1024 * 1024);

        Self {
            limits: DeviceLimits {
                max_buffer_bytes: u64::MAX,
                total_memory: available,
                available_memory: available,
                detected: true,
            },
        }
    }

    /// Replace detected limits, e.g. to apply a configured memory cap.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for CpuPrimitives {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `kernel` once per launched task of `partition`, writing `dst`.
///
/// Overhang tasks (outside the image) do nothing.
fn launch_grid<K>(partition: &GridPartition, src: RasterView<'_>, dst: &mut [u8], kernel: K)
where
    K: Fn(&RasterView<'_>, u32, u32) -> u8 + Sync,
{
    let width = partition.width() as usize;
    let (block_w, block_h) = partition.block();
    let (grid_w, _) = partition.grid();

    dst.par_chunks_mut(width * block_h as usize)
        .enumerate()
        .for_each(|(by, band)| {
            let by = by as u32;
            for bx in 0..grid_w {
                for ty in 0..block_h {
                    for tx in 0..block_w {
                        let (x, y) = partition.global_coord((bx, by), (tx, ty));
                        if !partition.in_bounds(x, y) {
                            continue;
                        }
                        let local = (y - by * block_h) as usize * width + x as usize;
                        band[local] = kernel(&src, x, y);
                    }
                }
            }
        });
}

impl DevicePrimitives for CpuPrimitives {
    type Handle = CpuBuffer;

    fn upload(&self, raster: &Raster) -> ComputeResult<Self::Handle> {
        Ok(CpuBuffer { raster: raster.clone() })
    }

    fn download(&self, handle: &Self::Handle) -> ComputeResult<Raster> {
        Ok(handle.raster.clone())
    }

    fn allocate(&self, width: u32, height: u32) -> ComputeResult<Self::Handle> {
        Ok(CpuBuffer { raster: Raster::new(width, height)? })
    }

    fn exec_flip(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;
        trace!(grid = ?partition.grid(), "cpu::flip");
        launch_grid(partition, src.raster.view(), dst.raster.data_mut(), flip_pixel);
        Ok(())
    }

    fn exec_blur(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 window: KernelWindow, partition: &GridPartition) -> ComputeResult<()> {
        check_launch(src, dst, partition)?;
        trace!(grid = ?partition.grid(), window = window.size(), "cpu::blur");
        launch_grid(partition, src.raster.view(), dst.raster.data_mut(), |view, x, y| {
            blur_pixel(view, y, x, window)
        });
        Ok(())
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn name(&self) -> &'static str {
        "CPU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{box_blur, flip_horizontal};
    use crate::ComputeError;

    fn noise(w: u32, h: u32) -> Raster {
        Raster::from_fn(w, h, |x, y| {
            let v = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503));
            (v >> 13) as u8
        })
        .unwrap()
    }

    #[test]
    fn test_flip_matches_reference() {
        let gpu = CpuPrimitives::new();
        for &(w, h) in &[(1, 1), (17, 5), (33, 47), (64, 48)] {
            let src = noise(w, h);
            let partition = GridPartition::new(w, h);
            let input = gpu.upload(&src).unwrap();
            let mut out = gpu.allocate(w, h).unwrap();
            gpu.exec_flip(&input, &mut out, &partition).unwrap();
            assert_eq!(gpu.download(&out).unwrap(), flip_horizontal(&src), "{w}x{h}");
        }
    }

    #[test]
    fn test_blur_matches_reference() {
        let gpu = CpuPrimitives::new();
        let window = KernelWindow::new(5).unwrap();
        for &(w, h) in &[(3, 2), (19, 23), (40, 17)] {
            let src = noise(w, h);
            let partition = GridPartition::new(w, h);
            let input = gpu.upload(&src).unwrap();
            let mut out = gpu.allocate(w, h).unwrap();
            gpu.exec_blur(&input, &mut out, window, &partition).unwrap();
            assert_eq!(gpu.download(&out).unwrap(), box_blur(&src, window), "{w}x{h}");
        }
    }

    #[test]
    fn test_odd_block_shape() {
        let gpu = CpuPrimitives::new();
        let src = noise(21, 13);
        let partition = GridPartition::with_block(21, 13, 8, 3);
        let input = gpu.upload(&src).unwrap();
        let mut out = gpu.allocate(21, 13).unwrap();
        gpu.exec_flip(&input, &mut out, &partition).unwrap();
        assert_eq!(gpu.download(&out).unwrap(), flip_horizontal(&src));
    }

    #[test]
    fn test_mismatched_buffers_rejected() {
        let gpu = CpuPrimitives::new();
        let input = gpu.upload(&noise(8, 8)).unwrap();
        let mut out = gpu.allocate(8, 4).unwrap();
        let err = gpu.exec_flip(&input, &mut out, &GridPartition::new(8, 8)).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 64, actual: 32 }));
    }
}

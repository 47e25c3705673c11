//! Device primitives abstraction shared by every backend.

use crate::config::KernelWindow;
use crate::partition::GridPartition;
use crate::raster::Raster;
use crate::{ComputeError, ComputeResult};
use super::DeviceLimits;

/// Handle to a raster resident in device memory.
///
/// Dropping the handle releases the device allocation.
pub trait DeviceBuffer: Send + Sync {
    /// Raster dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);

    /// Width.
    fn width(&self) -> u32 { self.dimensions().0 }

    /// Height.
    fn height(&self) -> u32 { self.dimensions().1 }

    /// Sample count.
    fn len(&self) -> usize {
        let (w, h) = self.dimensions();
        w as usize * h as usize
    }

    /// Bytes of device memory held.
    fn size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

/// Core device operations.
///
/// Transfers are synchronous. Kernel launches return once the kernel has
/// finished, so a later launch always observes the earlier one's writes.
pub trait DevicePrimitives: Send + Sync {
    /// Backend-specific buffer handle type.
    type Handle: DeviceBuffer;

    /// Allocate a device buffer and copy the raster into it.
    fn upload(&self, raster: &Raster) -> ComputeResult<Self::Handle>;

    /// Copy a device buffer back into a new host raster.
    fn download(&self, handle: &Self::Handle) -> ComputeResult<Raster>;

    /// Allocate an uninitialized-by-contract output buffer.
    fn allocate(&self, width: u32, height: u32) -> ComputeResult<Self::Handle>;

    /// Horizontal flip of `src` into `dst` over the given grid.
    fn exec_flip(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 partition: &GridPartition) -> ComputeResult<()>;

    /// Clipped box blur of `src` into `dst` over the given grid.
    fn exec_blur(&self, src: &Self::Handle, dst: &mut Self::Handle,
                 window: KernelWindow, partition: &GridPartition) -> ComputeResult<()>;

    /// Bytes of device memory one raster sample occupies.
    fn bytes_per_sample(&self) -> u64 { 1 }

    /// Get device limits.
    fn limits(&self) -> &DeviceLimits;

    /// Backend name.
    fn name(&self) -> &'static str;
}

/// Check that a kernel's buffers and partition describe the same image.
pub(crate) fn check_launch<H: DeviceBuffer>(src: &H, dst: &H, partition: &GridPartition) -> ComputeResult<()> {
    let dims = src.dimensions();
    if dst.dimensions() != dims {
        return Err(ComputeError::BufferSizeMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    if (partition.width(), partition.height()) != dims {
        return Err(ComputeError::InvalidDimensions(partition.width(), partition.height()));
    }
    Ok(())
}

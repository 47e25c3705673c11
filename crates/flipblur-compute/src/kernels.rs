//! Per-pixel kernels.
//!
//! Each kernel is a pure function of a coordinate and a read-only input view.
//! Backends call these once per in-bounds task; the sequential helpers
//! ([`flip_horizontal`], [`box_blur`]) apply them over the whole image and
//! serve as the host reference for verification.

use crate::config::KernelWindow;
use crate::raster::{Raster, RasterView};

/// Horizontal mirror: `out[y][x] = in[y][width - 1 - x]`.
#[inline]
pub fn flip_pixel(src: &RasterView<'_>, x: u32, y: u32) -> u8 {
    src.get(src.width() - 1 - x, y)
}

/// Clipped box mean of the `k x k` neighborhood centered on `(row, col)`.
///
/// Samples outside `[0, rows) x [0, cols)` are left out of both the sum and
/// the count, so the window shrinks at the borders instead of darkening.
/// `rows` is the view height and `cols` its width.
#[inline]
pub fn blur_pixel(src: &RasterView<'_>, row: u32, col: u32, window: KernelWindow) -> u8 {
    let rows = src.height() as i64;
    let cols = src.width() as i64;
    let r = window.radius() as i64;
    let (row, col) = (row as i64, col as i64);

    let r0 = (row - r).max(0);
    let r1 = (row + r).min(rows - 1);
    let c0 = (col - r).max(0);
    let c1 = (col + r).min(cols - 1);

    let mut sum = 0u64;
    for cr in r0..=r1 {
        for cc in c0..=c1 {
            sum += src.get(cc as u32, cr as u32) as u64;
        }
    }
    let count = ((r1 - r0 + 1) * (c1 - c0 + 1)) as u64;
    (sum / count) as u8
}

/// Number of in-bounds samples the blur averages at `(row, col)`.
pub fn neighborhood_count(rows: u32, cols: u32, row: u32, col: u32, window: KernelWindow) -> u64 {
    let r = window.radius() as i64;
    let span = |center: u32, len: u32| {
        let lo = (center as i64 - r).max(0);
        let hi = (center as i64 + r).min(len as i64 - 1);
        (hi - lo + 1) as u64
    };
    span(row, rows) * span(col, cols)
}

/// Sequential horizontal flip of a whole raster.
pub fn flip_horizontal(src: &Raster) -> Raster {
    let view = src.view();
    src.map_coords(|x, y| flip_pixel(&view, x, y))
}

/// Sequential clipped box blur of a whole raster.
pub fn box_blur(src: &Raster, window: KernelWindow) -> Raster {
    let view = src.view();
    src.map_coords(|x, y| blur_pixel(&view, y, x, window))
}

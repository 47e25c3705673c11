//! Host-resident raster.

use crate::{ComputeError, ComputeResult};

/// Single-channel 8-bit image in host memory, row-major, no stride padding.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Raster {
    /// Wrap existing samples. `data.len()` must equal `width * height`.
    pub fn from_vec(data: Vec<u8>, width: u32, height: u32) -> ComputeResult<Self> {
        let expected = checked_len(width, height)?;
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Zero-filled raster.
    pub fn new(width: u32, height: u32) -> ComputeResult<Self> {
        Self::filled(width, height, 0)
    }

    /// Raster with every sample set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> ComputeResult<Self> {
        let len = checked_len(width, height)?;
        Ok(Self { data: vec![value; len], width, height })
    }

    /// Build from a per-pixel function of `(x, y)`.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> ComputeResult<Self> {
        let len = checked_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Ok(Self { data, width, height })
    }

    /// Same-sized raster from a per-pixel function of `(x, y)`.
    pub(crate) fn map_coords(&self, f: impl Fn(u32, u32) -> u8) -> Raster {
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(f(x, y));
            }
        }
        Raster { data, width: self.width, height: self.height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Sample count, also the size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Sample at column `x`, row `y`. Panics when out of bounds.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.view().get(x, y)
    }

    /// One row of samples.
    pub fn row(&self, y: u32) -> &[u8] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.data[start..start + w]
    }

    pub fn view(&self) -> RasterView<'_> {
        RasterView {
            data: &self.data,
            width: self.width,
            height: self.height,
        }
    }
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size_bytes", &self.len())
            .finish()
    }
}

/// Read-only borrowed view that kernels sample from.
#[derive(Clone, Copy, Debug)]
pub struct RasterView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> RasterView<'a> {
    /// Wrap a slice already known to hold `width * height` samples.
    pub fn new(data: &'a [u8], width: u32, height: u32) -> ComputeResult<Self> {
        let expected = checked_len(width, height)?;
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// `width * height` as a buffer length, rejecting empty rasters.
pub(crate) fn checked_len(width: u32, height: u32) -> ComputeResult<usize> {
    if width == 0 || height == 0 {
        return Err(ComputeError::InvalidDimensions(width, height));
    }
    (width as usize)
        .checked_mul(height as usize)
        .ok_or(ComputeError::InvalidDimensions(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Raster::from_vec(vec![0; 12], 4, 3).is_ok());
        let err = Raster::from_vec(vec![0; 11], 4, 3).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 12, actual: 11 }));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(Raster::new(0, 5), Err(ComputeError::InvalidDimensions(0, 5))));
        assert!(matches!(Raster::new(5, 0), Err(ComputeError::InvalidDimensions(5, 0))));
    }

    #[test]
    fn test_row_major_layout() {
        let r = Raster::from_fn(3, 2, |x, y| (y * 10 + x) as u8).unwrap();
        assert_eq!(r.data(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(r.row(1), &[10, 11, 12]);
        assert_eq!(r.get(2, 1), 12);
    }
}

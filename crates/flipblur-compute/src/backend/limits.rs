//! Device resource limits.
//!
//! The pipeline holds three rasters on the device at its peak (input, flip
//! output, blur output). Limits are checked up front so that an oversized run
//! fails before the first allocation.

/// Default assumptions when device info unavailable.
const DEFAULT_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024; // 2 GB
const DEFAULT_MAX_BUFFER_BYTES: u64 = 256 * 1024 * 1024; // 256 MB

/// Use at most 60% of reported memory.
const MEMORY_SAFETY_MARGIN: f64 = 0.4;

/// Buffers live on the device at the same time during a run.
pub const PIPELINE_BUFFERS: u64 = 3;

/// Device resource limits.
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    /// Maximum single buffer size in bytes.
    pub max_buffer_bytes: u64,
    /// Total device memory in bytes (detected or estimated).
    pub total_memory: u64,
    /// Usable device memory in bytes (after safety margin).
    pub available_memory: u64,
    /// Whether values were auto-detected vs defaults.
    pub detected: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            total_memory: DEFAULT_MEMORY_BYTES,
            available_memory: (DEFAULT_MEMORY_BYTES as f64 * (1.0 - MEMORY_SAFETY_MARGIN)) as u64,
            detected: false,
        }
    }
}

impl DeviceLimits {
    /// Limits for a device with `total` bytes (applies safety margin).
    pub fn with_memory(total: u64) -> Self {
        Self {
            max_buffer_bytes: total,
            total_memory: total,
            available_memory: (total as f64 * (1.0 - MEMORY_SAFETY_MARGIN)) as u64,
            detected: true,
        }
    }

    /// Cap usable memory, e.g. from `FLIPBLUR_MEM_MB`.
    pub fn capped(mut self, bytes: u64) -> Self {
        self.available_memory = self.available_memory.min(bytes);
        self
    }

    /// Device bytes needed by a full run over a `width x height` raster.
    pub fn pipeline_bytes(width: u32, height: u32, bytes_per_sample: u64) -> u64 {
        width as u64 * height as u64 * bytes_per_sample * PIPELINE_BUFFERS
    }

    /// Check a single buffer against the buffer size limit.
    pub fn fits_buffer(&self, width: u32, height: u32, bytes_per_sample: u64) -> bool {
        width as u64 * height as u64 * bytes_per_sample <= self.max_buffer_bytes
    }

    /// Check the whole pipeline against available memory.
    pub fn fits_pipeline(&self, width: u32, height: u32, bytes_per_sample: u64) -> bool {
        self.fits_buffer(width, height, bytes_per_sample)
            && Self::pipeline_bytes(width, height, bytes_per_sample) <= self.available_memory
    }
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_bytes() {
        assert_eq!(DeviceLimits::pipeline_bytes(1024, 768, 1), 1024 * 768 * 3);
        assert_eq!(DeviceLimits::pipeline_bytes(4, 4, 4), 192);
    }

    #[test]
    fn test_fits() {
        let limits = DeviceLimits::with_memory(1000);
        assert_eq!(limits.available_memory, 600);
        assert!(limits.fits_pipeline(10, 20, 1));
        assert!(!limits.fits_pipeline(10, 21, 1));

        let capped = DeviceLimits::with_memory(1000).capped(100);
        assert!(!capped.fits_pipeline(10, 10, 1));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1 KB");
        assert_eq!(format_bytes(1_500_000), "1.4 MB");
        assert_eq!(format_bytes(1_500_000_000), "1.40 GB");
    }
}

//! Backend detection and auto-selection.
//!
//! [`select_best_backend`] only asks each backend whether a device exists.
//! [`detect_backends`] goes further and initializes every compiled-in
//! backend to read its memory limits, so it can tell whether a run of a
//! given size would fit. That costs a device context (and, for CUDA, a
//! kernel compile) per backend.

use super::{format_bytes, Backend, CpuPrimitives, DeviceLimits, DevicePrimitives};
use crate::config::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::ComputeResult;

/// Backends `auto` chooses from.
const CANDIDATES: [Backend; 3] = [Backend::Cuda, Backend::Wgpu, Backend::Cpu];

/// Memory capacity of an initialized backend.
#[derive(Debug, Clone)]
pub struct Capacity {
    pub limits: DeviceLimits,
    /// Device bytes per raster sample.
    pub bytes_per_sample: u64,
}

impl Capacity {
    fn of<G: DevicePrimitives>(gpu: &G) -> Self {
        Self { limits: gpu.limits().clone(), bytes_per_sample: gpu.bytes_per_sample() }
    }

    /// Device bytes a full run over `width x height` holds at its peak.
    pub fn run_bytes(&self, width: u32, height: u32) -> u64 {
        DeviceLimits::pipeline_bytes(width, height, self.bytes_per_sample)
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.limits.fits_pipeline(width, height, self.bytes_per_sample)
    }
}

/// A backend as detected on this machine.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    /// Capacity, or why the backend could not be initialized.
    pub status: Result<Capacity, String>,
}

impl BackendInfo {
    fn from_device<G: DevicePrimitives>(backend: Backend, device: ComputeResult<G>) -> Self {
        Self {
            backend,
            status: device.map(|gpu| Capacity::of(&gpu)).map_err(|e| e.to_string()),
        }
    }

    #[allow(dead_code)]
    fn not_built(backend: Backend) -> Self {
        Self { backend, status: Err(format!("built without the `{backend}` feature")) }
    }

    pub fn available(&self) -> bool {
        self.status.is_ok()
    }

    pub fn capacity(&self) -> Option<&Capacity> {
        self.status.as_ref().ok()
    }

    /// Whether a full `width x height` run fits this backend's memory.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.capacity().is_some_and(|c| c.fits(width, height))
    }

    /// One-line summary, checked against the default 1024x768 geometry.
    pub fn summary(&self) -> String {
        let head = format!("{:<5} {}", self.backend.name(), self.backend.description());
        match &self.status {
            Ok(cap) => format!(
                "[+] {head}: {} usable, {DEFAULT_WIDTH}x{DEFAULT_HEIGHT} run needs {} ({})",
                format_bytes(cap.limits.available_memory),
                format_bytes(cap.run_bytes(DEFAULT_WIDTH, DEFAULT_HEIGHT)),
                if cap.fits(DEFAULT_WIDTH, DEFAULT_HEIGHT) { "fits" } else { "does not fit" },
            ),
            Err(reason) => format!("[-] {head}: {reason}"),
        }
    }
}

/// Initialize every backend and record its capacity, best first.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut backends = vec![BackendInfo::from_device(Backend::Cpu, Ok(CpuPrimitives::new()))];

    #[cfg(feature = "wgpu")]
    backends.push(BackendInfo::from_device(Backend::Wgpu, super::WgpuPrimitives::new()));
    #[cfg(not(feature = "wgpu"))]
    backends.push(BackendInfo::not_built(Backend::Wgpu));

    #[cfg(feature = "cuda")]
    backends.push(BackendInfo::from_device(Backend::Cuda, super::CudaPrimitives::new()));
    #[cfg(not(feature = "cuda"))]
    backends.push(BackendInfo::not_built(Backend::Cuda));

    backends.sort_by_key(|b| std::cmp::Reverse(b.backend.priority()));
    backends
}

/// Highest-priority backend with a usable device. Never fails; the CPU is
/// always there.
pub fn select_best_backend() -> Backend {
    CANDIDATES
        .into_iter()
        .filter(|b| b.is_available())
        .max_by_key(|b| b.priority())
        .unwrap_or(Backend::Cpu)
}

/// Summary of every backend, one per line.
pub fn describe_backends() -> String {
    detect_backends().iter().map(|info| info.summary() + "\n").collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_detected() {
        let backends = detect_backends();
        assert_eq!(backends.len(), 3);
        let cpu = backends.iter().find(|b| b.backend == Backend::Cpu).unwrap();
        assert!(cpu.available());
        assert_eq!(cpu.capacity().unwrap().bytes_per_sample, 1);
        assert!(describe_backends().contains("[+] cpu"));
    }

    #[test]
    fn test_sorted_by_priority() {
        let order: Vec<Backend> = detect_backends().iter().map(|b| b.backend).collect();
        assert_eq!(order, vec![Backend::Cuda, Backend::Wgpu, Backend::Cpu]);
    }

    #[test]
    fn test_fits_reports_capacity() {
        let small = BackendInfo {
            backend: Backend::Cpu,
            status: Ok(Capacity { limits: DeviceLimits::with_memory(1024 * 1024), bytes_per_sample: 1 }),
        };
        // 600 KB usable: 3 x 256x256 fits, 3 x 1024x768 does not.
        assert!(small.fits(256, 256));
        assert!(!small.fits(DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(small.summary().ends_with("(does not fit)"));

        let wide = BackendInfo {
            backend: Backend::Wgpu,
            status: Ok(Capacity { limits: DeviceLimits::with_memory(1024 * 1024), bytes_per_sample: 4 }),
        };
        assert!(!wide.fits(256, 256));
    }

    #[test]
    fn test_unavailable_never_fits() {
        let missing = BackendInfo::not_built(Backend::Cuda);
        assert!(!missing.available());
        assert!(!missing.fits(1, 1));
        assert!(missing.summary().starts_with("[-] cuda"));
        assert!(missing.summary().contains("`cuda` feature"));
    }

    #[test]
    fn test_best_is_available() {
        let best = select_best_backend();
        assert!(best.is_available());
        assert_ne!(best, Backend::Auto);
    }
}

//! Compute backends for the flip/blur kernels.
//!
//! Provides CPU (rayon), wgpu, and CUDA backends with automatic selection.
//!
//! # Architecture
//!
//! ```text
//! Pipeline<G: DevicePrimitives>
//!     +-- CpuPrimitives  (rayon parallelization)
//!     +-- WgpuPrimitives (Vulkan/Metal/DX12)
//!     +-- CudaPrimitives (NVIDIA CUDA)
//! ```

mod primitives;
mod limits;
mod detect;
mod cpu_backend;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

#[cfg(feature = "cuda")]
mod cuda_backend;

pub use primitives::{DeviceBuffer, DevicePrimitives};
pub use limits::{format_bytes, DeviceLimits};
pub use detect::{detect_backends, select_best_backend, describe_backends, BackendInfo, Capacity};
pub use cpu_backend::{CpuBuffer, CpuPrimitives};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuBuffer, WgpuPrimitives};

#[cfg(feature = "cuda")]
pub use cuda_backend::{CudaBuffer, CudaPrimitives};

use std::str::FromStr;

use crate::ComputeError;

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (CUDA > wgpu > CPU).
    #[default]
    Auto,
    /// CPU backend using rayon for parallelization.
    Cpu,
    /// wgpu backend (Vulkan/Metal/DX12).
    Wgpu,
    /// NVIDIA CUDA backend.
    Cuda,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuPrimitives::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
            #[cfg(feature = "cuda")]
            Self::Cuda => CudaPrimitives::is_available(),
            #[cfg(not(feature = "cuda"))]
            Self::Cuda => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
            Self::Cuda => "cuda",
        }
    }

    /// Auto-selection rank; higher wins.
    pub fn priority(&self) -> u32 {
        match self {
            Self::Auto => 0,
            Self::Cpu => 10,
            Self::Wgpu => 100,
            Self::Cuda => 150,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Auto => "best available backend",
            Self::Cpu => "CPU, rayon tasks per block row",
            Self::Wgpu => "GPU via wgpu compute shaders (Vulkan/Metal/DX12)",
            Self::Cuda => "NVIDIA GPU via NVRTC-compiled CUDA kernels",
        }
    }
}

impl FromStr for Backend {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(ComputeError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

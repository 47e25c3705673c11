//! Horizontal flip and box blur kernels for single-channel 8-bit rasters.
//!
//! Every pixel is computed by an independent task on a 16x16 block grid.
//! The same kernels run on CPU (rayon), wgpu compute shaders or CUDA.
//!
//! # Architecture
//!
//! ```text
//! Pipeline<G> (host orchestrator)
//!     ├── ImageSource / ImageSink (raw buffer collaborators)
//!     ├── GridPartition (16x16 blocks, ceil-div grid)
//!     └── DevicePrimitives trait
//!             ├── CpuPrimitives  (rayon, emulated block grid)
//!             ├── WgpuPrimitives (WGSL compute shaders)
//!             └── CudaPrimitives (NVRTC kernels)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use flipblur_compute::{RunConfig, create_pipeline, RawFileSource, RawFileSink};
//!
//! let config = RunConfig::builder().width(1024).height(768).window(5).build()?;
//! let pipeline = create_pipeline(config)?;
//! pipeline.run(&RawFileSource::new("."), &RawFileSink::new("."))?;
//! ```

pub mod backend;
pub mod config;
pub mod io;
pub mod kernels;
pub mod partition;
pub mod pipeline;
pub mod raster;
#[cfg(feature = "wgpu")]
mod shaders;

pub use backend::{Backend, DeviceLimits, detect_backends, select_best_backend, describe_backends};
pub use config::{KernelWindow, RunConfig, RunConfigBuilder};
pub use io::{ImageSink, ImageSource, MemorySink, MemorySource, RawFileSink, RawFileSource};
pub use partition::{GridPartition, BLOCK_DIM};
pub use pipeline::{AnyPipeline, Pipeline, PipelineOutput, StageTimings, create_pipeline};
pub use raster::{Raster, RasterView};

use thiserror::Error;

/// Broad failure classes. Every one of them is fatal to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device memory could not be allocated or the run does not fit.
    ResourceExhaustion,
    /// Host <-> device copy failed.
    Transfer,
    /// Kernel compilation, configuration or execution failed.
    Launch,
    /// Image source unreadable or sink unwritable.
    Io,
    /// Invalid run parameters.
    Configuration,
    /// Backend missing or device could not be created.
    Backend,
}

/// Compute pipeline errors
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Unknown backend: {0} (expected auto, cpu, wgpu or cuda)")]
    UnknownBackend(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Failed to compile kernel: {0}")]
    ShaderCompilation(String),

    #[error("{op}: {detail}")]
    Allocation { op: &'static str, detail: String },

    #[error("{op}: {detail}")]
    Transfer { op: &'static str, detail: String },

    #[error("{op}: {detail}")]
    Launch { op: &'static str, detail: String },

    #[error("{op}: {source}")]
    Io {
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source '{name}' holds {actual} bytes, expected {expected}")]
    SourceSize { name: String, expected: usize, actual: usize },

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    #[error("Invalid kernel window {0}: must be odd and >= 1")]
    InvalidWindow(u32),

    #[error("Invalid {key}={value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

impl ComputeError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAdapter | Self::BackendNotAvailable(_) | Self::DeviceCreation(_) => {
                ErrorKind::Backend
            }
            Self::UnknownBackend(_)
            | Self::BufferSizeMismatch { .. }
            | Self::InvalidDimensions(..)
            | Self::InvalidWindow(_)
            | Self::InvalidEnv { .. } => ErrorKind::Configuration,
            Self::Allocation { .. } => ErrorKind::ResourceExhaustion,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::ShaderCompilation(_) | Self::Launch { .. } => ErrorKind::Launch,
            Self::Io { .. } | Self::SourceSize { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(op: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { op: op.into(), source }
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = ComputeError::Allocation { op: "allocate flip output", detail: "OOM".into() };
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(err.to_string(), "allocate flip output: OOM");

        let err = ComputeError::io("read input", std::io::Error::other("gone"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(ComputeError::InvalidWindow(4).kind(), ErrorKind::Configuration);
        assert_eq!(ComputeError::NoAdapter.kind(), ErrorKind::Backend);
    }
}

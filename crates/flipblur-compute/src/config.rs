//! Run configuration.
//!
//! Use [`RunConfigBuilder`] to set parameters; validation happens once in
//! [`RunConfigBuilder::build`].
//!
//! ```ignore
//! use flipblur_compute::{RunConfig, Backend};
//!
//! let config = RunConfig::builder()
//!     .width(1920)
//!     .height(1080)
//!     .window(7)
//!     .backend(Backend::Cuda)
//!     .build()?;
//! ```
//!
//! # Environment Variables
//!
//! - `FLIPBLUR_BACKEND` - Backend name (auto, cpu, wgpu, cuda)
//! - `FLIPBLUR_WINDOW` - Blur window size
//! - `FLIPBLUR_MEM_MB` - Cap on device memory used for limit checks

use std::env;

use crate::backend::Backend;
use crate::raster::checked_len;
use crate::{ComputeError, ComputeResult};

/// Default image width.
pub const DEFAULT_WIDTH: u32 = 1024;
/// Default image height.
pub const DEFAULT_HEIGHT: u32 = 768;
/// Default blur window.
pub const DEFAULT_WINDOW: u32 = 5;
/// Default source identifier.
pub const DEFAULT_INPUT: &str = "input_image.jpg";
/// Default flip output identifier.
pub const DEFAULT_FLIP_OUTPUT: &str = "output_flip.jpg";
/// Default blur output identifier.
pub const DEFAULT_BLUR_OUTPUT: &str = "output_blur.jpg";

/// Square averaging window of odd size `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelWindow(u32);

impl KernelWindow {
    /// Validate `k`: odd and >= 1.
    pub fn new(size: u32) -> ComputeResult<Self> {
        if size == 0 || size % 2 == 0 {
            return Err(ComputeError::InvalidWindow(size));
        }
        Ok(Self(size))
    }

    /// Edge length `k`.
    pub fn size(&self) -> u32 {
        self.0
    }

    /// `(k - 1) / 2`.
    pub fn radius(&self) -> u32 {
        (self.0 - 1) / 2
    }

    /// `k * k`, the sample count of an unclipped neighborhood.
    pub fn area(&self) -> u64 {
        self.0 as u64 * self.0 as u64
    }
}

impl Default for KernelWindow {
    fn default() -> Self {
        Self(DEFAULT_WINDOW)
    }
}

/// Validated parameters for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    width: u32,
    height: u32,
    window: KernelWindow,
    input: String,
    flip_output: String,
    blur_output: String,
    backend: Backend,
    memory_limit: Option<u64>,
}

impl RunConfig {
    /// Builder with defaults (1024x768, window 5, auto backend).
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::new()
    }

    /// Config for the given geometry with default identifiers and backend.
    pub fn new(width: u32, height: u32, window: u32) -> ComputeResult<Self> {
        Self::builder().width(width).height(height).window(window).build()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn window(&self) -> KernelWindow {
        self.window
    }

    /// Bytes in one raster.
    pub fn raster_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn flip_output(&self) -> &str {
        &self.flip_output
    }

    pub fn blur_output(&self) -> &str {
        &self.blur_output
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Device memory cap in bytes, if one was configured.
    pub fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            window: KernelWindow::default(),
            input: DEFAULT_INPUT.to_string(),
            flip_output: DEFAULT_FLIP_OUTPUT.to_string(),
            blur_output: DEFAULT_BLUR_OUTPUT.to_string(),
            backend: Backend::Auto,
            memory_limit: None,
        }
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    width: u32,
    height: u32,
    window: u32,
    input: String,
    flip_output: String,
    blur_output: String,
    backend: Backend,
    memory_limit: Option<u64>,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunConfigBuilder {
    /// Create new builder with default settings.
    pub fn new() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            window: DEFAULT_WINDOW,
            input: DEFAULT_INPUT.to_string(),
            flip_output: DEFAULT_FLIP_OUTPUT.to_string(),
            blur_output: DEFAULT_BLUR_OUTPUT.to_string(),
            backend: Backend::Auto,
            memory_limit: None,
        }
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    /// Blur window size `k`. Must be odd and >= 1.
    pub fn window(mut self, size: u32) -> Self {
        self.window = size;
        self
    }

    /// Source identifier handed to the [`ImageSource`](crate::io::ImageSource).
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.input = name.into();
        self
    }

    /// Identifier of the flipped raster.
    pub fn flip_output(mut self, name: impl Into<String>) -> Self {
        self.flip_output = name.into();
        self
    }

    /// Identifier of the blurred raster.
    pub fn blur_output(mut self, name: impl Into<String>) -> Self {
        self.blur_output = name.into();
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Cap device memory in megabytes.
    pub fn memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit = Some(mb.saturating_mul(1024 * 1024));
        self
    }

    /// Apply `FLIPBLUR_*` environment overrides.
    pub fn with_env(self) -> ComputeResult<Self> {
        self.with_vars(env_var)
    }

    /// Apply overrides from `lookup`, keyed by `FLIPBLUR_*` names.
    ///
    /// A variable that is set but does not parse is an error; it is never
    /// dropped in favour of the default.
    fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> ComputeResult<Self> {
        if let Some(name) = lookup(ENV_BACKEND) {
            self.backend = name.parse()?;
        }
        if let Some(window) = lookup(ENV_WINDOW) {
            self.window = parse_env(ENV_WINDOW, &window)?;
        }
        if let Some(mb) = lookup(ENV_MEM_MB) {
            self = self.memory_limit_mb(parse_env(ENV_MEM_MB, &mb)?);
        }
        Ok(self)
    }

    /// Validate and build.
    pub fn build(self) -> ComputeResult<RunConfig> {
        checked_len(self.width, self.height)?;
        let window = KernelWindow::new(self.window)?;
        Ok(RunConfig {
            width: self.width,
            height: self.height,
            window,
            input: self.input,
            flip_output: self.flip_output,
            blur_output: self.blur_output,
            backend: self.backend,
            memory_limit: self.memory_limit,
        })
    }
}

const ENV_BACKEND: &str = "FLIPBLUR_BACKEND";
const ENV_WINDOW: &str = "FLIPBLUR_WINDOW";
const ENV_MEM_MB: &str = "FLIPBLUR_MEM_MB";

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> ComputeResult<T> {
    value.trim().parse().map_err(|_| ComputeError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_validation() {
        assert!(KernelWindow::new(0).is_err());
        assert!(KernelWindow::new(4).is_err());
        let w = KernelWindow::new(1).unwrap();
        assert_eq!(w.radius(), 0);
        let w = KernelWindow::new(5).unwrap();
        assert_eq!(w.radius(), 2);
        assert_eq!(w.area(), 25);
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::builder().build().unwrap();
        assert_eq!(config.width(), 1024);
        assert_eq!(config.height(), 768);
        assert_eq!(config.window().size(), 5);
        assert_eq!(config.input(), "input_image.jpg");
        assert_eq!(config.flip_output(), "output_flip.jpg");
        assert_eq!(config.blur_output(), "output_blur.jpg");
        assert_eq!(config.backend(), Backend::Auto);
        assert_eq!(config.raster_len(), 1024 * 768);
    }

    #[test]
    fn test_build_rejects_invalid() {
        assert!(matches!(
            RunConfig::new(0, 10, 3),
            Err(ComputeError::InvalidDimensions(0, 10))
        ));
        assert!(matches!(RunConfig::new(10, 10, 2), Err(ComputeError::InvalidWindow(2))));
    }

    #[test]
    fn test_memory_limit() {
        let config = RunConfig::builder().memory_limit_mb(2).build().unwrap();
        assert_eq!(config.memory_limit(), Some(2 * 1024 * 1024));
    }

    fn vars(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let pairs = pairs.to_vec();
        move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = RunConfig::builder()
            .with_vars(vars(&[
                ("FLIPBLUR_BACKEND", "cpu"),
                ("FLIPBLUR_WINDOW", "9"),
                ("FLIPBLUR_MEM_MB", "3"),
            ]))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.backend(), Backend::Cpu);
        assert_eq!(config.window().size(), 9);
        assert_eq!(config.memory_limit(), Some(3 * 1024 * 1024));

        let config = RunConfig::builder().with_vars(vars(&[])).unwrap().build().unwrap();
        assert_eq!(config.backend(), Backend::Auto);
        assert_eq!(config.window().size(), DEFAULT_WINDOW);
        assert_eq!(config.memory_limit(), None);
    }

    #[test]
    fn test_builder_calls_override_env() {
        let config = RunConfig::builder()
            .with_vars(vars(&[("FLIPBLUR_WINDOW", "9"), ("FLIPBLUR_MEM_MB", "3")]))
            .unwrap()
            .window(3)
            .memory_limit_mb(1)
            .build()
            .unwrap();
        assert_eq!(config.window().size(), 3);
        assert_eq!(config.memory_limit(), Some(1024 * 1024));
    }

    #[test]
    fn test_bad_backend_env() {
        let err = RunConfig::builder()
            .with_vars(vars(&[("FLIPBLUR_BACKEND", "opencl")]))
            .unwrap_err();
        assert!(matches!(err, ComputeError::UnknownBackend(ref name) if name == "opencl"));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_bad_window_env_keeps_text() {
        let err = RunConfig::builder()
            .with_vars(vars(&[("FLIPBLUR_WINDOW", "seven")]))
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidEnv { key: "FLIPBLUR_WINDOW", ref value } if value == "seven"));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert!(err.to_string().contains("seven"));

        // Parses, but fails window validation at build time.
        let builder = RunConfig::builder().with_vars(vars(&[("FLIPBLUR_WINDOW", "4")])).unwrap();
        assert!(matches!(builder.build(), Err(ComputeError::InvalidWindow(4))));
    }

    #[test]
    fn test_bad_memory_env_is_error() {
        for bad in ["lots", "-1", "1.5"] {
            let err = RunConfig::builder()
                .with_vars(vars(&[("FLIPBLUR_MEM_MB", bad)]))
                .unwrap_err();
            assert!(matches!(err, ComputeError::InvalidEnv { key: "FLIPBLUR_MEM_MB", ref value } if value == bad));
            assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        }
    }

    // The only test touching the process environment.
    #[test]
    fn test_with_env_reads_process_env() {
        unsafe { env::set_var(ENV_MEM_MB, "lots") };
        let bad = RunConfig::builder().with_env();
        unsafe { env::set_var(ENV_MEM_MB, "5") };
        let good = RunConfig::builder().with_env().and_then(|b| b.build());
        unsafe { env::remove_var(ENV_MEM_MB) };

        assert!(matches!(bad, Err(ComputeError::InvalidEnv { key: "FLIPBLUR_MEM_MB", .. })));
        assert_eq!(good.unwrap().memory_limit(), Some(5 * 1024 * 1024));
    }
}

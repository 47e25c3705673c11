//! Host orchestration of a flip-then-blur run.
//!
//! A run is strictly ordered: reserve device buffers, copy the input in,
//! flip, blur the flipped image, copy both results out. Every step blocks
//! until the device has finished, and any failure aborts the run. Device
//! buffers are released on drop whichever way the run ends.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::backend::{format_bytes, Backend, CpuPrimitives, DeviceBuffer, DeviceLimits, DevicePrimitives};
#[cfg(feature = "cuda")]
use crate::backend::CudaPrimitives;
#[cfg(feature = "wgpu")]
use crate::backend::WgpuPrimitives;
use crate::config::RunConfig;
use crate::io::{ImageSink, ImageSource};
use crate::partition::GridPartition;
use crate::raster::Raster;
use crate::{select_best_backend, ComputeError, ComputeResult};

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub upload: Duration,
    pub flip: Duration,
    pub blur: Duration,
    pub download: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.upload + self.flip + self.blur + self.download
    }
}

/// Both results of a run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Horizontally mirrored input.
    pub flipped: Raster,
    /// Box blur of `flipped`.
    pub blurred: Raster,
    pub timings: StageTimings,
}

fn timed<T>(slot: &mut Duration, f: impl FnOnce() -> ComputeResult<T>) -> ComputeResult<T> {
    let start = Instant::now();
    let out = f()?;
    *slot = start.elapsed();
    Ok(out)
}

/// Flip/blur pipeline over one backend.
pub struct Pipeline<G: DevicePrimitives> {
    gpu: G,
    config: RunConfig,
}

impl<G: DevicePrimitives> Pipeline<G> {
    pub fn new(gpu: G, config: RunConfig) -> Self {
        Self { gpu, config }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.gpu.name()
    }

    pub fn limits(&self) -> &DeviceLimits {
        self.gpu.limits()
    }

    /// Fail early when the three device buffers cannot fit.
    fn reserve(&self, width: u32, height: u32) -> ComputeResult<()> {
        let limits = self.gpu.limits();
        let bps = self.gpu.bytes_per_sample();
        if limits.fits_pipeline(width, height, bps) {
            return Ok(());
        }
        let needed = DeviceLimits::pipeline_bytes(width, height, bps);
        Err(ComputeError::Allocation {
            op: "reserve device buffers",
            detail: format!(
                "{width}x{height} needs {}, {} available (max buffer {})",
                format_bytes(needed),
                format_bytes(limits.available_memory),
                format_bytes(limits.max_buffer_bytes),
            ),
        })
    }

    /// Flip `input`, then blur the flipped image, on the device.
    pub fn process(&self, input: &Raster) -> ComputeResult<PipelineOutput> {
        let (width, height) = input.dimensions();
        let window = self.config.window();
        trace!(backend = self.gpu.name(), width, height, window = window.size(), "pipeline::process");

        self.reserve(width, height)?;
        let partition = GridPartition::new(width, height);
        debug!(
            block = ?partition.block(),
            grid = ?partition.grid(),
            overhang = partition.overhang_tasks(),
            "launch configuration"
        );

        let mut timings = StageTimings::default();

        let src = timed(&mut timings.upload, || self.gpu.upload(input))?;
        let mut flip_out = self.gpu.allocate(width, height)?;
        debug!(bytes = src.size_bytes() + flip_out.size_bytes(), "flip buffers allocated");

        timed(&mut timings.flip, || self.gpu.exec_flip(&src, &mut flip_out, &partition))?;
        // The flip was the input's last reader.
        drop(src);

        let mut blur_out = self.gpu.allocate(width, height)?;
        debug!(bytes = blur_out.size_bytes(), "blur buffer allocated");
        timed(&mut timings.blur, || self.gpu.exec_blur(&flip_out, &mut blur_out, window, &partition))?;

        let (flipped, blurred) = timed(&mut timings.download, || {
            Ok((self.gpu.download(&flip_out)?, self.gpu.download(&blur_out)?))
        })?;

        debug!(
            upload = ?timings.upload,
            flip = ?timings.flip,
            blur = ?timings.blur,
            download = ?timings.download,
            "stage timings"
        );

        Ok(PipelineOutput { flipped, blurred, timings })
    }

    /// Read the configured input.
    pub fn load(&self, source: &dyn ImageSource) -> ComputeResult<Raster> {
        let config = &self.config;
        info!(
            backend = self.gpu.name(),
            input = config.input(),
            width = config.width(),
            height = config.height(),
            window = config.window().size(),
            "load input"
        );
        let data = source.read(config.input(), config.raster_len())?;
        Raster::from_vec(data, config.width(), config.height())
    }

    /// Write the flipped then the blurred raster under the configured names.
    pub fn store(&self, sink: &dyn ImageSink, output: &PipelineOutput) -> ComputeResult<()> {
        let config = &self.config;
        sink.write(config.flip_output(), output.flipped.data())?;
        sink.write(config.blur_output(), output.blurred.data())?;
        info!(
            flip_output = config.flip_output(),
            blur_output = config.blur_output(),
            elapsed = ?output.timings.total(),
            "run complete"
        );
        Ok(())
    }

    /// Read the configured input, process it and write both outputs.
    ///
    /// Nothing is written unless both results were produced.
    pub fn run(&self, source: &dyn ImageSource, sink: &dyn ImageSink) -> ComputeResult<PipelineOutput> {
        let input = self.load(source)?;
        let output = self.process(&input)?;
        self.store(sink, &output)?;
        Ok(output)
    }
}

/// Pipeline over whichever backend was selected at runtime.
pub enum AnyPipeline {
    Cpu(Pipeline<CpuPrimitives>),
    #[cfg(feature = "wgpu")]
    Wgpu(Pipeline<WgpuPrimitives>),
    #[cfg(feature = "cuda")]
    Cuda(Pipeline<CudaPrimitives>),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            AnyPipeline::Cpu($p) => $body,
            #[cfg(feature = "wgpu")]
            AnyPipeline::Wgpu($p) => $body,
            #[cfg(feature = "cuda")]
            AnyPipeline::Cuda($p) => $body,
        }
    };
}

impl AnyPipeline {
    pub fn name(&self) -> &'static str {
        dispatch!(self, p => p.backend_name())
    }

    /// Backend this pipeline runs on; never `Auto`.
    pub fn backend(&self) -> Backend {
        match self {
            AnyPipeline::Cpu(_) => Backend::Cpu,
            #[cfg(feature = "wgpu")]
            AnyPipeline::Wgpu(_) => Backend::Wgpu,
            #[cfg(feature = "cuda")]
            AnyPipeline::Cuda(_) => Backend::Cuda,
        }
    }

    pub fn config(&self) -> &RunConfig {
        dispatch!(self, p => p.config())
    }

    pub fn limits(&self) -> &DeviceLimits {
        dispatch!(self, p => p.limits())
    }

    pub fn load(&self, source: &dyn ImageSource) -> ComputeResult<Raster> {
        dispatch!(self, p => p.load(source))
    }

    pub fn process(&self, input: &Raster) -> ComputeResult<PipelineOutput> {
        dispatch!(self, p => p.process(input))
    }

    pub fn store(&self, sink: &dyn ImageSink, output: &PipelineOutput) -> ComputeResult<()> {
        dispatch!(self, p => p.store(sink, output))
    }

    pub fn run(&self, source: &dyn ImageSource, sink: &dyn ImageSink) -> ComputeResult<PipelineOutput> {
        dispatch!(self, p => p.run(source, sink))
    }
}

fn apply_cap(limits: &DeviceLimits, config: &RunConfig) -> DeviceLimits {
    match config.memory_limit() {
        Some(cap) => limits.clone().capped(cap),
        None => limits.clone(),
    }
}

/// Build a pipeline for the configured backend. `Auto` picks the best one
/// detected on this machine.
pub fn create_pipeline(config: RunConfig) -> ComputeResult<AnyPipeline> {
    let backend = match config.backend() {
        Backend::Auto => select_best_backend(),
        other => other,
    };
    debug!(requested = %config.backend(), selected = %backend, "create_pipeline");

    match backend {
        Backend::Cpu | Backend::Auto => {
            let cpu = CpuPrimitives::new();
            let limits = apply_cap(cpu.limits(), &config);
            Ok(AnyPipeline::Cpu(Pipeline::new(cpu.with_limits(limits), config)))
        }
        #[cfg(feature = "wgpu")]
        Backend::Wgpu => {
            let gpu = WgpuPrimitives::new()?;
            let limits = apply_cap(gpu.limits(), &config);
            Ok(AnyPipeline::Wgpu(Pipeline::new(gpu.with_limits(limits), config)))
        }
        #[cfg(feature = "cuda")]
        Backend::Cuda => {
            let gpu = CudaPrimitives::new()?;
            let limits = apply_cap(gpu.limits(), &config);
            Ok(AnyPipeline::Cuda(Pipeline::new(gpu.with_limits(limits), config)))
        }
        #[allow(unreachable_patterns)]
        other => Err(ComputeError::BackendNotAvailable(format!(
            "{other} (built without the `{other}` feature)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemorySource};
    use crate::kernels::{box_blur, flip_horizontal};
    use crate::ErrorKind;

    fn config(w: u32, h: u32, k: u32) -> RunConfig {
        RunConfig::builder().width(w).height(h).window(k).backend(Backend::Cpu).build().unwrap()
    }

    fn cpu_pipeline(w: u32, h: u32, k: u32) -> Pipeline<CpuPrimitives> {
        Pipeline::new(CpuPrimitives::new(), config(w, h, k))
    }

    #[test]
    fn test_process_matches_reference() {
        let pipeline = cpu_pipeline(37, 21, 5);
        let input = Raster::from_fn(37, 21, |x, y| ((x * 7) ^ (y * 13)) as u8).unwrap();
        let out = pipeline.process(&input).unwrap();

        let flipped = flip_horizontal(&input);
        assert_eq!(out.flipped, flipped);
        assert_eq!(out.blurred, box_blur(&flipped, pipeline.config().window()));
    }

    #[test]
    fn test_single_row_scenario() {
        let pipeline = cpu_pipeline(4, 1, 3);
        let input = Raster::from_vec(vec![0, 10, 20, 30], 4, 1).unwrap();
        let out = pipeline.process(&input).unwrap();
        assert_eq!(out.flipped.data(), &[30, 20, 10, 0]);
        assert_eq!(out.blurred.get(0, 0), 25);
    }

    #[test]
    fn test_run_writes_both_outputs() {
        let pipeline = cpu_pipeline(4, 4, 3);
        let source = MemorySource::with("input_image.jpg", vec![100; 16]);
        let sink = MemorySink::new();

        pipeline.run(&source, &sink).unwrap();
        assert_eq!(sink.get("output_flip.jpg"), Some(vec![100; 16]));
        assert_eq!(sink.get("output_blur.jpg"), Some(vec![100; 16]));
    }

    #[test]
    fn test_memory_cap_fails_before_output() {
        let cpu = CpuPrimitives::new().with_limits(DeviceLimits::with_memory(1024));
        let pipeline = Pipeline::new(cpu, config(64, 64, 3));
        let source = MemorySource::with("input_image.jpg", vec![1; 64 * 64]);
        let sink = MemorySink::new();

        let err = pipeline.run(&source, &sink).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert!(err.to_string().starts_with("reserve device buffers"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_short_source_fails() {
        let pipeline = cpu_pipeline(8, 8, 3);
        let source = MemorySource::with("input_image.jpg", vec![1; 63]);
        let sink = MemorySink::new();

        let err = pipeline.run(&source, &sink).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_input_kept_when_output_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig::builder()
            .width(4)
            .height(2)
            .window(3)
            .input("img.raw")
            .flip_output("img.raw")
            .backend(Backend::Cpu)
            .build()
            .unwrap();
        let pipeline = Pipeline::new(CpuPrimitives::new(), cfg);
        let original = vec![1, 2, 3, 4, 5, 6, 7, 8];
        std::fs::write(dir.path().join("img.raw"), &original).unwrap();

        let io = crate::io::RawFileSink::new(dir.path());
        let input = pipeline.load(&crate::io::RawFileSource::new(dir.path())).unwrap();
        let output = pipeline.process(&input).unwrap();
        pipeline.store(&io, &output).unwrap();

        assert_eq!(input.data(), &original[..]);
        assert_eq!(std::fs::read(dir.path().join("img.raw")).unwrap(), vec![4, 3, 2, 1, 8, 7, 6, 5]);
        assert_eq!(output.flipped, flip_horizontal(&input));
    }

    #[test]
    fn test_create_cpu_pipeline() {
        let cfg = RunConfig::builder().backend(Backend::Cpu).memory_limit_mb(1).build().unwrap();
        let pipeline = create_pipeline(cfg).unwrap();
        assert_eq!(pipeline.name(), "CPU");
        assert_eq!(pipeline.backend(), Backend::Cpu);
        assert!(pipeline.limits().available_memory <= 1024 * 1024);
    }
}

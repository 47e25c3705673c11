//! Run command
//!
//! Reads the input raster, flips and blurs it on the selected backend and
//! writes both results.

use anyhow::{bail, Context, Result};
use flipblur_compute::kernels::{box_blur, flip_horizontal};
use flipblur_compute::{create_pipeline, PipelineOutput, Raster, RawFileSink, RawFileSource, RunConfig};
use tracing::{info, trace, warn};

use crate::RunArgs;

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .with_env()
        .context("Invalid FLIPBLUR_* environment")?;

    if let Some(w) = args.width {
        builder = builder.width(w);
    }
    if let Some(h) = args.height {
        builder = builder.height(h);
    }
    if let Some(k) = args.window {
        builder = builder.window(k);
    }
    if let Some(name) = &args.input {
        builder = builder.input(name.as_str());
    }
    if let Some(name) = &args.flip_output {
        builder = builder.flip_output(name.as_str());
    }
    if let Some(name) = &args.blur_output {
        builder = builder.blur_output(name.as_str());
    }
    if let Some(backend) = args.backend {
        builder = builder.backend(backend);
    }
    if let Some(mb) = args.mem_mb {
        builder = builder.memory_limit_mb(mb);
    }

    builder.build().context("Invalid run parameters")
}

/// Count samples that differ from the host reference.
fn verify(config: &RunConfig, input: &Raster, output: &PipelineOutput) -> (usize, usize) {
    let flipped = flip_horizontal(input);
    let blurred = box_blur(&flipped, config.window());
    let diff = |a: &Raster, b: &Raster| a.data().iter().zip(b.data()).filter(|(x, y)| x != y).count();
    (diff(&output.flipped, &flipped), diff(&output.blurred, &blurred))
}

pub fn run(args: RunArgs, verbose: u8) -> Result<()> {
    trace!(input_dir = %args.input_dir.display(), output_dir = %args.output_dir.display(), "run::run");

    let config = build_config(&args)?;
    let pipeline = create_pipeline(config).context("Failed to initialize compute backend")?;
    let config = pipeline.config();

    if verbose > 0 {
        println!(
            "Processing {} ({}x{}, k={}) on {}",
            config.input(),
            config.width(),
            config.height(),
            config.window().size(),
            pipeline.name()
        );
    }

    let source = RawFileSource::new(&args.input_dir);
    let sink = RawFileSink::new(&args.output_dir);
    // Keep the input: the outputs may overwrite its file.
    let input = pipeline.load(&source)?;
    let output = pipeline
        .process(&input)
        .with_context(|| format!("Processing failed on {}", pipeline.name()))?;
    pipeline.store(&sink, &output)?;

    if args.verify {
        let (flip_diff, blur_diff) = verify(config, &input, &output);
        if flip_diff + blur_diff > 0 {
            warn!(flip_diff, blur_diff, "verification failed");
            bail!("Verification failed: {flip_diff} flip and {blur_diff} blur samples differ from host reference");
        }
        info!("verification passed");
        if verbose > 0 {
            println!("Verified against host reference.");
        }
    }

    if verbose > 0 {
        let t = &output.timings;
        println!(
            "Wrote {} and {} in {:?} (upload {:?}, flip {:?}, blur {:?}, download {:?})",
            config.flip_output(),
            config.blur_output(),
            t.total(),
            t.upload,
            t.flip,
            t.blur,
            t.download
        );
    }

    Ok(())
}

//! Backends command
//!
//! Lists compute backends and the one `auto` resolves to.

use anyhow::Result;
use flipblur_compute::{describe_backends, select_best_backend};
use tracing::trace;

pub fn run(verbose: u8) -> Result<()> {
    trace!("backends::run");

    print!("{}", describe_backends());
    println!("auto -> {}", select_best_backend());

    if verbose > 0 {
        println!("Override with --backend or FLIPBLUR_BACKEND.");
    }

    Ok(())
}

//! Trace output for the compiler crates

use anyhow::Result;
use std::io;
use tracing_subscriber::{EnvFilter, fmt};

const TRACED_CRATES: &[&str] = &["kl_lower", "kl_driver", "kl_interpreter"];

/// Installs the subscriber. `RUST_LOG` picks the filter; `--trace` turns the
/// compiler crates up to `trace` on top of it. With neither, nothing is logged
/// and only the diagnostics printed by the command reach the terminal.
pub fn init_logging(trace: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if trace => EnvFilter::new("info"),
        Err(_) => return Ok(()),
    };
    let filter = if trace {
        TRACED_CRATES.iter().try_fold(filter, |filter, krate| {
            Ok::<_, anyhow::Error>(filter.add_directive(format!("{krate}=trace").parse()?))
        })?
    } else {
        filter
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

//! Logger setup: env_logger writing to stderr or to a file.

use crate::parse_args::Verbosity;
use anyhow::Context;
use env_logger::{Builder, Target};
use std::fs::File;

/// Install the global logger. `RUST_LOG`, when set, overrides `verbosity`.
pub fn init(verbosity: Verbosity, log_file: Option<&str>) -> anyhow::Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(verbosity.level_filter())
        .parse_default_env()
        .format_timestamp_millis();

    if let Some(path) = log_file {
        let file =
            File::create(path).with_context(|| format!("failed to open log file '{}'", path))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("logger already installed")?;
    Ok(())
}

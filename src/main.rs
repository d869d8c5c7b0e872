mod analyzer;
mod annotations;
mod classfile;
mod descriptor;
mod elements;
mod ir;
mod opcodes;
mod pool;
mod resources;
mod results;
mod scan;
mod simulate;
#[cfg(test)]
mod test_harness;
mod types;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::scan::scan_inputs;

/// CLI arguments for restruct execution.
#[derive(Parser, Debug)]
#[command(
    name = "restruct",
    about = "Reconstructs the REST API surface of JVM class files, JARs, and WARs without running them.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH", required = true)]
    input: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn init_logging(quiet: bool) {
    let default_filter = if quiet { "error" } else { "restruct=info,warn" };
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

fn run(cli: Cli) -> Result<()> {
    for input in &cli.input {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();
    let class_count = scan.class_count;

    let resources = analyzer::analyze(scan.classes);
    let endpoint_count: usize = resources.paths.values().map(|verbs| verbs.len()).sum();

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &resources)
        .context("failed to serialize resource output")?;
    writer
        .write_all(b"\n")
        .context("failed to write resource output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} classes={} endpoints={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            class_count,
            endpoint_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

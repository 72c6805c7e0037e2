use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use sumbench::accel::{AccelerationManager, FixedDiscovery, SystemDiscovery, TargetDiscovery};
use sumbench::bench::report;
use sumbench::config::BenchConfig;
use sumbench::RunOptions;

#[derive(Parser)]
#[command(
    name = "sumbench",
    about = "Measure float-array summation throughput and accuracy across CPU, SIMD, CUDA and OpenCL",
    version,
    long_about = None
)]
struct Cli {
    /// Number of f32 elements to sum (default: 1 GiB worth)
    elements: Option<usize>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum measured time per repetition, in seconds
    #[arg(long)]
    min_time: Option<f64>,

    /// Measured repetitions per case
    #[arg(long)]
    repetitions: Option<u32>,

    /// Threads invoking each accumulator concurrently
    #[arg(long)]
    threads: Option<usize>,

    /// Only run cases whose label contains this substring
    #[arg(long)]
    filter: Option<String>,

    /// Report format
    #[arg(long, value_enum, default_value = "console")]
    format: Format,

    /// Print the registered case labels and exit
    #[arg(long)]
    list: bool,

    /// Skip CUDA and OpenCL discovery
    #[arg(long)]
    cpu_only: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Console,
    Json,
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config decides the log level, so resolve it under a warn-level subscriber.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || BenchConfig::resolve(cli.config.as_deref()))?;
    init_tracing(&config.logging.level, config.logging.json);

    let mut options = RunOptions::from_config(&config);
    if let Some(elements) = cli.elements {
        if elements == 0 {
            bail!("element count must be at least 1");
        }
        options.elements = elements;
    }
    if let Some(secs) = cli.min_time {
        options.timing.min_time = Duration::try_from_secs_f64(secs)
            .map_err(|e| anyhow::anyhow!("invalid --min-time {}: {}", secs, e))?;
    }
    if let Some(repetitions) = cli.repetitions {
        options.timing.repetitions = repetitions.max(1);
    }
    if let Some(threads) = cli.threads {
        options.timing.threads = threads.max(1);
    }
    options.filter = cli.filter;

    let discovery: Box<dyn TargetDiscovery> = if cli.cpu_only {
        Box::new(FixedDiscovery::none())
    } else {
        Box::new(SystemDiscovery)
    };
    let manager = AccelerationManager::discover(discovery.as_ref());

    // Diagnostics share stdout with the console table, but must not corrupt JSON.
    for line in manager.diagnostics() {
        match cli.format {
            Format::Console => println!("{}", line),
            Format::Json => eprintln!("{}", line),
        }
    }

    if cli.list {
        for case in options.cases(&manager) {
            println!("{}", case.label);
        }
        return Ok(());
    }

    tracing::info!(elements = options.elements, "Starting summation benchmarks");
    let outcome = sumbench::run(&options, &manager)?;

    match cli.format {
        Format::Console => print!("{}", report::format_table(&outcome.context, &outcome.reports)),
        Format::Json => println!("{}", report::to_json(&outcome.context, &outcome.reports)?),
    }
    Ok(())
}

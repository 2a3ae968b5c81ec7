//! Benchmark runner.
//!
//! ```text
//! pixelbench -d 100 -c 42 -t 3 root.tgf
//! ```
//!
//! Prints one `total;mean;variance;standard_deviation` line per topology
//! file. When launched inside a process group of more than one process, rank
//! 0 coordinates the root topology and every other rank runs one child.

use clap::Parser;
use pixelbench::compose::{Communicator, LocalCommunicator};
use pixelbench::harness::{BenchConfig, Benchmark, ThreadMode, Window};
use pixelbench::logger::Logger;
use pixelbench::strategy;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Verbosity, 0 (errors only) to 3 (everything); larger values are clamped.
    #[arg(short = 'q', long, default_value_t = 0, value_parser = clap::value_parser!(i64).range(0..))]
    verbose: i64,

    /// Workload of each transition in milliseconds; 0 disables it.
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(i64).range(0..))]
    duration: i64,

    /// Runs per topology file.
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    counter: u64,

    /// 0: no thread, 1: threaded root, 2: threaded sub-coupled models, 3: both.
    #[arg(short, long = "thread-mode", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    thread_mode: u8,

    /// Worker threads of threaded coupled models; defaults to one per core.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write results to this file instead of standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Simulated window as `begin,duration`.
    #[arg(short, long, default_value = "0,10", allow_hyphen_values = true)]
    simulation: Window,

    /// Root topology files.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let comm: Arc<dyn Communicator> = Arc::new(LocalCommunicator::from_env());
    let config = BenchConfig {
        window: args.simulation,
        duration_ms: args.duration,
        counter: args.counter,
        thread_mode: ThreadMode::try_from(args.thread_mode)?,
        workers: args
            .workers
            .map_or_else(strategy::default_workers, |n| n.max(1)),
    };
    let benchmark = Benchmark::new(config, Arc::clone(&comm))?;

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };

    if benchmark.is_distributed() {
        if comm.rank() == 0 {
            log::info!("Distributed mode activated: {}/{}", comm.rank(), comm.size());
            log::info!("{}", benchmark.config());
        }
        if args.files.len() > 1 {
            log::warn!("distributed mode runs only {}", args.files[0].display());
        }
        let summary = benchmark.run_distributed(&args.files[0])?;
        if comm.rank() == 0 {
            writeln!(output, "{summary}")?;
        }
    } else {
        log::info!("No distributed mode activated");
        log::info!("{}", benchmark.config());
        for file in &args.files {
            log::info!("Run for {}", file.display());
            let summary = benchmark.run_file(file)?;
            writeln!(output, "{summary}")?;
        }
    }

    output.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = Logger::new(args.verbose).install() {
        eprintln!("cannot install logger: {e}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

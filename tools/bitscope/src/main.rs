//! Scenario runner for the bitserial software UART.
//!
//! Usage:
//!   bitscope run <scenario.toml>...   - Run scenarios on the simulated board
//!   bitscope run --trace <file>       - Also dump the transmit pin's waveform
//!   bitscope check <scenario.toml>... - Parse and validate scenarios only

mod runner;
mod scenario;

use std::path::PathBuf;

use anyhow::{Result, bail};
use bitserial_core::log::LogLevel;
use bitserial_sim::logger;
use clap::{Parser, Subcommand};

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "bitscope")]
#[command(about = "Run bitserial scenarios on a simulated board")]
struct Cli {
    /// Show driver log messages (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and report what arrived
    Run {
        /// Scenario files
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Print every transition of the transmit pin
        #[arg(long)]
        trace: bool,
    },

    /// Validate scenario files without running them
    Check {
        /// Scenario files
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,
    },
}

fn log_level(verbose: u8) -> LogLevel {
    match verbose {
        0 => LogLevel::Warn,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::install(log_level(cli.verbose));

    match cli.command {
        Commands::Run { scenarios, trace } => {
            let mut failed = Vec::new();
            for path in &scenarios {
                let scenario = Scenario::load(path)?;
                let report = runner::run(&scenario)?;
                println!("{report}");
                if trace {
                    for (ticks, level) in &report.trace {
                        println!("  {ticks:>12} {}", u8::from(*level));
                    }
                }
                let verdict = if report.passed() { "PASS" } else { "FAIL" };
                println!("result:       {verdict}\n");
                if !report.passed() {
                    failed.push(report.name);
                }
            }
            if !failed.is_empty() {
                bail!("{} scenario(s) failed: {}", failed.len(), failed.join(", "));
            }
        }

        Commands::Check { scenarios } => {
            for path in &scenarios {
                let scenario = Scenario::load(path)?;
                println!(
                    "{}: {:?} at {} baud, {} byte payload",
                    scenario.name,
                    scenario.mode,
                    scenario.baud,
                    scenario.payload.to_bytes().len()
                );
            }
        }
    }

    Ok(())
}

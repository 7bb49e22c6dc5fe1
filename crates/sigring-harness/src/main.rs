//! Verification harness for the shared-memory queue and lock.
//!
//! The harness owns everything the core leaves external: it maps the shared
//! region, calls init exactly once before forking, spawns the participant
//! processes, reaps them, and checks the results.
//!
//! # Usage
//!
//! ```bash
//! # Mutual exclusion: N children x I non-atomic increments under the lock
//! sigring-harness spin --children 8 --iters 100000
//!
//! # Delivery: W writer processes, one reader, per-writer sequence check
//! sigring-harness fifo --writers 4 --items 1000
//! ```

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod fifo;
mod spin;

#[derive(Parser, Debug)]
#[command(name = "sigring-harness")]
#[command(about = "Process-level verification harness for sigring")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check mutual exclusion with concurrent counter increments.
    Spin {
        /// Number of child processes.
        #[arg(long, default_value_t = 4)]
        children: u32,
        /// Increments per child.
        #[arg(long, default_value_t = 100_000)]
        iters: u64,
    },
    /// Check blocking delivery with concurrent writers and one reader.
    Fifo {
        /// Number of writer processes.
        #[arg(long, default_value_t = 4)]
        writers: u32,
        /// Words enqueued per writer.
        #[arg(long, default_value_t = 1000)]
        items: u32,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = Args::parse();
    let passed = match args.command {
        Command::Spin { children, iters } => spin::run(children, iters),
        Command::Fifo { writers, items } => fifo::run(writers, items),
    };

    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

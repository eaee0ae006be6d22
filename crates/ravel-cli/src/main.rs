//! Ravel command-line tool
//!
//! Drives the coroutine instrumenter over compiled units on disk.
//! Log output goes to stderr and is filtered by `RAVEL_LOG`.

use clap::{Parser, Subcommand};
use ravel_cli::commands::{check, dump, instrument};
use ravel_instrument::InstrumentOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ravel")]
#[command(about = "Coroutine instrumentation for Ravel units", long_about = None)]
#[command(version)]
struct Cli {
    /// Report progress
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Report per-instruction detail
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform suspendable methods and write every unit to an output directory
    Instrument {
        /// Unit files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        out_dir: PathBuf,
        /// Directories searched for ancestor classes
        #[arg(long, value_name = "DIR")]
        classpath: Vec<PathBuf>,
        /// Accept known blocking calls, with a warning
        #[arg(long)]
        allow_blocking: bool,
        /// Accept monitor instructions, with a warning
        #[arg(long)]
        allow_monitors: bool,
        /// Transform units that are already marked
        #[arg(short, long)]
        force: bool,
    },

    /// Report which units need transformation
    Check {
        /// Unit files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Emit a JSON report
        #[arg(long)]
        json: bool,
    },

    /// Print a unit
    Dump {
        /// Unit file
        file: PathBuf,
        /// Print JSON instead of assembly
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool, debug: bool) {
    let default = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("RAVEL_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    match cli.command {
        Commands::Instrument {
            inputs,
            out_dir,
            classpath,
            allow_blocking,
            allow_monitors,
            force,
        } => {
            let options = InstrumentOptions {
                allow_blocking,
                allow_monitors,
                verbose: cli.verbose,
                debug: cli.debug,
                force,
            };
            let report = instrument::execute(&instrument::InstrumentArgs {
                inputs,
                out_dir,
                classpath,
                options,
            })?;
            instrument::finish(&report)?;
        }

        Commands::Check { inputs, json } => {
            let statuses = check::execute(&inputs)?;
            print!("{}", check::render(&statuses, json));
            if json {
                println!();
            }
        }

        Commands::Dump { file, json } => {
            println!("{}", dump::execute(&file, json)?);
        }
    }

    Ok(())
}

//! Trellis CLI - inspect how selections parse and compile

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a selection and print its canonical form
    Parse {
        /// Selection, e.g. 'type="Light" and group="Kitchen"'
        selection: String,
    },

    /// Compile a selection into a subscription graph
    Compile {
        /// Selection, e.g. 'type="Light" and group="Kitchen"'
        selection: String,

        /// Print compact JSON on one line
        #[arg(long)]
        compact: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Parse { selection } => {
            commands::parse::execute(&selection)?;
        }
        Commands::Compile { selection, compact } => {
            commands::compile::execute(&selection, compact)?;
        }
    }

    Ok(())
}

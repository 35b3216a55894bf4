//! statecraft - declarative state machine toolkit
//!
//! Compiles, inspects and drives state machine definitions from the command line.

mod commands;
mod config;
mod repl;
mod script;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statecraft")]
#[command(about = "Compile, inspect and drive declarative state machines")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "STATECRAFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a definition and print a summary
    Check {
        /// Definition file (JSON or YAML)
        definition: PathBuf,
    },

    /// Print the compiled transition table
    Inspect {
        /// Definition file (JSON or YAML)
        definition: PathBuf,

        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send events to a machine in order
    Run {
        /// Definition file (JSON or YAML)
        definition: PathBuf,

        /// Target file with properties and scripted callbacks
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Event to send, as name or name:<json> (repeatable)
        #[arg(short, long = "event")]
        events: Vec<String>,

        /// Print a JSON report of every transition
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive session against a machine
    Repl {
        /// Definition file (JSON or YAML)
        definition: PathBuf,

        /// Target file with properties and scripted callbacks
        #[arg(short, long)]
        target: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Repl { definition, target } => {
            if let Err(e) = repl::run(&definition, target.as_deref(), &config).await {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        cmd => match commands::execute(cmd, &config).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

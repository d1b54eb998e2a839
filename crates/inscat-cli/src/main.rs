mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod output;
mod utils;

use clap::Parser;
use cli::{Cli, Commands};
use error::Result;
use std::process;
use tracing::{debug, error};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        error!("Command failed: {:?}", e);
        process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();

    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;
    debug!("CLI arguments parsed: {:?}", cli);

    match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args, cli.threads)?,
        Commands::Params(args) => commands::params::run(args)?,
    }

    if !cli.quiet {
        eprintln!("\n✅ Command completed successfully.");
    }
    Ok(())
}

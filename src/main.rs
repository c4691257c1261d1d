// file: src/main.rs
// version: 2.0.0
// guid: b8c9d0e1-f2a3-4567-8901-234567abcdef

//! Autoinstall Engine - Main entry point

use autoinstall_engine::{
    cli::{
        args::{Cli, Commands},
        commands::*,
    },
    logging::logger,
    AutoinstallError,
};
use anyhow::{Context, Result};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<AutoinstallError>()
            .map(|err| err.class().exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let inputs = load_inputs(cli.command.job_args())
        .await
        .context("Failed to load the job")?;

    // flags given on the command line win over the request's verbosity
    match inputs.request.verbosity {
        Some(verbosity) if !cli.verbose && !cli.quiet => {
            logger::init_logger_with_verbosity(verbosity)?
        }
        _ => logger::init_logger(cli.verbose, cli.quiet)?,
    }

    match cli.command {
        Commands::Run(_) => run_command(inputs).await?,
        Commands::Parse(_) => parse_command(inputs).await?,
        Commands::Validate(_) => validate_command(inputs).await?,
    }
    Ok(())
}

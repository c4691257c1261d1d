// file: src/cli/args.rs
// version: 2.0.0
// guid: f6a7b8c9-d0e1-4234-8678-0123456fabcd

//! Command line argument definitions

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoinstall-engine")]
#[command(about = "Unattended Linux installation on LPARs, z/VM and KVM guests")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an installation job
    Run(JobArgs),

    /// Print the resources a job claims, as JSON
    Parse(JobArgs),

    /// Build and validate the installation model without touching the target
    Validate(JobArgs),
}

impl Commands {
    pub fn job_args(&self) -> &JobArgs {
        match self {
            Commands::Run(args) | Commands::Parse(args) | Commands::Validate(args) => args,
        }
    }
}

/// Inputs shared by every job command
#[derive(Args, Clone, Debug)]
pub struct JobArgs {
    /// Job request as JSON, or @path to a file holding it
    #[arg(short, long)]
    pub request: String,

    /// Inventory file describing systems, operating systems and templates
    #[arg(short, long, env = "AUTOINSTALL_INVENTORY")]
    pub inventory: String,

    /// Engine configuration file (YAML or TOML)
    #[arg(short, long, env = "AUTOINSTALL_CONFIG")]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "autoinstall-engine",
            "run",
            "--request",
            "@job.json",
            "--inventory",
            "inventory.yaml",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.request, "@job.json");
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_request_is_required() {
        assert!(Cli::try_parse_from(["autoinstall-engine", "parse", "-i", "inv.yaml"]).is_err());
    }
}

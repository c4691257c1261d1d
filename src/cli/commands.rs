// file: src/cli/commands.rs
// version: 2.0.0
// guid: a7b8c9d0-e1f2-4345-9789-123456abcdef

//! Command implementations for the CLI

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::{loader::ConfigLoader, EngineConfig},
    data::FileInventory,
    machine::{build_job, parse_request, AutoInstallMachine, JobRequest, MachineDeps},
    Result,
};

use super::args::JobArgs;

/// Everything a job command reads from disk
pub struct JobInputs {
    /// Request as given, used for the resource claim
    pub raw_request: String,
    pub request: JobRequest,
    pub config: Arc<EngineConfig>,
    pub inventory: Arc<FileInventory>,
}

/// Request text from an inline JSON document or `@path`
pub async fn read_request(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => Ok(tokio::fs::read_to_string(path).await?),
        None => Ok(arg.to_string()),
    }
}

/// Load request, configuration and inventory of a job command
pub async fn load_inputs(args: &JobArgs) -> Result<JobInputs> {
    let raw_request = read_request(&args.request).await?;
    let request = JobRequest::from_json(&raw_request)?;
    let config = ConfigLoader::new().load_or_default(args.config.as_deref().map(Path::new))?;
    let inventory = FileInventory::load(&args.inventory).await?;
    Ok(JobInputs {
        raw_request,
        request,
        config: Arc::new(config),
        inventory: Arc::new(inventory),
    })
}

/// Print the resource claim of a job
pub async fn parse_command(inputs: JobInputs) -> Result<()> {
    let claim = parse_request(inputs.inventory.as_ref(), &inputs.raw_request).await?;
    println!("{}", serde_json::to_string_pretty(&claim)?);
    Ok(())
}

/// Build the installation model and validate it
pub async fn validate_command(inputs: JobInputs) -> Result<()> {
    let (job, kind) = build_job(inputs.inventory.as_ref(), &inputs.request).await?;
    info!(
        "Installation of {} on {}/{} is valid, {} installer will be used",
        job.operating_system.name,
        job.system_profile.system_name,
        job.system_profile.profile_name,
        kind
    );
    Ok(())
}

/// Run an installation job until it finishes or Ctrl-C is pressed
pub async fn run_command(inputs: JobInputs) -> Result<()> {
    let deps = MachineDeps::new(inputs.inventory.clone(), inputs.config.clone());
    let mut machine = AutoInstallMachine::new(deps, inputs.request).await?;

    let outcome = tokio::select! {
        result = machine.start() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(result) => result,
        None => {
            warn!("Received Ctrl+C, cleaning up the installation");
            machine.cleanup().await?;
            warn!("Application interrupted by user");
            std::process::exit(130);
        }
    }
}

// file: src/data/mod.rs
// version: 1.0.0
// guid: e2a8c4f6-1b7d-4e93-8f25-9c3b6d0a7e18

//! Data access for installation jobs
//!
//! The engine reads systems, operating systems, repositories and templates
//! through [`InventoryStore`] and writes back the installed OS and any
//! generated device definitions.

pub mod inventory;

pub use inventory::FileInventory;

use crate::model::{
    InstallJob, InstallOptions, OperatingSystem, OsRepository, PackageRepository, SystemProfile,
    Template,
};
use crate::Result;

/// Read and write access to the inventory backing installation jobs
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// Resolve a system profile; `None` selects the system's default profile
    async fn get_system(&self, system: &str, profile: Option<&str>) -> Result<SystemProfile>;

    /// Operating system and its registered install repositories
    async fn get_operating_system(&self, name: &str)
        -> Result<(OperatingSystem, Vec<OsRepository>)>;

    /// Resolve user supplied repository names or URLs
    async fn get_custom_repositories(
        &self,
        entries: &[String],
    ) -> Result<(Vec<OsRepository>, Vec<PackageRepository>)>;

    async fn get_template(&self, name: &str) -> Result<Template>;

    /// Inventory provided installer cmdline template for an OS, if any
    async fn get_installer_template(&self, os: &OperatingSystem) -> Result<Option<Template>>;

    async fn get_install_options(&self, system: &str, profile: Option<&str>)
        -> Result<InstallOptions>;

    /// Hypervisors hosting `system`, closest first
    async fn get_hosting_chain(&self, system: &str) -> Result<Vec<String>>;

    async fn set_target_operating_system(&self, job: &InstallJob) -> Result<()>;

    async fn clear_target_operating_system(&self, job: &InstallJob) -> Result<()>;

    /// Persist device definitions of the job's volumes, returns the number updated
    async fn update_device_definitions(&self, job: &InstallJob) -> Result<usize>;
}

// file: src/model/mod.rs
// version: 1.0.0
// guid: 1a9c7e3b-5d2f-4b86-8c40-e6f2a8d4b173

//! Installation job model
//!
//! An [`InstallJob`] describes one installation: what to install, from
//! where, with which templates, onto which system. It is built once per job
//! by the data layer and read by platforms and installers. The only
//! mutation after construction is a platform recording generated device
//! paths and definitions on volumes.

pub mod network;
pub mod repository;
pub mod system;
pub mod volume;

pub use network::{InterfaceKind, NetworkInterface, SubnetAffiliation};
pub use repository::{
    parse_repository_url, spread_repos_by_os, OperatingSystem, OsRepository, PackageRepository,
    Template,
};
pub use system::{
    BootOptions, HmcCredentials, HostCredentials, HypervisorKind, HypervisorSpec, SystemHypervisor,
    SystemProfile, SystemType, ZvmCredentials,
};
pub use volume::{FcpPath, Partition, Volume, VolumeKind};

use serde::{Deserialize, Serialize};

use crate::{AutoinstallError, Result};

/// Installer cmdline flag selecting the legacy debian-installer
pub const LEGACY_INSTALLER_FLAG: &str = "option_installer=legacy";

/// Installation options stored with the system profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Password of the installer environment, defaults to `password`
    #[serde(default, rename = "installation-password", alias = "installation_password")]
    pub installation_password: Option<String>,
    #[serde(default, rename = "linux-kargs-installer", alias = "linux_kargs_installer")]
    pub linux_kargs_installer: Option<String>,
    #[serde(default, rename = "linux-kargs-target", alias = "linux_kargs_target")]
    pub linux_kargs_target: Option<String>,
}

/// Credentials of the installed operating system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsCredentials {
    pub user: String,
    pub password: String,
    #[serde(rename = "installation-password")]
    pub installation_password: Option<String>,
}

impl OsCredentials {
    /// Password accepted by the installer environment
    pub fn installer_password(&self) -> &str {
        self.installation_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.password)
    }
}

/// Everything needed to run one installation
#[derive(Debug, Clone)]
pub struct InstallJob {
    pub operating_system: OperatingSystem,
    /// Install sources, the first one is authoritative
    pub os_repos: Vec<OsRepository>,
    pub package_repos: Vec<PackageRepository>,
    pub template: Option<Template>,
    pub installer_template: Option<Template>,
    pub system_profile: SystemProfile,
    pub credentials: OsCredentials,
    pub installer_cmdline: Option<String>,
    pub target_cmdline: Option<String>,
    /// Legacy installer requested through the installer cmdline
    pub legacy_installer: bool,
}

impl InstallJob {
    /// Assemble a job from data layer entities
    ///
    /// Custom repositories installing this OS come first, then the
    /// registered repositories of the OS. Custom entries for other systems
    /// are demoted to package repositories.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operating_system: OperatingSystem,
        os_repos: Vec<OsRepository>,
        template: Option<Template>,
        installer_template: Option<Template>,
        custom_os_repos: Vec<OsRepository>,
        custom_package_repos: Vec<PackageRepository>,
        system_profile: SystemProfile,
        options: InstallOptions,
    ) -> Self {
        let mut installer_cmdline = options.linux_kargs_installer;
        let legacy_installer = installer_cmdline
            .as_deref()
            .map(|c| c.contains(LEGACY_INSTALLER_FLAG))
            .unwrap_or(false);
        if legacy_installer {
            installer_cmdline = installer_cmdline.map(|c| strip_flag(&c, LEGACY_INSTALLER_FLAG));
        }

        let (mut job_os_repos, mut package_repos) =
            spread_repos_by_os(&operating_system.name, custom_os_repos);
        package_repos.extend(custom_package_repos);
        job_os_repos.extend(
            os_repos
                .into_iter()
                .filter(|r| r.installable_os == operating_system.name),
        );

        Self {
            operating_system,
            os_repos: job_os_repos,
            package_repos,
            template,
            installer_template,
            system_profile,
            credentials: OsCredentials {
                user: options.user,
                password: options.password,
                installation_password: options.installation_password,
            },
            installer_cmdline,
            target_cmdline: options.linux_kargs_target,
            legacy_installer,
        }
    }

    /// Authoritative install repository
    pub fn install_repo(&self) -> Result<&OsRepository> {
        self.os_repos.first().ok_or_else(|| {
            AutoinstallError::value(format!(
                "No OS repository available for OS {}",
                self.operating_system.name
            ))
        })
    }

    /// Assert the model is consistent and applicable
    pub fn validate(&self) -> Result<()> {
        let profile = &self.system_profile;

        self.install_repo()?;
        if self.template.is_none() {
            return Err(AutoinstallError::value(
                "No autoinstallation template specified",
            ));
        }
        if self.installer_template.is_none() {
            return Err(AutoinstallError::value(
                "No installer command line template specified",
            ));
        }
        let gateway = profile
            .gateway_interface()
            .ok_or_else(|| AutoinstallError::value("No gateway interface present"))?;

        profile.hypervisor.validate()?;
        for iface in &profile.ifaces {
            iface.validate()?;
        }

        if profile.list_gateway_networks().is_empty() {
            return Err(AutoinstallError::value(format!(
                "Gateway interface {} has no IP address or gateway route",
                gateway.os_device_name
            )));
        }

        if !profile.volumes.iter().any(Volume::is_root) {
            return Err(AutoinstallError::value(
                "No root partition defined in any volume",
            ));
        }

        let failing: Vec<String> = profile
            .volumes
            .iter()
            .filter(|v| matches!(v.size(), Some(size) if v.partitioned_size() > size))
            .map(Volume::to_string)
            .collect();
        if !failing.is_empty() {
            return Err(AutoinstallError::value(format!(
                "Partitioning exceeds volume size for volumes [{}]",
                failing.join(", ")
            )));
        }

        Ok(())
    }
}

fn strip_flag(cmdline: &str, flag: &str) -> String {
    cmdline
        .split_whitespace()
        .filter(|token| !token.ends_with(flag))
        .collect::<Vec<_>>()
        .join(" ")
}

// file: src/platform/mod.rs
// version: 1.0.0
// guid: c3a9e5f1-8b2d-4d76-a0e4-6f1b9d3c7a58

//! Platform adapters
//!
//! A [`Platform`] hides how a target is booted, rebooted and pointed at
//! its boot device. One adapter exists per hypervisor kind and
//! [`create_platform`] picks it from the job's hypervisor tag.

pub mod client;
pub mod hmc;
pub mod kvm;
pub mod zvm;

pub use client::{
    CommandControlClient, CommandControlFactory, ControlClient, ControlClientFactory,
    ControlCredentials, BOOT_NOTIFICATION,
};
pub use hmc::HmcPlatform;
pub use kvm::KvmPlatform;
pub use zvm::ZvmPlatform;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::model::{HypervisorKind, InstallJob, OsRepository, Volume};
use crate::network::{RemoteShell, SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

/// Login timeout used when rebooting over SSH
const REBOOT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of commands expected to kill the SSH connection
const FIRE_AND_FORGET_TIMEOUT: Duration = Duration::from_secs(1);

/// Hypervisor specific boot mechanics
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    fn kind(&self) -> HypervisorKind;

    /// Boot the installer with kernel arguments `kargs`
    async fn boot(&self, kargs: &str) -> Result<()>;

    /// Restart the target after installation
    async fn reboot(&self) -> Result<()>;

    /// Make `device` the boot device for subsequent boots
    async fn set_boot_device(&self, device: &Volume) -> Result<()>;
}

/// Collaborators shared by all platforms of a job
#[derive(Clone)]
pub struct PlatformDeps {
    pub config: Arc<EngineConfig>,
    pub control: Arc<dyn ControlClientFactory>,
    pub ssh: Arc<dyn SshConnector>,
}

/// Build the platform adapter for the job's hypervisor
///
/// Adapters may record device paths and definitions on the job's volumes.
pub async fn create_platform(
    job: &mut InstallJob,
    deps: &PlatformDeps,
) -> Result<Box<dyn Platform>> {
    let kind = job.system_profile.hypervisor.kind();
    debug!("Creating {} platform for {}", kind.as_str(), job.system_profile.system_name);
    let platform: Box<dyn Platform> = match kind {
        HypervisorKind::Hmc => Box::new(HmcPlatform::new(job, deps).await?),
        HypervisorKind::Zvm => Box::new(ZvmPlatform::new(job, deps)?),
        HypervisorKind::Kvm => Box::new(KvmPlatform::new(job, deps).await?),
    };
    Ok(platform)
}

/// Kernel and initrd URLs of the install repository
pub(crate) fn netboot_urls(repo: &OsRepository) -> Result<(String, String)> {
    Ok((repo.kernel_url()?, repo.initrd_url()?))
}

/// Run a command that is expected to tear down the connection
pub(crate) async fn run_detached(shell: &mut dyn RemoteShell, command: &str) -> Result<()> {
    match shell.run(command, FIRE_AND_FORGET_TIMEOUT).await {
        Ok(_) | Err(AutoinstallError::Timeout(_)) | Err(AutoinstallError::Ssh(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Reboot the running system from inside
pub(crate) async fn soft_reboot(ssh: &dyn SshConnector, target: &SshTarget) -> Result<()> {
    info!("Rebooting the system now");
    let mut shell = ssh
        .login(&target.host, &target.user, &target.password, REBOOT_LOGIN_TIMEOUT)
        .await?;
    let result = run_detached(shell.as_mut(), "nohup reboot -f; nohup killall sshd").await;
    shell.close().await;
    result
}

/// Shut down the running system from inside, leaving the restart to the hypervisor
pub(crate) async fn soft_shutdown(
    ssh: &dyn SshConnector,
    target: &SshTarget,
    command_timeout: Duration,
) -> Result<()> {
    let mut shell = ssh
        .login(&target.host, &target.user, &target.password, REBOOT_LOGIN_TIMEOUT)
        .await?;
    let result = async {
        shell.run("sync", command_timeout).await?;
        run_detached(shell.as_mut(), "nohup shutdown; nohup killall sshd").await
    }
    .await;
    shell.close().await;
    result
}

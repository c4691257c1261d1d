// file: src/installer/autoyast.rs
// version: 1.0.0
// guid: 6a2e8c4d-9f13-4b7a-85d6-1c0f3e9a7b52

//! AutoYaST family (SUSE Linux Enterprise Server)
//!
//! The installer stops in a provisioning shell; killing it lets stage 1
//! run. Once YaST is gone the installer kexecs into the installed system
//! where stage 2 completes the configuration.

use tokio::time::Instant;
use tracing::{info, warn};

use super::logtail::{wait_for_file, LogTail};
use super::{InstallerEnv, InstallerFamily, InstallerKind};
use crate::model::{HypervisorKind, InterfaceKind};
use crate::platform::run_detached;
use crate::{AutoinstallError, Result};

const Y2LOG: &str = "/var/log/YaST2/y2log";
const KILL_SETUP_SHELL: &str = "kill -9 $(ps --no-header -o pid --ppid=`pgrep 'inst_setup'`)";
const YAST_RUNNING: &str = "pgrep '^yast2'";
const SYSTEM_STATE: &str = "systemctl is-system-running";

/// `is-system-running` states of a system still booting
const BOOTING_STATES: [&str; 3] = ["running", "starting", "initializing"];

/// AutoYaST driven by an XML profile
pub struct AutoyastInstaller {
    env: InstallerEnv,
}

impl AutoyastInstaller {
    pub fn new(env: InstallerEnv) -> Result<Self> {
        let gateway = env.job.system_profile.gateway_interface();
        if matches!(gateway.map(|g| &g.kind), Some(InterfaceKind::Roce { .. })) {
            return Err(AutoinstallError::value(
                "Installations using a ROCE card as the gateway interface are not supported by AutoYast",
            ));
        }
        Ok(Self { env })
    }

    fn on_kvm(&self) -> bool {
        self.env.job.system_profile.hypervisor.kind() == HypervisorKind::Kvm
    }

    /// Wait for stage 2 to bring the installed system up
    async fn wait_system_running(&self) -> Result<()> {
        let env = &self.env;
        let deadline = Instant::now() + env.config.timeouts.connection();
        let mut shell = env.installed_shell().await?;
        loop {
            let (ret, out) = match shell.run(SYSTEM_STATE, env.command_timeout()).await {
                Ok(reply) => reply,
                Err(AutoinstallError::Ssh(_)) | Err(AutoinstallError::Timeout(_)) => {
                    // the system may still be restarting services
                    shell.close().await;
                    shell = env.installed_shell().await?;
                    continue;
                }
                Err(e) => {
                    shell.close().await;
                    return Err(e);
                }
            };
            let state = out.trim();
            if ret == 0 {
                break;
            }
            if !BOOTING_STATES.contains(&state) {
                warn!(
                    "The system is in {} state. Check the is-system-running documentation for details.",
                    state
                );
                break;
            }
            if Instant::now() >= deadline {
                shell.close().await;
                return Err(AutoinstallError::timeout(
                    "Timed out while waiting for the installed system to start",
                ));
            }
            tokio::time::sleep(env.poll_interval()).await;
        }
        shell.close().await;
        info!("AutoYast stage 2 finished and system started running");
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstallerFamily for AutoyastInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Autoyast
    }

    fn env(&self) -> &InstallerEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut InstallerEnv {
        &mut self.env
    }

    async fn wait_install(&mut self) -> Result<()> {
        let env = &self.env;
        let mut shell = env.installer_shell().await?;
        let result = async {
            let (ret, _) = shell.run(KILL_SETUP_SHELL, env.command_timeout()).await?;
            if ret != 0 {
                tracing::error!("Error while killing shell before installation start");
                return Err(AutoinstallError::runtime(format!("Command Error: ret={}", ret)));
            }

            wait_for_file(
                shell.as_mut(),
                Y2LOG,
                env.config.timeouts.logfile(),
                env.poll_interval(),
                env.command_timeout(),
            )
            .await?;

            let mut tail = LogTail::file(Y2LOG, env.command_timeout());
            let deadline = env.install_deadline();
            while Instant::now() <= deadline {
                tail.drain(shell.as_mut()).await?;
                let (ret, _) = shell.run(YAST_RUNNING, env.command_timeout()).await?;
                if ret != 0 {
                    tail.drain(shell.as_mut()).await?;
                    return Ok(true);
                }
                tokio::time::sleep(env.poll_interval()).await;
            }
            Ok(false)
        }
        .await;
        shell.close().await;

        if !result? {
            return Err(AutoinstallError::timeout(
                "Installation Timeout: The installation process is taking too long",
            ));
        }
        info!("AutoYast stage 1 finished");
        Ok(())
    }

    /// Let the installer kexec into the installed system
    ///
    /// KVM guests cannot kexec and get a full reboot instead.
    async fn target_reboot(&mut self) -> Result<()> {
        if self.on_kvm() {
            info!("Rebooting into installed system");
            return self.env.reboot_target().await;
        }

        info!("Kexec'ing into installed system");
        let mut shell = self.env.installer_shell().await?;
        let result = run_detached(shell.as_mut(), KILL_SETUP_SHELL).await;
        shell.close().await;
        result?;

        tokio::time::sleep(self.env.config.timeouts.reboot_settle()).await;
        self.env.set_boot_device().await
    }

    async fn check_installation(&mut self) -> Result<()> {
        if self.env.checker.is_none() {
            return self.env.check_installation().await;
        }
        self.wait_system_running().await?;
        self.env.check_installation().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::testing::*;
    use crate::model::fixtures::*;
    use crate::model::{InstallJob, NetworkInterface, SystemProfile};
    use std::sync::Arc;

    fn sles_job(profile: SystemProfile) -> InstallJob {
        job(
            operating_system("sles15sp5", "suse", 15, "SUSE Linux Enterprise Server 15 SP5"),
            profile,
        )
    }

    fn lpar_profile() -> SystemProfile {
        let mut profile = profile(kvm_hypervisor());
        profile.hypervisor = hmc_hypervisor();
        profile
    }

    #[test]
    fn test_roce_gateway_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut profile = bare_profile(kvm_hypervisor());
        profile.add_volume(root_dasd());
        let mut roce = NetworkInterface::new(InterfaceKind::Roce { fid: "0100".into() }, "ens1");
        roce.mac_address = Some("02:00:00:00:00:01".into());
        roce.subnets = osa_gateway("x").subnets;
        profile.add_network_interface(roce, true);

        let ssh = Arc::new(ScriptedConnector::default());
        let result = AutoyastInstaller::new(env(sles_job(profile), tmp.path(), ssh, RecordingPlatform::default()));
        let err = result.err().unwrap();
        assert!(matches!(err, AutoinstallError::Value(_)));
        assert!(err.to_string().contains("ROCE"));
    }

    #[tokio::test]
    async fn test_wait_install_until_yast_exits() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ssh = Arc::new(ScriptedConnector::default());
        ssh.on("tail -n +1 ", &[(0, "stage 1 starting\n")]);
        ssh.on("pgrep '^yast2'", &[(0, "1234\n"), (1, "")]);
        let mut family = AutoyastInstaller::new(env(
            sles_job(profile(kvm_hypervisor())),
            tmp.path(),
            ssh.clone(),
            RecordingPlatform::default(),
        ))
        .unwrap();

        family.wait_install().await.unwrap();
        let commands = ssh.commands();
        assert_eq!(commands[0], KILL_SETUP_SHELL);
        assert_eq!(commands[1], "[ -f \"/var/log/YaST2/y2log\" ]");
        assert_eq!(commands.iter().filter(|c| *c == YAST_RUNNING).count(), 2);
    }

    #[tokio::test]
    async fn test_failed_setup_shell_kill() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ssh = Arc::new(ScriptedConnector::default());
        ssh.on("kill -9", &[(1, "")]);
        let mut family = AutoyastInstaller::new(env(
            sles_job(profile(kvm_hypervisor())),
            tmp.path(),
            ssh,
            RecordingPlatform::default(),
        ))
        .unwrap();

        let err = family.wait_install().await.unwrap_err();
        assert_eq!(err.to_string(), "Command Error: ret=1");
    }

    #[tokio::test]
    async fn test_target_reboot_by_hypervisor() {
        let tmp = tempfile::TempDir::new().unwrap();

        // kexec on LPAR: no platform reboot, boot device still set
        let ssh = Arc::new(ScriptedConnector::default());
        let platform = RecordingPlatform::default();
        let calls = platform.calls.clone();
        let mut family =
            AutoyastInstaller::new(env(sles_job(lpar_profile()), tmp.path(), ssh.clone(), platform)).unwrap();
        family.target_reboot().await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["set_boot_device DasdVolume<3956>"]);
        assert_eq!(ssh.commands(), vec![KILL_SETUP_SHELL]);

        // KVM guests get the full reboot
        let ssh = Arc::new(ScriptedConnector::default());
        let platform = RecordingPlatform::default();
        let calls = platform.calls.clone();
        let mut family = AutoyastInstaller::new(env(
            sles_job(profile(kvm_hypervisor())),
            tmp.path(),
            ssh.clone(),
            platform,
        ))
        .unwrap();
        family.target_reboot().await.unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["set_boot_device DasdVolume<3956>", "reboot"]
        );
        assert!(ssh.commands().is_empty());
    }
}

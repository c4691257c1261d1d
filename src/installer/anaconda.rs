// file: src/installer/anaconda.rs
// version: 1.0.0
// guid: 1c7e5a9f-2d48-4b63-9f0a-8e3b6d2c4a17

//! Anaconda family (Red Hat Enterprise Linux, Fedora and derivatives)

use regex::Regex;
use tracing::info;

use super::context::{add_systemd_osnames, enc_device_name};
use super::logtail::{wait_for_file, LogTail};
use super::{InstallerEnv, InstallerFamily, InstallerKind};
use crate::model::OperatingSystem;
use crate::{AutoinstallError, Result};

const FEDORA_ID: &str = "Fedora ";
const RHEL_ID: &str = "Red Hat Enterprise Linux";

/// Memory needed by recent releases, in MiB
const MIN_MIB_MEM: u64 = 1280;

const ANACONDA_LOG: &str = "/tmp/anaconda.log";

/// Lines announcing the end of the installation, depending on release
const COMPLETION_MARKERS: [&str; 3] = [
    "Thread Done: AnaConfigurationThread",
    "ui.gui.spokes.installation_progress: The installation has finished.",
    "ui.tui.spokes.installation_progress: The installation has finished.",
];

const STORAGE_FAILURE: &str = r"(?m)^.* ERR anaconda: storage configuration failed: *(.*)$";

fn is_rhel(os: &OperatingSystem) -> bool {
    os.pretty_name.starts_with(RHEL_ID)
}

fn needs_min_memory(os: &OperatingSystem) -> bool {
    os.pretty_name.starts_with(FEDORA_ID)
        || (is_rhel(os) && os.major == 7 && os.minor >= 5)
        || os.major > 7
}

/// Anaconda driven by a kickstart file
pub struct AnacondaInstaller {
    env: InstallerEnv,
    storage_failure: Regex,
}

impl AnacondaInstaller {
    /// Fails when the system cannot run the installer at all
    pub fn new(env: InstallerEnv) -> Result<Self> {
        let os = &env.job.operating_system;
        if env.job.system_profile.memory < MIN_MIB_MEM && needs_min_memory(os) {
            return Err(AutoinstallError::value(format!(
                "Installations of '{}' require at least {}MiB of memory",
                os.pretty_name, MIN_MIB_MEM
            )));
        }
        let storage_failure = Regex::new(STORAGE_FAILURE)
            .map_err(|e| AutoinstallError::runtime_with_source("Invalid log pattern", e))?;
        Ok(Self {
            env,
            storage_failure,
        })
    }

    /// Inspect a chunk of the log, `true` once the installation is done
    fn inspect(&self, text: &str) -> Result<bool> {
        if COMPLETION_MARKERS.iter().any(|m| text.contains(m)) {
            return Ok(true);
        }
        if let Some(caps) = self.storage_failure.captures(text) {
            let reason = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Err(AutoinstallError::runtime(format!(
                "Anaconda storage configuration failed: {}",
                reason
            )));
        }
        Ok(false)
    }
}

#[async_trait::async_trait]
impl InstallerFamily for AnacondaInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Anaconda
    }

    fn env(&self) -> &InstallerEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut InstallerEnv {
        &mut self.env
    }

    async fn collect_info(&mut self) -> Result<()> {
        self.env.collect_info()?;
        let os = &self.env.job.operating_system;
        let legacy_names = is_rhel(os) && os.major <= 7;
        let info = self.env.info_mut()?;
        if legacy_names {
            add_systemd_osnames(info, |ccw| format!("enccw{}", ccw));
        } else {
            add_systemd_osnames(info, enc_device_name);
        }
        Ok(())
    }

    async fn wait_install(&mut self) -> Result<()> {
        let env = &self.env;
        let mut shell = env.installer_shell().await?;
        let result = async {
            wait_for_file(
                shell.as_mut(),
                ANACONDA_LOG,
                env.config.timeouts.logfile(),
                env.poll_interval(),
                env.command_timeout(),
            )
            .await?;
            let mut tail = LogTail::file(ANACONDA_LOG, env.command_timeout());
            tail.follow(
                shell.as_mut(),
                env.install_deadline(),
                env.poll_interval(),
                |text| self.inspect(text),
            )
            .await
        }
        .await;
        shell.close().await;

        if !result? {
            return Err(AutoinstallError::timeout(
                "Installation Timeout: The installation process is taking too long",
            ));
        }
        info!("Anaconda installation finished");
        Ok(())
    }
}

// file: src/installer/agama.rs
// version: 1.0.0
// guid: 4f8b2d6e-7a31-4c9e-b5d4-0e6a9c3f1b28

//! Agama family (SUSE Linux Enterprise 16 and later)
//!
//! The autofile template renders YAML which is published as the JSON
//! profile Agama loads.

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::logtail::LogTail;
use super::{InstallerEnv, InstallerFamily, InstallerKind};
use crate::model::HypervisorKind;
use crate::platform::run_detached;
use crate::{AutoinstallError, Result};

const ANSWERS_PATH: &str = "/tmp/agama-answers.json";
const PROFILE_PATH: &str = "/tmp/agama-profile.json";
const INSTALL_DONE: &str = "Install phase done";

/// Convert the rendered YAML profile to the JSON document Agama reads
///
/// A user named `root` is the root account itself; any other user gets an
/// empty `root` section next to it.
pub fn agama_profile(rendered: &str) -> Result<String> {
    let document: Value = serde_yaml::from_str(rendered)?;
    let Value::Object(mut profile) = document else {
        return Err(AutoinstallError::value(
            "Agama profile template must render to a mapping",
        ));
    };
    let root_user = profile
        .get("user")
        .and_then(|u| u.get("fullName"))
        .and_then(Value::as_str)
        .map(|name| name.trim() == "root")
        .unwrap_or(false);
    if root_user {
        profile.remove("user");
    } else {
        profile.insert("root".into(), Value::Object(Map::new()));
    }
    Ok(serde_json::to_string(&profile)?)
}

/// Answers to the questions Agama would ask interactively
fn answers(multipath: bool) -> Value {
    json!({
        "answers": [{
            "class": "storage.activate_multipath",
            "answer": if multipath { "yes" } else { "no" },
        }]
    })
}

/// Agama driven by a JSON profile
pub struct AgamaInstaller {
    env: InstallerEnv,
}

impl AgamaInstaller {
    pub fn new(env: InstallerEnv) -> Self {
        Self { env }
    }

    fn on_kvm(&self) -> bool {
        self.env.job.system_profile.hypervisor.kind() == HypervisorKind::Kvm
    }

    /// Answer pending questions and load the published profile
    async fn load_profile(&self, shell: &mut dyn crate::network::RemoteShell) -> Result<()> {
        let timeout = self.env.command_timeout();
        let multipath = self
            .env
            .job
            .system_profile
            .root_volume()
            .map(|v| v.is_multipath())
            .unwrap_or(false);

        let write_answers = format!("echo '{}' > {}", answers(multipath), ANSWERS_PATH);
        let (ret, out) = shell.run(&write_answers, timeout).await?;
        if ret != 0 {
            return Err(AutoinstallError::runtime(format!(
                "Failed to write the Agama answers file: {}",
                out.trim()
            )));
        }
        let (ret, out) = shell
            .run(&format!("agama questions answers {}", ANSWERS_PATH), timeout)
            .await?;
        if ret != 0 {
            warn!("Agama did not accept the answers file: {}", out.trim());
        }

        info!("Performing agama config load with the required json");
        let load = format!(
            "curl -sf -o {path} {url} && agama config load < {path}",
            path = PROFILE_PATH,
            url = self.env.autofile.url
        );
        let (ret, out) = shell.run(&load, timeout).await?;
        if ret != 0 {
            return Err(AutoinstallError::runtime(format!(
                "Failed to load the Agama configuration: {}",
                out.trim()
            )));
        }

        let (ret, config) = shell.run("agama config show", timeout).await?;
        if ret != 0 {
            warn!("Failed to fetch Agama config show.");
        } else {
            info!("After Updating Agama Configuration:\n{}", config);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstallerFamily for AgamaInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Agama
    }

    fn env(&self) -> &InstallerEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut InstallerEnv {
        &mut self.env
    }

    async fn create_autofile(&mut self) -> Result<()> {
        info!("generating autofile");
        let rendered = self.env.render_autofile()?;
        let profile = agama_profile(&rendered)?;
        self.env.autofile.write(&profile).await
    }

    async fn wait_install(&mut self) -> Result<()> {
        let env = &self.env;
        let mut shell = env.installer_shell().await?;
        let result = async {
            self.load_profile(shell.as_mut()).await?;
            let mut tail = LogTail::journal("agama", env.command_timeout());
            tail.follow(
                shell.as_mut(),
                env.install_deadline(),
                env.poll_interval(),
                |text| Ok(text.contains(INSTALL_DONE)),
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
        info!("Agama installation completed successfully!");
        Ok(())
    }

    /// Reboot from inside the installer; KVM guests get a full reboot
    async fn target_reboot(&mut self) -> Result<()> {
        if self.on_kvm() {
            info!("Rebooting into installed system");
            return self.env.reboot_target().await;
        }

        info!("Kexec'ing into installed system");
        let mut shell = self.env.installer_shell().await?;
        let result = run_detached(shell.as_mut(), "reboot").await;
        shell.close().await;
        result?;

        tokio::time::sleep(self.env.config.timeouts.reboot_settle()).await;
        self.env.set_boot_device().await
    }
}

// file: src/config/mod.rs
// version: 2.0.0
// guid: 8c4f2a1e-6d3b-4f90-a7c5-2b9e1d0f3a66

//! Engine configuration
//!
//! One [`EngineConfig`] is loaded per process and shared by `Arc` with every
//! component that needs served paths, webhook endpoints, control commands or
//! timing budgets.

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::model::HypervisorKind;

/// Top level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where generated autofiles are served from
    pub auto_install: AutoInstallConfig,
    /// Event streaming webhook used by the subiquity installer
    pub installer_webhook: WebhookConfig,
    /// Timing budgets, in seconds
    pub timeouts: TimeoutConfig,
    /// Hypervisor control commands
    pub control: ControlConfig,
    /// Job working directory, receives a copy of every generated autofile
    pub work_dir: PathBuf,
}

/// Served autofile location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoInstallConfig {
    /// Base URL under which `dir` is published
    pub url: String,
    /// Local directory published under `url`
    pub dir: PathBuf,
    /// Root password of the live image booted on console managed partitions
    pub live_img_passwd: Option<String>,
}

impl Default for AutoInstallConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/static".to_string(),
            dir: PathBuf::from("/var/lib/autoinstall/static"),
            live_img_passwd: None,
        }
    }
}

/// Installer webhook endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Control endpoint, defaults to `http://localhost:{control_port}`
    pub control_url: Option<String>,
    pub control_port: u16,
    /// Port the target system posts its events to
    pub webhook_port: u16,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            control_url: None,
            control_port: 7223,
            webhook_port: 7224,
        }
    }
}

impl WebhookConfig {
    /// Control endpoint of the webhook
    pub fn control_endpoint(&self) -> String {
        match &self.control_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.control_port),
        }
    }
}

/// Timing budgets; every value is in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connection: f64,
    pub connection_retry: f64,
    pub install: f64,
    pub logfile: f64,
    pub poll_interval: f64,
    pub boot_poll: f64,
    pub event_poll: f64,
    pub failure_drain: f64,
    pub reboot_settle: f64,
    pub command: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection: 600.0,
            connection_retry: 5.0,
            install: 3600.0,
            logfile: 120.0,
            poll_interval: 10.0,
            boot_poll: 5.0,
            event_poll: 2.5,
            failure_drain: 10.0,
            reboot_settle: 5.0,
            command: 60.0,
        }
    }
}

impl TimeoutConfig {
    /// Convert a seconds value to a duration, negative values become zero
    pub fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value.max(0.0))
    }

    pub fn connection(&self) -> Duration {
        Self::secs(self.connection)
    }

    pub fn connection_retry(&self) -> Duration {
        Self::secs(self.connection_retry)
    }

    pub fn install(&self) -> Duration {
        Self::secs(self.install)
    }

    pub fn logfile(&self) -> Duration {
        Self::secs(self.logfile)
    }

    pub fn poll_interval(&self) -> Duration {
        Self::secs(self.poll_interval)
    }

    pub fn boot_poll(&self) -> Duration {
        Self::secs(self.boot_poll)
    }

    pub fn event_poll(&self) -> Duration {
        Self::secs(self.event_poll)
    }

    pub fn failure_drain(&self) -> Duration {
        Self::secs(self.failure_drain)
    }

    pub fn reboot_settle(&self) -> Duration {
        Self::secs(self.reboot_settle)
    }

    pub fn command(&self) -> Duration {
        Self::secs(self.command)
    }
}

/// Programs implementing the hypervisor control protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub hmc: String,
    pub zvm: String,
    pub kvm: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            hmc: "autoinstall-hmc".to_string(),
            zvm: "autoinstall-zvm".to_string(),
            kvm: "autoinstall-kvm".to_string(),
        }
    }
}

impl ControlConfig {
    /// Control program for a hypervisor kind
    pub fn program(&self, kind: HypervisorKind) -> &str {
        match kind {
            HypervisorKind::Hmc => &self.hmc,
            HypervisorKind::Zvm => &self.zvm,
            HypervisorKind::Kvm => &self.kvm,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        Url::parse(&self.auto_install.url).map_err(|e| {
            crate::AutoinstallError::config(format!(
                "Invalid auto_install url {}: {}",
                self.auto_install.url, e
            ))
        })?;

        if self.auto_install.dir.as_os_str().is_empty() {
            return Err(crate::AutoinstallError::config(
                "auto_install dir cannot be empty",
            ));
        }

        let t = &self.timeouts;
        let budgets = [
            ("connection", t.connection),
            ("install", t.install),
            ("logfile", t.logfile),
        ];
        for (name, value) in budgets {
            if !(value > 0.0) {
                return Err(crate::AutoinstallError::config(format!(
                    "Timeout {} must be positive",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Hostname of the server publishing the autofiles
    pub fn served_hostname(&self) -> Option<String> {
        Url::parse(&self.auto_install.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

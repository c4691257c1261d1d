// file: src/installer/subiquity.rs
// version: 1.1.0
// guid: 9b4d1f6a-3e72-4c85-8a19-6f2e0c7b5d31

//! subiquity family
//!
//! The installer reports progress as events posted to the webhook; the
//! installation is followed by reading the job's webhook session.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::context::{add_systemd_osnames, enc_device_name, RenderContext};
use super::debian::{apply_partition_layout, apt_url};
use super::events::{classify, EventMarker, EventSource, LogEvent, WebhookSession};
use super::{InstallerEnv, InstallerFamily, InstallerKind};
use crate::{AutoinstallError, Result};

const USER_DATA: &str = "user-data";
const META_DATA: &str = "meta-data";

/// URL safe random token shared with the installer
fn session_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Where the installer fetches its install image
fn iso_path(repo_url: &str, image: &str) -> String {
    if url::Url::parse(image).is_ok() {
        return image.to_string();
    }
    format!("{}/{}", repo_url.trim_end_matches('/'), image)
}

fn add_repo_sources(info: &mut RenderContext) -> Result<()> {
    let Some(Value::Array(repos)) = info.get_mut("repos") else {
        return Ok(());
    };
    for repo in repos {
        let url = repo["url"].as_str().unwrap_or_default().to_string();
        if repo["os"] == true {
            let image = repo["install_image"]
                .as_str()
                .filter(|i| !i.is_empty())
                .map(str::to_string);
            let Some(image) = image else {
                return Err(AutoinstallError::value(format!(
                    "Subiquity installer requires 'install_image' set in repository {}",
                    repo["name"].as_str().unwrap_or_default()
                )));
            };
            repo["iso_path"] = json!(iso_path(&url, &image));
            continue;
        }
        repo["apt_url"] = json!(apt_url(&url)?);
    }
    Ok(())
}

/// Installer of Ubuntu 20.04 and later
pub struct SubiquityInstaller {
    env: InstallerEnv,
    events: Arc<dyn EventSource>,
    session_id: String,
    secret: String,
    session_open: bool,
}

impl SubiquityInstaller {
    pub fn new(env: InstallerEnv, events: Arc<dyn EventSource>) -> Self {
        let profile = &env.job.system_profile;
        let session_id = format!("{}-{}", profile.system_name, profile.profile_name);
        Self {
            env,
            events,
            session_id,
            secret: session_secret(),
            session_open: false,
        }
    }

    fn webhook_endpoint(&self) -> String {
        let config = &self.env.config;
        format!(
            "http://{}:{}/log/",
            config.served_hostname().unwrap_or_default(),
            config.installer_webhook.webhook_port
        )
    }

    async fn open_session(&mut self) -> Result<()> {
        info!("Creating webhook session {}", self.session_id);
        let session = WebhookSession::new(
            self.session_id.clone(),
            self.env.config.work_dir.display().to_string(),
            self.secret.clone(),
        );
        self.events.open_session(&session).await?;
        self.session_open = true;
        Ok(())
    }

    /// Follow the event stream until success, failure or deadline
    ///
    /// A failure keeps the stream drained for a short while so the
    /// remaining diagnostic events get logged; it wins over any success
    /// seen in the same window.
    async fn read_events(&self) -> Result<()> {
        let major = self.env.job.operating_system.major;
        let poll = self.env.config.timeouts.event_poll();
        let mut deadline = self.env.install_deadline();
        let mut next = 0;
        let mut watchdog_events = Vec::new();
        let mut success = false;
        let mut failure = false;

        while Instant::now() <= deadline {
            let batch = self.events.read_events(&self.session_id, next).await?;
            next += batch.len();
            for raw in &batch {
                let event = LogEvent::parse(raw);
                if event.is_watchdog() {
                    watchdog_events.push(event.clone());
                } else {
                    info!("{}", event);
                }
                match classify(&event, major) {
                    EventMarker::Success => success = true,
                    EventMarker::Failure => {
                        error!("Detected installation failure");
                        if !failure {
                            deadline = Instant::now() + self.env.config.timeouts.failure_drain();
                        }
                        failure = true;
                    }
                    EventMarker::None => {}
                }
            }
            if success && !failure {
                break;
            }
            tokio::time::sleep(poll).await;
        }

        if failure {
            for event in &watchdog_events {
                debug!("{}", event);
            }
            return Err(AutoinstallError::runtime("Installation could not be completed"));
        }
        if !success {
            return Err(AutoinstallError::timeout(
                "Installation Timeout: The installation process is taking too long",
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstallerFamily for SubiquityInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::Subiquity
    }

    fn env(&self) -> &InstallerEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut InstallerEnv {
        &mut self.env
    }

    async fn collect_info(&mut self) -> Result<()> {
        self.env.collect_info()?;
        apply_partition_layout(&mut self.env)?;
        let webhook = json!({
            "endpoint": self.webhook_endpoint(),
            "key": self.session_id,
            "token": self.secret,
        });
        let info = self.env.info_mut()?;
        add_systemd_osnames(info, enc_device_name);
        add_repo_sources(info)?;
        info.insert("webhook".into(), webhook);
        Ok(())
    }

    async fn create_autofile(&mut self) -> Result<()> {
        info!("generating autofile");
        let content = self.env.render_autofile()?;
        self.env
            .autofile
            .write_directory(&[(USER_DATA, content.as_str()), (META_DATA, "")], USER_DATA)
            .await
    }

    async fn wait_install(&mut self) -> Result<()> {
        self.open_session().await?;
        self.read_events().await
    }

    /// The installer reboots on its own; only the boot device is switched
    async fn target_reboot(&mut self) -> Result<()> {
        self.env.set_boot_device().await?;
        info!("waiting for system to reboot");
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if self.session_open {
            if let Err(e) = self.events.close_session(&self.session_id).await {
                warn!("Failed to remove webhook session {}: {}", self.session_id, e);
            }
            self.session_open = false;
        }
        self.env.autofile.remove().await
    }
}

// file: src/platform/client.rs
// version: 1.0.0
// guid: 7b1e4c9a-3d6f-4a28-95e0-c2a8f7d3b614

//! Hypervisor control clients
//!
//! Platforms talk to consoles and hypervisors through [`ControlClient`].
//! The shipped implementation delegates every call to an external control
//! program, one per hypervisor kind.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::HypervisorKind;
use crate::{AutoinstallError, Result};

/// Output line of a control program announcing the installer has booted
pub const BOOT_NOTIFICATION: &str = "boot-notification";

/// Session data of a control client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlCredentials {
    /// Name of the hypervisor or console
    pub name: String,
    pub address: String,
    pub user: String,
    pub password: String,
    pub private_key: Option<String>,
    /// z/VM logon-by user
    pub byuser: Option<String>,
}

/// Operations offered by a hypervisor or console
#[async_trait::async_trait]
pub trait ControlClient: Send + Sync {
    async fn login(&self, credentials: &ControlCredentials) -> Result<()>;

    async fn logoff(&self) -> Result<()>;

    /// Start `guest`; `notify` fires once the installer has booted
    async fn start(
        &self,
        guest: &str,
        cpus: u32,
        memory: u64,
        params: &Value,
        notify: Option<oneshot::Sender<()>>,
    ) -> Result<()>;

    async fn reboot(&self, guest: &str, params: &Value) -> Result<()>;

    async fn set_boot_device(&self, guest: &str, params: &Value) -> Result<()>;
}

/// Creates control clients for a hypervisor kind
pub trait ControlClientFactory: Send + Sync {
    fn create(&self, kind: HypervisorKind) -> Result<Arc<dyn ControlClient>>;
}

/// Factory of [`CommandControlClient`]s using the configured programs
pub struct CommandControlFactory {
    config: Arc<EngineConfig>,
}

impl CommandControlFactory {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }
}

impl ControlClientFactory for CommandControlFactory {
    fn create(&self, kind: HypervisorKind) -> Result<Arc<dyn ControlClient>> {
        let program = self.config.control.program(kind);
        if program.is_empty() {
            return Err(AutoinstallError::config(format!(
                "No control program configured for {}",
                kind.as_str()
            )));
        }
        Ok(Arc::new(CommandControlClient::new(program)))
    }
}

/// Control client running `<program> <action> [guest]`
///
/// Parameters are written to stdin as JSON, credentials are passed through
/// `AUTOINSTALL_*` environment variables.
pub struct CommandControlClient {
    program: String,
    credentials: Mutex<Option<ControlCredentials>>,
}

impl CommandControlClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            credentials: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<ControlCredentials> {
        self.credentials
            .lock()
            .map_err(|_| AutoinstallError::runtime("Control client state is poisoned"))?
            .clone()
            .ok_or_else(|| AutoinstallError::runtime("Control client is not logged in"))
    }

    fn command(&self, action: &str, guest: Option<&str>, credentials: &ControlCredentials) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(action);
        if let Some(guest) = guest {
            cmd.arg(guest);
        }
        cmd.env("AUTOINSTALL_HYPERVISOR", &credentials.name)
            .env("AUTOINSTALL_ADDRESS", &credentials.address)
            .env("AUTOINSTALL_USER", &credentials.user)
            .env("AUTOINSTALL_PASSWORD", &credentials.password)
            .env_remove("LD_PRELOAD")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &credentials.private_key {
            cmd.env("AUTOINSTALL_PRIVATE_KEY", key);
        }
        if let Some(byuser) = &credentials.byuser {
            cmd.env("AUTOINSTALL_BYUSER", byuser);
        }
        cmd
    }

    /// Run one control action, forwarding stdout lines to the log
    async fn invoke(
        &self,
        action: &str,
        guest: Option<&str>,
        credentials: &ControlCredentials,
        input: &Value,
        mut notify: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        debug!("Control action {} on {:?}: {}", action, guest, input);

        let mut child = self
            .command(action, guest, credentials)
            .spawn()
            .map_err(|e| {
                AutoinstallError::runtime_with_source(
                    format!("Failed to run control program {}", self.program),
                    e,
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // programs ignoring their input may exit before reading it
            if let Err(e) = stdin.write_all(input.to_string().as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
            drop(stdin);
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut collected = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push(line);
                }
                collected.join("\n")
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim() == BOOT_NOTIFICATION {
                    if let Some(tx) = notify.take() {
                        let _ = tx.send(());
                    }
                    continue;
                }
                info!("{}", line);
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(AutoinstallError::runtime(format!(
                "Control action {} failed with exit code {:?}: {}",
                action,
                status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ControlClient for CommandControlClient {
    async fn login(&self, credentials: &ControlCredentials) -> Result<()> {
        self.invoke("login", None, credentials, &Value::Null, None).await?;
        *self
            .credentials
            .lock()
            .map_err(|_| AutoinstallError::runtime("Control client state is poisoned"))? =
            Some(credentials.clone());
        Ok(())
    }

    async fn logoff(&self) -> Result<()> {
        let session = self.session()?;
        self.invoke("logoff", None, &session, &Value::Null, None).await?;
        if let Ok(mut guard) = self.credentials.lock() {
            *guard = None;
        }
        Ok(())
    }

    async fn start(
        &self,
        guest: &str,
        cpus: u32,
        memory: u64,
        params: &Value,
        notify: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        let session = self.session()?;
        let input = json!({"cpus": cpus, "memory": memory, "params": params});
        self.invoke("start", Some(guest), &session, &input, notify).await
    }

    async fn reboot(&self, guest: &str, params: &Value) -> Result<()> {
        let session = self.session()?;
        self.invoke("reboot", Some(guest), &session, params, None).await
    }

    async fn set_boot_device(&self, guest: &str, params: &Value) -> Result<()> {
        let session = self.session()?;
        self.invoke("set-boot-device", Some(guest), &session, params, None)
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("control");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn credentials() -> ControlCredentials {
        ControlCredentials {
            name: "cpc3".to_string(),
            address: "hmc.example.com".to_string(),
            user: "admin".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_boot_notification_fires_signal() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir, "cat >/dev/null; echo loading; echo boot-notification; echo done");
        let client = CommandControlClient::new(program);
        client.login(&credentials()).await.unwrap();

        let (tx, rx) = oneshot::channel();
        client
            .start("lpar3", 2, 4096, &json!({}), Some(tx))
            .await
            .unwrap();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_action_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            &dir,
            "cat >/dev/null; if [ \"$1\" = reboot ]; then echo \"no such guest $2\" >&2; exit 3; fi",
        );
        let client = CommandControlClient::new(program);
        client.login(&credentials()).await.unwrap();

        let err = client.reboot("guest01", &Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("no such guest guest01"));
        assert!(err.to_string().contains("Some(3)"));
    }

    #[tokio::test]
    async fn test_actions_require_login() {
        let client = CommandControlClient::new("/bin/true");
        let err = client.reboot("guest01", &Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "Control client is not logged in");
    }
}

// file: src/network/executor.rs
// version: 2.0.0
// guid: 2e7b9c41-5a8d-4f36-b0c2-7d1e4a9f6b53

//! Remote shell traits used to drive target systems

use std::time::Duration;

use crate::model::InstallJob;
use crate::Result;

/// An open shell on a remote system
#[async_trait::async_trait]
pub trait RemoteShell: Send {
    /// Run a command, returning its exit code and combined output
    ///
    /// A command not finishing within `timeout` yields
    /// [`crate::AutoinstallError::Timeout`].
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<(i32, String)>;

    /// Close the shell, errors are ignored
    async fn close(&mut self);
}

/// Opens remote shells
///
/// Dial failures are reported as [`crate::AutoinstallError::Connection`] so
/// callers can tell them apart from authentication or protocol errors.
#[async_trait::async_trait]
pub trait SshConnector: Send + Sync {
    async fn login(
        &self,
        host: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteShell>>;
}

/// Login data of a remote system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// The target while the installer environment is running
    pub fn installer(job: &InstallJob) -> Self {
        Self::new(
            &job.system_profile.hostname,
            &job.credentials.user,
            job.credentials.installer_password(),
        )
    }

    /// The installed operating system
    pub fn installed(job: &InstallJob) -> Self {
        Self::new(
            &job.system_profile.hostname,
            &job.credentials.user,
            &job.credentials.password,
        )
    }
}

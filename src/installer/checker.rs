// file: src/installer/checker.rs
// version: 1.0.0
// guid: 5a3c8f1e-9d27-4b64-b8e0-2f6d1a9c7e45

//! Verification of the installed system against its profile

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::InstallJob;
use crate::network::{connect_with_retry, RemoteShell, RetryPolicy, SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

/// Allowed difference between profile and reported memory, in MiB
const MEMORY_TOLERANCE_MIB: u64 = 128;

/// Checks the installed system matches what was requested
#[async_trait::async_trait]
pub trait InstallationChecker: Send + Sync {
    async fn verify(&self, job: &InstallJob) -> Result<()>;
}

/// Checker querying the installed system over SSH
///
/// In permissive mode mismatches are logged as warnings instead of failing
/// the installation.
pub struct SshPostInstallChecker {
    ssh: Arc<dyn SshConnector>,
    policy: RetryPolicy,
    command_timeout: Duration,
    permissive: bool,
}

impl SshPostInstallChecker {
    pub fn new(
        ssh: Arc<dyn SshConnector>,
        policy: RetryPolicy,
        command_timeout: Duration,
        permissive: bool,
    ) -> Self {
        Self {
            ssh,
            policy,
            command_timeout,
            permissive,
        }
    }

    fn report(&self, param: &str, expected: &str, actual: Option<&str>) -> Result<()> {
        let message = format!(
            "Configuration mismatch in {}: expected '{}', actual is '{}'",
            param,
            expected,
            actual.unwrap_or("<not found>")
        );
        if self.permissive {
            warn!("{}", message);
            return Ok(());
        }
        Err(AutoinstallError::runtime(message))
    }

    async fn query(&self, shell: &mut dyn RemoteShell, command: &str) -> Result<Option<String>> {
        let (ret, out) = shell.run(command, self.command_timeout).await?;
        debug!("{} returned {}: {}", command, ret, out.trim());
        if ret != 0 {
            return Ok(None);
        }
        Ok(Some(out.trim().to_string()))
    }

    async fn verify_hostname(&self, shell: &mut dyn RemoteShell, job: &InstallJob) -> Result<()> {
        let expected = &job.system_profile.hostname;
        let actual = self.query(shell, "hostname --fqdn || hostname").await?;
        let short = expected.split('.').next().unwrap_or(expected);
        match actual.as_deref() {
            Some(name) if name == expected || name == short => Ok(()),
            other => self.report("hostname", expected, other),
        }
    }

    async fn verify_cpu(&self, shell: &mut dyn RemoteShell, job: &InstallJob) -> Result<()> {
        let expected = job.system_profile.cpus.to_string();
        let actual = self.query(shell, "nproc --all").await?;
        if actual.as_deref() != Some(expected.as_str()) {
            return self.report("cpu quantity", &expected, actual.as_deref());
        }
        Ok(())
    }

    async fn verify_memory(&self, shell: &mut dyn RemoteShell, job: &InstallJob) -> Result<()> {
        // crash kernel reservation is not part of MemTotal
        let command = "echo $(( $(awk '/^MemTotal:/ {print $2}' /proc/meminfo) / 1024 \
                       + $(cat /sys/kernel/kexec_crash_size 2>/dev/null || echo 0) / 1048576 ))";
        let actual = self.query(shell, command).await?;
        let total: Option<u64> = actual.as_deref().and_then(|v| v.parse().ok());
        let expected = job.system_profile.memory;
        let min_mem = expected.saturating_sub(MEMORY_TOLERANCE_MIB);
        let max_mem = expected + MEMORY_TOLERANCE_MIB;
        match total {
            None => self.report("memory", &expected.to_string(), actual.as_deref()),
            Some(total) if total < min_mem => {
                self.report("minimum MiB memory", &min_mem.to_string(), Some(&total.to_string()))
            }
            Some(total) if total > max_mem => {
                self.report("maximum MiB memory", &max_mem.to_string(), Some(&total.to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    async fn verify_storage(&self, shell: &mut dyn RemoteShell, job: &InstallJob) -> Result<()> {
        for volume in &job.system_profile.volumes {
            let path = volume.device_path();
            let (ret, _) = shell
                .run(&format!("[ -e \"{}\" ]", path), self.command_timeout)
                .await?;
            if ret != 0 {
                self.report(&format!("volume {}", volume), &path, None)?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstallationChecker for SshPostInstallChecker {
    async fn verify(&self, job: &InstallJob) -> Result<()> {
        let target = SshTarget::installed(job);
        let mut shell = connect_with_retry(self.ssh.as_ref(), &target, self.policy).await?;

        let result = async {
            self.verify_hostname(shell.as_mut(), job).await?;
            self.verify_cpu(shell.as_mut(), job).await?;
            self.verify_memory(shell.as_mut(), job).await?;
            self.verify_storage(shell.as_mut(), job).await
        }
        .await;
        shell.close().await;
        result
    }
}

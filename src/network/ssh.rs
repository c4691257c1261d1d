// file: src/network/ssh.rs
// version: 2.0.0
// guid: 8f3a1d6c-9e2b-4c75-a148-3b6e0d9c2f71

//! SSH client for remote target operations

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::Session;
use tracing::{debug, info};

use super::executor::{RemoteShell, SshConnector};
use crate::{AutoinstallError, Result};

/// libssh2 error code reported when a blocking call exceeds the session timeout
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// [`SshConnector`] backed by libssh2 with password authentication
#[derive(Debug, Clone, Default)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl SshConnector for Ssh2Connector {
    async fn login(
        &self,
        host: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteShell>> {
        let host = host.to_string();
        let user = user.to_string();
        let password = password.to_string();

        let client = tokio::task::spawn_blocking(move || {
            SshClient::connect(&host, &user, &password, timeout)
        })
        .await
        .map_err(|e| AutoinstallError::ssh(format!("SSH login task failed: {}", e)))??;

        Ok(Box::new(client))
    }
}

/// SSH session with a remote system
pub struct SshClient {
    session: Option<Session>,
    host: String,
}

impl SshClient {
    /// Connect to `host` and authenticate with a password
    pub fn connect(host: &str, username: &str, password: &str, timeout: Duration) -> Result<Self> {
        info!("Connecting to {} as {}", host, username);

        let addr = (host, 22)
            .to_socket_addrs()
            .map_err(|e| {
                AutoinstallError::connection(format!("Failed to resolve {}: {}", host, e))
            })?
            .next()
            .ok_or_else(|| {
                AutoinstallError::connection(format!("No address found for {}", host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            AutoinstallError::connection(format!("Failed to connect to {}: {}", host, e))
        })?;

        let mut session = Session::new().map_err(|e| {
            AutoinstallError::ssh(format!("Failed to create SSH session: {}", e))
        })?;

        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(timeout));
        session.handshake().map_err(|e| {
            AutoinstallError::connection(format!("SSH handshake with {} failed: {}", host, e))
        })?;

        session.userauth_password(username, password).map_err(|e| {
            AutoinstallError::ssh(format!("SSH authentication to {} failed: {}", host, e))
        })?;

        if !session.authenticated() {
            return Err(AutoinstallError::ssh("SSH authentication failed"));
        }

        info!("SSH connection established to {}", host);
        Ok(Self {
            session: Some(session),
            host: host.to_string(),
        })
    }

    fn exec(session: &Session, command: &str, timeout: Duration) -> Result<(i32, String)> {
        session.set_timeout(timeout_millis(timeout));

        let mut channel = session
            .channel_session()
            .map_err(|e| map_ssh_error("Failed to create SSH channel", e))?;

        channel
            .exec(command)
            .map_err(|e| map_ssh_error("Failed to execute command", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel
            .read_to_string(&mut stdout)
            .map_err(|e| map_io_error("Failed to read stdout", e))?;
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| map_io_error("Failed to read stderr", e))?;

        channel
            .wait_close()
            .map_err(|e| map_ssh_error("Failed to close SSH channel", e))?;

        let exit_status = channel
            .exit_status()
            .map_err(|e| map_ssh_error("Failed to get exit status", e))?;

        stdout.push_str(&stderr);
        Ok((exit_status, stdout))
    }
}

#[async_trait::async_trait]
impl RemoteShell for SshClient {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<(i32, String)> {
        debug!("Executing command on {}: {}", self.host, command);

        let session = self
            .session
            .clone()
            .ok_or_else(|| AutoinstallError::ssh("No active SSH session"))?;
        let command = command.to_string();

        tokio::task::spawn_blocking(move || Self::exec(&session, &command, timeout))
            .await
            .map_err(|e| AutoinstallError::ssh(format!("SSH command task failed: {}", e)))?
    }

    async fn close(&mut self) {
        self.disconnect();
    }
}

impl SshClient {
    /// Disconnect SSH session
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "", None);
            debug!("SSH session to {} disconnected", self.host);
        }
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

fn map_ssh_error(context: &str, e: ssh2::Error) -> AutoinstallError {
    if matches!(e.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)) {
        AutoinstallError::timeout(format!("{}: command timed out", context))
    } else {
        AutoinstallError::ssh(format!("{}: {}", context, e))
    }
}

fn map_io_error(context: &str, e: std::io::Error) -> AutoinstallError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        AutoinstallError::timeout(format!("{}: command timed out", context))
    } else {
        AutoinstallError::ssh(format!("{}: {}", context, e))
    }
}

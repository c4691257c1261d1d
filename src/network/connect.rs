// file: src/network/connect.rs
// version: 1.0.0
// guid: 5c8e2a7f-1d4b-4e96-8a30-9f6b2c1e7d45

//! Connection retry for systems that are still booting

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::executor::{RemoteShell, SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

/// Retry policy for dialing a target
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Overall budget for establishing the connection
    pub budget: Duration,
    /// Pause between attempts
    pub backoff: Duration,
    /// Timeout of a single attempt
    pub attempt_timeout: Duration,
}

/// Log into `target`, retrying dial failures until the budget is spent
///
/// Only [`AutoinstallError::Connection`] is retried; authentication and
/// protocol errors are returned right away.
pub async fn connect_with_retry(
    connector: &dyn SshConnector,
    target: &SshTarget,
    policy: RetryPolicy,
) -> Result<Box<dyn RemoteShell>> {
    let deadline = Instant::now() + policy.budget;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match connector
            .login(
                &target.host,
                &target.user,
                &target.password,
                policy.attempt_timeout,
            )
            .await
        {
            Ok(shell) => {
                debug!("Connected to {} after {} attempt(s)", target.host, attempt);
                return Ok(shell);
            }
            Err(AutoinstallError::Connection(reason)) => {
                if Instant::now() + policy.backoff >= deadline {
                    warn!("Giving up on {}: {}", target.host, reason);
                    return Err(AutoinstallError::connection(
                        "Timeout occurred while trying to connect to the target system.",
                    ));
                }
                debug!(
                    "Connection to {} failed ({}), retrying in {:?}",
                    target.host, reason, policy.backoff
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(other) => return Err(other),
        }
    }
}

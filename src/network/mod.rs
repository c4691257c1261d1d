// file: src/network/mod.rs
// version: 2.0.0
// guid: 0d4f7a2c-6b9e-4183-9c5a-e2f8b1d6a437

//! Remote shell access to target systems

pub mod connect;
pub mod executor;
pub mod ssh;

pub use connect::{connect_with_retry, RetryPolicy};
pub use executor::{RemoteShell, SshConnector, SshTarget};
pub use ssh::{Ssh2Connector, SshClient};

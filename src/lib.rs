// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # Autoinstall Engine
//!
//! Unattended Linux installation on console managed partitions, z/VM
//! guests and KVM guests. A job names a system and an operating system;
//! the engine renders the installer's autofile, boots the installer over
//! the network, follows the installation and verifies the result.
//!
//! [`machine::AutoInstallMachine`] is the entry point for running a job,
//! [`machine::parse_request`] computes the resources a job claims.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod installer;
pub mod logging;
pub mod machine;
pub mod model;
pub mod network;
pub mod platform;

pub use error::{AutoinstallError, ErrorClass, Result};

/// Version information for the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

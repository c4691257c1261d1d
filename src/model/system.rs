// file: src/model/system.rs
// version: 1.0.0
// guid: 9d4b1e7a-2f6c-4a83-9e05-c1b7a3d5f829

//! Target system profile and the hypervisor controlling it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{NetworkInterface, SubnetAffiliation, Volume};
use crate::{AutoinstallError, Result};

/// Hypervisor family, used as the dispatch key for platform adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorKind {
    Hmc,
    Zvm,
    Kvm,
}

impl HypervisorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorKind::Hmc => "hmc",
            HypervisorKind::Zvm => "zvm",
            HypervisorKind::Kvm => "kvm",
        }
    }
}

/// How a console managed partition boots its live image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum BootOptions {
    Storage {
        device: String,
        #[serde(default)]
        wwpn: Option<String>,
        #[serde(default)]
        lun: Option<String>,
        #[serde(default)]
        uuid: Option<String>,
    },
    Network { uri: String },
}

/// Console credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmcCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "private-key", alias = "private_key")]
    pub private_key: Option<String>,
}

/// z/VM guest credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZvmCredentials {
    #[serde(default)]
    pub password: String,
    /// Logon-by user, forwarded to the control client as `byuser`
    #[serde(default)]
    pub logonby: Option<String>,
}

/// Credentials of a KVM host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Hypervisor specific connection data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HypervisorSpec {
    Hmc {
        hmc_address: String,
        credentials: HmcCredentials,
        #[serde(default)]
        boot_options: Option<BootOptions>,
        /// Partition name on the CPC, defaults to the system name
        #[serde(default)]
        partition_name: Option<String>,
    },
    Zvm {
        zvm_address: String,
        credentials: ZvmCredentials,
        #[serde(default)]
        connection_parameters: BTreeMap<String, String>,
    },
    Kvm {
        kvm_host: String,
        credentials: HostCredentials,
    },
}

/// The hypervisor directly controlling the target system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHypervisor {
    pub name: String,
    #[serde(flatten)]
    pub spec: HypervisorSpec,
}

impl SystemHypervisor {
    pub fn kind(&self) -> HypervisorKind {
        match self.spec {
            HypervisorSpec::Hmc { .. } => HypervisorKind::Hmc,
            HypervisorSpec::Zvm { .. } => HypervisorKind::Zvm,
            HypervisorSpec::Kvm { .. } => HypervisorKind::Kvm,
        }
    }

    /// Check the variant's required fields
    pub fn validate(&self) -> Result<()> {
        match &self.spec {
            HypervisorSpec::Hmc {
                hmc_address,
                credentials,
                boot_options,
                ..
            } => {
                if hmc_address.is_empty() {
                    return Err(AutoinstallError::value("No HMC address provided"));
                }
                if credentials.user.is_empty() || credentials.password.is_empty() {
                    return Err(AutoinstallError::value(
                        "No CPC credentials set. Please provide 'admin-user' and \
                         'admin-password' in hypervisor profile",
                    ));
                }
                if boot_options.is_none() {
                    return Err(AutoinstallError::value(
                        "No CPC boot method configured. Please set \
                         'liveimg-insfile-url' in CPC profile parameters or \
                         attach a volume with live image",
                    ));
                }
            }
            HypervisorSpec::Zvm { credentials, .. } => {
                if credentials.password.is_empty() {
                    return Err(AutoinstallError::value(
                        "An empty z/VM guest password is trying to be used. \
                         Please set the correct password.",
                    ));
                }
            }
            HypervisorSpec::Kvm {
                kvm_host,
                credentials,
            } => {
                if kvm_host.is_empty() {
                    return Err(AutoinstallError::value("No KVM host address provided"));
                }
                if credentials.user.is_empty() || credentials.password.is_empty() {
                    return Err(AutoinstallError::value(
                        "No KVM host credentials set. Please provide 'admin-user' \
                         and 'admin-password' in hypervisor profile",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// System type as seen by templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemType {
    #[serde(rename = "LPAR")]
    Lpar,
    #[serde(rename = "ZVM")]
    Zvm,
    #[serde(rename = "KVM")]
    Kvm,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Lpar => "LPAR",
            SystemType::Zvm => "ZVM",
            SystemType::Kvm => "KVM",
        }
    }
}

/// The system being installed, as configured by one of its profiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    pub system_name: String,
    pub profile_name: String,
    pub hypervisor: SystemHypervisor,
    pub hostname: String,
    pub cpus: u32,
    /// Memory in MiB
    pub memory: u64,
    pub volumes: Vec<Volume>,
    pub ifaces: Vec<NetworkInterface>,
    gateway: Option<usize>,
}

impl SystemProfile {
    pub fn new(
        system_name: impl Into<String>,
        profile_name: impl Into<String>,
        hypervisor: SystemHypervisor,
        hostname: impl Into<String>,
        cpus: u32,
        memory: u64,
    ) -> Self {
        Self {
            system_name: system_name.into(),
            profile_name: profile_name.into(),
            hypervisor,
            hostname: hostname.into(),
            cpus,
            memory,
            volumes: Vec::new(),
            ifaces: Vec::new(),
            gateway: None,
        }
    }

    pub fn add_volume(&mut self, volume: Volume) {
        self.volumes.push(volume);
    }

    /// Attach an interface; designating a gateway replaces any previous one
    pub fn add_network_interface(&mut self, iface: NetworkInterface, is_gateway: bool) {
        self.ifaces.push(iface);
        if is_gateway {
            self.gateway = Some(self.ifaces.len() - 1);
        }
    }

    pub fn gateway_interface(&self) -> Option<&NetworkInterface> {
        self.gateway.and_then(|idx| self.ifaces.get(idx))
    }

    pub fn is_gateway(&self, index: usize) -> bool {
        self.gateway == Some(index)
    }

    /// Subnets reachable through the gateway interface
    pub fn list_gateway_networks(&self) -> Vec<&SubnetAffiliation> {
        self.gateway_interface()
            .map(|iface| iface.gateway_subnets())
            .unwrap_or_default()
    }

    pub fn system_type(&self) -> SystemType {
        match self.hypervisor.kind() {
            HypervisorKind::Hmc => SystemType::Lpar,
            HypervisorKind::Zvm => SystemType::Zvm,
            HypervisorKind::Kvm => SystemType::Kvm,
        }
    }

    pub fn root_volume(&self) -> Option<&Volume> {
        self.volumes.iter().rev().find(|v| v.is_root())
    }

    /// Volume holding `/boot`, otherwise the one holding `/`
    pub fn boot_device(&self) -> Option<&Volume> {
        self.volumes
            .iter()
            .rev()
            .find(|v| v.has_mount_point("/boot"))
            .or_else(|| self.root_volume())
    }
}

// file: src/model/network.rs
// version: 1.0.0
// guid: 6b2e9f14-7c3a-4e8d-b159-0a4d8c6e2f97

//! Network interfaces and their subnet affiliations

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::{AutoinstallError, Result};

/// Address assignment of an interface within one subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetAffiliation {
    pub ip_address: IpAddr,
    /// Subnet in CIDR notation
    pub subnet: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub search_list: Option<String>,
}

impl SubnetAffiliation {
    /// Network prefix length of the subnet
    pub fn prefix_len(&self) -> Result<u8> {
        let (_, bits) = self.subnet.split_once('/').ok_or_else(|| {
            AutoinstallError::value(format!("Subnet {} is not in CIDR notation", self.subnet))
        })?;
        let bits: u8 = bits.parse().map_err(|_| {
            AutoinstallError::value(format!("Subnet {} has an invalid prefix", self.subnet))
        })?;
        let max = if self.ip_address.is_ipv4() { 32 } else { 128 };
        if bits > max {
            return Err(AutoinstallError::value(format!(
                "Subnet {} has an invalid prefix",
                self.subnet
            )));
        }
        Ok(bits)
    }

    /// Network address part of the subnet
    pub fn network_address(&self) -> &str {
        self.subnet
            .split_once('/')
            .map(|(addr, _)| addr)
            .unwrap_or(&self.subnet)
    }

    /// Dotted netmask for IPv4 subnets
    pub fn netmask(&self) -> Result<Option<String>> {
        if !self.ip_address.is_ipv4() {
            return Ok(None);
        }
        let bits = u32::from(self.prefix_len()?);
        let mask = if bits == 0 {
            0
        } else {
            u32::MAX << (32 - bits)
        };
        Ok(Some(Ipv4Addr::from(mask).to_string()))
    }

    /// At most two name servers, padded with empty entries
    pub fn dns_servers(&self) -> [String; 2] {
        let mut servers = [String::new(), String::new()];
        for (slot, server) in servers.iter_mut().zip(self.dns.iter()) {
            *slot = server.clone();
        }
        servers
    }

    pub fn has_gateway_route(&self) -> bool {
        self.gateway.as_deref().map(|g| !g.is_empty()).unwrap_or(false)
    }
}

/// Adapter family of a network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterfaceKind {
    Osa {
        ccwgroup: String,
        #[serde(default = "default_true")]
        layer2: bool,
        #[serde(default)]
        portno: Option<u8>,
        #[serde(default)]
        portname: Option<String>,
    },
    Hipersockets {
        ccwgroup: String,
        #[serde(default = "default_true")]
        layer2: bool,
    },
    /// Macvtap described by an authored libvirt definition
    MacvtapLibvirt { libvirt_definition: String },
    /// Macvtap on top of a host interface
    MacvtapHost { hostiface: String },
    Roce { fid: String },
}

fn default_true() -> bool {
    true
}

/// A network interface of the system being installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(flatten)]
    pub kind: InterfaceKind,
    /// Device name on the installed system
    pub os_device_name: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub subnets: Vec<SubnetAffiliation>,
}

impl NetworkInterface {
    pub fn new(kind: InterfaceKind, os_device_name: impl Into<String>) -> Self {
        Self {
            kind,
            os_device_name: os_device_name.into(),
            mac_address: None,
            subnets: Vec::new(),
        }
    }

    pub fn add_to_subnet(&mut self, subnet: SubnetAffiliation) {
        self.subnets.push(subnet);
    }

    /// Subnets carrying both an address and a gateway route
    pub fn gateway_subnets(&self) -> Vec<&SubnetAffiliation> {
        self.subnets
            .iter()
            .filter(|s| s.has_gateway_route())
            .collect()
    }

    /// Upper case type tag used in rendered templates
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            InterfaceKind::Osa { .. } => "OSA",
            InterfaceKind::Hipersockets { .. } => "HSI",
            InterfaceKind::MacvtapLibvirt { .. } | InterfaceKind::MacvtapHost { .. } => "MACVTAP",
            InterfaceKind::Roce { .. } => "ROCE",
        }
    }

    /// Channel devices of OSA and hipersockets cards
    pub fn ccw_devices(&self) -> Vec<&str> {
        match &self.kind {
            InterfaceKind::Osa { ccwgroup, .. } | InterfaceKind::Hipersockets { ccwgroup, .. } => {
                ccwgroup.split(',').map(str::trim).collect()
            }
            _ => Vec::new(),
        }
    }

    fn has_mac(&self) -> bool {
        self.mac_address.as_deref().map(|m| !m.is_empty()).unwrap_or(false)
    }

    /// Variant specific consistency checks
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            InterfaceKind::Osa { layer2, .. } | InterfaceKind::Hipersockets { layer2, .. } => {
                if !layer2 && self.has_mac() {
                    return Err(AutoinstallError::value(
                        "When layer2 is off no MAC address should be defined",
                    ));
                }
            }
            InterfaceKind::MacvtapLibvirt { .. }
            | InterfaceKind::MacvtapHost { .. }
            | InterfaceKind::Roce { .. } => {
                if !self.has_mac() {
                    return Err(AutoinstallError::value("A MAC address must be defined"));
                }
            }
        }
        Ok(())
    }
}

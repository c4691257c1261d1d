// file: src/platform/kvm.rs
// version: 1.0.1
// guid: 4e8b1a6d-2c9f-4f57-b3a0-7d5e9c2b8f14

//! Guests of a KVM host
//!
//! Every guest disk needs a libvirt definition. Definitions authored in the
//! inventory are parsed and their device numbers and target names reserved;
//! volumes without one get a generated virtio disk on the next free target
//! name and device number. Both the definition and the resulting device path
//! inside the guest are recorded on the volume.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::{netboot_urls, soft_shutdown, ControlClient, ControlCredentials, Platform, PlatformDeps};
use crate::model::{
    HypervisorKind, HypervisorSpec, InstallJob, NetworkInterface, OperatingSystem, Volume,
    VolumeKind,
};
use crate::network::{SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

/// Highest device number on the default subchannel set
const MAX_DEVNO: u32 = 0xffff;

const RHEL_ID: &str = "Red Hat Enterprise Linux";
const UBUNTU_ID: &str = "Ubuntu ";

/// How the guest names virtio disks under `/dev/disk/by-path`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevpathScheme {
    /// `virtio-pci-0.<ssid>.<devno>`
    VirtioPci,
    /// `ccw-0.<ssid>.<devno>`
    Ccw,
}

impl DevpathScheme {
    /// Scheme used by the operating system being installed
    pub fn for_os(os: &OperatingSystem) -> Self {
        let name = &os.pretty_name;
        if name.starts_with(UBUNTU_ID)
            || (name.starts_with(RHEL_ID) && os.major == 7 && os.minor == 4)
        {
            DevpathScheme::VirtioPci
        } else {
            DevpathScheme::Ccw
        }
    }

    pub fn devpath(self, ssid: &str, devno: &str) -> String {
        match self {
            DevpathScheme::VirtioPci => {
                format!("/dev/disk/by-path/virtio-pci-0.{}.{}", ssid, devno)
            }
            DevpathScheme::Ccw => format!("/dev/disk/by-path/ccw-0.{}.{}", ssid, devno),
        }
    }
}

/// Data extracted from an authored disk definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDisk {
    pub bus: String,
    pub dev: String,
    pub ssid: u32,
    pub devno: u32,
    pub devpath: String,
}

fn parse_hex(value: &str) -> Option<u32> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16).ok()
}

/// Parse and check an authored libvirt disk definition
pub fn parse_disk_definition(xml: &str, scheme: DevpathScheme) -> Result<ParsedDisk> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| {
        debug!("Libvirt xml parse failure: {}", e);
        AutoinstallError::value("Libvirt xml is invalid")
    })?;
    let root = doc.root_element();
    let child = |tag: &str| root.children().find(|n| n.has_tag_name(tag));

    let target = child("target");
    let (bus, dev) = match target.and_then(|t| Some((t.attribute("bus")?, t.attribute("dev")?))) {
        Some(found) => found,
        None => {
            return Err(AutoinstallError::value(
                "Libvirt xml has missing or invalid <target> tag",
            ))
        }
    };

    if bus != "virtio" {
        return Err(AutoinstallError::runtime(format!(
            "Unsupported bus type {}",
            bus
        )));
    }

    let address = child("address").and_then(|a| {
        Some((
            parse_hex(a.attribute("ssid")?)?,
            parse_hex(a.attribute("devno")?)?,
        ))
    });
    let (ssid, devno) = address.ok_or_else(|| {
        AutoinstallError::value("Libvirt xml has missing or invalid <address> tag")
    })?;

    Ok(ParsedDisk {
        bus: bus.to_string(),
        dev: dev.to_string(),
        ssid,
        devno,
        devpath: scheme.devpath(&format!("{:x}", ssid), &format!("{:04x}", devno)),
    })
}

/// Name of the n-th virtio target: vda..vdz, vdaa..vdzz, vdaaa..
fn target_name(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'a' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    let suffix: String = letters.into_iter().rev().collect();
    format!("vd{}", suffix)
}

/// Number of target names with up to three letters
const MAX_TARGET_NAMES: usize = 26 + 26 * 26 + 26 * 26 * 26;

/// Libvirt xml of a generated virtio block disk
fn disk_definition(host_path: &str, target_dev: &str, devno: u32, boot: bool) -> String {
    let boot_tag = if boot { r#"<boot order="1"/>"# } else { "" };
    format!(
        r#"<disk type="block" device="disk">
  <driver name="qemu" type="raw" cache="none"/>
  <source dev="{host_path}"/>
  <target dev="{target_dev}" bus="virtio"/>
  <address type="ccw" cssid="0xfe" ssid="0x0" devno="0x{devno:04x}"/>
  {boot_tag}
</disk>"#
    )
}

/// Assign definitions and guest device paths to all volumes
pub fn assign_disk_definitions(volumes: &mut [Volume], scheme: DevpathScheme) -> Result<()> {
    let mut used_devnos: HashSet<u32> = HashSet::new();
    let mut used_devs: HashSet<String> = HashSet::new();
    let mut generated = Vec::new();

    for (idx, volume) in volumes.iter_mut().enumerate() {
        // a runtime error rather than a value error: the volume passed
        // model validation and only this hypervisor cannot attach it
        if !matches!(volume.kind, VolumeKind::Dasd { .. } | VolumeKind::Zfcp { .. }) {
            return Err(AutoinstallError::runtime(format!(
                "Unknown volume type '{}'",
                volume.type_name()
            )));
        }
        let Some(definition) = volume.device_definition.clone() else {
            generated.push(idx);
            continue;
        };

        info!("Applying user-defined libvirt xml for volume {}", volume);
        let parsed = parse_disk_definition(&definition, scheme)?;
        if parsed.ssid == 0 && !used_devnos.insert(parsed.devno) {
            return Err(AutoinstallError::value(format!(
                "devno {:04x} is used by more than one device",
                parsed.devno
            )));
        }
        if !used_devs.insert(parsed.dev.clone()) {
            return Err(AutoinstallError::value(format!(
                "dev {} is used by more than one device",
                parsed.dev
            )));
        }
        volume.set_device_path(parsed.devpath);
    }

    let mut name_index = 0usize;
    let mut devno = 1u32;
    for idx in generated {
        let volume = &mut volumes[idx];
        info!("Volume {} has no libvirt xml, generating one", volume);

        let target_dev = loop {
            if name_index >= MAX_TARGET_NAMES {
                return Err(AutoinstallError::runtime("target device names exhausted"));
            }
            let candidate = target_name(name_index);
            name_index += 1;
            if !used_devs.contains(&candidate) {
                break candidate;
            }
        };
        while used_devnos.contains(&devno) {
            if devno == MAX_DEVNO {
                return Err(AutoinstallError::runtime("devno limit reached (0xffff)"));
            }
            devno += 1;
        }
        used_devs.insert(target_dev.clone());
        used_devnos.insert(devno);

        let definition = disk_definition(
            &volume.default_device_path(),
            &target_dev,
            devno,
            volume.is_root(),
        );
        debug!("Libvirt xml for volume {} is:\n{}", volume, definition);
        volume.set_device_definition(definition);
        volume.set_device_path(scheme.devpath("0", &format!("{:04x}", devno)));
    }
    Ok(())
}

fn jsonify_iface(iface: &NetworkInterface) -> Result<Value> {
    let mut attributes = serde_json::to_value(&iface.kind)?;
    if let Value::Object(map) = &mut attributes {
        map.remove("type");
    }
    Ok(json!({
        "attributes": attributes,
        "mac_address": iface.mac_address,
        "type": iface.type_name(),
    }))
}

fn jsonify_volume(volume: &Volume) -> Result<Value> {
    Ok(json!({
        "type": volume.type_name(),
        "volume_id": volume.id(),
        "system_attributes": {
            "libvirt": volume.device_definition,
            "device": volume.device_path(),
        },
        "specs": serde_json::to_value(&volume.kind)?,
    }))
}

pub struct KvmPlatform {
    job: InstallJob,
    client: Arc<dyn ControlClient>,
    ssh: Arc<dyn SshConnector>,
    reboot_settle: Duration,
    command_timeout: Duration,
}

impl KvmPlatform {
    /// Create the platform and record disk definitions on the job's volumes
    pub async fn new(job: &mut InstallJob, deps: &PlatformDeps) -> Result<Self> {
        let HypervisorSpec::Kvm {
            kvm_host,
            credentials,
        } = &job.system_profile.hypervisor.spec
        else {
            return Err(AutoinstallError::value(
                "KVM platform requires a KVM hypervisor",
            ));
        };
        let control = ControlCredentials {
            name: job.system_profile.hypervisor.name.clone(),
            address: kvm_host.clone(),
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            private_key: None,
            byuser: None,
        };

        let scheme = DevpathScheme::for_os(&job.operating_system);
        assign_disk_definitions(&mut job.system_profile.volumes, scheme)?;

        let client = deps.control.create(HypervisorKind::Kvm)?;
        client.login(&control).await?;

        Ok(Self {
            job: job.clone(),
            client,
            ssh: deps.ssh.clone(),
            reboot_settle: deps.config.timeouts.reboot_settle(),
            command_timeout: deps.config.timeouts.command(),
        })
    }
}

#[async_trait::async_trait]
impl Platform for KvmPlatform {
    fn kind(&self) -> HypervisorKind {
        HypervisorKind::Kvm
    }

    async fn boot(&self, kargs: &str) -> Result<()> {
        let profile = &self.job.system_profile;
        let volumes = profile
            .volumes
            .iter()
            .map(jsonify_volume)
            .collect::<Result<Vec<_>>>()?;
        let ifaces = profile
            .ifaces
            .iter()
            .map(jsonify_iface)
            .collect::<Result<Vec<_>>>()?;
        let (kernel_uri, initrd_uri) = netboot_urls(self.job.install_repo()?)?;

        let params = json!({
            "ifaces": ifaces,
            "storage_volumes": volumes,
            "parameters": {
                "boot_method": "network",
                "boot_options": {
                    "kernel_uri": kernel_uri,
                    "initrd_uri": initrd_uri,
                    "cmdline": kargs,
                },
            },
        });
        self.client
            .start(&profile.system_name, profile.cpus, profile.memory, &params, None)
            .await
    }

    async fn reboot(&self) -> Result<()> {
        info!("Rebooting the system now");
        soft_shutdown(
            self.ssh.as_ref(),
            &SshTarget::installer(&self.job),
            self.command_timeout,
        )
        .await?;
        tokio::time::sleep(self.reboot_settle).await;
        self.client
            .reboot(&self.job.system_profile.system_name, &Value::Null)
            .await
    }

    async fn set_boot_device(&self, device: &Volume) -> Result<()> {
        // the root disk carries the boot order in its definition
        debug!("Boot device {} is set through its libvirt definition", device);
        Ok(())
    }
}

// file: src/model/volume.rs
// version: 1.0.0
// guid: 3f8a6c2d-9b1e-4d57-8a04-7e2c5b9d1f63

//! Storage volumes and their partition tables

use serde::{Deserialize, Serialize};

/// One entry of a volume's partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Mount point, `None` for swap or raw partitions
    #[serde(default)]
    pub mount_point: Option<String>,
    /// Size in MiB
    pub size: u64,
    #[serde(default)]
    pub filesystem: String,
    /// `primary` or `logical` on msdos tables, empty otherwise
    #[serde(default)]
    pub part_type: String,
    #[serde(default)]
    pub mount_opts: Option<String>,
}

impl Partition {
    pub fn is_root(&self) -> bool {
        self.mount_point.as_deref() == Some("/")
    }
}

/// A single FCP path to a SCSI volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcpPath {
    pub adapter: String,
    pub wwpn: String,
}

/// Addressing scheme of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VolumeKind {
    /// Direct access storage device
    Dasd { device_id: String, size: u64 },
    /// Alias of a DASD, carries no capacity of its own
    Hpav { device_id: String },
    /// SCSI volume reachable over FCP, optionally multipathed
    #[serde(alias = "fcp")]
    Zfcp {
        lun: String,
        size: u64,
        #[serde(default)]
        multipath: bool,
        wwid: String,
        #[serde(default)]
        paths: Vec<FcpPath>,
    },
    Nvme {
        device_id: String,
        size: u64,
        wwn: String,
    },
}

/// A volume attached to the system being installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(flatten)]
    pub kind: VolumeKind,
    #[serde(default = "default_table_type")]
    pub partition_table_type: String,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    /// Device path on the installed system, derived when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_path: Option<String>,
    /// Hypervisor specific device descriptor (libvirt disk xml on KVM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_definition: Option<String>,
}

fn default_table_type() -> String {
    "gpt".to_string()
}

fn ccw_bus_id(device_id: &str) -> String {
    if device_id.contains('.') {
        device_id.to_string()
    } else {
        format!("0.0.{}", device_id)
    }
}

impl Volume {
    pub fn new(kind: VolumeKind) -> Self {
        Self {
            kind,
            partition_table_type: default_table_type(),
            partitions: Vec::new(),
            device_path: None,
            device_definition: None,
        }
    }

    /// Replace the partition table
    pub fn set_partitions(&mut self, table_type: &str, partitions: Vec<Partition>) {
        self.partition_table_type = table_type.to_string();
        self.partitions = partitions;
    }

    /// Identifier of the volume on its storage server
    pub fn id(&self) -> String {
        match &self.kind {
            VolumeKind::Dasd { device_id, .. }
            | VolumeKind::Hpav { device_id }
            | VolumeKind::Nvme { device_id, .. } => device_id.to_lowercase(),
            VolumeKind::Zfcp { lun, .. } => lun.to_lowercase(),
        }
    }

    /// Upper case type tag used in rendered templates
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            VolumeKind::Dasd { .. } => "DASD",
            VolumeKind::Hpav { .. } => "HPAV",
            VolumeKind::Zfcp { .. } => "FCP",
            VolumeKind::Nvme { .. } => "NVME",
        }
    }

    /// Declared capacity in MiB; aliases have none
    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            VolumeKind::Dasd { size, .. }
            | VolumeKind::Zfcp { size, .. }
            | VolumeKind::Nvme { size, .. } => Some(*size),
            VolumeKind::Hpav { .. } => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.partitions.iter().any(Partition::is_root)
    }

    pub fn has_mount_point(&self, mount_point: &str) -> bool {
        self.partitions
            .iter()
            .any(|p| p.mount_point.as_deref() == Some(mount_point))
    }

    pub fn is_multipath(&self) -> bool {
        matches!(self.kind, VolumeKind::Zfcp { multipath: true, .. })
    }

    /// World wide id of SCSI volumes, lower case
    pub fn wwid(&self) -> Option<String> {
        match &self.kind {
            VolumeKind::Zfcp { wwid, .. } => Some(wwid.to_lowercase()),
            _ => None,
        }
    }

    /// Volume UUID: the wwid without its udev type prefix, or the NVMe id
    pub fn uuid(&self) -> Option<String> {
        match &self.kind {
            VolumeKind::Zfcp { wwid, .. } => Some(wwid.to_lowercase().chars().skip(1).collect()),
            VolumeKind::Nvme { device_id, .. } => Some(device_id.to_lowercase()),
            _ => None,
        }
    }

    /// FCP paths of a SCSI volume
    pub fn fcp_paths(&self) -> &[FcpPath] {
        match &self.kind {
            VolumeKind::Zfcp { paths, .. } => paths,
            _ => &[],
        }
    }

    /// Add a single FCP path; no-op for non SCSI volumes
    pub fn add_path(&mut self, adapter: &str, wwpn: &str) {
        if let VolumeKind::Zfcp { paths, .. } = &mut self.kind {
            paths.push(FcpPath {
                adapter: adapter.to_lowercase(),
                wwpn: wwpn.to_lowercase(),
            });
        }
    }

    /// Connect every port to every adapter
    pub fn create_paths(&mut self, adapters: &[String], wwpns: &[String]) {
        for adapter in adapters {
            for wwpn in wwpns {
                self.add_path(adapter, wwpn);
            }
        }
    }

    /// Device path on the host, independent of any explicit override
    pub fn default_device_path(&self) -> String {
        match &self.kind {
            VolumeKind::Dasd { device_id, .. } | VolumeKind::Hpav { device_id } => {
                format!("/dev/disk/by-path/ccw-{}", ccw_bus_id(device_id))
            }
            VolumeKind::Zfcp {
                multipath, wwid, ..
            } => {
                if *multipath {
                    format!("/dev/disk/by-id/dm-uuid-mpath-{}", wwid.to_lowercase())
                } else {
                    format!("/dev/disk/by-id/scsi-{}", wwid.to_lowercase())
                }
            }
            VolumeKind::Nvme { wwn, .. } => {
                format!("/dev/disk/by-id/nvme-eui.{}", wwn.to_lowercase())
            }
        }
    }

    /// Device path on the installed system
    pub fn device_path(&self) -> String {
        self.device_path
            .clone()
            .unwrap_or_else(|| self.default_device_path())
    }

    pub fn set_device_path(&mut self, path: impl Into<String>) {
        self.device_path = Some(path.into());
    }

    pub fn set_device_definition(&mut self, definition: impl Into<String>) {
        self.device_definition = Some(definition.into());
    }

    /// Sum of partition sizes in MiB
    pub fn partitioned_size(&self) -> u64 {
        self.partitions.iter().map(|p| p.size).sum()
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            VolumeKind::Dasd { .. } => "DasdVolume",
            VolumeKind::Hpav { .. } => "HpavVolume",
            VolumeKind::Zfcp { .. } => "ZfcpVolume",
            VolumeKind::Nvme { .. } => "NvmeVolume",
        };
        write!(f, "{}<{}>", kind, self.id())
    }
}

// file: src/platform/zvm.rs
// version: 1.0.0
// guid: 9a2c7e4b-6f1d-4b83-a9e5-3d8f1c6b2e70

//! Guests of a z/VM hypervisor

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use super::{netboot_urls, soft_reboot, ControlClient, ControlCredentials, Platform, PlatformDeps};
use crate::model::{
    HypervisorKind, HypervisorSpec, InstallJob, InterfaceKind, NetworkInterface, Volume, VolumeKind,
};
use crate::network::{SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

pub struct ZvmPlatform {
    job: InstallJob,
    client: Arc<dyn ControlClient>,
    ssh: Arc<dyn SshConnector>,
    credentials: ControlCredentials,
}

impl ZvmPlatform {
    pub fn new(job: &InstallJob, deps: &PlatformDeps) -> Result<Self> {
        let HypervisorSpec::Zvm {
            zvm_address,
            credentials,
            connection_parameters,
        } = &job.system_profile.hypervisor.spec
        else {
            return Err(AutoinstallError::value(
                "z/VM platform requires a z/VM hypervisor",
            ));
        };

        if credentials.password.is_empty() {
            return Err(AutoinstallError::value(
                "zVM password not available in profile",
            ));
        }
        let byuser = credentials
            .logonby
            .clone()
            .or_else(|| connection_parameters.get("logonby").cloned())
            .filter(|u| !u.is_empty());

        let guest = job.system_profile.system_name.clone();
        Ok(Self {
            job: job.clone(),
            client: deps.control.create(HypervisorKind::Zvm)?,
            ssh: deps.ssh.clone(),
            credentials: ControlCredentials {
                name: job.system_profile.hypervisor.name.clone(),
                address: zvm_address.clone(),
                user: guest,
                password: credentials.password.clone(),
                private_key: None,
                byuser,
            },
        })
    }
}

/// Interface description in the shape the control client expects
pub(crate) fn jsonify_iface(iface: &NetworkInterface) -> Result<Value> {
    match &iface.kind {
        InterfaceKind::Osa { .. } => {
            let ids: Vec<&str> = iface
                .ccw_devices()
                .into_iter()
                .map(|ccw| ccw.rsplit('.').next().unwrap_or(ccw))
                .collect();
            Ok(json!({"id": ids.join(","), "type": "osa"}))
        }
        InterfaceKind::Roce { fid } => Ok(json!({"id": fid, "type": "pci"})),
        _ => Err(AutoinstallError::value(format!(
            "Unsupported network card type {}",
            iface.type_name()
        ))),
    }
}

/// Volume description in the shape the control client expects
///
/// SCSI paths are grouped by adapter, each adapter listing its ports.
pub(crate) fn jsonify_volume(volume: &Volume) -> Value {
    match &volume.kind {
        VolumeKind::Zfcp { lun, paths, .. } => {
            let mut adapters: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for path in paths {
                adapters
                    .entry(path.adapter.as_str())
                    .or_default()
                    .push(path.wwpn.as_str());
            }
            let adapters: Vec<Value> = adapters
                .into_iter()
                .map(|(devno, wwpns)| json!({"devno": devno, "wwpns": wwpns}))
                .collect();
            json!({"type": "fcp", "adapters": adapters, "lun": lun})
        }
        VolumeKind::Dasd { device_id, .. }
        | VolumeKind::Hpav { device_id }
        | VolumeKind::Nvme { device_id, .. } => {
            let kind = match volume.kind {
                VolumeKind::Nvme { .. } => "nvme",
                _ => "dasd",
            };
            let devno = device_id.rsplit('.').next().unwrap_or(device_id);
            json!({"type": kind, "devno": devno})
        }
    }
}

#[async_trait::async_trait]
impl Platform for ZvmPlatform {
    fn kind(&self) -> HypervisorKind {
        HypervisorKind::Zvm
    }

    async fn boot(&self, kargs: &str) -> Result<()> {
        let profile = &self.job.system_profile;
        let ifaces = profile
            .ifaces
            .iter()
            .map(jsonify_iface)
            .collect::<Result<Vec<_>>>()?;
        let volumes: Vec<Value> = profile.volumes.iter().map(jsonify_volume).collect();
        let (kernel_uri, initrd_uri) = netboot_urls(self.job.install_repo()?)?;

        let params = json!({
            "ifaces": ifaces,
            "storage_volumes": volumes,
            "boot_method": "network",
            "netboot": {
                "kernel_uri": kernel_uri,
                "initrd_uri": initrd_uri,
                "cmdline": kargs,
            },
        });

        self.client.login(&self.credentials).await?;
        let started = self
            .client
            .start(&profile.system_name, profile.cpus, profile.memory, &params, None)
            .await;
        let logged_off = self.client.logoff().await;
        started?;
        logged_off
    }

    async fn reboot(&self) -> Result<()> {
        soft_reboot(self.ssh.as_ref(), &SshTarget::installer(&self.job)).await
    }

    async fn set_boot_device(&self, device: &Volume) -> Result<()> {
        // z/VM guests IPL from the device named by the directory entry
        debug!("Boot device {} is managed by the guest directory", device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FcpPath;

    #[test]
    fn test_jsonify_fcp_groups_paths_by_adapter() {
        let vol = Volume::new(VolumeKind::Zfcp {
            lun: "40a0400000000000".to_string(),
            size: 20000,
            multipath: true,
            wwid: "36005076309ffd4350000000000002070".to_string(),
            paths: vec![
                FcpPath { adapter: "fa00".into(), wwpn: "5005076300c213e5".into() },
                FcpPath { adapter: "fc00".into(), wwpn: "5005076300c213e5".into() },
                FcpPath { adapter: "fa00".into(), wwpn: "5005076300c213e9".into() },
            ],
        });
        let json = jsonify_volume(&vol);
        assert_eq!(json["type"], "fcp");
        assert_eq!(json["lun"], "40a0400000000000");
        assert_eq!(
            json["adapters"],
            json!([
                {"devno": "fa00", "wwpns": ["5005076300c213e5", "5005076300c213e9"]},
                {"devno": "fc00", "wwpns": ["5005076300c213e5"]},
            ])
        );
    }

    #[test]
    fn test_jsonify_hpav_as_dasd() {
        let vol = Volume::new(VolumeKind::Hpav {
            device_id: "0.0.3957".to_string(),
        });
        assert_eq!(jsonify_volume(&vol), json!({"type": "dasd", "devno": "3957"}));
    }

    #[test]
    fn test_jsonify_ifaces() {
        let osa = NetworkInterface::new(
            InterfaceKind::Osa {
                ccwgroup: "0.0.f500,0.0.f501,0.0.f502".to_string(),
                layer2: true,
                portno: None,
                portname: None,
            },
            "encf500",
        );
        assert_eq!(
            jsonify_iface(&osa).unwrap(),
            json!({"id": "f500,f501,f502", "type": "osa"})
        );

        let hsi = NetworkInterface::new(
            InterfaceKind::Hipersockets {
                ccwgroup: "0.0.7000,0.0.7001,0.0.7002".to_string(),
                layer2: true,
            },
            "hsi0",
        );
        assert_eq!(
            jsonify_iface(&hsi).unwrap_err().to_string(),
            "Unsupported network card type HSI"
        );
    }
}

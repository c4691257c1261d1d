// file: src/platform/hmc.rs
// version: 1.1.0
// guid: 1f6d3b8e-4a7c-49e2-b5d1-8c0e2a9f4b37

//! Logical partitions managed by a hardware management console

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use super::{netboot_urls, soft_reboot, ControlClient, ControlCredentials, Platform, PlatformDeps};
use crate::config::EngineConfig;
use crate::model::{
    BootOptions, HypervisorKind, HypervisorSpec, InstallJob, InterfaceKind, Volume, VolumeKind,
};
use crate::network::{SshConnector, SshTarget};
use crate::{AutoinstallError, Result};

/// Length of the volume UUID at the end of a SCSI world wide id
const SCSI_UUID_LEN: usize = 32;

pub struct HmcPlatform {
    job: InstallJob,
    client: Arc<dyn ControlClient>,
    ssh: Arc<dyn SshConnector>,
    partition: String,
    boot_options: Option<BootOptions>,
    live_passwd: String,
    boot_poll: Duration,
}

impl HmcPlatform {
    pub async fn new(job: &InstallJob, deps: &PlatformDeps) -> Result<Self> {
        let HypervisorSpec::Hmc {
            hmc_address,
            credentials,
            boot_options,
            partition_name,
        } = &job.system_profile.hypervisor.spec
        else {
            return Err(AutoinstallError::value(
                "HMC platform requires an HMC hypervisor",
            ));
        };

        let live_passwd = live_image_password(&deps.config)?;

        let client = deps.control.create(HypervisorKind::Hmc)?;
        client
            .login(&ControlCredentials {
                name: job.system_profile.hypervisor.name.clone(),
                address: hmc_address.clone(),
                user: credentials.user.clone(),
                password: credentials.password.clone(),
                private_key: credentials.private_key.clone().filter(|k| !k.is_empty()),
                byuser: None,
            })
            .await?;

        Ok(Self {
            job: job.clone(),
            client,
            ssh: deps.ssh.clone(),
            partition: partition_name
                .clone()
                .unwrap_or_else(|| job.system_profile.system_name.clone()),
            boot_options: boot_options.clone(),
            live_passwd,
            boot_poll: deps.config.timeouts.boot_poll(),
        })
    }

    /// Live image network setup from the gateway interface
    fn network_parameters(&self) -> Result<Value> {
        let profile = &self.job.system_profile;
        let iface = profile
            .gateway_interface()
            .ok_or_else(|| AutoinstallError::value("No gateway interface present"))?;
        let subnet = iface.gateway_subnets().into_iter().next().ok_or_else(|| {
            AutoinstallError::value(format!(
                "Gateway interface {} has no IP address or gateway route",
                iface.os_device_name
            ))
        })?;

        let mut netsetup = Map::new();
        netsetup.insert("mac".into(), json!(iface.mac_address));
        netsetup.insert("ip".into(), json!(subnet.ip_address.to_string()));
        netsetup.insert("mask".into(), json!(subnet.prefix_len()?));
        netsetup.insert("gateway".into(), json!(subnet.gateway));
        netsetup.insert("password".into(), json!(self.live_passwd));
        if let Some(vlan) = subnet.vlan {
            netsetup.insert("vlan".into(), json!(vlan));
        }

        match &iface.kind {
            InterfaceKind::Osa {
                layer2,
                portno,
                portname,
                ..
            } => {
                let device = iface
                    .ccw_devices()
                    .first()
                    .and_then(|ccw| ccw.rsplit('.').next())
                    .unwrap_or_default()
                    .to_string();
                netsetup.insert("type".into(), json!("osa"));
                netsetup.insert("device".into(), json!(device));
                netsetup.insert(
                    "options".into(),
                    json!({"layer2": layer2, "portno": portno, "portname": portname}),
                );
            }
            InterfaceKind::Roce { fid } => {
                netsetup.insert("type".into(), json!("pci"));
                netsetup.insert("device".into(), json!(fid));
            }
            _ => {
                return Err(AutoinstallError::value(format!(
                    "Unsupported network card type {}",
                    iface.type_name()
                )))
            }
        }

        if !subnet.dns.is_empty() {
            netsetup.insert("dns".into(), json!(subnet.dns));
        }
        Ok(Value::Object(netsetup))
    }

    fn installation_parameters(&self, kargs: &str) -> Result<Value> {
        let (kernel_url, initrd_url) = netboot_urls(self.job.install_repo()?)?;
        Ok(json!({
            "kernel_url": kernel_url,
            "initrd_url": initrd_url,
            "cmdline": kargs,
        }))
    }
}

fn live_image_password(config: &EngineConfig) -> Result<String> {
    config
        .auto_install
        .live_img_passwd
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AutoinstallError::value("Live-image password missing in config file"))
}

/// Last 32 characters of a world wide id
pub(crate) fn scsi_uuid(wwid: &str) -> String {
    let wwid = wwid.to_lowercase();
    let skip = wwid.chars().count().saturating_sub(SCSI_UUID_LEN);
    wwid.chars().skip(skip).collect()
}

/// Control client parameters for the partition's configured boot options
pub(crate) fn boot_options_params(options: &BootOptions) -> Result<Map<String, Value>> {
    let params = match options {
        BootOptions::Storage {
            device,
            wwpn,
            lun: Some(lun),
            uuid,
        } => json!({
            "boot_method": "scsi",
            "devicenr": device,
            "wwpn": wwpn,
            "lun": lun,
            "uuid": uuid.as_deref().map(scsi_uuid),
        }),
        BootOptions::Storage { device, .. } => json!({
            "boot_method": "dasd",
            "devicenr": device,
        }),
        BootOptions::Network { uri } => {
            let parsed = Url::parse(uri).map_err(|e| {
                AutoinstallError::runtime(format!("Boot URL {} is invalid: {}", uri, e))
            })?;
            let insfile = uri
                .get(parsed.scheme().len() + "://".len()..)
                .unwrap_or_default();
            json!({
                "boot_method": parsed.scheme(),
                "insfile": insfile,
            })
        }
    };
    match params {
        Value::Object(map) => Ok(map),
        _ => Err(AutoinstallError::runtime("No boot parameters specified")),
    }
}

/// Control client parameters for booting from an installed volume
pub(crate) fn boot_device_params(device: &Volume) -> Result<Value> {
    match &device.kind {
        VolumeKind::Zfcp { lun, paths, .. } => {
            let path = paths.first().ok_or_else(|| {
                AutoinstallError::runtime(format!(
                    "Boot device {} has no paths available",
                    lun
                ))
            })?;
            Ok(json!({
                "boot_method": "scsi",
                "devicenr": path.adapter,
                "wwpn": path.wwpn,
                "lun": lun,
                "uuid": device.uuid(),
            }))
        }
        VolumeKind::Nvme { device_id, .. } => Ok(json!({
            "boot_method": "nvme",
            "devicenr": device_id,
        })),
        VolumeKind::Dasd { device_id, .. } | VolumeKind::Hpav { device_id } => Ok(json!({
            "boot_method": "dasd",
            "devicenr": device_id,
        })),
    }
}

#[async_trait::async_trait]
impl Platform for HmcPlatform {
    fn kind(&self) -> HypervisorKind {
        HypervisorKind::Hmc
    }

    async fn boot(&self, kargs: &str) -> Result<()> {
        let options = self
            .boot_options
            .as_ref()
            .ok_or_else(|| AutoinstallError::runtime("No boot parameters specified"))?;
        let mut boot_params = boot_options_params(options)?;
        boot_params.insert("netsetup".into(), self.network_parameters()?);
        boot_params.insert("netboot".into(), self.installation_parameters(kargs)?);
        let params = json!({ "boot_params": boot_params });

        let (tx, mut notified) = oneshot::channel();
        let client = self.client.clone();
        let partition = self.partition.clone();
        let (cpus, memory) = (self.job.system_profile.cpus, self.job.system_profile.memory);

        // the start call keeps streaming console output after the boot
        // notification, so it runs detached from the pipeline
        let mut worker = tokio::spawn(async move {
            let result = client
                .start(&partition, cpus, memory, &params, Some(tx))
                .await;
            if let Err(e) = &result {
                warn!("HMC start of {} ended with an error: {}", partition, e);
            }
            result
        });

        loop {
            match tokio::time::timeout(self.boot_poll, &mut notified).await {
                Ok(Ok(())) => {
                    debug!("Received initial boot complete notification");
                    return Ok(());
                }
                // sender dropped: the worker finished without notifying
                Ok(Err(_)) => {
                    return match (&mut worker).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => {
                            debug!("HMC worker exception: {}", e);
                            Err(AutoinstallError::runtime_with_source(
                                "Failed to start installation",
                                e,
                            ))
                        }
                        Err(join) => Err(AutoinstallError::runtime_with_source(
                            "Failed to start installation",
                            join,
                        )),
                    };
                }
                Err(_) => debug!("Waiting for boot notification of {}", self.partition),
            }
        }
    }

    async fn reboot(&self) -> Result<()> {
        soft_reboot(self.ssh.as_ref(), &SshTarget::installer(&self.job)).await
    }

    async fn set_boot_device(&self, device: &Volume) -> Result<()> {
        let params = boot_device_params(device)?;
        self.client.set_boot_device(&self.partition, &params).await
    }
}

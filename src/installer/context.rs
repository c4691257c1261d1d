// file: src/installer/context.rs
// version: 1.0.0
// guid: 4e7a1c9d-3b58-4f26-9d0e-8a2c6b1f5e73

//! Rendering context for autofile and cmdline templates
//!
//! Templates see the context under the `config` name. Installer families
//! start from [`collect_info`] and add their own keys on top.

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use sha_crypt::{sha512_simple, Sha512Params};
use tracing::warn;

use crate::model::{InstallJob, InterfaceKind, NetworkInterface, SubnetAffiliation, Volume, VolumeKind};
use crate::{AutoinstallError, Result};

/// Rendering context handed to templates as `config`
pub type RenderContext = Map<String, Value>;

/// Longest network device name the kernel accepts
pub const MAX_DEVICE_NAME_LEN: usize = 15;

const VNC_PASSWORD_LEN: usize = 8;

/// Build the base rendering context of a job
///
/// `autofile_url` is where the installer fetches its autofile from; its
/// host becomes `server_hostname`.
pub fn collect_info(job: &InstallJob, autofile_url: &str) -> Result<RenderContext> {
    let profile = &job.system_profile;

    let mut ifaces = Vec::with_capacity(profile.ifaces.len());
    let mut gw_iface = None;
    for (idx, iface) in profile.ifaces.iter().enumerate() {
        let is_gateway = profile.is_gateway(idx);
        let info = iface_info(iface, is_gateway)?;
        if is_gateway {
            gw_iface = Some(info.clone());
        }
        ifaces.push(info);
    }
    let gw_iface =
        gw_iface.ok_or_else(|| AutoinstallError::value("No gateway interface present"))?;

    let mut svols = Vec::with_capacity(profile.volumes.len());
    let mut has_root = false;
    for volume in &profile.volumes {
        if volume.is_root() {
            if has_root {
                return Err(AutoinstallError::value(
                    "Partitioning scheme has multiple root disks defined",
                ));
            }
            has_root = true;
        }
        svols.push(volume_info(volume));
    }
    if !has_root {
        return Err(AutoinstallError::value(
            "Partitioning scheme has no root disk defined",
        ));
    }

    let install_repo = job.install_repo()?;
    let mut repos = vec![repo_info(
        &install_repo.name,
        &install_repo.url,
        install_repo.description.as_deref(),
        true,
        install_repo.install_image.as_deref(),
    )];
    repos.extend(job.package_repos.iter().map(|repo| {
        repo_info(&repo.name, &repo.url, repo.description.as_deref(), false, None)
    }));

    let server_hostname = url::Url::parse(autofile_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));

    let os = &job.operating_system;
    let mut info = Map::new();
    info.insert("ifaces".into(), Value::Array(ifaces));
    info.insert("svols".into(), Value::Array(svols));
    info.insert("repos".into(), Value::Array(repos));
    info.insert("server_hostname".into(), json!(server_hostname));
    info.insert("system_type".into(), json!(profile.system_type().as_str()));
    info.insert("system_name".into(), json!(profile.system_name));
    info.insert("profile_name".into(), json!(profile.profile_name));
    info.insert(
        "credentials".into(),
        json!({
            "user": job.credentials.user,
            "password": job.credentials.password,
            "installation_password": job.credentials.installer_password(),
            "vncpasswd": vnc_password(),
        }),
    );
    info.insert("sha512rootpwd".into(), json!(sha512_crypt(&job.credentials.password)?));
    info.insert("hostname".into(), json!(profile.hostname));
    info.insert("autofile".into(), json!(autofile_url));
    info.insert("gw_iface".into(), gw_iface);
    info.insert(
        "operating_system".into(),
        json!({
            "name": os.name,
            "type": os.os_type,
            "major": os.major,
            "minor": os.minor,
            "pretty_name": os.pretty_name,
        }),
    );
    info.insert(
        "linux_kargs_target".into(),
        json!(job.target_cmdline.clone().unwrap_or_default()),
    );
    Ok(info)
}

/// Shorten a device name so that it fits the kernel limit
///
/// With a VLAN the suffix `.<vlan>` is kept and the base is shortened.
/// Returns the possibly shortened base name.
pub fn kernel_device_name(base: &str, vlan: Option<u16>) -> String {
    let suffix_len = vlan.map(|v| format!(".{}", v).len()).unwrap_or(0);
    let room = MAX_DEVICE_NAME_LEN.saturating_sub(suffix_len);
    if base.chars().count() <= room {
        return base.to_string();
    }
    let truncated: String = base.chars().take(room).collect();
    warn!(
        "Interface name {} is too long for the kernel, using {}",
        base, truncated
    );
    truncated
}

/// Random password for installer remote consoles
pub fn vnc_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VNC_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// SHA-512 crypt hash in `$6$` format
pub fn sha512_crypt(password: &str) -> Result<String> {
    sha512_simple(password, &Sha512Params::default())
        .map_err(|e| AutoinstallError::runtime(format!("Failed to hash password: {:?}", e)))
}

/// Add the installer's predictable name of OSA cards as `systemd_osname`
///
/// `naming` maps the first channel device of the card to the name.
pub fn add_systemd_osnames<F>(info: &mut RenderContext, naming: F)
where
    F: Fn(&str) -> String,
{
    if let Some(Value::Array(ifaces)) = info.get_mut("ifaces") {
        for iface in ifaces {
            set_systemd_osname(iface, &naming);
        }
    }
    if let Some(gateway) = info.get_mut("gw_iface") {
        set_systemd_osname(gateway, &naming);
    }
}

fn set_systemd_osname(iface: &mut Value, naming: &dyn Fn(&str) -> String) {
    if iface["type"] != "OSA" {
        return;
    }
    let name = iface["ccw"].get(0).and_then(Value::as_str).map(naming);
    if let Some(name) = name {
        iface["systemd_osname"] = json!(name);
    }
}

/// `enc` followed by the device number without leading zeros and dots
pub fn enc_device_name(ccw: &str) -> String {
    format!("enc{}", ccw.trim_start_matches(['.', '0']))
}

fn iface_attributes(kind: &InterfaceKind) -> Value {
    match kind {
        InterfaceKind::Osa {
            ccwgroup,
            layer2,
            portno,
            portname,
        } => json!({
            "ccwgroup": ccwgroup,
            "layer2": layer2,
            "portno": portno.map(|p| p.to_string()).unwrap_or_else(|| "0".to_string()),
            "portname": portname.clone().unwrap_or_else(|| "OSAPORT".to_string()),
        }),
        InterfaceKind::Hipersockets { ccwgroup, layer2 } => json!({
            "ccwgroup": ccwgroup,
            "layer2": layer2,
        }),
        InterfaceKind::MacvtapLibvirt { libvirt_definition } => json!({
            "libvirt": libvirt_definition,
        }),
        InterfaceKind::MacvtapHost { hostiface } => json!({
            "hostiface": hostiface,
        }),
        InterfaceKind::Roce { fid } => json!({ "fid": fid }),
    }
}

/// Subnet whose address is configured on the interface
fn primary_subnet(iface: &NetworkInterface, is_gateway: bool) -> Option<&SubnetAffiliation> {
    if is_gateway {
        if let Some(subnet) = iface.gateway_subnets().into_iter().next() {
            return Some(subnet);
        }
    }
    iface.subnets.first()
}

fn iface_info(iface: &NetworkInterface, is_gateway: bool) -> Result<Value> {
    let mut info = Map::new();
    info.insert("attributes".into(), iface_attributes(&iface.kind));
    info.insert("type".into(), json!(iface.type_name()));
    info.insert("mac_addr".into(), json!(iface.mac_address));
    info.insert("ccw".into(), json!(iface.ccw_devices()));

    let subnet = primary_subnet(iface, is_gateway);
    let vlan = subnet.and_then(|s| s.vlan);
    match subnet {
        Some(subnet) => {
            info.insert("ip".into(), json!(subnet.ip_address.to_string()));
            info.insert("subnet".into(), json!(subnet.network_address()));
            info.insert("mask_bits".into(), json!(subnet.prefix_len()?.to_string()));
            info.insert("mask".into(), json!(subnet.netmask()?));
            info.insert("vlan".into(), json!(subnet.vlan));
            info.insert("search_list".into(), json!(subnet.search_list));
        }
        None => {
            for key in ["ip", "subnet", "mask_bits", "mask", "vlan", "search_list"] {
                info.insert(key.into(), Value::Null);
            }
        }
    }

    let osname = kernel_device_name(&iface.os_device_name, vlan);
    let vlan_osname = vlan.map(|v| format!("{}.{}", osname, v));
    info.insert("osname".into(), json!(osname));
    info.insert("vlan_osname".into(), json!(vlan_osname));
    info.insert("is_gateway".into(), json!(is_gateway));

    if is_gateway {
        let subnet = subnet.ok_or_else(|| {
            AutoinstallError::value(format!(
                "Gateway interface {} has no IP address or gateway route",
                iface.os_device_name
            ))
        })?;
        let [dns_1, dns_2] = subnet.dns_servers();
        info.insert("gateway".into(), json!(subnet.gateway));
        info.insert("dns_1".into(), json!(dns_1));
        info.insert("dns_2".into(), json!(dns_2));
    }
    Ok(Value::Object(info))
}

fn volume_specs(volume: &Volume) -> Value {
    match &volume.kind {
        VolumeKind::Zfcp {
            lun,
            multipath,
            paths,
            ..
        } => {
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
            json!({
                "lun": lun.to_lowercase(),
                "multipath": multipath,
                "wwid": volume.wwid(),
                "uuid": volume.uuid(),
                "adapters": adapters,
            })
        }
        VolumeKind::Nvme { wwn, .. } => json!({
            "wwn": wwn.to_lowercase(),
            "uuid": volume.uuid(),
        }),
        VolumeKind::Dasd { .. } | VolumeKind::Hpav { .. } => json!({}),
    }
}

fn volume_info(volume: &Volume) -> Value {
    let table: Vec<Value> = volume
        .partitions
        .iter()
        .map(|p| {
            json!({
                "mp": p.mount_point,
                "size": p.size,
                "fs": p.filesystem,
                "type": p.part_type,
                "mo": p.mount_opts,
            })
        })
        .collect();

    json!({
        "type": volume.type_name(),
        "volume_id": volume.id(),
        "system_attributes": {
            "device": volume.device_path(),
            "libvirt": volume.device_definition,
        },
        "specs": volume_specs(volume),
        "size": volume.size(),
        "part_table": {
            "type": volume.partition_table_type,
            "table": table,
        },
        "is_root": volume.is_root(),
    })
}

fn repo_info(
    name: &str,
    url: &str,
    description: Option<&str>,
    os: bool,
    install_image: Option<&str>,
) -> Value {
    let name = name.replace(' ', "_");
    let desc = description
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| name.clone());
    json!({
        "url": url,
        "desc": desc,
        "name": name,
        "os": os,
        "install_image": install_image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn rhel_job() -> InstallJob {
        job(
            operating_system("rhel9.2", "redhat", 9, "Red Hat Enterprise Linux 9.2"),
            profile(kvm_hypervisor()),
        )
    }

    #[test]
    fn test_collect_info_shape() {
        let info = collect_info(&rhel_job(), "http://install.example.com/static/guest01-default")
            .unwrap();

        assert_eq!(info["server_hostname"], "install.example.com");
        assert_eq!(info["system_type"], "KVM");
        assert_eq!(info["hostname"], "guest01.example.com");
        assert_eq!(info["svols"][0]["is_root"], true);
        assert_eq!(
            info["svols"][0]["system_attributes"]["device"],
            "/dev/disk/by-path/ccw-0.0.3956"
        );
        assert_eq!(info["svols"][0]["part_table"]["table"][0]["mp"], "/");
        assert_eq!(info["repos"][0]["os"], true);
        assert_eq!(info["repos"][0]["desc"], "rhel9.2-repo");

        let gw = &info["gw_iface"];
        assert_eq!(gw["ip"], "10.1.2.3");
        assert_eq!(gw["mask"], "255.255.255.0");
        assert_eq!(gw["mask_bits"], "24");
        assert_eq!(gw["gateway"], "10.1.2.1");
        assert_eq!(gw["dns_1"], "10.1.2.254");
        assert_eq!(gw["dns_2"], "");
        assert_eq!(gw["attributes"]["portno"], "0");
        assert_eq!(gw["attributes"]["portname"], "OSAPORT");

        let vnc = info["credentials"]["vncpasswd"].as_str().unwrap();
        assert_eq!(vnc.len(), 8);
        assert!(vnc.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(info["sha512rootpwd"].as_str().unwrap().starts_with("$6$"));
    }

    #[test]
    fn test_root_disk_must_be_unique() {
        let mut job = rhel_job();
        job.system_profile.volumes.push(dasd(
            "3957",
            20000,
            vec![partition(Some("/"), 1000)],
        ));
        let err = collect_info(&job, "http://h/x").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Partitioning scheme has multiple root disks defined"
        );

        job.system_profile.volumes.clear();
        let err = collect_info(&job, "http://h/x").unwrap_err();
        assert_eq!(err.to_string(), "Partitioning scheme has no root disk defined");
    }

    #[test]
    fn test_vlan_device_name_is_shortened() {
        let base = "encf500abcdefgh";
        assert_eq!(base.len(), MAX_DEVICE_NAME_LEN);

        let short = kernel_device_name(base, Some(100));
        assert_eq!(short, "encf500abcd");
        assert!(format!("{}.100", short).len() <= MAX_DEVICE_NAME_LEN);

        assert_eq!(kernel_device_name(base, None), base);
        assert_eq!(kernel_device_name("encf500", Some(100)), "encf500");
    }

    #[test]
    fn test_gateway_vlan_osname_in_context() {
        let mut job = rhel_job();
        let gw = &mut job.system_profile.ifaces[0];
        gw.os_device_name = "encf500abcdefgh".to_string();
        gw.subnets[0].vlan = Some(100);

        let info = collect_info(&job, "http://h/x").unwrap();
        assert_eq!(info["gw_iface"]["osname"], "encf500abcd");
        assert_eq!(info["gw_iface"]["vlan_osname"], "encf500abcd.100");
    }
}

// file: src/installer/debian.rs
// version: 1.0.0
// guid: 8e4a2c7f-6b13-4d98-a5f0-9c3e1b7d2a64

//! debian-installer family
//!
//! Also home of the partition layout and apt source helpers shared with
//! subiquity.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::context::{add_systemd_osnames, enc_device_name, RenderContext};
use super::logtail::{wait_for_file, LogTail};
use super::{InstallerEnv, InstallerFamily, InstallerKind};
use crate::model::{SystemType, Volume};
use crate::{AutoinstallError, Result};

const SYSLOG_PATH: &str = "/var/log/syslog";
const FINISH_MARKER: &str = "Running /usr/lib/finish-install.d/20final-message";

/// Partition entry as rendered by debian family templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutEntry {
    pub mp: Option<String>,
    pub size: u64,
    pub fs: String,
    #[serde(rename = "type")]
    pub part_type: String,
    pub mo: Option<String>,
    /// Start offset in MiB
    pub start: u64,
    pub end: u64,
    pub parted_fs: String,
    pub device: String,
}

/// Filesystem name as parted knows it
pub fn parted_fs(fs: &str) -> &str {
    match fs {
        "ext2" | "ext3" | "ext4" => "ext2",
        "swap" => "linux-swap",
        other => other,
    }
}

/// Compute offsets and partition devices of a volume
///
/// On msdos tables primary partitions come first and an extended
/// partition spanning the remaining space precedes the first logical one;
/// logical partitions are numbered from 5.
pub fn partition_layout(volume: &Volume, system_type: SystemType) -> Vec<LayoutEntry> {
    let msdos = volume.partition_table_type == "msdos";
    let mut parts: Vec<LayoutEntry> = volume
        .partitions
        .iter()
        .map(|p| LayoutEntry {
            mp: p.mount_point.clone(),
            size: p.size,
            fs: p.filesystem.clone(),
            part_type: p.part_type.clone(),
            mo: p.mount_opts.clone(),
            start: 0,
            end: 0,
            parted_fs: String::new(),
            device: String::new(),
        })
        .collect();

    if msdos {
        parts.sort_by_key(|p| if p.part_type == "primary" { 0 } else { 1 });
        if let Some(first_logical) = parts.iter().position(|p| p.part_type == "logical") {
            let used: u64 = parts[..first_logical].iter().map(|p| p.size).sum();
            let total = volume.size().unwrap_or_else(|| volume.partitioned_size());
            parts.insert(
                first_logical,
                LayoutEntry {
                    mp: None,
                    size: total.saturating_sub(used),
                    fs: String::new(),
                    part_type: "extended".to_string(),
                    mo: None,
                    start: 0,
                    end: 0,
                    parted_fs: String::new(),
                    device: String::new(),
                },
            );
        }
    }

    let base = volume.device_path();
    let multipath_wwid = volume
        .wwid()
        .filter(|_| volume.is_multipath() && system_type != SystemType::Kvm);
    let mut offset = 1;
    let mut index = 1;
    for part in &mut parts {
        if !msdos {
            part.part_type.clear();
        }
        part.start = offset;
        part.end = offset + part.size;
        part.parted_fs = parted_fs(&part.fs).to_string();
        part.device = match &multipath_wwid {
            Some(wwid) => format!("/dev/disk/by-id/dm-uuid-part{}-mpath-{}", index, wwid),
            None => format!("{}-part{}", base, index),
        };
        if part.part_type == "extended" {
            offset += 1;
            index = 5;
        } else {
            offset += part.size;
            index += 1;
        }
    }
    parts
}

/// Replace partition tables of the context with computed layouts
///
/// The root volume is also exposed as `root_disk`.
pub fn apply_partition_layout(env: &mut InstallerEnv) -> Result<()> {
    let system_type = env.job.system_profile.system_type();
    let layouts: Vec<Vec<LayoutEntry>> = env
        .job
        .system_profile
        .volumes
        .iter()
        .map(|v| partition_layout(v, system_type))
        .collect();

    let info = env.info_mut()?;
    let mut root_disk = None;
    if let Some(Value::Array(svols)) = info.get_mut("svols") {
        for (svol, layout) in svols.iter_mut().zip(layouts) {
            svol["part_table"]["table"] = serde_json::to_value(layout)?;
            if svol["is_root"] == true {
                root_disk = Some(svol.clone());
            }
        }
    }
    if let Some(root) = root_disk {
        info.insert("root_disk".into(), root);
    }
    Ok(())
}

/// apt source line of a package repository URL
pub fn apt_url(url: &str) -> Result<String> {
    let (root, components) = url.split_once("/dists/").ok_or_else(|| {
        AutoinstallError::value(format!(
            "Repository URL <{}>  is in invalid format, no '/dists/' component found",
            url
        ))
    })?;
    Ok(format!("{} {}", root, components.replace('/', " "))
        .trim_end()
        .to_string())
}

fn decompose_repos(info: &mut RenderContext) -> Result<()> {
    let Some(Value::Array(repos)) = info.get_mut("repos") else {
        return Ok(());
    };
    for repo in repos {
        let url = repo["url"].as_str().unwrap_or_default().to_string();
        if let Ok(parsed) = url::Url::parse(&url) {
            repo["debian_protocol"] = json!(parsed.scheme());
            repo["debian_netloc"] = json!(parsed.authority());
            repo["debian_path"] = json!(parsed.path());
        }
        if repo["os"] == true {
            continue;
        }
        repo["apt_url"] = json!(apt_url(&url)?);
    }
    Ok(())
}

/// Legacy installer of Debian and Ubuntu
pub struct DebianInstaller {
    env: InstallerEnv,
}

impl DebianInstaller {
    pub fn new(env: InstallerEnv) -> Self {
        Self { env }
    }
}

#[async_trait::async_trait]
impl InstallerFamily for DebianInstaller {
    fn kind(&self) -> InstallerKind {
        InstallerKind::DebianInstaller
    }

    fn env(&self) -> &InstallerEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut InstallerEnv {
        &mut self.env
    }

    async fn collect_info(&mut self) -> Result<()> {
        self.env.collect_info()?;
        apply_partition_layout(&mut self.env)?;
        let info = self.env.info_mut()?;
        add_systemd_osnames(info, enc_device_name);
        decompose_repos(info)
    }

    async fn wait_install(&mut self) -> Result<()> {
        let env = &self.env;
        let mut shell = env.installer_shell().await?;
        let result = async {
            wait_for_file(
                shell.as_mut(),
                SYSLOG_PATH,
                env.config.timeouts.logfile(),
                env.poll_interval(),
                env.command_timeout(),
            )
            .await?;
            let mut tail = LogTail::file(SYSLOG_PATH, env.command_timeout());
            tail.follow(
                shell.as_mut(),
                env.install_deadline(),
                env.poll_interval(),
                |text| Ok(text.contains(FINISH_MARKER)),
            )
            .await
        }
        .await;
        shell.close().await;

        if !result? {
            return Err(AutoinstallError::timeout(
                "Installation Timeout: The installation process is taking too long",
            ));
        }
        info!("debian-installer finished");
        Ok(())
    }
}

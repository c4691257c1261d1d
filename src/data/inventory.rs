// file: src/data/inventory.rs
// version: 1.0.0
// guid: 4c9e2b7a-6f1d-4a58-b3e0-8d5a1c7f9e26

//! YAML file backed inventory
//!
//! The whole document is loaded once; write-backs rewrite the file in place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::InventoryStore;
use crate::model::{
    parse_repository_url, InstallJob, InstallOptions, NetworkInterface, OperatingSystem,
    OsRepository, PackageRepository, SystemHypervisor, SystemProfile, Template, Volume,
};
use crate::{AutoinstallError, Result};

/// On-disk inventory layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryDocument {
    #[serde(default)]
    pub systems: Vec<SystemEntry>,
    #[serde(default)]
    pub operating_systems: Vec<OperatingSystem>,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
    #[serde(default)]
    pub templates: Vec<Template>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEntry {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    /// Name of the system hosting this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<String>,
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    pub memory: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<SystemHypervisor>,
    #[serde(default)]
    pub credentials: InstallOptions,
    /// Operating system currently installed with this profile
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceEntry>,
}

fn default_cpus() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceEntry {
    #[serde(default)]
    pub gateway: bool,
    #[serde(flatten)]
    pub iface: NetworkInterface,
}

/// Registered repository; `installable_os` marks install sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub initrd: String,
    #[serde(default)]
    pub install_image: Option<String>,
    #[serde(default)]
    pub installable_os: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RepositoryEntry {
    fn as_os_repository(&self) -> Option<OsRepository> {
        self.installable_os.as_ref().map(|os| OsRepository {
            name: self.name.clone(),
            url: self.url.clone(),
            kernel: self.kernel.clone(),
            initrd: self.initrd.clone(),
            install_image: self.install_image.clone(),
            installable_os: os.clone(),
            description: self.description.clone(),
        })
    }

    fn as_package_repository(&self) -> PackageRepository {
        PackageRepository {
            name: self.name.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
        }
    }
}

impl InventoryDocument {
    fn system(&self, name: &str) -> Result<&SystemEntry> {
        self.systems
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AutoinstallError::value(format!("System {} not found", name)))
    }

    fn profile_index(&self, system: &str, profile: Option<&str>) -> Result<(usize, usize)> {
        let sys_idx = self
            .systems
            .iter()
            .position(|s| s.name == system)
            .ok_or_else(|| AutoinstallError::value(format!("System {} not found", system)))?;
        let profiles = &self.systems[sys_idx].profiles;
        let prof_idx = match profile {
            Some(name) => profiles
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| AutoinstallError::value(format!("Profile {} not found", name)))?,
            None => profiles.iter().position(|p| p.default).ok_or_else(|| {
                AutoinstallError::value(format!(
                    "Default profile for system {} not available",
                    system
                ))
            })?,
        };
        Ok((sys_idx, prof_idx))
    }

    fn profile(&self, system: &str, profile: Option<&str>) -> Result<(&SystemEntry, &ProfileEntry)> {
        let (s, p) = self.profile_index(system, profile)?;
        Ok((&self.systems[s], &self.systems[s].profiles[p]))
    }

    fn profile_mut(&mut self, system: &str, profile: &str) -> Result<&mut ProfileEntry> {
        let (s, p) = self.profile_index(system, Some(profile))?;
        Ok(&mut self.systems[s].profiles[p])
    }
}

/// Inventory stored in a single YAML file
pub struct FileInventory {
    path: PathBuf,
    document: Mutex<InventoryDocument>,
}

impl FileInventory {
    /// Load the inventory from `path`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AutoinstallError::config(format!(
                "Failed to read inventory {}: {}",
                path.display(),
                e
            ))
        })?;
        let document: InventoryDocument = serde_yaml::from_str(&content)?;
        debug!(
            "Loaded inventory {} with {} systems",
            path.display(),
            document.systems.len()
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Snapshot of the current document
    pub async fn document(&self) -> InventoryDocument {
        self.document.lock().await.clone()
    }

    async fn persist(&self, document: &InventoryDocument) -> Result<()> {
        let content = serde_yaml::to_string(document)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryStore for FileInventory {
    async fn get_system(&self, system: &str, profile: Option<&str>) -> Result<SystemProfile> {
        let doc = self.document.lock().await;
        let (sys, prof) = doc.profile(system, profile)?;

        let hypervisor = prof.hypervisor.clone().ok_or_else(|| {
            AutoinstallError::value(format!(
                "System {} cannot be installed because it has no hypervisor defined",
                sys.name
            ))
        })?;

        let mut result = SystemProfile::new(
            &sys.name,
            &prof.name,
            hypervisor,
            &sys.hostname,
            prof.cpus,
            prof.memory,
        );
        for volume in &prof.volumes {
            result.add_volume(volume.clone());
        }
        for entry in &prof.interfaces {
            result.add_network_interface(entry.iface.clone(), entry.gateway);
        }
        Ok(result)
    }

    async fn get_operating_system(
        &self,
        name: &str,
    ) -> Result<(OperatingSystem, Vec<OsRepository>)> {
        let doc = self.document.lock().await;
        let os = doc
            .operating_systems
            .iter()
            .find(|os| os.name == name)
            .cloned()
            .ok_or_else(|| AutoinstallError::value(format!("OS {} not found", name)))?;
        let repos = doc
            .repositories
            .iter()
            .filter_map(RepositoryEntry::as_os_repository)
            .filter(|r| r.installable_os == os.name)
            .collect();
        Ok((os, repos))
    }

    async fn get_custom_repositories(
        &self,
        entries: &[String],
    ) -> Result<(Vec<OsRepository>, Vec<PackageRepository>)> {
        let doc = self.document.lock().await;
        let mut os_repos = Vec::new();
        let mut package_repos = Vec::new();

        for entry in entries {
            if let Some(parsed) = parse_repository_url(entry) {
                package_repos.push(parsed?);
                continue;
            }
            let repo = doc
                .repositories
                .iter()
                .find(|r| &r.name == entry)
                .ok_or_else(|| {
                    AutoinstallError::value(format!("Repository {} not found", entry))
                })?;
            match repo.as_os_repository() {
                Some(os_repo) => os_repos.push(os_repo),
                None => package_repos.push(repo.as_package_repository()),
            }
        }
        Ok((os_repos, package_repos))
    }

    async fn get_template(&self, name: &str) -> Result<Template> {
        let doc = self.document.lock().await;
        doc.templates
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| AutoinstallError::value(format!("Template {} not found", name)))
    }

    async fn get_installer_template(&self, os: &OperatingSystem) -> Result<Option<Template>> {
        let doc = self.document.lock().await;
        let candidates = [
            format!("{}.cmdline", os.name),
            format!("{}.cmdline", os.os_type),
        ];
        Ok(candidates
            .iter()
            .find_map(|name| doc.templates.iter().find(|t| &t.name == name))
            .cloned())
    }

    async fn get_install_options(
        &self,
        system: &str,
        profile: Option<&str>,
    ) -> Result<InstallOptions> {
        let doc = self.document.lock().await;
        let (_, prof) = doc.profile(system, profile)?;
        Ok(prof.credentials.clone())
    }

    async fn get_hosting_chain(&self, system: &str) -> Result<Vec<String>> {
        let doc = self.document.lock().await;
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(system.to_string());

        let mut current = doc.system(system)?.hypervisor.clone();
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                return Err(AutoinstallError::value(format!(
                    "Hosting chain of system {} contains a cycle at {}",
                    system, name
                )));
            }
            current = doc
                .systems
                .iter()
                .find(|s| s.name == name)
                .and_then(|s| s.hypervisor.clone());
            chain.push(name);
        }
        Ok(chain)
    }

    async fn set_target_operating_system(&self, job: &InstallJob) -> Result<()> {
        let profile = &job.system_profile;
        let mut doc = self.document.lock().await;
        doc.profile_mut(&profile.system_name, &profile.profile_name)?
            .operating_system = Some(job.operating_system.name.clone());
        self.persist(&doc).await?;
        info!(
            "Profile {}/{} now has OS {}",
            profile.system_name, profile.profile_name, job.operating_system.name
        );
        Ok(())
    }

    async fn clear_target_operating_system(&self, job: &InstallJob) -> Result<()> {
        let profile = &job.system_profile;
        let mut doc = self.document.lock().await;
        doc.profile_mut(&profile.system_name, &profile.profile_name)?
            .operating_system = None;
        self.persist(&doc).await
    }

    async fn update_device_definitions(&self, job: &InstallJob) -> Result<usize> {
        let profile = &job.system_profile;
        let mut doc = self.document.lock().await;
        let entry = doc.profile_mut(&profile.system_name, &profile.profile_name)?;

        let mut updated = 0;
        for volume in &profile.volumes {
            let Some(definition) = &volume.device_definition else {
                continue;
            };
            if let Some(stored) = entry.volumes.iter_mut().find(|v| v.id() == volume.id()) {
                if stored.device_definition.as_ref() != Some(definition) {
                    stored.device_definition = Some(definition.clone());
                    updated += 1;
                }
            }
        }

        if updated > 0 {
            self.persist(&doc).await?;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INVENTORY: &str = r#"
systems:
  - name: cpc3
  - name: lpar3
    hostname: lpar3.example.com
    hypervisor: cpc3
    profiles:
      - name: kvm-host
        default: true
        memory: 8192
        hypervisor:
          name: cpc3
          type: hmc
          hmc_address: hmc.example.com
          credentials: {user: admin, password: pw}
  - name: guest01
    hostname: guest01.example.com
    hypervisor: lpar3
    profiles:
      - name: default
        default: true
        cpus: 2
        memory: 4096
        hypervisor:
          name: lpar3
          type: kvm
          kvm_host: lpar3.example.com
          credentials: {user: root, password: pw}
        credentials:
          user: root
          password: rootpw
        volumes:
          - type: dasd
            device_id: "3956"
            size: 20000
            partitions:
              - {mount_point: /, size: 10000, filesystem: ext4}
        interfaces:
          - type: macvtap_host
            hostiface: enc1000
            os_device_name: eth0
            mac_address: "52:54:00:aa:bb:cc"
            gateway: true
            subnets:
              - ip_address: 10.0.0.5
                subnet: 10.0.0.0/24
                gateway: 10.0.0.1
operating_systems:
  - name: rhel9.2
    type: redhat
    major: 9
    minor: 2
    pretty_name: Red Hat Enterprise Linux 9.2
    template_name: rhel-default
repositories:
  - name: rhel92
    url: http://repo.example.com/rhel92
    kernel: images/kernel.img
    initrd: images/initrd.img
    installable_os: rhel9.2
  - name: tools
    url: http://repo.example.com/tools
templates:
  - name: rhel-default
    content: "text"
"#;

    async fn inventory() -> (tempfile::NamedTempFile, FileInventory) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INVENTORY.as_bytes()).unwrap();
        let inv = FileInventory::load(file.path()).await.unwrap();
        (file, inv)
    }

    #[tokio::test]
    async fn test_get_system_default_profile() {
        let (_file, inv) = inventory().await;
        let profile = inv.get_system("guest01", None).await.unwrap();
        assert_eq!(profile.profile_name, "default");
        assert_eq!(profile.volumes.len(), 1);
        assert_eq!(
            profile.gateway_interface().map(|i| i.os_device_name.as_str()),
            Some("eth0")
        );

        let err = inv.get_system("guest01", Some("other")).await.unwrap_err();
        assert_eq!(err.to_string(), "Profile other not found");
        let err = inv.get_system("cpc3", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Default profile for system cpc3 not available");
    }

    #[tokio::test]
    async fn test_hosting_chain_bottom_up() {
        let (_file, inv) = inventory().await;
        let chain = inv.get_hosting_chain("guest01").await.unwrap();
        assert_eq!(chain, vec!["lpar3".to_string(), "cpc3".to_string()]);
    }

    #[tokio::test]
    async fn test_custom_repositories() {
        let (_file, inv) = inventory().await;
        let (os, pkgs) = inv
            .get_custom_repositories(&[
                "rhel92".to_string(),
                "tools".to_string(),
                "http://mirror.example.com/extra".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(os.len(), 1);
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[1].name, "mirror_example_com_extra");

        let err = inv
            .get_custom_repositories(&["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Repository missing not found");
    }

    #[tokio::test]
    async fn test_write_back_persists() {
        let (file, inv) = inventory().await;
        let (os, repos) = inv.get_operating_system("rhel9.2").await.unwrap();
        let mut profile = inv.get_system("guest01", None).await.unwrap();
        profile.volumes[0].set_device_definition("<disk/>");
        let job = InstallJob::new(
            os,
            repos,
            None,
            None,
            vec![],
            vec![],
            profile,
            InstallOptions::default(),
        );

        assert_eq!(inv.update_device_definitions(&job).await.unwrap(), 1);
        assert_eq!(inv.update_device_definitions(&job).await.unwrap(), 0);
        inv.set_target_operating_system(&job).await.unwrap();

        let reloaded = FileInventory::load(file.path()).await.unwrap();
        let doc = reloaded.document().await;
        let entry = &doc.systems[2].profiles[0];
        assert_eq!(entry.operating_system.as_deref(), Some("rhel9.2"));
        assert_eq!(entry.volumes[0].device_definition.as_deref(), Some("<disk/>"));

        reloaded.clear_target_operating_system(&job).await.unwrap();
        let doc = reloaded.document().await;
        assert_eq!(doc.systems[2].profiles[0].operating_system, None);
    }
}

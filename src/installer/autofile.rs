// file: src/installer/autofile.rs
// version: 1.0.0
// guid: 7d2f9a4c-1e86-4b35-a0c7-3e5b8f1d6a92

//! Served autofile location of a job

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::model::InstallJob;
use crate::{AutoinstallError, Result};

/// Where a job's autofile is written and served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Autofile {
    /// File name, `{system}-{profile}` without spaces
    pub name: String,
    /// URL the installer fetches the autofile from
    pub url: String,
    /// Path inside the served directory
    pub path: PathBuf,
    /// Copy kept in the job working directory
    pub work_copy: PathBuf,
}

impl Autofile {
    pub fn for_job(job: &InstallJob, config: &EngineConfig) -> Self {
        let profile = &job.system_profile;
        let name = format!("{}-{}", profile.system_name, profile.profile_name).replace(' ', "-");
        Self {
            url: format!("{}/{}", config.auto_install.url.trim_end_matches('/'), name),
            path: config.auto_install.dir.join(&name),
            work_copy: config.work_dir.join(&name),
            name,
        }
    }

    /// Write `content` to the served path and the working copy
    ///
    /// Leftovers of a previous attempt are removed first.
    pub async fn write(&self, content: &str) -> Result<()> {
        self.prepare().await?;
        fs::write(&self.path, content).await?;
        fs::write(&self.work_copy, content).await?;
        info!("Autofile written to {}", self.path.display());
        Ok(())
    }

    /// Publish the autofile as a directory of files
    ///
    /// The working copy receives the content of `primary` only.
    pub async fn write_directory(&self, files: &[(&str, &str)], primary: &str) -> Result<()> {
        self.prepare().await?;
        fs::create_dir_all(&self.path).await?;
        for (name, content) in files {
            fs::write(self.path.join(name), content).await?;
        }
        let work_content = files
            .iter()
            .find(|(name, _)| *name == primary)
            .map(|(_, content)| *content)
            .unwrap_or_default();
        fs::write(&self.work_copy, work_content).await?;
        info!("Autofile directory written to {}", self.path.display());
        Ok(())
    }

    /// Remove the served autofile if present
    pub async fn remove(&self) -> Result<()> {
        if fs::symlink_metadata(&self.path).await.is_err() {
            return Ok(());
        }
        remove_path(&self.path).await.map_err(|e| {
            AutoinstallError::runtime_with_source("Unable to delete the autofile during cleanup.", e)
        })?;
        debug!("Removed autofile {}", self.path.display());
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        for path in [&self.path, &self.work_copy] {
            if fs::symlink_metadata(path).await.is_ok() {
                debug!("Removing stale autofile {}", path.display());
                remove_path(path).await?;
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path).await?.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Autofile) {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.auto_install.url = "http://install.example.com/static/".to_string();
        config.auto_install.dir = tmp.path().join("static");
        config.work_dir = tmp.path().join("job");

        let mut profile = profile(kvm_hypervisor());
        profile.profile_name = "two words".to_string();
        let job = job(
            operating_system("rhel9.2", "redhat", 9, "Red Hat Enterprise Linux 9.2"),
            profile,
        );
        let autofile = Autofile::for_job(&job, &config);
        (tmp, autofile)
    }

    #[test]
    fn test_location() {
        let (tmp, autofile) = setup();
        assert_eq!(autofile.name, "guest01-two-words");
        assert_eq!(
            autofile.url,
            "http://install.example.com/static/guest01-two-words"
        );
        assert_eq!(autofile.path, tmp.path().join("static/guest01-two-words"));
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let (_tmp, autofile) = setup();

        autofile
            .write_directory(&[("user-data", "#cloud-config"), ("meta-data", "")], "user-data")
            .await
            .unwrap();
        assert!(autofile.path.is_dir());

        // a previous directory layout is replaced by a plain file
        autofile.write("second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&autofile.path).unwrap(), "second");
        assert_eq!(std::fs::read_to_string(&autofile.work_copy).unwrap(), "second");

        autofile.write("third").await.unwrap();
        assert_eq!(std::fs::read_to_string(&autofile.path).unwrap(), "third");
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let (_tmp, autofile) = setup();
        autofile.write("content").await.unwrap();

        autofile.remove().await.unwrap();
        assert!(!autofile.path.exists());
        autofile.remove().await.unwrap();
        // the working copy is kept for the job record
        assert!(autofile.work_copy.exists());
    }
}

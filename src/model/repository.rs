// file: src/model/repository.rs
// version: 1.0.0
// guid: c7e1a3f5-8b2d-4f60-9a17-5d3e9b0c2a84

//! Repositories and autofile templates

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AutoinstallError, Result};

/// URL schemes accepted for ad-hoc repositories
const REPO_URL_SCHEMES: &[&str] = &["http", "https", "ftp", "file"];

/// Named template content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub content: String,
}

/// Operating system to be installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystem {
    pub name: String,
    /// Distribution family: redhat, suse, debian, agama
    #[serde(rename = "type")]
    pub os_type: String,
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    pub pretty_name: String,
    /// Default autofile template
    #[serde(default)]
    pub template_name: Option<String>,
}

/// Repository able to install an operating system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRepository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub initrd: String,
    #[serde(default)]
    pub install_image: Option<String>,
    /// Name of the operating system this repository installs
    pub installable_os: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl OsRepository {
    /// Absolute URL of a file below the repository root
    pub fn file_url(&self, path: &str) -> Result<String> {
        let base = Url::parse(&format!("{}/", self.url.trim_end_matches('/'))).map_err(|e| {
            AutoinstallError::value(format!("Repository URL {} is invalid: {}", self.url, e))
        })?;
        let joined = base.join(path.trim_matches('/')).map_err(|e| {
            AutoinstallError::value(format!(
                "Cannot build URL for {} in repository {}: {}",
                path, self.name, e
            ))
        })?;
        Ok(joined.to_string())
    }

    pub fn kernel_url(&self) -> Result<String> {
        self.file_url(&self.kernel)
    }

    pub fn initrd_url(&self) -> Result<String> {
        self.file_url(&self.initrd)
    }
}

/// Auxiliary package repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRepository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Interpret a user supplied entry as an ad-hoc repository URL
///
/// Returns `None` for plain names that need a registry lookup.
pub fn parse_repository_url(entry: &str) -> Option<Result<PackageRepository>> {
    if !entry.contains("://") {
        return None;
    }
    let parsed = match Url::parse(entry) {
        Ok(url) => url,
        Err(e) => {
            return Some(Err(AutoinstallError::value(format!(
                "Repository URL {} is invalid: {}",
                entry, e
            ))))
        }
    };
    let has_host = parsed.scheme() == "file" || parsed.host_str().is_some();
    if !REPO_URL_SCHEMES.contains(&parsed.scheme()) || !has_host {
        return Some(Err(AutoinstallError::value(format!(
            "Repository URL {} is invalid: unsupported scheme or missing host",
            entry
        ))));
    }

    let raw_name = format!("{}{}", parsed.host_str().unwrap_or(""), parsed.path());
    let name: String = raw_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    Some(Ok(PackageRepository {
        name,
        url: entry.to_string(),
        description: Some("User defined repository".to_string()),
    }))
}

/// Split repositories into those installing `os_name` and everything else
pub fn spread_repos_by_os(
    os_name: &str,
    repos: Vec<OsRepository>,
) -> (Vec<OsRepository>, Vec<PackageRepository>) {
    let mut this_os = Vec::new();
    let mut others = Vec::new();
    for repo in repos {
        if repo.installable_os == os_name {
            this_os.push(repo);
        } else {
            others.push(PackageRepository {
                name: repo.name,
                url: repo.url,
                description: repo.description,
            });
        }
    }
    (this_os, others)
}

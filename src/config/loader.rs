// file: src/config/loader.rs
// version: 2.0.0
// guid: 2e7b9d41-0c5a-4b1f-8e3d-6a4f7c9b2e10

//! Configuration file loading and environment variable substitution

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;

use super::EngineConfig;
use crate::{AutoinstallError, Result};

/// File name looked up in the user configuration directory
pub const DEFAULT_CONFIG_FILE: &str = "autoinstall-engine/config.yaml";

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a new config loader seeded from the process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Default location of the engine configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Load the engine configuration, YAML or TOML by extension
    pub fn load_engine_config<P: AsRef<Path>>(&self, path: P) -> Result<EngineConfig> {
        let config: EngineConfig = self.load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from `path`, or the default location when it
    /// exists, or fall back to built-in defaults
    pub fn load_or_default(&self, path: Option<&Path>) -> Result<EngineConfig> {
        if let Some(path) = path {
            return self.load_engine_config(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => self.load_engine_config(path),
            _ => Ok(EngineConfig::default()),
        }
    }

    /// Read, expand and deserialize any structured file
    pub fn load_file<T, P>(&self, path: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AutoinstallError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let expanded = self.expand_env_vars(&content)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            toml::from_str(&expanded).map_err(|e| {
                AutoinstallError::config(format!("Invalid TOML in {}: {}", path.display(), e))
            })
        } else {
            Ok(serde_yaml::from_str(&expanded)?)
        }
    }

    /// Expand `${VAR}` references in configuration content
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| AutoinstallError::config(format!("Invalid regex pattern: {}", e)))?;

        let mut missing_vars = Vec::new();
        let result = re.replace_all(content, |caps: &regex::Captures<'_>| {
            match self.env_vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing_vars.push(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });

        if !missing_vars.is_empty() {
            missing_vars.dedup();
            return Err(AutoinstallError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(result.into_owned())
    }

    /// Set environment variable for substitution
    pub fn set_env_var(&mut self, key: String, value: String) {
        self.env_vars.insert(key, value);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::{Path, PathBuf}, time::Duration};

use crate::app::staging::DEFAULT_EXCLUDES;
use crate::app::watch::DEFAULT_POLL_INTERVAL;
use crate::hosts::HostEntry;

const APP_DIR_NAME: &str = "memo";
const CONFIG_FILE_NAME: &str = "memo.toml";

const DEFAULT_ARCHIVE_USER: &str = "qbilius";
const DEFAULT_ARCHIVE_HOST: &str = "braintree.mit.edu";
const DEFAULT_ARCHIVE_ENV_VAR: &str = "MEMO";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    archive_user: Option<String>,
    archive_host: Option<String>,
    archive_env_var: Option<String>,
    poll_interval_secs: Option<u64>,
    excludes: Option<Vec<String>>,
    #[serde(default)]
    ip_map: BTreeMap<String, HostEntry>,
}

#[derive(Debug)]
pub struct Config {
    pub archive_user: String,
    pub archive_host: String,
    /// Login-profile variable on the archive host naming the storage root.
    pub archive_env_var: String,
    pub poll_interval: Duration,
    pub excludes: Vec<String>,
    /// Extra IP-to-host entries consulted before the built-in table.
    pub ip_map: BTreeMap<String, HostEntry>,
    pub config_path: Option<PathBuf>,
}

pub fn load(config_path_override: Option<PathBuf>) -> Result<Config> {
    let required = config_path_override.is_some();
    let config_path = match config_path_override {
        Some(path) => Some(expand_path(path)),
        None => default_config_path().ok(),
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };

    Ok(Config {
        archive_user: file_config
            .archive_user
            .unwrap_or_else(|| DEFAULT_ARCHIVE_USER.to_string()),
        archive_host: file_config
            .archive_host
            .unwrap_or_else(|| DEFAULT_ARCHIVE_HOST.to_string()),
        archive_env_var: file_config
            .archive_env_var
            .unwrap_or_else(|| DEFAULT_ARCHIVE_ENV_VAR.to_string()),
        poll_interval: file_config
            .poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL),
        excludes: file_config
            .excludes
            .unwrap_or_else(|| DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()),
        ip_map: file_config.ip_map,
        config_path,
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let cfg = read_config_file(&config_path, false).unwrap();
        assert!(cfg.archive_user.is_none());
        assert!(cfg.ip_map.is_empty());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let err = read_config_file(&config_path, true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn defaults_apply_when_fields_are_absent() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "archive_user = \"alice\"\n").unwrap();

        let config = load(Some(config_path.clone())).unwrap();
        assert_eq!(config.archive_user, "alice");
        assert_eq!(config.archive_host, DEFAULT_ARCHIVE_HOST);
        assert_eq!(config.archive_env_var, DEFAULT_ARCHIVE_ENV_VAR);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(
            config.excludes,
            vec![".git".to_string(), "target".to_string(), "__pycache__".to_string()]
        );
        assert_eq!(config.config_path, Some(config_path));
    }

    #[test]
    fn ip_map_entries_parse_into_host_entries() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            concat!(
                "poll_interval_secs = 30\n",
                "excludes = [\"data\", \"*.ckpt\"]\n",
                "[ip_map.\"18.93.12.99\"]\n",
                "host = \"lab-box.mit.edu\"\n",
                "cluster = \"braintree\"\n",
            ),
        )
        .unwrap();

        let config = load(Some(config_path)).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.excludes, vec!["data".to_string(), "*.ckpt".to_string()]);
        let entry = config.ip_map.get("18.93.12.99").unwrap();
        assert_eq!(entry.host, "lab-box.mit.edu");
        assert_eq!(entry.cluster, "braintree");
    }
}

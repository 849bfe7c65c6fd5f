//! OtaDeploy Configuration Module
//! Loads and validates ota.config.json once at startup

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "ota.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Missing or invalid config fields: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Config as written on disk; every field optional so that all problems can be
/// reported at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub storage: RawStorageConfig,
    pub database: RawDatabaseConfig,
    pub signing: RawSigningConfig,
    pub build: RawBuildConfig,
    pub distribution: RawDistributionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStorageConfig {
    pub root: Option<PathBuf>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSigningConfig {
    pub private_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBuildConfig {
    pub project_dir: Option<PathBuf>,
    pub command: Option<Vec<String>>,
    pub artifact: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDistributionConfig {
    pub base_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Validated configuration. Relative paths are resolved against the directory
/// holding the config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub database_path: PathBuf,
    pub private_key: PathBuf,
    pub build: BuildConfig,
    pub distribution: DistributionConfig,
    pub notify: Option<NotifyConfig>,
    pub deployed_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_dir: PathBuf,
    pub command: Vec<String>,
    pub artifact: PathBuf,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub base_url: String,
    pub host: String,
    pub port: u16,
}

fn default_build_command() -> Vec<String> {
    vec!["pio".to_string(), "run".to_string()]
}

fn default_artifact() -> PathBuf {
    PathBuf::from(".pio/build/esp32dev/firmware.bin")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl RawConfig {
    /// Validate into a [`Config`], collecting every offending field
    pub fn validate(self, base_dir: &Path) -> Result<Config, ConfigError> {
        let mut invalid = Vec::new();
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base_dir.join(p) };

        let mut require_path = |value: Option<PathBuf>, field: &str| -> PathBuf {
            match value {
                Some(p) if !p.as_os_str().is_empty() => resolve(p),
                _ => {
                    invalid.push(field.to_string());
                    PathBuf::new()
                }
            }
        };

        let storage_root = require_path(self.storage.root, "storage.root");
        let database_path = require_path(self.database.path, "database.path");
        let private_key = require_path(self.signing.private_key, "signing.private_key");

        let mut require_url = |value: Option<String>, field: &str| -> String {
            match value {
                Some(url) if is_http_url(&url) => url.trim_end_matches('/').to_string(),
                _ => {
                    invalid.push(field.to_string());
                    String::new()
                }
            }
        };

        let public_base_url = require_url(self.storage.public_base_url, "storage.public_base_url");
        let base_url = require_url(self.distribution.base_url, "distribution.base_url");

        let command = self.build.command.unwrap_or_else(default_build_command);
        if command.is_empty() || command[0].trim().is_empty() {
            invalid.push("build.command".to_string());
        }

        if let Some(notify) = &self.notify {
            if !is_http_url(&notify.webhook_url) {
                invalid.push("notify.webhook_url".to_string());
            }
        }

        if !invalid.is_empty() {
            return Err(ConfigError::Invalid(invalid));
        }

        let project_dir = resolve(self.build.project_dir.unwrap_or_else(|| PathBuf::from(".")));
        let work_dir = resolve(self.build.work_dir.unwrap_or_else(|| PathBuf::from("firmware")));

        Ok(Config {
            storage: StorageConfig {
                root: storage_root,
                public_base_url,
            },
            database_path,
            private_key,
            build: BuildConfig {
                project_dir,
                command,
                artifact: self.build.artifact.unwrap_or_else(default_artifact),
                work_dir,
            },
            distribution: DistributionConfig {
                base_url,
                host: self.distribution.host.unwrap_or_else(default_host),
                port: self.distribution.port.unwrap_or_else(default_port),
            },
            notify: self.notify,
            deployed_by: self.deployed_by,
        })
    }
}

impl Config {
    /// Load and validate a config file
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let raw: RawConfig = serde_json::from_str(&content)?;
        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        raw.validate(base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn full_config() -> serde_json::Value {
        json!({
            "storage": { "root": "blobs", "public_base_url": "https://cdn.example.com/ota/" },
            "database": { "path": "data/releases.db" },
            "signing": { "private_key": "/keys/private.pem" },
            "build": { "project_dir": "esp32_project" },
            "distribution": { "base_url": "https://ota.example.com" },
            "notify": { "webhook_url": "https://hooks.example.com/ota", "topic": "devices/ota" }
        })
    }

    #[test]
    fn test_load_valid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, full_config().to_string()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.root, dir.path().join("blobs"));
        assert_eq!(config.storage.public_base_url, "https://cdn.example.com/ota");
        assert_eq!(config.private_key, PathBuf::from("/keys/private.pem"));
        assert_eq!(config.build.command, vec!["pio", "run"]);
        assert_eq!(config.build.project_dir, dir.path().join("esp32_project"));
        assert_eq!(config.build.work_dir, dir.path().join("firmware"));
        assert_eq!(config.distribution.port, 8787);
        assert_eq!(config.notify.unwrap().topic.as_deref(), Some("devices/ota"));
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let raw: RawConfig = serde_json::from_value(json!({
            "storage": { "root": "blobs" },
            "distribution": { "base_url": "ftp://nope" }
        }))
        .unwrap();

        let err = raw.validate(Path::new("/srv/ota")).unwrap_err();
        match err {
            ConfigError::Invalid(fields) => assert_eq!(
                fields,
                vec![
                    "database.path",
                    "signing.private_key",
                    "storage.public_base_url",
                    "distribution.base_url",
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_build_command_is_invalid() {
        let mut value = full_config();
        value["build"]["command"] = json!([]);
        let raw: RawConfig = serde_json::from_value(value).unwrap();

        assert!(matches!(
            raw.validate(Path::new(".")),
            Err(ConfigError::Invalid(fields)) if fields == vec!["build.command"]
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manifest::LockSettings;
use crate::resolver::MediaPaths;

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
    pub db_path: String,
    pub static_root: String,
    pub upload_folder: String,
    /// Base for song paths stored as relative paths. Empty means the config directory.
    pub working_dir: String,
    pub max_upload_bytes: usize,
    pub admin_token: String,
    pub manifest_lock_timeout_ms: u64,
    pub manifest_lock_retry_ms: u64,
    /// Locks older than this are treated as orphaned. Zero disables the check.
    pub manifest_lock_stale_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            port: DEFAULT_PORT,
            bind_addr: None,
            db_path: "songs.redb".to_string(),
            static_root: "static".to_string(),
            upload_folder: "static/songs".to_string(),
            working_dir: "".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            admin_token: "".to_string(),
            manifest_lock_timeout_ms: 5000,
            manifest_lock_retry_ms: 25,
            manifest_lock_stale_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        match self.bind_addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ => format!("0.0.0.0:{}", self.port),
        }
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(self.manifest_lock_timeout_ms),
            retry: Duration::from_millis(self.manifest_lock_retry_ms.max(1)),
            stale_after: if self.manifest_lock_stale_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(self.manifest_lock_stale_secs))
            },
        }
    }

    pub fn media_paths(&self, config_path: &Path) -> MediaPaths {
        let working_dir = if self.working_dir.trim().is_empty() {
            config_dir(config_path).to_path_buf()
        } else {
            resolve_path(config_path, self.working_dir.trim())
        };
        MediaPaths {
            working_dir,
            static_root: resolve_path(config_path, &self.static_root),
            upload_folder: resolve_path(config_path, &self.upload_folder),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MOODSTREAM_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.port == 0 {
            config.port = DEFAULT_PORT;
        }
        if config.db_path.trim().is_empty() {
            config.db_path = "songs.redb".to_string();
        }
        if config.static_root.trim().is_empty() {
            config.static_root = "static".to_string();
        }
        if config.upload_folder.trim().is_empty() {
            config.upload_folder = "static/songs".to_string();
        }
        if config.max_upload_bytes == 0 {
            config.max_upload_bytes = DEFAULT_MAX_UPLOAD_BYTES;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    config_dir(config_path).join(raw)
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "EXTSYNC_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the persisted extension list (empty = per-user default)
    pub settings_dir: PathBuf,

    /// Directory for the log file
    pub log_dir: PathBuf,

    /// Write logs to `log_dir` in addition to the console
    pub logging_enabled: bool,

    /// Replace installed extensions when the gallery offers a newer version
    pub auto_update_extensions: bool,

    /// Directory the host keeps installed extensions in
    pub extensions_dir: PathBuf,

    /// Scratch directory for downloaded packages
    pub download_dir: PathBuf,

    /// Remote extension gallery endpoint URL
    pub gallery_url: String,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Seconds after which a batch detaches its subscriptions regardless of
    /// outstanding installs
    pub drain_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Path of the configuration file (`EXTSYNC_CONFIG`, default `config.toml`)
    pub fn path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when absent
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply `EXTSYNC_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("EXTSYNC_SETTINGS_DIR") {
            self.settings_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("EXTSYNC_LOG_DIR") {
            self.log_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("EXTSYNC_LOGGING_ENABLED") {
            self.logging_enabled = parse_flag("EXTSYNC_LOGGING_ENABLED", &val)?;
        }
        if let Some(val) = lookup("EXTSYNC_AUTO_UPDATE_EXTENSIONS") {
            self.auto_update_extensions = parse_flag("EXTSYNC_AUTO_UPDATE_EXTENSIONS", &val)?;
        }
        if let Some(val) = lookup("EXTSYNC_EXTENSIONS_DIR") {
            self.extensions_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("EXTSYNC_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("EXTSYNC_GALLERY_URL") {
            self.gallery_url = val;
        }
        if let Some(val) = lookup("EXTSYNC_LOCAL_API_BIND") {
            self.local_api_bind = SocketAddr::from_str(&val)
                .with_context(|| format!("Invalid EXTSYNC_LOCAL_API_BIND: {}", val))?;
        }
        if let Some(val) = lookup("EXTSYNC_DRAIN_TIMEOUT_SECS") {
            self.drain_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid EXTSYNC_DRAIN_TIMEOUT_SECS: {}", val))?;
        }
        if let Some(val) = lookup("EXTSYNC_LOG_LEVEL") {
            self.log_level = val;
        }

        Ok(())
    }

    /// Write the configuration back to `path` as TOML
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Log directory when file logging is enabled
    pub fn file_log_dir(&self) -> Option<&Path> {
        self.logging_enabled.then_some(self.log_dir.as_path())
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("Invalid boolean for {}: {}", key, other)),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_dir: PathBuf::new(),
            log_dir: PathBuf::from("logs"),
            logging_enabled: false,
            auto_update_extensions: true,
            extensions_dir: PathBuf::from("extensions"),
            download_dir: std::env::temp_dir().join("extension-sync-downloads"),
            gallery_url: String::from("http://localhost:3000"),
            local_api_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            drain_timeout_secs: 300, // 5 minutes
            log_level: String::from("info"),
        }
    }
}

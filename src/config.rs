//! Configuration management
//!
//! Settings come from a TOML file, overridden by `BOXWATCH__SECTION__KEY`
//! environment variables (e.g. `BOXWATCH__DEVICE__PASSWORD`). Every setting
//! has a default except the device password.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BOXWATCH";
const ENV_SEPARATOR: &str = "__";

/// Root configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// File the settings were read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Device address and administrator credentials
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_login")]
    pub login: String,

    /// Printed on the device label; never defaulted
    #[serde(default)]
    pub password: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            login: default_login(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Seconds to wait after a reboot before checking again
    #[serde(default = "default_reboot_wait_delay")]
    pub reboot_wait_delay: u64,

    /// Consecutive down checks before rebooting; 1 reboots on first failure
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Where the failure counter and the lock file live
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reboot_wait_delay: default_reboot_wait_delay(),
            fail_threshold: default_fail_threshold(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    crate::device::DEFAULT_HOST.to_string()
}

fn default_login() -> String {
    "admin".to_string()
}

fn default_reboot_wait_delay() -> u64 {
    crate::watcher::DEFAULT_REBOOT_WAIT_DELAY.as_secs()
}

fn default_fail_threshold() -> u32 {
    1
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("boxwatch"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_timeout() -> u64 {
    crate::http::DEFAULT_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load `explicit`, or the first config file found in the usual places,
    /// then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} not found", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        Self::from_sources(file.as_deref(), None)
    }

    fn search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("boxwatch.toml"),
            PathBuf::from("/etc/boxwatch/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/boxwatch/config.toml"))
                .unwrap_or_default(),
        ]
    }

    /// `env` replaces the process environment when given
    fn from_sources(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let mut cfg: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.source = file.map(Path::to_path_buf);
        Ok(cfg)
    }

    /// Reject settings the device cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.device.password.is_empty() {
            anyhow::bail!(
                "Missing password in configuration. Set [device] password in the config file \
                 or {ENV_PREFIX}{ENV_SEPARATOR}DEVICE{ENV_SEPARATOR}PASSWORD"
            );
        }
        if self.watcher.fail_threshold == 0 {
            anyhow::bail!("[watcher] fail_threshold must be at least 1");
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout)
    }

    pub fn reboot_wait_delay(&self) -> Duration {
        Duration::from_secs(self.watcher.reboot_wait_delay)
    }

    /// The defaults as a TOML document
    pub fn sample_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("Failed to render sample config")
    }
}

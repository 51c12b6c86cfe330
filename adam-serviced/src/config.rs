use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{
    DEFAULT_DISCOVERY_PORT, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_PORT, ENV_SERVICE_HOME,
    MEASUREMENT_FILE_NAME,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_service_port")]
    pub port: u16,
    /// Per-connection read and write deadline
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    /// Fixed address to announce instead of re-resolving the routable IP
    #[serde(default)]
    pub advertise_ip: Option<IpAddr>,
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_normal_interval")]
    pub normal_interval_ms: u64,
    #[serde(default = "default_fast_announcements")]
    pub fast_announcements: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Measurement base directory; `ADAM_SERVICE_HOME` still wins over this
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

/// Where the measurement base directory came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDirMode {
    EnvOverride,
    Config,
    UserHome,
}

impl BaseDirMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseDirMode::EnvOverride => "env_override",
            BaseDirMode::Config => "config",
            BaseDirMode::UserHome => "user_home",
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_read_timeout() -> u64 {
    30
}

fn default_file_name() -> String {
    MEASUREMENT_FILE_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_initial_interval() -> u64 {
    1000
}

fn default_normal_interval() -> u64 {
    2000
}

fn default_fast_announcements() -> u32 {
    5
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            host: default_host(),
            port: default_service_port(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_discovery_port(),
            broadcast_addr: default_broadcast_addr(),
            advertise_ip: None,
            initial_interval_ms: default_initial_interval(),
            normal_interval_ms: default_normal_interval(),
            fast_announcements: default_fast_announcements(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            file_name: default_file_name(),
        }
    }
}

impl ServiceConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl DiscoveryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn normal_interval(&self) -> Duration {
        Duration::from_millis(self.normal_interval_ms)
    }
}

impl StorageConfig {
    /// Pick the measurement base directory: environment override, then the
    /// config file, then the user's home directory.
    pub fn resolve_base_dir(&self) -> (PathBuf, BaseDirMode) {
        if let Some(value) = std::env::var_os(ENV_SERVICE_HOME).filter(|v| !v.is_empty()) {
            let path = expand_home(Path::new(&value));
            // Best effort; a failure surfaces later as a storage error
            if let Err(e) = std::fs::create_dir_all(&path) {
                tracing::warn!("Could not create {}: {}", path.display(), e);
            }
            return (path, BaseDirMode::EnvOverride);
        }

        if let Some(dir) = &self.base_dir {
            return (expand_home(dir), BaseDirMode::Config);
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        (home, BaseDirMode::UserHome)
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` if given, otherwise run on defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [service]
            service_name = "LineB"

            [discovery]
            fast_announcements = 3
            advertise_ip = "192.168.10.4"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.service_name, "LineB");
        assert_eq!(config.service.port, DEFAULT_SERVICE_PORT);
        assert_eq!(config.discovery.fast_announcements, 3);
        assert_eq!(config.discovery.normal_interval(), Duration::from_secs(2));
        assert_eq!(config.discovery.broadcast_addr, Ipv4Addr::BROADCAST);
        assert_eq!(
            config.discovery.advertise_ip,
            Some("192.168.10.4".parse().unwrap())
        );
        assert!(config.storage.base_dir.is_none());
        assert_eq!(config.storage.file_name, "all_measurements.json");
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.discovery.initial_interval(), Duration::from_secs(1));
        assert_eq!(config.service.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home(Path::new("/srv/adam")), PathBuf::from("/srv/adam"));
        assert_eq!(expand_home(Path::new("relative/dir")), PathBuf::from("relative/dir"));
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Directory of static assets served over HTTP (None = API only)
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Idle sessions older than this are evicted
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// Fixed delay between control-channel reconnect attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Keepalive ping interval on the control channel (0 = disabled)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Where received files are written
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_signaling_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
        "stun:stun2.l.google.com:19302".to_string(),
    ]
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_download_dir() -> String {
    ".".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            static_dir: None,
            session_retention_secs: default_session_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            stun_servers: default_stun_servers(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

impl ServerConfig {
    /// Bind address with the `PORT` environment variable applied
    pub fn effective_bind_address(&self) -> String {
        with_port_override(&self.bind_address, std::env::var("PORT").ok().as_deref())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

/// Replace the port of `addr` when `port` is a valid port number
fn with_port_override(addr: &str, port: Option<&str>) -> String {
    let Some(port) = port.and_then(|p| p.trim().parse::<u16>().ok()) else {
        return addr.to_string();
    };
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    format!("{}:{}", host, port)
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }
}

/// Get the airshare directory (~/.airshare)
pub fn get_airshare_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".airshare")
}

/// Get the config file path (~/.airshare/config.toml)
pub fn get_config_path() -> PathBuf {
    get_airshare_dir().join("config.toml")
}

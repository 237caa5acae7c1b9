use common::config::{ScannerConfig, StorageConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Range download tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    /// Bytes read per body chunk. Default: 16 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seconds a single chunk read may take before the transfer is aborted. Default: 10.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

fn default_chunk_size() -> usize {
    16 * 1024
}
fn default_chunk_timeout_secs() -> u64 {
    10
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeployConfig {
    /// Public base URL of the document root. When set, records carry a `file_url`.
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite://./data/apkvault.db?mode=rwc")?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., APKVAULT__DEPLOY__BASE_URL)
            .add_source(Environment::with_prefix("APKVAULT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

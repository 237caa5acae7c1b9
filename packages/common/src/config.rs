use std::path::PathBuf;

use serde::Deserialize;

/// Package storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Document root holding the `package/<entity>/...` tree. Default: "./data".
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Directory where the UI stages uploads before they are referenced by name.
    /// Default: "./data/tmp".
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Maximum accepted upload size in bytes. Default: 512 MiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/tmp")
}
fn default_max_upload_size() -> u64 {
    512 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            upload_dir: default_upload_dir(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Periodic metadata scanner configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Whether the in-process scheduler runs. Default: true.
    /// The batch endpoint stays available either way.
    #[serde(default = "default_scanner_enabled")]
    pub enabled: bool,
    /// Seconds between two batches. Default: 300.
    #[serde(default = "default_scanner_interval_secs")]
    pub interval_secs: u64,
    /// Maximum number of pending records handled per batch. Default: 10.
    #[serde(default = "default_scanner_batch_size")]
    pub batch_size: u64,
}

fn default_scanner_enabled() -> bool {
    true
}
fn default_scanner_interval_secs() -> u64 {
    300
}
fn default_scanner_batch_size() -> u64 {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scanner_enabled(),
            interval_secs: default_scanner_interval_secs(),
            batch_size: default_scanner_batch_size(),
        }
    }
}

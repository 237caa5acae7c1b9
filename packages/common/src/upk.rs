//! UPK containers: a zip archive wrapping the actual APK.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::apk::{ApkError, ApkParser};

/// Upper bound on the embedded APK size once decompressed (1 GiB).
const MAX_EMBEDDED_APK_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UpkError {
    #[error("cannot read container: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a zip container: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("container holds no .apk entry")]
    NoEmbeddedApk,

    #[error("embedded APK {name} is {size} bytes, limit is {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("embedded APK {name} is unreadable: {source}")]
    Apk {
        name: String,
        #[source]
        source: ApkError,
    },
}

/// Turns a stored container into an opened APK.
///
/// Runs on the blocking pool; implementations may do synchronous I/O.
pub trait PackageTranslator: Send + Sync {
    fn translate(&self, path: &Path) -> Result<ApkParser, UpkError>;
}

/// Picks the first `*.apk` file entry (case-insensitive) out of a zip container.
#[derive(Debug, Clone)]
pub struct ZipUpkTranslator {
    max_apk_size: u64,
}

impl Default for ZipUpkTranslator {
    fn default() -> Self {
        Self {
            max_apk_size: MAX_EMBEDDED_APK_SIZE,
        }
    }
}

impl ZipUpkTranslator {
    pub fn new(max_apk_size: u64) -> Self {
        Self { max_apk_size }
    }
}

impl PackageTranslator for ZipUpkTranslator {
    fn translate(&self, path: &Path) -> Result<ApkParser, UpkError> {
        let file = BufReader::new(File::open(path)?);
        let mut archive = zip::ZipArchive::new(file)?;

        let index = (0..archive.len())
            .find(|&i| {
                archive
                    .name_for_index(i)
                    .is_some_and(|name| is_apk_entry(name))
            })
            .ok_or(UpkError::NoEmbeddedApk)?;

        let entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if entry.size() > self.max_apk_size {
            return Err(UpkError::TooLarge {
                name,
                size: entry.size(),
                limit: self.max_apk_size,
            });
        }

        // The declared size can lie; cap the actual read too.
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.take(self.max_apk_size + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 > self.max_apk_size {
            return Err(UpkError::TooLarge {
                name,
                size: bytes.len() as u64,
                limit: self.max_apk_size,
            });
        }

        tracing::debug!(entry = %name, size = bytes.len(), "Extracted APK from container");
        ApkParser::from_bytes(bytes).map_err(|source| UpkError::Apk { name, source })
    }
}

fn is_apk_entry(name: &str) -> bool {
    !name.ends_with('/') && name.to_ascii_lowercase().ends_with(".apk")
}

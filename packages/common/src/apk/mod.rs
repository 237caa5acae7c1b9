//! Minimal APK reader: the zip container, the binary manifest and the
//! resource table, enough to pull out the package identity, icon and label.

mod arsc;
mod axml;
mod binary;
mod error;
mod manifest;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

pub use arsc::ResourceTable;
pub use axml::{XmlAttribute, XmlDocument, XmlElement};
pub use binary::{ResValue, StringPool};
pub use error::ApkError;
pub use manifest::{Application, Manifest, attr};

pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
pub const RESOURCES_ENTRY: &str = "resources.arsc";

/// Upper bound on a single decompressed archive entry (64 MiB).
pub const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// Any seekable byte source an archive can be read from.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An opened APK with its manifest and resource table decoded.
pub struct ApkParser {
    archive: zip::ZipArchive<Box<dyn ReadSeek>>,
    manifest: Manifest,
    resources: ResourceTable,
}

impl std::fmt::Debug for ApkParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApkParser")
            .field("entries", &self.archive.len())
            .field("manifest", &self.manifest)
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl ApkParser {
    /// Open an APK on disk.
    pub fn open(path: &Path) -> Result<Self, ApkError> {
        let file = File::open(path)?;
        Self::from_reader(Box::new(BufReader::new(file)))
    }

    /// Open an APK held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ApkError> {
        Self::from_reader(Box::new(Cursor::new(bytes)))
    }

    pub fn from_reader(reader: Box<dyn ReadSeek>) -> Result<Self, ApkError> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY, MAX_ENTRY_SIZE)?;
        let manifest = Manifest::parse(&manifest_bytes)?;

        // Resource-less packages exist; references then simply fail to resolve.
        let resources = match read_entry(&mut archive, RESOURCES_ENTRY, MAX_ENTRY_SIZE) {
            Ok(bytes) => ResourceTable::parse(&bytes)?,
            Err(ApkError::MissingEntry(_)) => ResourceTable::default(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            archive,
            manifest,
            resources,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Every value a manifest attribute stands for, as strings.
    ///
    /// Inline strings yield themselves; references yield one value per
    /// configuration in table order. Other value kinds yield nothing.
    pub fn resources(&self, value: &ResValue) -> Result<Vec<String>, ApkError> {
        match value {
            ResValue::String(s) => Ok(vec![s.clone()]),
            ResValue::Reference(id) => self.resources.resolve_strings(*id),
            _ => Ok(Vec::new()),
        }
    }

    /// Version name, following a resource reference if needed.
    pub fn version_name(&self) -> Result<Option<String>, ApkError> {
        match &self.manifest.version_name {
            None => Ok(None),
            Some(value) => Ok(self.resources(value)?.into_iter().next()),
        }
    }

    /// Version code rendered as a decimal string.
    pub fn version_code(&self) -> Option<String> {
        match &self.manifest.version_code {
            Some(ResValue::Int(code)) => Some(code.to_string()),
            Some(ResValue::String(code)) => Some(code.clone()),
            _ => None,
        }
    }

    /// Raw bytes of an archive entry, at most [`MAX_ENTRY_SIZE`].
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ApkError> {
        read_entry(&mut self.archive, name, MAX_ENTRY_SIZE)
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, ApkError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ApkError::MissingEntry(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let too_large = |size| ApkError::EntryTooLarge {
        name: name.to_string(),
        size,
        limit,
    };
    if entry.size() > limit {
        return Err(too_large(entry.size()));
    }

    // The declared size can lie; cap the actual read too.
    let mut buf = Vec::with_capacity(entry.size().min(limit) as usize);
    entry.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(too_large(buf.len() as u64));
    }
    Ok(buf)
}

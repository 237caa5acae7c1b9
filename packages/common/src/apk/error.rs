use thiserror::Error;

/// Errors raised while reading an APK.
#[derive(Debug, Error)]
pub enum ApkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("missing archive entry: {0}")]
    MissingEntry(String),

    #[error("archive entry {name} is {size} bytes, limit is {limit}")]
    EntryTooLarge { name: String, size: u64, limit: u64 },

    #[error("truncated data at offset {0}")]
    Truncated(usize),

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("unresolved resource 0x{0:08x}")]
    UnresolvedResource(u32),
}

impl ApkError {
    pub(crate) fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }
}

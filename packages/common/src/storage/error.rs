use std::fmt;

/// Errors that can occur during package storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The requested file does not exist or is not a regular file.
    NotFound(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The file was opened but positioning the cursor failed.
    Seek(std::io::Error),
    /// The stored path escapes the document root or is otherwise malformed.
    InvalidPath(String),
    /// The upload exceeds the configured size limit.
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "file not found: {path}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::Seek(err) => write!(f, "storage seek error: {err}"),
            Self::InvalidPath(path) => write!(f, "invalid stored path: {path}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "file exceeds size limit ({actual} > {limit} bytes)")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Seek(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

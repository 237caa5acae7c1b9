//! Byte-range file serving for stored packages.

use std::io;
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::storage::{BoxReader, PackageStore, StorageError};
use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::config::DownloadConfig;
use crate::error::AppError;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const EXPIRED: &str = "Mon, 26 Nov 1962 00:00:00 GMT";

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // bytes=<start>-<end>, both optional, blanks allowed after '='
        Regex::new(r"(?i)bytes=[ \t]*(\d+)?-(\d*)").expect("range pattern is valid")
    })
}

/// Inclusive byte range within a non-empty file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes selected.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn covers(&self, size: u64) -> bool {
        self.start == 0 && self.end + 1 == size
    }
}

/// Resolve a `Range` header against a file of `size` bytes (`size > 0`).
///
/// A missing or unrecognised header selects the whole file. A missing start
/// means 0; a missing end, or one past the file, means the last byte. Only a
/// start beyond the last byte is unsatisfiable, and so is any request for an
/// empty file.
pub fn resolve_range(header: Option<&str>, size: u64) -> Result<ByteRange, DownloadError> {
    let Some(last) = size.checked_sub(1) else {
        return Err(DownloadError::Unsatisfiable { size });
    };
    let full = ByteRange {
        start: 0,
        end: last,
    };

    let Some(caps) = header.and_then(|h| range_pattern().captures(h)) else {
        return Ok(full);
    };

    let start = match caps.get(1) {
        None => 0,
        Some(m) => match m.as_str().parse::<u64>() {
            Ok(start) => start,
            Err(_) => return Err(DownloadError::Unsatisfiable { size }),
        },
    };
    if start > last {
        return Err(DownloadError::Unsatisfiable { size });
    }

    let end = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map_or(last, |end| end.min(last));

    if end < start {
        return Ok(ByteRange { start, end: last });
    }
    Ok(ByteRange { start, end })
}

/// Why a download could not start. Rendered without a body, except for 416.
#[derive(Debug)]
pub enum DownloadError {
    /// The stored file is gone or is not a regular file.
    NotFound(String),
    /// The range starts past the end of the file.
    Unsatisfiable { size: u64 },
    /// The file exists but could not be opened or positioned.
    Unreadable(StorageError),
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => DownloadError::NotFound(path),
            other => DownloadError::Unreadable(other),
        }
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::NotFound(path) => {
                tracing::warn!(path = %path, "Download of missing file");
                StatusCode::NOT_FOUND.into_response()
            }
            DownloadError::Unsatisfiable { size } => {
                AppError::RangeNotSatisfiable { size }.into_response()
            }
            DownloadError::Unreadable(err) => {
                tracing::error!(error = %err, "Stored file could not be read");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Serve a stored file, honouring a single `Range: bytes=a-b` request.
///
/// Headers are fully described before the first body byte; a read failure
/// afterwards ends the body stream with an error, which drops the connection.
pub async fn serve_file(
    store: &dyn PackageStore,
    path: &str,
    dl_filename: &str,
    range_header: Option<&str>,
    config: &DownloadConfig,
) -> Response {
    match try_serve_file(store, path, dl_filename, range_header, config).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn try_serve_file(
    store: &dyn PackageStore,
    path: &str,
    dl_filename: &str,
    range_header: Option<&str>,
    config: &DownloadConfig,
) -> Result<Response, DownloadError> {
    let info = store.stat(path).await?;
    let last_modified = info.modified.format(HTTP_DATE_FORMAT).to_string();

    let builder = Response::builder()
        .header(header::EXPIRES, EXPIRED)
        .header(header::PRAGMA, "private")
        .header(header::CACHE_CONTROL, "private, must-revalidate")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(dl_filename),
        )
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::LAST_MODIFIED, last_modified)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONNECTION, "close");

    if info.size == 0 {
        return build(
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, 0u64),
            Body::empty(),
        );
    }

    let range = resolve_range(range_header, info.size)?;
    let reader = store.open_at(path, range.start).await?;

    let status = if range.covers(info.size) {
        StatusCode::OK
    } else {
        StatusCode::PARTIAL_CONTENT
    };

    tracing::debug!(
        path,
        start = range.start,
        end = range.end,
        size = info.size,
        "Serving package file"
    );

    build(
        builder
            .status(status)
            .header(header::CONTENT_LENGTH, range.byte_count())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, info.size),
            ),
        chunked_body(
            reader,
            range.byte_count(),
            config.chunk_size,
            Duration::from_secs(config.chunk_timeout_secs),
        ),
    )
}

fn build(builder: axum::http::response::Builder, body: Body) -> Result<Response, DownloadError> {
    builder.body(body).map_err(|e| {
        DownloadError::Unreadable(StorageError::Io(io::Error::other(format!(
            "Failed to build response: {e}"
        ))))
    })
}

struct BodyState {
    chunks: ReaderStream<tokio::io::Take<BoxReader>>,
    remaining: u64,
    chunk_timeout: Duration,
}

/// Stream exactly `len` bytes from `reader` in `chunk_size` pieces.
///
/// Each read must complete within `chunk_timeout`. Running dry early is an
/// error too, since the length has already been announced.
pub fn chunked_body(
    reader: BoxReader,
    len: u64,
    chunk_size: usize,
    chunk_timeout: Duration,
) -> Body {
    let state = BodyState {
        chunks: ReaderStream::with_capacity(reader.take(len), chunk_size.max(1)),
        remaining: len,
        chunk_timeout,
    };

    let stream = futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        if state.remaining == 0 {
            return None;
        }

        match tokio::time::timeout(state.chunk_timeout, state.chunks.next()).await {
            Ok(Some(Ok(bytes))) => {
                state.remaining -= bytes.len() as u64;
                Some((Ok(bytes), Some(state)))
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "Package read failed mid-transfer");
                Some((Err(e), None))
            }
            Ok(None) => {
                tracing::warn!(missing = state.remaining, "Package file shrank mid-transfer");
                Some((
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file ended before the announced length",
                    )),
                    None,
                ))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = state.chunk_timeout.as_secs_f64(),
                    "Package chunk read timed out"
                );
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "chunk read timed out")),
                    None,
                ))
            }
        }
    });

    Body::from_stream(stream)
}

/// Build an `attachment` `Content-Disposition` header value.
///
/// Plain ASCII names are sent as-is; anything else also gets an RFC 5987
/// `filename*` next to a sanitised fallback.
pub fn content_disposition_value(filename: &str) -> HeaderValue {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.trim().is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    let value = if ascii_name == filename {
        format!("attachment; filename=\"{ascii_name}\"")
    } else {
        let encoded: String = filename
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z'
                | b'a'..=b'z'
                | b'0'..=b'9'
                | b'!'
                | b'#'
                | b'$'
                | b'&'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~' => String::from(b as char),
                _ => format!("%{b:02X}"),
            })
            .collect();
        format!("attachment; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

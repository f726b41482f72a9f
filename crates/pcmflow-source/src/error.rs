//! Crate error type.
//!
//! [`SourceError`] is the internal error type for the byte-source layer. The
//! public reporting surface stays callback-based: an error is surfaced once
//! through an `ErrorCallback(domain, code)` pair followed by
//! `LoadCallback(false)`. `domain()`/`code()` produce those two values.

use std::io;

/// Result type used by this crate.
pub type SourceResult<T> = Result<T, SourceError>;

/// Error codes shared by the byte-source subsystems.
pub mod codes {
    pub const COULD_NOT_READ_FILE: i32 = 1;
    pub const RESOLVE_FAILED: i32 = 2;
}

/// Unified error type for the `pcmflow-source` crate.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// File open or read failure.
    #[error("could not read file {path}: {source}")]
    CouldNotReadFile {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Non-success status from a HEAD or Range request.
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The HTTP transport itself failed.
    #[error("HTTP transport error for {url}: {message}")]
    HttpTransport { url: String, message: String },

    /// A service resolve endpoint returned an unusable body.
    #[error("resolve failed for {url}: {message}")]
    Resolve { url: String, message: String },

    /// I/O error without a more specific classification.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SourceError {
    /// Convenience helper for file errors.
    pub fn file(path: impl Into<String>, source: io::Error) -> Self {
        SourceError::CouldNotReadFile {
            path: path.into(),
            source,
        }
    }

    /// Convenience helper for HTTP status errors.
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        SourceError::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Convenience helper for transport-level HTTP failures.
    pub fn http_transport<E: std::fmt::Display>(url: impl Into<String>, e: E) -> Self {
        SourceError::HttpTransport {
            url: url.into(),
            message: e.to_string(),
        }
    }

    /// Convenience helper for resolve failures.
    pub fn resolve<E: std::fmt::Display>(url: impl Into<String>, e: E) -> Self {
        SourceError::Resolve {
            url: url.into(),
            message: e.to_string(),
        }
    }

    /// Error domain reported through the error callback.
    pub fn domain(&self) -> &'static str {
        match self {
            SourceError::CouldNotReadFile { .. } | SourceError::Io(_) => {
                "com.nativeformat.decoder.file"
            }
            SourceError::HttpStatus { .. } | SourceError::HttpTransport { .. } => {
                "com.nativeformat.decoder.http"
            }
            SourceError::Resolve { .. } => "com.nativeformat.dataprovider.factory",
        }
    }

    /// Error code reported through the error callback.
    ///
    /// HTTP failures carry the upstream status code untranslated.
    pub fn code(&self) -> i32 {
        match self {
            SourceError::CouldNotReadFile { .. } | SourceError::Io(_) => {
                codes::COULD_NOT_READ_FILE
            }
            SourceError::HttpStatus { status, .. } => i32::from(*status),
            SourceError::HttpTransport { .. } => -1,
            SourceError::Resolve { .. } => codes::RESOLVE_FAILED,
        }
    }
}

//! Error types for fetchkit
//!
//! One variant per failure kind a transfer can terminate in, matching
//! the taxonomy a caller needs to decide whether to retry, resume, or
//! give up outright.

use std::path::PathBuf;
use thiserror::Error;

/// Terminal error for a download transfer.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The request's destination is unusable: a sink paired with a
    /// filename requirement, or a path that resolved to a directory
    /// with no derivable filename.
    #[error("bad destination: {0}")]
    BadDestination(String),

    /// A directory destination was given but no filename could be
    /// derived from `Content-Disposition` or the URL path.
    #[error("no filename could be determined for this download")]
    NoFilename,

    /// A candidate filename was empty, `.`, `..`, or contained a path
    /// separator after sanitization.
    #[error("illegal filename: {0:?}")]
    IllegalFilename(String),

    /// The server responded with a non-success status outside the
    /// ranges the transfer understands (200, 206, 416).
    #[error("bad status code: {status}")]
    BadStatusCode {
        /// The HTTP status code returned by the server.
        status: u16,
    },

    /// Observed bytes disagree with the declared or server-reported
    /// length.
    #[error("bad length: expected {expected}, got {actual}")]
    BadLength {
        /// The length the transfer expected (from `size_total`).
        expected: u64,
        /// The length actually observed.
        actual: u64,
    },

    /// The computed digest did not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected digest, hex-encoded.
        expected: String,
        /// Actual digest, hex-encoded.
        actual: String,
    },

    /// The destination accepted fewer bytes than were offered to it.
    #[error("short write: offered {offered} bytes, wrote {wrote}")]
    ShortWrite {
        /// Bytes offered to the sink.
        offered: usize,
        /// Bytes the sink actually reported writing.
        wrote: usize,
    },

    /// The transfer's context/cancellation token fired.
    #[error("transfer canceled")]
    Canceled,

    /// An error from the underlying HTTP transport.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A filesystem operation (open/stat/seek/truncate/unlink) failed.
    #[error("filesystem error at '{path}': {source}")]
    FileSystem {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `before_copy` or `after_copy` hook returned an error.
    #[error("hook error: {0}")]
    HookError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl DownloadError {
    /// Create a filesystem error with path context.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should trigger `delete_on_error` cleanup.
    ///
    /// Applies only to post-connection validation errors on path
    /// destinations — not to errors that occur before any bytes were
    /// ever associated with the destination file (e.g. a bad
    /// destination or a transport failure before the file was opened).
    pub fn triggers_delete_on_error(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::BadLength { .. }
                | Self::ShortWrite { .. }
                | Self::HookError(_)
        )
    }
}

/// Extension trait for adding path context to `std::io::Result`.
pub trait IoResultExt<T> {
    /// Wrap an I/O error with the path it occurred on.
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DownloadError::fs(path, e))
    }
}

/// Result type alias for fetchkit operations.
pub type Result<T> = std::result::Result<T, DownloadError>;

//! Destination resolution: mapping a request's target to a concrete
//! local filename, or confirming a caller-supplied byte sink.
//!
//! Filenames are extracted from the URL path via the `url` crate and
//! decoded out of `Content-Disposition` headers (including the RFC
//! 5987 extended form) via `urlencoding`.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DownloadError, Result};

/// A caller-owned byte-accepting target, used in place of a filesystem
/// path. The caller retains ownership and is responsible for closing
/// it once the transfer's `done` signal fires; the core never closes
/// it.
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Write `data` to the sink, returning the number of bytes
    /// actually accepted. A short write (fewer bytes than offered) is
    /// treated by the transfer as a fatal [`DownloadError::ShortWrite`].
    async fn write(&self, data: &[u8]) -> std::io::Result<usize>;
}

/// Where a transfer's bytes end up: exactly one of a filesystem path
/// or a caller-owned sink.
///
/// Modeled as an enum rather than a struct with two `Option` fields so
/// that "exactly one" is a property of the type, not a runtime
/// invariant someone could violate.
#[derive(Clone)]
pub enum Destination {
    /// A filesystem path: a file (possibly not yet existing) or an
    /// existing directory, in which case a filename is resolved at
    /// transfer time.
    Path(PathBuf),
    /// A caller-supplied byte sink; no filename is ever resolved.
    Sink(Arc<dyn ByteSink>),
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Sink(_) => f.debug_tuple("Sink").field(&"<dyn ByteSink>").finish(),
        }
    }
}

impl Destination {
    /// Build a path destination.
    pub fn path(p: impl Into<PathBuf>) -> Self {
        Self::Path(p.into())
    }

    /// Build a sink destination.
    pub fn sink(sink: Arc<dyn ByteSink>) -> Self {
        Self::Sink(sink)
    }

    pub(crate) fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            Self::Sink(_) => None,
        }
    }
}

/// Reject empty, `.`, `..`, and any filename containing a path
/// separator after sanitization.
///
/// Candidate filenames arrive from two untrusted sources — the
/// `Content-Disposition` header and the URL path — so this is the one
/// gate both must pass through before touching the filesystem.
pub fn sanitize_filename(candidate: &str) -> Result<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(DownloadError::IllegalFilename(candidate.to_string()));
    }
    if candidate.contains('/') || candidate.contains('\\') || candidate.contains('\0') {
        return Err(DownloadError::IllegalFilename(candidate.to_string()));
    }
    Ok(candidate.to_string())
}

/// Extract a filename from a `Content-Disposition` header value.
///
/// Handles both the simple `attachment; filename="name.txt"` form and
/// the RFC 5987 extended form `attachment; filename*=UTF-8''name.txt`,
/// percent-decoded via `urlencoding`.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            let rest = rest.trim_matches('"');
            let decoded = rest
                .rsplit("''")
                .next()
                .unwrap_or(rest);
            let decoded = urlencoding::decode(decoded).ok()?;
            return Some(decoded.into_owned());
        }
    }
    for part in header.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

/// Extract the last path segment of a URL as a filename candidate.
pub fn filename_from_url(url: &url::Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Resolve the final local path for a directory destination.
///
/// Priority order: `Content-Disposition` attachment filename, then the
/// last URL path segment, then [`DownloadError::NoFilename`].
pub fn resolve_filename(
    content_disposition: Option<&str>,
    url: &url::Url,
) -> Result<String> {
    if let Some(header) = content_disposition {
        if let Some(candidate) = filename_from_content_disposition(header) {
            if let Ok(name) = sanitize_filename(&candidate) {
                return Ok(name);
            }
        }
    }
    if let Some(candidate) = filename_from_url(url) {
        return sanitize_filename(&candidate);
    }
    Err(DownloadError::NoFilename)
}

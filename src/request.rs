//! Declarative download request.
//!
//! A `Request` is built with a fluent API and then handed to a
//! [`crate::client::Client`]; once dispatched it is wrapped in an
//! `Arc` and never mutated again, keeping static configuration
//! cleanly separate from the in-flight dispatch.

use reqwest::Method;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::destination::Destination;
use crate::error::Result;
use crate::hash::HashAlgorithm;
use crate::limit::RateLimiter;
use crate::response::Response;

/// Default copy-buffer size: 32 KiB, matching spec's cancellation
/// latency bound of "one buffer-worth of I/O".
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// A hook invoked around the body transfer with the in-flight
/// [`Response`] in hand. An error from `before_copy` aborts the
/// transfer; an error from `after_copy` becomes the transfer's
/// terminal error unless one already exists.
pub type Hook = Arc<dyn Fn(&Response) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Immutable declaration of what to fetch and how.
///
/// Constructed via [`Request::new`] and a chain of `with_*`/flag
/// builder methods, then handed to a client. Once wrapped in an `Arc`
/// by the transfer state machine it is never mutated again.
pub struct Request {
    pub(crate) url: url::Url,
    pub(crate) destination: Destination,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) method: Method,
    pub(crate) size: Option<u64>,
    pub(crate) hash: Option<HashAlgorithm>,
    pub(crate) checksum: Option<Vec<u8>>,
    pub(crate) delete_on_error: bool,
    pub(crate) no_resume: bool,
    pub(crate) no_create_directories: bool,
    pub(crate) no_store: bool,
    pub(crate) rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub(crate) buffer_size: usize,
    pub(crate) before_copy: Option<Hook>,
    pub(crate) after_copy: Option<Hook>,
    pub(crate) cancel_token: CancellationToken,
}

impl Request {
    /// Start building a request for `url` into `destination`.
    pub fn new(destination: Destination, url: impl AsRef<str>) -> Result<Self> {
        let url = url::Url::parse(url.as_ref())?;
        Ok(Self {
            url,
            destination,
            headers: HashMap::new(),
            method: Method::GET,
            size: None,
            hash: None,
            checksum: None,
            delete_on_error: false,
            no_resume: false,
            no_create_directories: false,
            no_store: false,
            rate_limiter: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            before_copy: None,
            after_copy: None,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Add an additional request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the HTTP method (default `GET`).
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Declare the expected content length up front, skipping a HEAD
    /// probe and allowing an already-complete local file to
    /// short-circuit the transfer.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the hash algorithm to compute over the transferred bytes.
    pub fn with_hash(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash = Some(algorithm);
        self
    }

    /// Set the expected checksum to validate against at EOF. Implies
    /// `with_hash` must also be set for validation to occur.
    pub fn with_checksum(mut self, checksum: impl Into<Vec<u8>>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Delete the partial/invalid file on a post-connection validation
    /// error (checksum mismatch, bad length, short write, hook error).
    pub fn delete_on_error(mut self) -> Self {
        self.delete_on_error = true;
        self
    }

    /// Disable HTTP range-resume; always start from byte zero.
    pub fn no_resume(mut self) -> Self {
        self.no_resume = true;
        self
    }

    /// Disable mkdir-p behavior when resolving a directory
    /// destination.
    pub fn no_create_directories(mut self) -> Self {
        self.no_create_directories = true;
        self
    }

    /// Do not persist to disk even for path destinations; useful for
    /// checksum-only verification runs.
    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    /// Attach a per-request rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Override the copy-buffer size (default 32 KiB).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Register a hook invoked once the HTTP response is known, before
    /// any body bytes are copied. An error aborts the transfer.
    pub fn before_copy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Response) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.before_copy = Some(Arc::new(hook));
        self
    }

    /// Register a hook invoked after validation, before `done` closes.
    /// An error becomes the transfer's terminal error unless one
    /// already exists.
    pub fn after_copy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Response) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.after_copy = Some(Arc::new(hook));
        self
    }

    /// Use an externally owned cancellation token instead of the
    /// request's own, so a caller can cancel many requests at once.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// A child token of this request's cancellation token, suitable
    /// for canceling just this transfer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub(crate) fn destination_path(&self) -> Option<&std::path::Path> {
        self.destination.as_path()
    }

    pub(crate) fn path_buf(&self) -> Option<PathBuf> {
        self.destination_path().map(|p| p.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_parses_url() {
        let req = Request::new(Destination::path("/tmp"), "https://example.com/a.txt").unwrap();
        assert_eq!(req.url.as_str(), "https://example.com/a.txt");
    }

    #[test]
    fn new_rejects_invalid_url() {
        assert!(Request::new(Destination::path("/tmp"), "not a url").is_err());
    }

    #[test]
    fn builder_chain_sets_fields() {
        let req = Request::new(Destination::path("/tmp"), "https://example.com/a.txt")
            .unwrap()
            .with_size(100)
            .no_resume()
            .delete_on_error()
            .with_buffer_size(4096);
        assert_eq!(req.size, Some(100));
        assert!(req.no_resume);
        assert!(req.delete_on_error);
        assert_eq!(req.buffer_size, 4096);
    }

    #[test]
    fn default_buffer_size_is_32kib() {
        let req = Request::new(Destination::path("/tmp"), "https://example.com/a.txt").unwrap();
        assert_eq!(req.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(DEFAULT_BUFFER_SIZE, 32 * 1024);
    }
}

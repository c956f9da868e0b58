//! # fetchkit - concurrent, resumable HTTP(S) downloads
//!
//! fetchkit drives the download execution pipeline for package mirrors
//! and ISO repositories: many large, immutable remote files fetched in
//! parallel by long-running processes. It turns a declarative
//! [`Request`] into a live, resumable, cancellable, rate-limited,
//! checksum-verifying transfer whose progress can be observed from any
//! task without taking a lock on the transfer's hot path.
//!
//! The public command-line wrapper, metrics sinks, and cloud-storage
//! adapters are external collaborators and are not part of this crate.
//!
//! ## Quick start
//!
//! ```no_run
//! use fetchkit::{Client, Destination, Request};
//!
//! # async fn run() -> fetchkit::Result<()> {
//! let client = Client::new()?;
//! let request = Request::new(Destination::path("/tmp/downloads"), "https://example.com/iso/image.iso")?;
//! let response = client.do_request(request);
//! response.wait().await;
//! if let Some(err) = response.err() {
//!     eprintln!("download failed: {err}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch downloads
//!
//! ```no_run
//! use fetchkit::{Client, Destination, Request};
//! use futures::StreamExt;
//!
//! # async fn run() -> fetchkit::Result<()> {
//! let client = Client::new()?;
//! let requests = vec![
//!     Request::new(Destination::path("/tmp/downloads"), "https://example.com/a.iso")?,
//!     Request::new(Destination::path("/tmp/downloads"), "https://example.com/b.iso")?,
//! ];
//! let mut responses = Box::pin(client.do_batch(4, requests));
//! while let Some(response) = responses.next().await {
//!     println!("{:?} -> {:?}", response.filename(), response.err().map(|e| e.to_string()));
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod client;
pub mod destination;
pub mod error;
pub mod hash;
pub mod limit;
pub mod request;
pub mod response;
pub mod transfer;

pub use client::{default_client, Client, ClientBuilder, ClientConfig};
pub use destination::{ByteSink, Destination};
pub use error::{DownloadError, Result};
pub use hash::{HashAlgorithm, Hasher};
pub use limit::{NoLimit, RateLimiter, TokenBucketLimiter};
pub use request::Request;
pub use response::{HttpResponseInfo, Response};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    //! Convenient re-exports for common usage.
    //!
    //! ```no_run
    //! use fetchkit::prelude::*;
    //! ```

    pub use crate::client::{default_client, Client, ClientBuilder, ClientConfig};
    pub use crate::destination::{ByteSink, Destination};
    pub use crate::error::{DownloadError, Result};
    pub use crate::hash::{HashAlgorithm, Hasher};
    pub use crate::limit::{NoLimit, RateLimiter, TokenBucketLimiter};
    pub use crate::request::Request;
    pub use crate::response::{HttpResponseInfo, Response};
}

//! The `Client`: owns the shared HTTP transport and default
//! configuration, and is the factory for transfers.
//!
//! Built once per process (or per caller's scope) and shared across
//! many dispatches — `reqwest::Client`'s own connection pool governs
//! concurrency at the socket level, so the client holds a single
//! `reqwest::Client` built in its constructor and reuses it across
//! every subsequent dispatch.

use futures::Stream;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::batch;
use crate::request::Request;
use crate::response::Response;

/// Connect/read timeouts, default buffer size, and other dispatch
/// defaults applied to every request this client sends. This is the
/// library's configuration surface; there is no CLI argument parser
/// backing it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, including body transfer. `None` disables
    /// it — large file downloads should not be capped by wall clock.
    pub timeout: Option<Duration>,
    /// User agent string sent with every request.
    pub user_agent: String,
    /// Default copy-buffer size applied when a `Request` does not
    /// override it.
    pub default_buffer_size: usize,
    /// Whether to follow redirects (default: yes, propagating the
    /// original method across each hop).
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: None,
            user_agent: format!("fetchkit/{}", env!("CARGO_PKG_VERSION")),
            default_buffer_size: crate::request::DEFAULT_BUFFER_SIZE,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// Builder for [`Client`], following the familiar `reqwest::Client::
/// builder()...build()` pattern, applied to fetchkit's own config
/// surface.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set a whole-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Set the default copy-buffer size.
    pub fn default_buffer_size(mut self, size: usize) -> Self {
        self.config.default_buffer_size = size;
        self
    }

    /// Disable following redirects.
    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Build the client, constructing the underlying `reqwest::Client`
    /// once.
    pub fn build(self) -> crate::error::Result<Client> {
        Client::with_config(self.config)
    }
}

/// Owns an HTTP transport and default configuration; factory for
/// transfers.
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    /// A client with default configuration.
    pub fn new() -> crate::error::Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// A client built from explicit configuration.
    pub fn with_config(config: ClientConfig) -> crate::error::Result<Self> {
        let redirect_policy = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(redirect_policy);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let http = builder.build()?;
        Ok(Self { http, config })
    }

    /// Start building a client with non-default configuration.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// This client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dispatch one transfer asynchronously. Returns as soon as the
    /// connection phase resolves or fails — it never blocks on body
    /// bytes.
    ///
    /// Applies client defaults (buffer size) over the request by copy
    /// semantics, not mutation of the caller's request.
    pub fn do_request(&self, mut request: Request) -> Arc<Response> {
        if request.buffer_size == crate::request::DEFAULT_BUFFER_SIZE
            && self.config.default_buffer_size != crate::request::DEFAULT_BUFFER_SIZE
        {
            request.buffer_size = self.config.default_buffer_size;
        }

        let request = Arc::new(request);
        let response = Response::new(Arc::clone(&request));
        let http = self.http.clone();
        let response_for_task = Arc::clone(&response);

        tokio::spawn(async move {
            crate::transfer::run(&http, request, response_for_task).await;
        });

        response
    }

    /// Convenience wrapper: spawn `workers` concurrent transfers over
    /// `requests`, producing a stream of responses in completion
    /// order. `workers == 0` means one worker per request (unbounded
    /// fan-out).
    pub fn do_batch(
        &self,
        workers: usize,
        requests: Vec<Request>,
    ) -> impl Stream<Item = Arc<Response>> + '_ {
        batch::run(self, workers, futures::stream::iter(requests))
    }

    /// Like [`Client::do_batch`] but over an arbitrary stream of
    /// requests rather than a pre-collected `Vec`, for callers that
    /// want to submit requests as they become known.
    pub fn do_channel<S>(&self, workers: usize, requests: S) -> impl Stream<Item = Arc<Response>> + '_
    where
        S: Stream<Item = Request> + Send + 'static,
    {
        batch::run(self, workers, requests)
    }
}

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// A package-level default client, built lazily on first use with
/// default configuration. Exists purely as a convenience; it holds no
/// non-idempotent configuration and multiple callers may share it
/// safely.
pub fn default_client() -> &'static Client {
    DEFAULT_CLIENT.get_or_init(|| Client::new().expect("default client configuration is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_follows_redirects() {
        let config = ClientConfig::default();
        assert!(config.follow_redirects);
    }

    #[test]
    fn builder_disables_redirects() {
        let client = ClientBuilder::new().no_redirects().build().unwrap();
        assert!(!client.config().follow_redirects);
    }

    #[test]
    fn builder_overrides_buffer_size() {
        let client = ClientBuilder::new().default_buffer_size(4096).build().unwrap();
        assert_eq!(client.config().default_buffer_size, 4096);
    }

    #[test]
    fn default_client_is_reusable() {
        let a = default_client() as *const Client;
        let b = default_client() as *const Client;
        assert_eq!(a, b);
    }
}

//! Live handle on an in-flight or completed download.
//!
//! Progress counters use lock-free atomics so observers never contend
//! with the transfer's hot path; infrequently-mutated fields (filename,
//! terminal error, HTTP response snapshot) use an `RwLock<Option<T>>`
//! instead, since they change at most a handful of times per transfer.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::request::Request;

/// Snapshot of the server's initial reply: status and a subset of
/// headers relevant to downstream logic and to hooks that want to
/// inspect the live response.
#[derive(Debug, Clone)]
pub struct HttpResponseInfo {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length` header value, if present.
    pub content_length: Option<u64>,
    /// `Content-Disposition` header value, if present.
    pub content_disposition: Option<String>,
    /// `Last-Modified` header value, if present.
    pub last_modified: Option<String>,
}

/// Live handle on an in-flight or completed download.
///
/// Created by the [`crate::client::Client`] at request dispatch and
/// mutated solely by the transfer task; observers read counters via
/// atomic loads and may `.await` [`Response::wait`] for the one-shot
/// `done` signal to fire.
pub struct Response {
    pub(crate) request: Arc<Request>,

    http_response: RwLock<Option<HttpResponseInfo>>,
    filename: RwLock<Option<String>>,
    err: RwLock<Option<Arc<DownloadError>>>,

    size_total: AtomicU64,
    bytes_resumed: AtomicU64,
    bytes_written: AtomicU64,
    bytes_per_second: RwLock<f64>,

    start: RwLock<Option<SystemTime>>,
    end: RwLock<Option<SystemTime>>,
    did_resume: AtomicBool,

    done_tx: tokio::sync::watch::Sender<bool>,
    done_rx: tokio::sync::watch::Receiver<bool>,
    cancel: CancellationToken,
}

/// Smoothing factor for the exponential moving average used to
/// compute `bytes_per_second`.
pub(crate) const RATE_EMA_ALPHA: f64 = 0.1;

impl Response {
    pub(crate) fn new(request: Arc<Request>) -> Arc<Self> {
        let cancel = request.cancel_token();
        let (done_tx, done_rx) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            request,
            http_response: RwLock::new(None),
            filename: RwLock::new(None),
            err: RwLock::new(None),
            size_total: AtomicU64::new(0),
            bytes_resumed: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_per_second: RwLock::new(0.0),
            start: RwLock::new(None),
            end: RwLock::new(None),
            did_resume: AtomicBool::new(false),
            done_tx,
            done_rx,
            cancel,
        })
    }

    /// The request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The resolved local filename, empty for sink destinations or
    /// before resolution has occurred.
    pub fn filename(&self) -> Option<String> {
        self.filename.read().unwrap().clone()
    }

    /// Snapshot of the server's initial reply, set before any body
    /// bytes are copied and stable thereafter.
    pub fn http_response(&self) -> Option<HttpResponseInfo> {
        self.http_response.read().unwrap().clone()
    }

    /// Total resource size in bytes once known, else 0.
    pub fn size_total(&self) -> u64 {
        self.size_total.load(Ordering::Acquire)
    }

    /// Bytes already on disk at transfer start, 0 otherwise.
    pub fn bytes_resumed(&self) -> u64 {
        self.bytes_resumed.load(Ordering::Acquire)
    }

    /// Bytes written during this invocation; excludes resumed bytes.
    pub fn bytes_complete(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    /// Total bytes now represented by the destination: resumed plus
    /// written during this invocation.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_resumed() + self.bytes_complete()
    }

    /// Exponentially smoothed transfer rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        *self.bytes_per_second.read().unwrap()
    }

    /// Progress ratio in `[0, 1]`, or 0 when the total size is
    /// unknown.
    pub fn progress(&self) -> f64 {
        let total = self.size_total();
        if total == 0 {
            0.0
        } else {
            (self.bytes_transferred() as f64 / total as f64).min(1.0)
        }
    }

    /// Whether a partial file on disk was extended rather than
    /// restarted.
    pub fn did_resume(&self) -> bool {
        self.did_resume.load(Ordering::Acquire)
    }

    /// Wall-clock start timestamp, set once the transfer begins.
    pub fn start(&self) -> Option<SystemTime> {
        *self.start.read().unwrap()
    }

    /// Wall-clock end timestamp, set once the transfer reaches `Done`.
    pub fn end(&self) -> Option<SystemTime> {
        *self.end.read().unwrap()
    }

    /// Whether the destination now holds the full resource:
    /// `bytes_transferred() == size_total` and the total is known.
    pub fn is_complete(&self) -> bool {
        let total = self.size_total();
        total > 0 && self.bytes_transferred() == total
    }

    /// Elapsed wall-clock time since the transfer started. Measures up
    /// to `end()` once the transfer is done, or up to now otherwise;
    /// `None` before the transfer has started.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start()?;
        let end = self.end().unwrap_or_else(SystemTime::now);
        end.duration_since(start).ok()
    }

    /// Terminal error, valid only after [`Response::is_done`] is true.
    /// Returns `None` for a successful transfer.
    pub fn err(&self) -> Option<Arc<DownloadError>> {
        self.err.read().unwrap().clone()
    }

    /// Whether the one-shot `done` signal has fired.
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait for the transfer to reach its terminal state. Resolves
    /// immediately if `done` has already fired.
    pub async fn wait(&self) {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender is held by the transfer task for the response's
        // entire lifetime, so a RecvError here would indicate a bug
        // rather than a condition callers need to handle.
        let _ = rx.changed().await;
    }

    /// Request cancellation of this transfer. Idempotent; safe to call
    /// before, during, or after completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_filename(&self, name: String) {
        *self.filename.write().unwrap() = Some(name);
    }

    pub(crate) fn set_http_response(&self, info: HttpResponseInfo) {
        *self.http_response.write().unwrap() = Some(info);
    }

    pub(crate) fn set_size_total(&self, size: u64) {
        self.size_total.store(size, Ordering::Release);
    }

    pub(crate) fn set_bytes_resumed(&self, bytes: u64) {
        self.bytes_resumed.store(bytes, Ordering::Release);
    }

    pub(crate) fn set_did_resume(&self, value: bool) {
        self.did_resume.store(value, Ordering::Release);
    }

    pub(crate) fn mark_started(&self) {
        *self.start.write().unwrap() = Some(SystemTime::now());
    }

    pub(crate) fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::AcqRel);
    }

    /// Update the smoothed rate given bytes written in the last
    /// `elapsed` interval.
    pub(crate) fn observe_rate(&self, bytes_in_interval: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let instantaneous = bytes_in_interval as f64 / secs;
        let mut rate = self.bytes_per_second.write().unwrap();
        *rate = RATE_EMA_ALPHA * instantaneous + (1.0 - RATE_EMA_ALPHA) * *rate;
    }

    /// Close the `done` signal exactly once, recording the terminal
    /// error (if any) beforehand so it is stable the moment observers
    /// wake.
    pub(crate) fn finish(&self, result: Result<(), DownloadError>) {
        if self.is_done() {
            return;
        }
        if let Err(e) = result {
            *self.err.write().unwrap() = Some(Arc::new(e));
        }
        *self.end.write().unwrap() = Some(SystemTime::now());
        // `send` only fails if every receiver has been dropped; the
        // response itself holds one for its own is_done()/err() reads.
        let _ = self.done_tx.send(true);
    }
}

impl fmt::Display for Response {
    /// A one-line human-readable progress summary.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use humansize::{format_size, BINARY};

        let transferred = format_size(self.bytes_transferred(), BINARY);
        let rate = format_size(self.bytes_per_second() as u64, BINARY);
        match self.size_total() {
            0 => write!(f, "{transferred} transferred ({rate}/s)"),
            total => {
                let total = format_size(total, BINARY);
                write!(
                    f,
                    "{transferred}/{total} transferred ({:.1}%, {rate}/s)",
                    self.progress() * 100.0
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Destination;

    fn make_response() -> Arc<Response> {
        let req = Arc::new(
            Request::new(Destination::path("/tmp/out"), "https://example.com/a.txt").unwrap(),
        );
        Response::new(req)
    }

    #[test]
    fn progress_zero_when_total_unknown() {
        let resp = make_response();
        assert_eq!(resp.progress(), 0.0);
    }

    #[test]
    fn progress_ratio_reflects_bytes_transferred() {
        let resp = make_response();
        resp.set_size_total(100);
        resp.add_bytes_written(25);
        assert_eq!(resp.progress(), 0.25);
    }

    #[test]
    fn bytes_transferred_includes_resumed() {
        let resp = make_response();
        resp.set_bytes_resumed(10);
        resp.add_bytes_written(5);
        assert_eq!(resp.bytes_transferred(), 15);
        assert_eq!(resp.bytes_complete(), 5);
    }

    #[tokio::test]
    async fn done_closes_exactly_once_and_err_is_stable() {
        let resp = make_response();
        assert!(!resp.is_done());
        resp.finish(Err(DownloadError::Canceled));
        assert!(resp.is_done());
        assert!(matches!(resp.err().as_deref(), Some(DownloadError::Canceled)));

        // A second finish() must not override the first terminal error.
        resp.finish(Ok(()));
        assert!(matches!(resp.err().as_deref(), Some(DownloadError::Canceled)));
    }

    #[tokio::test]
    async fn wait_resolves_after_finish() {
        let resp = make_response();
        let resp2 = Arc::clone(&resp);
        let handle = tokio::spawn(async move {
            resp2.wait().await;
        });
        resp.finish(Ok(()));
        handle.await.unwrap();
    }

    #[test]
    fn wait_is_pending_until_finish() {
        let resp = make_response();
        let mut task = tokio_test::task::spawn(resp.wait());
        assert!(task.poll().is_pending());

        resp.finish(Ok(()));
        assert!(task.poll().is_ready());
    }

    #[test]
    fn cancel_is_idempotent() {
        let resp = make_response();
        resp.cancel();
        resp.cancel();
        assert!(resp.cancellation_token().is_cancelled());
    }

    #[test]
    fn display_includes_percentage_when_total_known() {
        let resp = make_response();
        resp.set_size_total(200);
        resp.add_bytes_written(50);
        let text = resp.to_string();
        assert!(text.contains("25.0%"), "unexpected summary: {text}");
    }

    #[test]
    fn is_complete_requires_known_total_and_matching_bytes() {
        let resp = make_response();
        assert!(!resp.is_complete());
        resp.set_size_total(10);
        resp.add_bytes_written(5);
        assert!(!resp.is_complete());
        resp.add_bytes_written(5);
        assert!(resp.is_complete());
    }

    #[test]
    fn duration_is_none_before_start() {
        let resp = make_response();
        assert!(resp.duration().is_none());
    }

    #[test]
    fn duration_is_some_after_start() {
        let resp = make_response();
        resp.mark_started();
        assert!(resp.duration().is_some());
    }

    #[test]
    fn display_omits_percentage_when_total_unknown() {
        let resp = make_response();
        resp.add_bytes_written(50);
        let text = resp.to_string();
        assert!(!text.contains('%'), "unexpected summary: {text}");
    }
}

//! Bounded-concurrency batch scheduler.
//!
//! A `futures::Stream` adapter over `StreamExt::buffer_unordered`:
//! at most `workers` transfers in flight at once, output in completion
//! order. This is the natural async-Rust shape for a worker-pool
//! scheduler when each unit of work is an async future rather than a
//! blocking task handed to an OS thread.

use futures::{Stream, StreamExt};
use std::sync::Arc;

use crate::client::Client;
use crate::request::Request;
use crate::response::Response;

/// Run `requests` through `client` with at most `workers` transfers
/// in flight at once. `workers == 0` means unbounded fan-out (one
/// worker per request).
pub(crate) fn run<S>(
    client: &Client,
    workers: usize,
    requests: S,
) -> impl Stream<Item = Arc<Response>> + '_
where
    S: Stream<Item = Request> + Send + 'static,
{
    let concurrency = if workers == 0 { usize::MAX } else { workers };

    requests
        .map(move |request| {
            let response = client.do_request(request);
            async move {
                response.wait().await;
                response
            }
        })
        .buffer_unordered(concurrency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Destination;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn worker_zero_means_unbounded_fanout() {
        // Smoke-tests that `workers == 0` maps to `usize::MAX`
        // concurrency rather than zero concurrent transfers (which
        // would hang forever).
        let client = Client::new().unwrap();
        let requests: Vec<Request> = (0..3)
            .map(|i| {
                Request::new(
                    Destination::path(format!("/tmp/fetchkit-batch-test-{i}")),
                    "http://127.0.0.1:1/does-not-matter",
                )
                .unwrap()
                .with_size(0)
            })
            .collect();

        let completed = Arc::new(AtomicUsize::new(0));
        let mut stream = Box::pin(run(&client, 0, futures::stream::iter(requests)));
        while let Some(response) = stream.next().await {
            let _ = response.err();
            completed.fetch_add(1, Ordering::SeqCst);
        }
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }
}

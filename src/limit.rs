//! Bandwidth rate limiting.
//!
//! A `governor`-backed token bucket behind an async, object-safe trait
//! so a transfer can be handed any limiter (or none) without knowing
//! its concrete type.

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Result};

/// Bytes represented by a single governor token.
///
/// Bucketing at 1KB granularity gives smoother throttling than
/// one-token-per-byte would at high rates.
const BYTES_PER_TOKEN: usize = 1024;

/// Admission control for outbound transfer bytes.
///
/// A transfer calls [`RateLimiter::wait_n`] before writing each chunk
/// to its destination, passing the transfer's own cancellation token
/// so the wait itself is a cancellation suspension point: the call
/// resolves once the limiter has granted capacity for `n` bytes, or
/// returns [`DownloadError::Canceled`] as soon as `ctx` fires,
/// whichever happens first.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Block until capacity for `n` bytes has been granted, or until
    /// `ctx` is canceled.
    async fn wait_n(&self, ctx: &CancellationToken, n: usize) -> Result<()>;
}

/// No-op limiter: the default when a request carries no rate limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimit;

#[async_trait]
impl RateLimiter for NoLimit {
    async fn wait_n(&self, _ctx: &CancellationToken, _n: usize) -> Result<()> {
        Ok(())
    }
}

/// Token-bucket limiter built on `governor`, bucketed at 1KB
/// granularity and exposed through the async `wait_n` contract, which
/// respects cancellation instead of spinning forever.
pub struct TokenBucketLimiter {
    limiter: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TokenBucketLimiter {
    /// Create a limiter capped at `bytes_per_second`.
    pub fn new(bytes_per_second: u64) -> Self {
        let tokens_per_second = (bytes_per_second as usize / BYTES_PER_TOKEN).max(1);
        let capped_tokens = tokens_per_second.min(u32::MAX as usize) as u32;
        let quota = Quota::per_second(NonZeroU32::new(capped_tokens).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Arc::new(GovernorLimiter::direct(quota)),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn wait_n(&self, ctx: &CancellationToken, n: usize) -> Result<()> {
        let tokens_needed = (n / BYTES_PER_TOKEN).max(1);

        for _ in 0..tokens_needed {
            tokio::select! {
                _ = self.limiter.until_ready() => {}
                _ = ctx.cancelled() => return Err(DownloadError::Canceled),
            }
        }
        Ok(())
    }
}

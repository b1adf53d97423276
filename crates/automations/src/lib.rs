//! Runtime which drives Reconcilers.
//!
//! A Controller receives a stream of Requests, each of which either names a
//! single object or asks for a synchronization of everything. Requests are
//! queued and de-duplicated, and are dispatched to the Reconciler with a
//! bounded concurrency. A given Request is never reconciled twice
//! concurrently. Failed Requests are re-queued with a jittered exponential
//! backoff.
use std::time::Duration;

mod periodic;
mod server;

pub use periodic::{periodic, Trigger};
pub use server::Controller;
pub use tokio_util::sync::CancellationToken;

/// Request to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    /// Synchronize all objects with their external source of truth.
    SyncAll,
    /// Reconcile the single object having this key.
    Object(models::ObjectKey),
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::SyncAll => f.write_str("sync-all"),
            Request::Object(key) => key.fmt(f),
        }
    }
}

/// Action to take after a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The Request is complete. It's reconciled again only if requested.
    Done,
    /// Reconcile the Request again after the given Duration.
    RequeueAfter(Duration),
}

/// Reconciler is the core trait implemented by reconcilers of each resource kind.
pub trait Reconciler: Send + Sync + 'static {
    /// Name of the Reconciler, used in logs.
    const NAME: &'static str;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Reconcile a Request. Implementations must be idempotent: the same
    /// Request may be reconciled any number of times, including after a
    /// failure part-way through.
    fn reconcile<'s>(
        &'s self,
        request: &'s Request,
    ) -> impl std::future::Future<Output = Result<Action, Self::Error>> + Send + 's;

    /// Returns the delay after which a failed Request is retried, given its
    /// number of consecutive failures (starting at one), or None if the
    /// error is terminal and the Request should not be retried.
    fn retry_after(&self, error: &Self::Error, failures: u32) -> Option<Duration> {
        let _ = error;
        Some(backoff(failures))
    }
}

/// Exponential backoff for a Request having `failures` consecutive failures:
/// one second doubling up to five minutes, plus up to 20% of random jitter.
pub fn backoff(failures: u32) -> Duration {
    use rand::Rng;

    const MAX_SECONDS: u64 = 300;
    const JITTER_PERCENT: u64 = 20;

    let exponent = failures.saturating_sub(1).min(16);
    let delta_millis = (1u64 << exponent).min(MAX_SECONDS) * 1000;
    let jitter_max = delta_millis * JITTER_PERCENT / 100;
    let jitter_add = rand::thread_rng().gen_range(0..=jitter_max);

    Duration::from_millis(delta_millis + jitter_add)
}

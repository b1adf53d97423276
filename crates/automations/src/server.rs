use super::{backoff, Action, Reconciler, Request};
use futures::{
    future::BoxFuture,
    stream::{FusedStream, FuturesUnordered},
    FutureExt, Stream, StreamExt,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Controller serves a Reconciler.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    concurrency: usize,
}

type Completion<E> = (Request, Result<Result<Action, E>, tokio::task::JoinError>);

impl<R: Reconciler> Controller<R> {
    /// Build a Controller which runs up to `concurrency` reconciliations at once.
    pub fn new(reconciler: Arc<R>, concurrency: usize) -> Self {
        Self {
            reconciler,
            concurrency: concurrency.max(1),
        }
    }

    /// Serve `requests` until signaled to stop by `shutdown`, or until
    /// `requests` is exhausted and there's no further work.
    /// Reconciliations which are running upon `shutdown` are awaited.
    pub async fn serve<S>(self, requests: S, shutdown: CancellationToken)
    where
        S: Stream<Item = Request> + Send,
    {
        let mut requests = std::pin::pin!(requests.fuse());
        let mut running: FuturesUnordered<BoxFuture<'static, Completion<R::Error>>> =
            FuturesUnordered::new();
        let mut retries: FuturesUnordered<BoxFuture<'static, Request>> = FuturesUnordered::new();
        let mut queue = WorkQueue::default();

        loop {
            while running.len() < self.concurrency {
                let Some(request) = queue.pop() else { break };
                running.push(self.start(request));
            }

            // Requests are exhausted and nothing could produce further work.
            if requests.is_terminated()
                && running.is_empty()
                && retries.is_empty()
                && queue.pending.is_empty()
            {
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                request = requests.next(), if !requests.is_terminated() => {
                    // On None the stream is now terminated, which is re-checked above.
                    if let Some(request) = request {
                        queue.push(request);
                    }
                }
                Some((request, outcome)) = running.next(), if !running.is_empty() => {
                    if let Some(delay) = self.complete(&mut queue, &request, outcome) {
                        retries.push(async move {
                            tokio::time::sleep(delay).await;
                            request
                        }.boxed());
                    }
                }
                Some(request) = retries.next(), if !retries.is_empty() => {
                    queue.push(request);
                }
                else => break,
            }
        }

        if !running.is_empty() {
            tracing::info!(
                controller = R::NAME,
                running = running.len(),
                "controller signaled to stop and is awaiting running reconciliations"
            );
        }
        while let Some((request, outcome)) = running.next().await {
            _ = self.complete(&mut queue, &request, outcome);
        }
    }

    fn start(&self, request: Request) -> BoxFuture<'static, Completion<R::Error>> {
        let reconciler = self.reconciler.clone();
        let span = tracing::info_span!("reconcile", controller = R::NAME, %request);

        let task_request = request.clone();
        let handle = tokio::spawn(
            async move { reconciler.reconcile(&task_request).await }.instrument(span),
        );

        async move { (request, handle.await) }.boxed()
    }

    // Record the outcome of a reconciliation, returning a delay after which
    // its Request should be retried.
    fn complete(
        &self,
        queue: &mut WorkQueue,
        request: &Request,
        outcome: Result<Result<Action, R::Error>, tokio::task::JoinError>,
    ) -> Option<Duration> {
        queue.active.remove(request);

        let err = match outcome {
            Ok(Ok(action)) => {
                queue.failures.remove(request);

                return match action {
                    Action::Done => None,
                    Action::RequeueAfter(delay) => Some(delay),
                };
            }
            Ok(Err(err)) => Some(err),
            Err(join_err) => {
                tracing::error!(controller = R::NAME, %request, error = %join_err, "reconcile task panicked");
                None
            }
        };

        let failures = queue.failures.entry(request.clone()).or_default();
        *failures += 1;
        let failures = *failures;

        let delay = match &err {
            Some(err) => self.reconciler.retry_after(err, failures),
            None => Some(backoff(failures)),
        };
        let error = err.map(anyhow::Error::new);

        match delay {
            Some(delay) => {
                tracing::warn!(
                    controller = R::NAME,
                    %request,
                    failures,
                    ?delay,
                    ?error,
                    "reconcile failed (will retry)"
                );
            }
            None => {
                tracing::error!(
                    controller = R::NAME,
                    %request,
                    failures,
                    ?error,
                    "reconcile failed with a terminal error (will not retry)"
                );
                queue.failures.remove(request);
            }
        }
        delay
    }
}

/// WorkQueue holds Requests which are waiting to be reconciled.
/// A Request is queued at most once, and is not dequeued while it's active.
#[derive(Default)]
struct WorkQueue {
    pending: VecDeque<Request>,
    queued: HashSet<Request>,
    active: HashSet<Request>,
    failures: HashMap<Request, u32>,
}

impl WorkQueue {
    fn push(&mut self, request: Request) {
        if self.queued.insert(request.clone()) {
            self.pending.push_back(request);
        }
    }

    fn pop(&mut self) -> Option<Request> {
        let index = self
            .pending
            .iter()
            .position(|request| !self.active.contains(request))?;
        let request = self.pending.remove(index)?;

        self.queued.remove(&request);
        self.active.insert(request.clone());
        Some(request)
    }
}

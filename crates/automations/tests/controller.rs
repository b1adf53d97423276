use automations::{periodic, Action, CancellationToken, Controller, Reconciler, Request};
use models::ObjectKey;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}
impl std::error::Error for TestError {}

#[derive(Default, Debug, Clone, PartialEq)]
struct Stats {
    calls: u32,
    running: u32,
    max_running: u32,
}

/// Reconciler which records its invocations, sleeps for `work`,
/// and fails the first `fail_first` invocations of each request.
#[derive(Default)]
struct Recorder {
    work: Duration,
    fail_first: u32,
    terminal: bool,
    panic_first: bool,
    stats: Mutex<HashMap<Request, Stats>>,
}

impl Recorder {
    fn stats(&self, request: &Request) -> Stats {
        self.stats
            .lock()
            .unwrap()
            .get(request)
            .cloned()
            .unwrap_or_default()
    }
}

impl Reconciler for Recorder {
    const NAME: &'static str = "recorder";
    type Error = TestError;

    async fn reconcile<'s>(&'s self, request: &'s Request) -> Result<Action, TestError> {
        let calls = {
            let mut stats = self.stats.lock().unwrap();
            let entry = stats.entry(request.clone()).or_default();
            entry.calls += 1;
            entry.running += 1;
            entry.max_running = entry.max_running.max(entry.running);
            entry.calls
        };

        tokio::time::sleep(self.work).await;
        self.stats.lock().unwrap().get_mut(request).unwrap().running -= 1;

        if self.panic_first && calls == 1 {
            panic!("reconciler panicked");
        } else if calls <= self.fail_first {
            Err(TestError("whoops"))
        } else {
            Ok(Action::Done)
        }
    }

    fn retry_after(&self, _error: &TestError, failures: u32) -> Option<Duration> {
        if self.terminal {
            None
        } else {
            Some(automations::backoff(failures))
        }
    }
}

fn object(name: &str) -> Request {
    Request::Object(ObjectKey::new("ns", name))
}

#[tokio::test(start_paused = true)]
async fn test_periodic_trigger_and_cancellation() {
    let shutdown = CancellationToken::new();
    let start = Instant::now();
    let (mut rx, task) = periodic(Duration::from_secs(10), shutdown.clone()).unwrap();

    // Nothing is signaled before the first period elapses.
    assert!(tokio::time::timeout(Duration::from_secs(9), rx.recv())
        .await
        .is_err());

    assert_eq!(rx.recv().await, Some(automations::Trigger));
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(rx.recv().await, Some(automations::Trigger));
    assert_eq!(start.elapsed(), Duration::from_secs(20));

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_periodic_rejects_zero_period() {
    assert!(periodic(Duration::ZERO, CancellationToken::new()).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_serve_returns_once_requests_are_exhausted() {
    let recorder = Arc::new(Recorder {
        work: Duration::from_secs(1),
        fail_first: 1,
        ..Default::default()
    });

    // An empty stream has no work at all.
    let start = Instant::now();
    tokio::time::timeout(
        Duration::from_secs(60),
        Controller::new(recorder.clone(), 1)
            .serve(futures::stream::empty(), CancellationToken::new()),
    )
    .await
    .expect("serve of an empty stream must return");
    assert_eq!(start.elapsed(), Duration::ZERO);

    // Otherwise serve returns once queued work and its retries complete.
    tokio::time::timeout(
        Duration::from_secs(60),
        Controller::new(recorder.clone(), 1)
            .serve(futures::stream::iter([object("a")]), CancellationToken::new()),
    )
    .await
    .expect("serve must return after its work completes");
    assert_eq!(recorder.stats(&object("a")).calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_requests_are_deduplicated_and_exclusive() {
    let recorder = Arc::new(Recorder {
        work: Duration::from_secs(1),
        ..Default::default()
    });
    let requests = futures::stream::iter(vec![
        Request::SyncAll,
        object("a"),
        Request::SyncAll,
        object("a"),
        Request::SyncAll,
        object("b"),
        Request::SyncAll,
    ]);

    Controller::new(recorder.clone(), 4)
        .serve(requests, CancellationToken::new())
        .await;

    // The first SyncAll runs immediately. Later arrivals collapse into a
    // single follow-up, which runs only after the first completes.
    let sync_all = recorder.stats(&Request::SyncAll);
    assert_eq!(sync_all.calls, 2);
    assert_eq!(sync_all.max_running, 1);

    let a = recorder.stats(&object("a"));
    assert_eq!(a.calls, 2);
    assert_eq!(a.max_running, 1);

    assert_eq!(recorder.stats(&object("b")).calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let recorder = Arc::new(Recorder {
        work: Duration::from_secs(1),
        ..Default::default()
    });
    let requests = futures::stream::iter((0..6).map(|i| object(&format!("obj-{i}"))));

    let start = Instant::now();
    Controller::new(recorder.clone(), 2)
        .serve(requests, CancellationToken::new())
        .await;

    // Six one-second reconciliations, two at a time.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_retried_with_backoff() {
    let recorder = Arc::new(Recorder {
        fail_first: 2,
        ..Default::default()
    });

    let start = Instant::now();
    Controller::new(recorder.clone(), 1)
        .serve(futures::stream::iter([object("a")]), CancellationToken::new())
        .await;

    assert_eq!(recorder.stats(&object("a")).calls, 3);
    // Backoffs of one and then two seconds, each with up to 20% jitter.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3600), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_terminal_errors_are_not_retried() {
    let recorder = Arc::new(Recorder {
        fail_first: 1,
        terminal: true,
        ..Default::default()
    });

    Controller::new(recorder.clone(), 1)
        .serve(futures::stream::iter([object("a")]), CancellationToken::new())
        .await;

    assert_eq!(recorder.stats(&object("a")).calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_panics_are_retried() {
    let recorder = Arc::new(Recorder {
        panic_first: true,
        ..Default::default()
    });

    Controller::new(recorder.clone(), 1)
        .serve(futures::stream::iter([object("a")]), CancellationToken::new())
        .await;

    assert_eq!(recorder.stats(&object("a")).calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_awaits_running_reconciliations() {
    let recorder = Arc::new(Recorder {
        work: Duration::from_secs(5),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();

    // A request stream which never ends.
    let requests = futures::StreamExt::chain(
        futures::stream::iter([object("a")]),
        futures::stream::pending(),
    );

    let cancel = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let start = Instant::now();
    Controller::new(recorder.clone(), 1)
        .serve(requests, shutdown)
        .await;

    let stats = recorder.stats(&object("a"));
    assert_eq!((stats.calls, stats.running), (1, 0));
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Trigger is a payload-less signal of a periodic trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger;

/// Start a periodic trigger source, which signals once per `period`.
/// The first Trigger is sent one `period` after this call.
///
/// The source runs until `shutdown` is cancelled or the receiver is dropped,
/// at which point the returned task completes and the channel is closed.
/// Ticks which were missed because of a stalled runtime are not replayed.
pub fn periodic(
    period: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<(
    mpsc::UnboundedReceiver<Trigger>,
    tokio::task::JoinHandle<()>,
)> {
    if period.is_zero() {
        anyhow::bail!("trigger period must be greater than zero");
    }
    let (tx, rx) = mpsc::unbounded_channel();

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(Trigger).is_err() {
                        break; // Receiver was dropped.
                    }
                }
            }
        }
        tracing::debug!(?period, "periodic trigger stopped");
    });

    Ok((rx, task))
}

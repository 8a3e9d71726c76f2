use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Spawn a timer task that emits a tick every `interval`.
///
/// The session loop turns each tick into a transport Ping and a
/// lifecycle-limit check. The first tick fires one interval after start.
/// The task ends when `cancel` fires or the receiver is dropped.
pub fn start_ticker(
    interval: Duration,
    cancel: CancellationToken,
) -> (tokio::task::JoinHandle<()>, mpsc::Receiver<Instant>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                at = ticks.tick() => {
                    if tx.send(at).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Keep-alive ticker stopped");
    });
    (handle, rx)
}

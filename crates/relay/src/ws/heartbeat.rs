use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::GroupManager;

/// Ping every attached client and worker socket once per `every`.
///
/// Rounds with no attached sockets are skipped. Stops when `cancel` fires.
pub fn start_heartbeat(
    groups: Arc<GroupManager>,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let attached = groups.connection_count().await;
            if attached == 0 {
                continue;
            }
            tracing::trace!(attached, "Relay keep-alive round");
            groups.ping_all().await;
        }
        tracing::debug!("Relay heartbeat stopped");
    })
}

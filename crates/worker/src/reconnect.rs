//! Exponential-backoff reconnection to the relay.
//!
//! A worker only reconnects while its lease is still fresh. A stale or
//! missing lease means the session belongs to the sweep or to a newer
//! sibling.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{RelayClient, RelayStream};
use crate::lease::{Freshness, WorkerLease};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Retry the relay connection until it succeeds, the lease stops being
/// fresh, or `cancel` fires. Returns `None` in the latter two cases.
pub async fn reconnect_loop(
    client: &RelayClient,
    lease: &WorkerLease,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<RelayStream> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        match lease.check_fresh().await {
            Ok(Freshness::Fresh) => {}
            Ok(freshness) => {
                tracing::info!(worker_id = lease.id(), ?freshness, "Lease no longer fresh; giving up on reconnect");
                return None;
            }
            Err(e) => {
                tracing::warn!(worker_id = lease.id(), error = %e, "Lease check failed during reconnect");
            }
        }

        attempt += 1;
        tracing::info!(
            worker_id = client.worker_id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to relay",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker_id = client.worker_id(), "Reconnect cancelled");
                return None;
            }
            result = client.connect() => match result {
                Ok(stream) => {
                    tracing::info!(worker_id = client.worker_id(), attempt, "Reconnected to relay");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = client.worker_id(),
                        error = %e,
                        "Reconnect attempt {attempt} failed",
                    );
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

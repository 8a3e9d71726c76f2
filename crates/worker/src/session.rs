//! The worker's relay connection loop.
//!
//! Connects to the relay, claims the lease, and then multiplexes on one
//! task: keep-alive ticks, engine replies, engine state changes and
//! incoming relay frames. Lost connections are re-established while the
//! lease stays fresh.

use std::time::{Duration, Instant};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use livenb_core::protocol::{parse_client_message, ClientMessage, WorkerMessage};
use livenb_core::worker_state::WorkerState;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::client::{RelayClient, RelayStream};
use crate::engine::EngineHandle;
use crate::error::{WorkerError, WorkerResult};
use crate::heartbeat::start_ticker;
use crate::lease::{Freshness, LifecycleLimits, WorkerLease};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

type RelaySink = SplitSink<RelayStream, Message>;

/// Why a worker session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The client went away (`close-worker`) or the engine stopped.
    Closed,
    /// Our lease went stale or was deleted.
    LeaseStale,
    /// An idle or run-time limit was reached.
    LimitReached(WorkerState),
    Cancelled,
    /// The relay stayed unreachable.
    ConnectionLost,
}

/// Outcome of driving one connection.
enum Drive {
    Exit(ExitReason),
    Disconnected,
}

pub struct WorkerSession {
    client: RelayClient,
    lease: WorkerLease,
    engine: EngineHandle,
    limits: LifecycleLimits,
    keepalive: Duration,
    reconnect: ReconnectConfig,
}

impl WorkerSession {
    pub fn new(
        client: RelayClient,
        lease: WorkerLease,
        engine: EngineHandle,
        limits: LifecycleLimits,
        keepalive: Duration,
    ) -> Self {
        Self {
            client,
            lease,
            engine,
            limits,
            keepalive,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Run until the session ends. The lease is released on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerResult<ExitReason> {
        let mut conn = match self.client.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Initial relay connection failed");
                match reconnect_loop(&self.client, &self.lease, &self.reconnect, &cancel).await {
                    Some(conn) => conn,
                    None => return Ok(self.finish(ExitReason::ConnectionLost).await),
                }
            }
        };

        match self.lease.claim().await {
            Ok(_) => {}
            Err(WorkerError::LeaseLost(id)) => {
                tracing::warn!(worker_id = id, "Lease vanished before it was claimed");
                return Ok(ExitReason::LeaseStale);
            }
            Err(e) => {
                self.lease.release().await;
                return Err(e);
            }
        }
        self.forward(ClientMessage::InitNotebook)?;

        loop {
            match self.drive(conn, &cancel).await {
                Drive::Exit(reason) => return Ok(self.finish(reason).await),
                Drive::Disconnected => {}
            }
            tracing::warn!(worker_id = self.lease.id(), "Relay connection lost");
            conn = match reconnect_loop(&self.client, &self.lease, &self.reconnect, &cancel).await
            {
                Some(conn) => conn,
                None if cancel.is_cancelled() => {
                    return Ok(self.finish(ExitReason::Cancelled).await);
                }
                None => return Ok(self.finish(ExitReason::ConnectionLost).await),
            };
        }
    }

    async fn drive(&mut self, conn: RelayStream, cancel: &CancellationToken) -> Drive {
        let (mut sink, mut stream) = conn.split();
        let ticker_cancel = cancel.child_token();
        let (_ticker, mut ticks) = start_ticker(self.keepalive, ticker_cancel.clone());
        let _stop_ticker = ticker_cancel.drop_guard();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Drive::Exit(ExitReason::Cancelled),

                Some(_) = ticks.recv() => {
                    if let Some(state) = self.limits.exceeded(Instant::now()) {
                        tracing::info!(worker_id = self.lease.id(), ?state, "Lifecycle limit reached");
                        if let Err(e) = self.lease.set_state(state).await {
                            tracing::warn!(error = %e, "Failed to record terminal state");
                        }
                        let _ = send(&mut sink, &WorkerMessage::WorkerState { state }).await;
                        let _ = sink.send(Message::Close(None)).await;
                        return Drive::Exit(ExitReason::LimitReached(state));
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        tracing::debug!(error = %e, "Keep-alive ping failed");
                        return Drive::Disconnected;
                    }
                }

                reply = self.engine.outbound.recv() => match reply {
                    Some(reply) => {
                        if let Err(e) = send(&mut sink, &reply).await {
                            tracing::debug!(error = %e, purpose = ?reply.purpose(), "Failed to send reply");
                            return Drive::Disconnected;
                        }
                    }
                    None => {
                        tracing::info!(worker_id = self.lease.id(), "Engine stopped");
                        return Drive::Exit(ExitReason::Closed);
                    }
                },

                changed = self.engine.state.changed() => {
                    if changed.is_err() {
                        return Drive::Exit(ExitReason::Closed);
                    }
                    let state = *self.engine.state.borrow_and_update();
                    if let Err(e) = self.lease.set_state(state).await {
                        tracing::warn!(error = %e, ?state, "Failed to record worker state");
                    }
                    if send(&mut sink, &WorkerMessage::WorkerState { state }).await.is_err() {
                        return Drive::Disconnected;
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(exit) = self.on_text(&mut sink, &text).await {
                            return exit;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => match self.lease.check_fresh().await {
                        Ok(Freshness::Fresh) => {}
                        Ok(freshness) => {
                            tracing::info!(worker_id = self.lease.id(), ?freshness, "Own lease no longer fresh");
                            let _ = sink.send(Message::Close(None)).await;
                            return Drive::Exit(ExitReason::LeaseStale);
                        }
                        Err(e) => tracing::warn!(error = %e, "Lease freshness check failed"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Relay closed WebSocket");
                        return Drive::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket receive error");
                        return Drive::Disconnected;
                    }
                    None => return Drive::Disconnected,
                },
            }
        }
    }

    /// Handle one incoming text frame. `Some` ends the connection.
    async fn on_text(&mut self, sink: &mut RelaySink, text: &str) -> Option<Drive> {
        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable frame");
                return None;
            }
        };

        match message {
            ClientMessage::WorkerPing => {
                if let Err(e) = self.lease.touch().await {
                    tracing::warn!(error = %e, "Failed to refresh lease");
                }
                let state = *self.engine.state.borrow();
                if send(sink, &WorkerMessage::WorkerState { state }).await.is_err() {
                    return Some(Drive::Disconnected);
                }
                None
            }
            ClientMessage::ServerAddress { .. } => None,
            ClientMessage::CloseWorker => {
                tracing::info!(worker_id = self.lease.id(), "Client closed the session");
                let _ = self.forward(ClientMessage::CloseWorker);
                let _ = sink.send(Message::Close(None)).await;
                Some(Drive::Exit(ExitReason::Closed))
            }
            message => {
                if matches!(
                    message,
                    ClientMessage::RunNotebook { .. } | ClientMessage::InitNotebook
                ) {
                    self.limits.record_activity(Instant::now());
                }
                match self.forward(message) {
                    Ok(()) => None,
                    Err(_) => Some(Drive::Exit(ExitReason::Closed)),
                }
            }
        }
    }

    fn forward(&self, message: ClientMessage) -> WorkerResult<()> {
        self.engine
            .commands
            .send(message)
            .map_err(|_| WorkerError::Protocol("Engine is no longer running".into()))
    }

    async fn finish(&self, reason: ExitReason) -> ExitReason {
        self.lease.release().await;
        tracing::info!(worker_id = self.lease.id(), ?reason, "Worker session ended");
        reason
    }
}

async fn send(sink: &mut RelaySink, message: &WorkerMessage) -> Result<(), tungstenite::Error> {
    sink.send(Message::Text(message.to_text())).await
}

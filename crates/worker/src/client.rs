//! WebSocket client for the relay's worker endpoint.

use livenb_core::types::DbId;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{WorkerError, WorkerResult};

pub type RelayStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for one worker's relay socket.
#[derive(Debug, Clone)]
pub struct RelayClient {
    server_address: String,
    notebook_id: DbId,
    session_id: String,
    worker_id: DbId,
    machine: String,
}

impl RelayClient {
    /// * `server_address` - relay base URL, e.g. `ws://relay:8000`.
    /// * `machine`        - host address recorded on the usage row.
    pub fn new(
        server_address: impl Into<String>,
        notebook_id: DbId,
        session_id: impl Into<String>,
        worker_id: DbId,
        machine: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            notebook_id,
            session_id: session_id.into(),
            worker_id,
            machine: machine.into(),
        }
    }

    pub fn worker_id(&self) -> DbId {
        self.worker_id
    }

    pub fn url(&self) -> String {
        format!(
            "{}/ws/worker/{}/{}/{}?machine={}",
            self.server_address.trim_end_matches('/'),
            self.notebook_id,
            self.session_id,
            self.worker_id,
            self.machine,
        )
    }

    pub async fn connect(&self) -> WorkerResult<RelayStream> {
        let url = self.url();
        let (stream, _response) = connect_async(&url).await.map_err(|e| {
            WorkerError::Connection(format!(
                "Failed to connect to relay at {}: {e}",
                self.server_address
            ))
        })?;

        tracing::info!(
            worker_id = self.worker_id,
            notebook_id = self.notebook_id,
            session_id = %self.session_id,
            "Connected to relay at {}",
            self.server_address,
        );
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_addresses_the_worker_route() {
        let client = RelayClient::new("ws://relay:8000/", 42, "abc", 9, "10.0.0.5");
        assert_eq!(client.url(), "ws://relay:8000/ws/worker/42/abc/9?machine=10.0.0.5");
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_connection_error() {
        let client = RelayClient::new("ws://127.0.0.1:1", 1, "abc", 1, "h");
        assert!(matches!(client.connect().await, Err(WorkerError::Connection(_))));
    }
}

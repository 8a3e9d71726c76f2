//! Dev-mode reload of a locally edited notebook file.
//!
//! The file is polled: a newer mtime triggers a checksum, and only a
//! changed checksum re-initializes the engine. Saving a file without
//! editing it is therefore a no-op.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use livenb_core::hashing::checksum_file;
use livenb_core::protocol::ClientMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct NotebookWatcher {
    path: PathBuf,
    mtime: Option<SystemTime>,
    checksum: Option<String>,
}

impl NotebookWatcher {
    /// Record the file's current state as the baseline.
    pub async fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mtime = modified(&path).await;
        let checksum = checksum_file(&path).await.ok();
        Self {
            path,
            mtime,
            checksum,
        }
    }

    /// Whether the file content changed since the last call.
    pub async fn poll(&mut self) -> bool {
        let mtime = modified(&self.path).await;
        let touched = match (mtime, self.mtime) {
            (Some(new), Some(old)) => new > old,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !touched {
            return false;
        }
        self.mtime = mtime;

        let checksum = match checksum_file(&self.path).await {
            Ok(checksum) => checksum,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Notebook file unreadable");
                return false;
            }
        };
        if self.checksum.as_deref() == Some(checksum.as_str()) {
            return false;
        }
        self.checksum = Some(checksum);
        true
    }

    /// Poll every `interval` and enqueue `init-notebook` on each change.
    pub fn spawn(
        mut self,
        interval: Duration,
        commands: mpsc::UnboundedSender<ClientMessage>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                if self.poll().await {
                    tracing::info!(path = %self.path.display(), "Notebook changed; reinitializing");
                    if commands.send(ClientMessage::InitNotebook).is_err() {
                        break;
                    }
                }
            }
        })
    }
}

async fn modified(path: &std::path::Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
}

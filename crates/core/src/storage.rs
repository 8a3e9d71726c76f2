//! Artifact storage for rendered notebooks and uploaded files.
//!
//! Artifacts are grouped per session so the stale sweep can delete all of
//! a session's files in one call. [`LocalStorage`] keeps them on the local
//! filesystem below a root that is also served at `media_url`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::error::CoreError;

/// Directory below the storage root holding upload tokens.
pub const UPLOADS_DIR: &str = "uploads";

/// Directory below the storage root holding one directory per session.
/// Kept apart from [`UPLOADS_DIR`] so no session id can alias the uploads.
pub const SESSIONS_DIR: &str = "sessions";

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedArtifact {
    /// Local filesystem path.
    pub path: PathBuf,
    /// Public URL the client downloads from.
    pub url: String,
    pub filename: String,
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn save_html(&self, session_id: &str, html: &[u8]) -> Result<SavedArtifact, CoreError>;

    /// Convert a full HTML document to PDF and store it.
    async fn save_pdf(
        &self,
        session_id: &str,
        html: &[u8],
        is_presentation: bool,
    ) -> Result<SavedArtifact, CoreError>;

    /// Resolve a File widget's upload token to a local path.
    async fn load_upload(&self, token: &str) -> Result<PathBuf, CoreError>;

    /// Remove every artifact of a session. Missing sessions are not an error.
    async fn delete_session(&self, session_id: &str) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Local filesystem backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    media_url: String,
    /// Converter invoked as `<command...> <input.html> <output.pdf>`.
    pdf_command: Option<String>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, media_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            media_url: media_url.into().trim_end_matches('/').to_string(),
            pdf_command: None,
        }
    }

    pub fn with_pdf_command(mut self, command: Option<String>) -> Self {
        self.pdf_command = command.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, CoreError> {
        validate_segment("session_id", session_id)?;
        Ok(self.root.join(SESSIONS_DIR).join(session_id))
    }

    fn artifact(&self, session_id: &str, filename: String) -> SavedArtifact {
        SavedArtifact {
            path: self.root.join(SESSIONS_DIR).join(session_id).join(&filename),
            url: format!("{}/{SESSIONS_DIR}/{session_id}/{filename}", self.media_url),
            filename,
        }
    }

    async fn write(&self, session_id: &str, ext: &str, bytes: &[u8]) -> Result<SavedArtifact, CoreError> {
        let dir = self.session_dir(session_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::capability("storage", format!("{}: {e}", dir.display())))?;
        let artifact = self.artifact(session_id, format!("{}.{ext}", uuid::Uuid::new_v4()));
        tokio::fs::write(&artifact.path, bytes)
            .await
            .map_err(|e| CoreError::capability("storage", e))?;
        Ok(artifact)
    }
}

/// Reject path segments that could escape the storage root.
fn validate_segment(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
    {
        return Err(CoreError::Validation(format!(
            "Invalid {field} '{value}' for artifact storage"
        )));
    }
    Ok(())
}

#[async_trait]
impl ArtifactStorage for LocalStorage {
    async fn save_html(&self, session_id: &str, html: &[u8]) -> Result<SavedArtifact, CoreError> {
        let artifact = self.write(session_id, "html", html).await?;
        tracing::debug!(session_id, path = %artifact.path.display(), "Saved HTML artifact");
        Ok(artifact)
    }

    async fn save_pdf(
        &self,
        session_id: &str,
        html: &[u8],
        is_presentation: bool,
    ) -> Result<SavedArtifact, CoreError> {
        let Some(command) = &self.pdf_command else {
            return Err(CoreError::capability("pdf", "no PDF converter configured"));
        };
        let source = self.write(session_id, "html", html).await?;
        let target = self.artifact(session_id, format!("{}.pdf", uuid::Uuid::new_v4()));

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::capability("pdf", "empty PDF command"))?;
        let output = Command::new(program)
            .args(parts)
            .arg(&source.path)
            .arg(&target.path)
            .env(
                "PDF_LAYOUT",
                if is_presentation { "landscape" } else { "portrait" },
            )
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::capability("pdf", e))?;

        let _ = tokio::fs::remove_file(&source.path).await;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::capability(
                "pdf",
                format!("converter exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        tracing::debug!(session_id, path = %target.path.display(), "Saved PDF artifact");
        Ok(target)
    }

    async fn load_upload(&self, token: &str) -> Result<PathBuf, CoreError> {
        validate_segment("upload token", token)?;
        let path = self.root.join(UPLOADS_DIR).join(token);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(CoreError::Validation(format!("Unknown upload token '{token}'"))),
            Err(e) => Err(CoreError::capability("storage", e)),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), CoreError> {
        let dir = self.session_dir(session_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(session_id, "Deleted session artifacts");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::capability("storage", e)),
        }
    }
}

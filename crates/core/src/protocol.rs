//! Wire protocol shared by browser clients, the relay, and workers.
//!
//! Every frame is a JSON text message with a `purpose` discriminator.
//! [`ClientMessage`] covers client → worker traffic, [`WorkerMessage`]
//! covers worker → client traffic. The relay only ever peeks at the
//! discriminator via [`peek_purpose`]; payloads are forwarded untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::DbId;
use crate::worker_state::WorkerState;

// ---------------------------------------------------------------------------
// Roles and group keys
// ---------------------------------------------------------------------------

/// Which side of a session a relay connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Worker,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Worker => "worker",
        }
    }

    /// The role on the other end of the relay.
    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Worker,
            Role::Worker => Role::Client,
        }
    }
}

/// Fan-out group identity: `"{role}-{notebook_id}-{session_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub role: Role,
    pub notebook_id: DbId,
    pub session_id: String,
}

impl GroupKey {
    pub fn new(role: Role, notebook_id: DbId, session_id: impl Into<String>) -> Self {
        Self {
            role,
            notebook_id,
            session_id: session_id.into(),
        }
    }

    /// The group of the opposite role for the same session.
    pub fn peer(&self) -> Self {
        Self {
            role: self.role.peer(),
            notebook_id: self.notebook_id,
            session_id: self.session_id.clone(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.role.as_str(),
            self.notebook_id,
            self.session_id
        )
    }
}

/// Longest accepted session token.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Session tokens name groups and artifact directories, so they are
/// restricted to ASCII alphanumerics, `-`, and `_`.
pub fn validate_session_id(session_id: &str) -> Result<(), CoreError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid session id '{session_id}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Purposes
// ---------------------------------------------------------------------------

/// Every known `purpose` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    // client -> worker
    WorkerPing,
    ServerAddress,
    InitNotebook,
    RunNotebook,
    SaveNotebook,
    DisplayNotebook,
    CloseWorker,
    // both directions: a request from the client, a {url, filename} reply
    // from the worker
    DownloadHtml,
    DownloadPdf,
    // worker -> client
    WorkerState,
    ExecutedNotebook,
    InitWidgets,
    UpdateWidgets,
    HideWidgets,
    UpdateTitle,
    UpdateShowCode,
    SavedNotebook,
}

impl Purpose {
    /// Whether a connection with `role` may send a message of this purpose.
    pub fn sent_by(self, role: Role) -> bool {
        use Purpose::*;
        match self {
            DownloadHtml | DownloadPdf => true,
            WorkerPing | ServerAddress | InitNotebook | RunNotebook | SaveNotebook
            | DisplayNotebook | CloseWorker => role == Role::Client,
            WorkerState | ExecutedNotebook | InitWidgets | UpdateWidgets | HideWidgets
            | UpdateTitle | UpdateShowCode | SavedNotebook => role == Role::Worker,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    purpose: Purpose,
}

/// Read only the `purpose` field of a frame.
///
/// Fails for malformed JSON and for unknown purposes; callers log and drop.
pub fn peek_purpose(text: &str) -> Result<Purpose, serde_json::Error> {
    serde_json::from_str::<Envelope>(text).map(|e| e.purpose)
}

// ---------------------------------------------------------------------------
// Client -> worker
// ---------------------------------------------------------------------------

/// Messages addressed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "kebab-case")]
pub enum ClientMessage {
    WorkerPing,
    ServerAddress {
        address: String,
    },
    /// Enqueued by the worker itself on connect and by the dev watcher.
    InitNotebook,
    RunNotebook {
        #[serde(default)]
        widgets: Map<String, Value>,
    },
    SaveNotebook,
    DisplayNotebook,
    DownloadHtml,
    DownloadPdf,
    CloseWorker,
}

impl ClientMessage {
    pub fn purpose(&self) -> Purpose {
        match self {
            ClientMessage::WorkerPing => Purpose::WorkerPing,
            ClientMessage::ServerAddress { .. } => Purpose::ServerAddress,
            ClientMessage::InitNotebook => Purpose::InitNotebook,
            ClientMessage::RunNotebook { .. } => Purpose::RunNotebook,
            ClientMessage::SaveNotebook => Purpose::SaveNotebook,
            ClientMessage::DisplayNotebook => Purpose::DisplayNotebook,
            ClientMessage::DownloadHtml => Purpose::DownloadHtml,
            ClientMessage::DownloadPdf => Purpose::DownloadPdf,
            ClientMessage::CloseWorker => Purpose::CloseWorker,
        }
    }
}

/// Parse a client frame into a typed message.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Worker -> client
// ---------------------------------------------------------------------------

/// Messages addressed to the browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "kebab-case")]
pub enum WorkerMessage {
    WorkerState {
        state: WorkerState,
    },
    ExecutedNotebook {
        body: String,
        #[serde(
            rename = "reloadNotebook",
            default,
            skip_serializing_if = "std::ops::Not::not"
        )]
        reload_notebook: bool,
    },
    InitWidgets {
        widgets: Map<String, Value>,
    },
    UpdateWidgets {
        widgets: Map<String, Value>,
    },
    HideWidgets {
        keys: Vec<String>,
    },
    UpdateTitle {
        title: String,
    },
    UpdateShowCode {
        #[serde(rename = "showCode")]
        show_code: bool,
    },
    SavedNotebook,
    DownloadHtml {
        url: String,
        filename: String,
    },
    DownloadPdf {
        url: String,
        filename: String,
    },
}

impl WorkerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> String {
        // Every variant holds only strings, bools, and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn purpose(&self) -> Purpose {
        match self {
            WorkerMessage::WorkerState { .. } => Purpose::WorkerState,
            WorkerMessage::ExecutedNotebook { .. } => Purpose::ExecutedNotebook,
            WorkerMessage::InitWidgets { .. } => Purpose::InitWidgets,
            WorkerMessage::UpdateWidgets { .. } => Purpose::UpdateWidgets,
            WorkerMessage::HideWidgets { .. } => Purpose::HideWidgets,
            WorkerMessage::UpdateTitle { .. } => Purpose::UpdateTitle,
            WorkerMessage::UpdateShowCode { .. } => Purpose::UpdateShowCode,
            WorkerMessage::SavedNotebook => Purpose::SavedNotebook,
            WorkerMessage::DownloadHtml { .. } => Purpose::DownloadHtml,
            WorkerMessage::DownloadPdf { .. } => Purpose::DownloadPdf,
        }
    }
}

/// The `close-worker` control frame the relay injects on client disconnect.
pub fn close_worker_frame() -> String {
    serde_json::to_string(&ClientMessage::CloseWorker).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    // -- group keys -----------------------------------------------------------

    #[test]
    fn group_key_formats_role_notebook_session() {
        let key = GroupKey::new(Role::Client, 42, "abc");
        assert_eq!(key.to_string(), "client-42-abc");
        assert_eq!(key.peer().to_string(), "worker-42-abc");
    }

    #[test]
    fn session_ids_are_restricted_to_safe_characters() {
        assert!(validate_session_id("abc-123_XY").is_ok());
        assert_matches!(validate_session_id(""), Err(CoreError::Validation(_)));
        assert_matches!(validate_session_id("../up"), Err(CoreError::Validation(_)));
        assert!(validate_session_id(&"a".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    // -- peek_purpose ---------------------------------------------------------

    #[test]
    fn peek_reads_known_purpose_and_ignores_payload() {
        let text = r#"{"purpose":"run-notebook","widgets":{"w1.3":5},"extra":true}"#;
        assert_eq!(peek_purpose(text).unwrap(), Purpose::RunNotebook);
    }

    #[test]
    fn peek_rejects_unknown_purpose_and_garbage() {
        assert!(peek_purpose(r#"{"purpose":"format-disk"}"#).is_err());
        assert!(peek_purpose("not json").is_err());
        assert!(peek_purpose(r#"{"widgets":{}}"#).is_err());
    }

    #[test]
    fn direction_rules() {
        assert!(Purpose::WorkerPing.sent_by(Role::Client));
        assert!(!Purpose::WorkerPing.sent_by(Role::Worker));
        assert!(Purpose::ExecutedNotebook.sent_by(Role::Worker));
        assert!(!Purpose::ExecutedNotebook.sent_by(Role::Client));
        assert!(Purpose::DownloadPdf.sent_by(Role::Client));
        assert!(Purpose::DownloadPdf.sent_by(Role::Worker));
    }

    // -- client messages ------------------------------------------------------

    #[test]
    fn parse_run_notebook_with_widgets() {
        let msg = parse_client_message(r#"{"purpose":"run-notebook","widgets":{"w1.3":5}}"#)
            .unwrap();
        assert_matches!(msg, ClientMessage::RunNotebook { widgets } => {
            assert_eq!(widgets["w1.3"], json!(5));
        });
    }

    #[test]
    fn parse_run_notebook_without_widgets_defaults_to_empty() {
        let msg = parse_client_message(r#"{"purpose":"run-notebook"}"#).unwrap();
        assert_matches!(msg, ClientMessage::RunNotebook { widgets } if widgets.is_empty());
    }

    #[test]
    fn parse_server_address() {
        let msg =
            parse_client_message(r#"{"purpose":"server-address","address":"ws://relay:8000"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ServerAddress {
                address: "ws://relay:8000".into()
            }
        );
    }

    #[test]
    fn client_message_purpose_matches_its_wire_tag() {
        let run = ClientMessage::RunNotebook {
            widgets: Map::new(),
        };
        let text = serde_json::to_string(&run).unwrap();
        assert_eq!(peek_purpose(&text).unwrap(), run.purpose());
        assert_eq!(ClientMessage::InitNotebook.purpose(), Purpose::InitNotebook);
    }

    #[test]
    fn close_worker_frame_is_parseable() {
        assert_eq!(
            parse_client_message(&close_worker_frame()).unwrap(),
            ClientMessage::CloseWorker
        );
    }

    // -- worker messages ------------------------------------------------------

    #[test]
    fn executed_notebook_omits_reload_flag_when_false() {
        let msg = WorkerMessage::ExecutedNotebook {
            body: "<div/>".into(),
            reload_notebook: false,
        };
        let value: Value = serde_json::from_str(&msg.to_text()).unwrap();
        assert_eq!(value, json!({"purpose": "executed-notebook", "body": "<div/>"}));
    }

    #[test]
    fn executed_notebook_carries_reload_flag_in_camel_case() {
        let msg = WorkerMessage::ExecutedNotebook {
            body: String::new(),
            reload_notebook: true,
        };
        let value: Value = serde_json::from_str(&msg.to_text()).unwrap();
        assert_eq!(value["reloadNotebook"], json!(true));
    }

    #[test]
    fn worker_state_and_show_code_wire_shapes() {
        let state = WorkerMessage::WorkerState {
            state: WorkerState::Busy,
        };
        assert_eq!(state.to_text(), r#"{"purpose":"worker-state","state":"Busy"}"#);

        let show = WorkerMessage::UpdateShowCode { show_code: true };
        assert_eq!(show.to_text(), r#"{"purpose":"update-show-code","showCode":true}"#);
        assert_eq!(show.purpose(), Purpose::UpdateShowCode);
    }

    #[test]
    fn every_worker_message_purpose_matches_its_wire_tag() {
        let samples = [
            WorkerMessage::HideWidgets { keys: vec!["a".into()] },
            WorkerMessage::SavedNotebook,
            WorkerMessage::DownloadHtml {
                url: "/media/x.html".into(),
                filename: "x.html".into(),
            },
        ];
        for msg in samples {
            assert_eq!(peek_purpose(&msg.to_text()).unwrap(), msg.purpose());
        }
    }
}

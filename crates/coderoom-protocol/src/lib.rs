pub mod language;

pub use language::{ExecutionKind, Language, UnknownLanguage};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a live session (room).
pub type SessionId = String;

/// Unique identifier for one live participant connection.
pub type ParticipantId = String;

/// Full copy of a workspace tree keyed by `/`-joined path.
pub type TreeSnapshot = BTreeMap<String, Node>;

/// Exit code reported when the pipeline produced none (timeout, signal, spawn failure).
pub const NO_EXIT_CODE: i32 = -1;

/// One entry of a workspace tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Node {
    File {
        name: String,
        content: String,
        created_at_epoch_ms: u64,
    },
    Folder {
        name: String,
        expanded: bool,
        created_at_epoch_ms: u64,
    },
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::File { name, .. } | Node::Folder { name, .. } => name,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Node::File { content, .. } => Some(content),
            Node::Folder { .. } => None,
        }
    }
}

/// Editor cursor location, 1-based like the editor widget reports it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line_number: u32,
    pub column: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub joined_at_epoch_ms: u64,
}

/// Summary returned by the session lookup endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at_epoch_ms: u64,
    pub participants: Vec<Participant>,
    pub entry_count: usize,
}

/// Client-to-server intents sent as JSON text frames over the WebSocket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        session_id: SessionId,
        name: String,
    },
    EditContent {
        session_id: SessionId,
        path: String,
        content: String,
    },
    MoveCursor {
        session_id: SessionId,
        position: CursorPosition,
    },
    CreateFile {
        session_id: SessionId,
        path: String,
        #[serde(default)]
        content: String,
    },
    CreateFolder {
        session_id: SessionId,
        path: String,
    },
    DeleteItem {
        session_id: SessionId,
        path: String,
    },
    RenameItem {
        session_id: SessionId,
        old_path: String,
        new_path: String,
    },
    ToggleFolder {
        session_id: SessionId,
        path: String,
    },
}

impl ClientMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ClientMessage::Join { session_id, .. }
            | ClientMessage::EditContent { session_id, .. }
            | ClientMessage::MoveCursor { session_id, .. }
            | ClientMessage::CreateFile { session_id, .. }
            | ClientMessage::CreateFolder { session_id, .. }
            | ClientMessage::DeleteItem { session_id, .. }
            | ClientMessage::RenameItem { session_id, .. }
            | ClientMessage::ToggleFolder { session_id, .. } => session_id,
        }
    }
}

/// Server-to-client events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full tree, sent only to a participant that just joined.
    TreeSnapshot {
        session_id: SessionId,
        entries: TreeSnapshot,
    },
    Roster {
        participants: Vec<Participant>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        joined: Option<Participant>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        left: Option<ParticipantId>,
    },
    ContentUpdated {
        path: String,
        content: String,
    },
    ItemCreated {
        path: String,
        node: Node,
    },
    ItemDeleted {
        path: String,
    },
    ItemRenamed {
        old_path: String,
        new_path: String,
    },
    FolderToggled {
        path: String,
        expanded: bool,
    },
    CursorMoved {
        participant_id: ParticipantId,
        name: String,
        position: CursorPosition,
    },
    RunCompleted {
        result: ExecutionResult,
    },
    Error {
        message: String,
    },
}

/// Terminal state of an execution request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompileFailed,
    TimedOut,
    Failed,
    Unsupported,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub error: bool,
    pub status: RunStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub session_id: SessionId,
    pub language: String,
    #[serde(alias = "code")]
    pub source: String,
    /// Requesting participant, skipped when the result is broadcast.
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionLookupResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_shape() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"rename-item","sessionId":"ab12cd34","oldPath":"a","newPath":"b"}"#,
        )
        .expect("parse json");
        match msg {
            ClientMessage::RenameItem {
                session_id,
                old_path,
                new_path,
            } => {
                assert_eq!(session_id, "ab12cd34");
                assert_eq!(old_path, "a");
                assert_eq!(new_path, "b");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn create_file_content_defaults_to_empty() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"create-file","sessionId":"s","path":"x.py"}"#)
                .expect("parse json");
        assert!(matches!(msg, ClientMessage::CreateFile { ref content, .. } if content.is_empty()));
        assert_eq!(msg.session_id(), "s");
    }

    #[test]
    fn server_message_tags_are_kebab_case() {
        let value = serde_json::to_value(ServerMessage::ItemRenamed {
            old_path: "a".into(),
            new_path: "b".into(),
        })
        .expect("encode json");
        assert_eq!(value["type"], "item-renamed");
        assert_eq!(value["oldPath"], "a");

        let roster = serde_json::to_value(ServerMessage::Roster {
            participants: vec![],
            joined: None,
            left: Some("p1".into()),
        })
        .expect("encode json");
        assert_eq!(roster["left"], "p1");
        assert!(roster.get("joined").is_none());
    }

    #[test]
    fn node_fields_are_camel_case() {
        let value = serde_json::to_value(Node::Folder {
            name: "src".into(),
            expanded: true,
            created_at_epoch_ms: 7,
        })
        .expect("encode json");
        assert_eq!(value["type"], "folder");
        assert_eq!(value["createdAtEpochMs"], 7);
    }

    #[test]
    fn execute_request_accepts_code_alias() {
        let req: ExecuteRequest = serde_json::from_str(
            r#"{"sessionId":"s","language":"python","code":"print(1)"}"#,
        )
        .expect("parse json");
        assert_eq!(req.source, "print(1)");
        assert!(req.participant_id.is_none());
    }
}

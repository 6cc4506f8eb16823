//! JSON frames exchanged over the realtime WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, Notification};

/// Where a typing indicator applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TypingScope {
    Document(String),
    Team(String),
}

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinDocument {
        document_id: String,
    },
    LeaveDocument {
        document_id: String,
    },
    /// Opaque base64 CRDT delta, optionally with the editor's current plain-text rendering
    DocumentUpdate {
        document_id: String,
        update: String,
        #[serde(default)]
        content: Option<String>,
    },
    Cursor {
        document_id: String,
        cursor: Value,
    },
    JoinTeam {
        team_id: String,
    },
    LeaveTeam {
        team_id: String,
    },
    Typing {
        scope: TypingScope,
        is_typing: bool,
    },
    ChatMessage {
        team_id: String,
        content: String,
    },
    Ping,
}

/// A connected user as shown to others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: String,
    pub name: String,
}

/// A document collaborator with their last known cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPresence {
    pub user_id: String,
    pub name: String,
    pub can_edit: bool,
    pub cursor: Option<Value>,
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full state on join: persisted plus pending deltas (may contain duplicates)
    DocumentState {
        document_id: String,
        title: String,
        content: String,
        updates: Vec<String>,
        can_edit: bool,
    },
    DocumentUpdate {
        document_id: String,
        user_id: String,
        update: String,
    },
    Presence {
        document_id: String,
        users: Vec<DocumentPresence>,
    },
    Cursor {
        document_id: String,
        user_id: String,
        cursor: Value,
    },
    TeamPresence {
        team_id: String,
        users: Vec<PresenceUser>,
    },
    Typing {
        scope: TypingScope,
        user_id: String,
        name: String,
        is_typing: bool,
    },
    ChatMessage {
        message: ChatMessage,
    },
    Notification {
        notification: Notification,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

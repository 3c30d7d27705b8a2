use serde::{Deserialize, Serialize};

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Membership and system notices, including private denials
    Status { msg: String },

    /// Chat content broadcast to a room
    Message { handle: String, text: String },
}

impl ServerEvent {
    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status { msg: msg.into() }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    Join { room: String },
    Leave { room: String },
    ChatMessage { room: String, message: String },
}

impl ClientCommand {
    pub fn room(&self) -> &str {
        match self {
            Self::Join { room } | Self::Leave { room } | Self::ChatMessage { room, .. } => room,
        }
    }
}

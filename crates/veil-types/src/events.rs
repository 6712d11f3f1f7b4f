use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Global channel carrying roster events for every connected client.
pub const USER_CHANNEL: &str = "user";

pub const JOINED_EVENT: &str = "joined";
pub const CONVERSATION_EVENT: &str = "conversation";
pub const MESSAGE_EVENT: &str = "message";
pub const TYPING_EVENT: &str = "typing";

/// Per-user channel carrying conversation and message events for one user.
pub fn personal_channel(user_id: i64) -> String {
    user_id.to_string()
}

/// Ephemeral typing-indicator channel for one user.
pub fn typing_channel(user_id: i64) -> String {
    format!("typing-{user_id}")
}

/// Frame sent to WebSocket clients: a channel-addressed event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub channel: String,
    pub event: String,
    pub data: serde_json::Value,
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to additional channels (typing indicators of open
    /// conversations). The connection's own channels are always subscribed.
    Subscribe { channels: Vec<String> },
}

// -- Event payloads --

/// `user` / `joined` — a new account was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

/// `<userId>` / `conversation` — someone opened a conversation with you.
/// Carries the first message so the recipient can render without a fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreated {
    pub id: i64,
    pub anonymous_user_id: i64,
    pub special: bool,
    pub first_message: FirstMessage,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstMessage {
    pub id: i64,
    pub content: String,
    pub flagged: bool,
}

/// `<userId>` / `message` — a message arrived in one of your conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePosted {
    pub id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub flagged: bool,
    pub sent_at: DateTime<Utc>,
}

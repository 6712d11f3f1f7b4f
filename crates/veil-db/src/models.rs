//! Database row types — these map directly to SQLite rows.
//! Distinct from the veil-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub phone_number: i64,
    pub first_name: String,
    pub last_name: String,
    pub sms_notification_consent: bool,
    pub invited_users: i64,
    pub revealed_users: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: i64,
    pub anonymous_user_id: i64,
    pub known_user_id: i64,
    pub special: bool,
    pub anonymous_unread: i64,
    pub known_unread: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub from_user_id: i64,
    pub content: String,
    pub flagged: bool,
    pub sent_at: String,
}

/// Which side of a conversation a user occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Anonymous,
    Known,
}

impl ConversationRow {
    pub fn side_of(&self, user_id: i64) -> Option<Side> {
        if self.anonymous_user_id == user_id {
            Some(Side::Anonymous)
        } else if self.known_user_id == user_id {
            Some(Side::Known)
        } else {
            None
        }
    }

    /// The other party's user id. Caller must be a party.
    pub fn counterpart(&self, user_id: i64) -> i64 {
        if self.anonymous_user_id == user_id {
            self.known_user_id
        } else {
            self.anonymous_user_id
        }
    }
}

/// Parse a stored timestamp. Rows written by this crate are RFC 3339, but
/// SQLite's own `datetime('now')` format ("YYYY-MM-DD HH:MM:SS") is accepted
/// as a fallback.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use veil_types::api::{
    ConversationPartner, CreateConversationResponse, CreatedMessage, StateResponse,
};
use veil_types::events::{
    CONVERSATION_EVENT, ConversationCreated, JOINED_EVENT, MESSAGE_EVENT, MessagePosted,
    USER_CHANNEL, UserJoined,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown conversation {0}")]
    UnknownConversation(i64),

    #[error("unknown pending token")]
    UnknownToken,

    #[error("malformed {event} event: {detail}")]
    MalformedEvent { event: String, detail: String },
}

/// Correlation token for one optimistic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken(Uuid);

/// Side effect the caller must perform after a store transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// Fire the read round-trip for this conversation.
    MarkRead(i64),
}

/// A message as rendered. Optimistic entries have no server id yet; the
/// pending token is their identity until confirmation.
#[derive(Debug, Clone)]
pub struct Message {
    pub server_id: Option<i64>,
    pub pending: Option<PendingToken>,
    pub me: bool,
    pub content: String,
    pub flagged: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSide {
    Anonymous,
    Known,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub partner: ConversationPartner,
    pub side: ViewSide,
    pub special: bool,
    pub unread: u32,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

struct Draft {
    partner_id: i64,
    content: String,
    started_at: DateTime<Utc>,
}

/// The single canonical client state. Lists shown in the UI are derived views
/// over one conversation map, so an update has exactly one place to land.
pub struct ClientStore {
    me: i64,
    users: Vec<veil_types::api::RosterUser>,
    conversations: HashMap<i64, Conversation>,
    pending_sends: HashMap<PendingToken, i64>,
    drafts: HashMap<PendingToken, Draft>,
    open_conversation: Option<i64>,
    foreground: bool,
}

impl ClientStore {
    pub fn new(me: i64) -> Self {
        Self {
            me,
            users: Vec::new(),
            conversations: HashMap::new(),
            pending_sends: HashMap::new(),
            drafts: HashMap::new(),
            open_conversation: None,
            foreground: true,
        }
    }

    /// Load the `/state` payload, replacing anything already present.
    pub fn bootstrap(&mut self, state: StateResponse) {
        self.users = state.users;
        self.conversations.clear();
        self.pending_sends.clear();
        self.drafts.clear();

        for (side, summaries) in [
            (ViewSide::Anonymous, state.anonymous_conversations),
            (ViewSide::Known, state.known_conversations),
        ] {
            for summary in summaries {
                let last_activity = summary
                    .messages
                    .last()
                    .map(|m| m.sent_at)
                    .unwrap_or(summary.created_at);
                self.conversations.insert(
                    summary.id,
                    Conversation {
                        id: summary.id,
                        partner: summary.user,
                        side,
                        special: summary.special,
                        unread: summary.unread,
                        messages: summary
                            .messages
                            .into_iter()
                            .map(|m| Message {
                                server_id: Some(m.id),
                                pending: None,
                                me: m.me,
                                content: m.content,
                                flagged: m.flagged,
                                sent_at: m.sent_at,
                            })
                            .collect(),
                        created_at: summary.created_at,
                        last_activity,
                    },
                );
            }
        }
    }

    // -- Optimistic sends --

    /// Append an optimistic message and move the conversation to the front.
    pub fn begin_send(
        &mut self,
        conversation_id: i64,
        content: &str,
    ) -> Result<PendingToken, StoreError> {
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;

        let token = PendingToken(Uuid::new_v4());
        let now = Utc::now();
        conversation.messages.push(Message {
            server_id: None,
            pending: Some(token),
            me: true,
            content: content.to_string(),
            flagged: false,
            sent_at: now,
        });
        conversation.last_activity = now;
        self.pending_sends.insert(token, conversation_id);
        Ok(token)
    }

    /// Replace the pending message in place with the server's record. The
    /// list length never changes: confirmation is a substitution, not an
    /// append.
    pub fn confirm_send(
        &mut self,
        token: PendingToken,
        confirmed: CreatedMessage,
    ) -> Result<(), StoreError> {
        let conversation_id = self
            .pending_sends
            .remove(&token)
            .ok_or(StoreError::UnknownToken)?;
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;

        let message = conversation
            .messages
            .iter_mut()
            .find(|m| m.pending == Some(token))
            .ok_or(StoreError::UnknownToken)?;
        message.server_id = Some(confirmed.id);
        message.pending = None;
        message.content = confirmed.content;
        message.flagged = confirmed.flagged;
        message.sent_at = confirmed.sent_at;
        Ok(())
    }

    /// Start a draft conversation to another user. No list entry appears
    /// until the server assigns an id.
    pub fn begin_create_conversation(&mut self, user_id: i64, content: &str) -> PendingToken {
        let token = PendingToken(Uuid::new_v4());
        self.drafts.insert(
            token,
            Draft {
                partner_id: user_id,
                content: content.to_string(),
                started_at: Utc::now(),
            },
        );
        token
    }

    pub fn confirm_create_conversation(
        &mut self,
        token: PendingToken,
        response: CreateConversationResponse,
    ) -> Result<(), StoreError> {
        let draft = self.drafts.remove(&token).ok_or(StoreError::UnknownToken)?;

        let partner = self
            .users
            .iter()
            .find(|u| u.id == draft.partner_id)
            .map(|u| ConversationPartner {
                id: u.id,
                first_name: Some(u.first_name.clone()),
                last_name: Some(u.last_name.clone()),
                blocked: u.blocked,
            })
            .unwrap_or(ConversationPartner {
                id: draft.partner_id,
                first_name: None,
                last_name: None,
                blocked: false,
            });

        self.conversations.insert(
            response.id,
            Conversation {
                id: response.id,
                partner,
                side: ViewSide::Anonymous,
                special: false,
                unread: 0,
                messages: vec![Message {
                    server_id: Some(response.first_message.id),
                    pending: None,
                    me: true,
                    content: response.first_message.content,
                    flagged: response.first_message.flagged,
                    sent_at: response.first_message.sent_at,
                }],
                created_at: response.created_at,
                last_activity: draft.started_at.max(response.created_at),
            },
        );
        Ok(())
    }

    // -- Realtime events --

    /// Apply a gateway event. Returns the effect the caller must perform, if
    /// any. Events for unknown conversations are dropped rather than growing
    /// the list speculatively.
    pub fn apply_event(
        &mut self,
        channel: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<Option<Effect>, StoreError> {
        match event {
            JOINED_EVENT if channel == USER_CHANNEL => {
                let joined: UserJoined = parse(event, data)?;
                if joined.id != self.me && !self.users.iter().any(|u| u.id == joined.id) {
                    self.users.insert(
                        0,
                        veil_types::api::RosterUser {
                            id: joined.id,
                            first_name: joined.first_name,
                            last_name: joined.last_name,
                            blocked: false,
                            created_at: Utc::now(),
                        },
                    );
                }
                Ok(None)
            }
            CONVERSATION_EVENT => {
                let created: ConversationCreated = parse(event, data)?;
                self.conversations
                    .entry(created.id)
                    .or_insert_with(|| Conversation {
                        id: created.id,
                        partner: ConversationPartner {
                            id: created.anonymous_user_id,
                            first_name: None,
                            last_name: None,
                            blocked: false,
                        },
                        side: ViewSide::Known,
                        special: created.special,
                        unread: 1,
                        messages: vec![Message {
                            server_id: Some(created.first_message.id),
                            pending: None,
                            me: false,
                            content: created.first_message.content,
                            flagged: created.first_message.flagged,
                            sent_at: created.created_at,
                        }],
                        created_at: created.created_at,
                        last_activity: created.created_at,
                    });
                Ok(None)
            }
            MESSAGE_EVENT => {
                let posted: MessagePosted = parse(event, data)?;
                let Some(conversation) = self.conversations.get_mut(&posted.conversation_id)
                else {
                    debug!(
                        "dropping message event for unknown conversation {}",
                        posted.conversation_id
                    );
                    return Ok(None);
                };
                // duplicate delivery, or our own confirmed send echoed back
                if conversation
                    .messages
                    .iter()
                    .any(|m| m.server_id == Some(posted.id))
                {
                    return Ok(None);
                }

                conversation.messages.push(Message {
                    server_id: Some(posted.id),
                    pending: None,
                    me: false,
                    content: posted.content,
                    flagged: posted.flagged,
                    sent_at: posted.sent_at,
                });
                conversation.last_activity = posted.sent_at;

                let open_and_visible =
                    self.foreground && self.open_conversation == Some(posted.conversation_id);
                if open_and_visible {
                    Ok(Some(Effect::MarkRead(posted.conversation_id)))
                } else {
                    conversation.unread += 1;
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    // -- Focus and read state --

    /// Open a conversation. If it had unread messages, they are zeroed
    /// locally and the caller must fire the read round-trip.
    pub fn open_conversation(&mut self, conversation_id: i64) -> Result<Option<Effect>, StoreError> {
        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::UnknownConversation(conversation_id))?;
        self.open_conversation = Some(conversation_id);
        if conversation.unread > 0 {
            conversation.unread = 0;
            Ok(Some(Effect::MarkRead(conversation_id)))
        } else {
            Ok(None)
        }
    }

    pub fn close_conversation(&mut self) {
        self.open_conversation = None;
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    // -- Blocks --

    /// Mirror a block/unblock onto the roster and any conversation with that
    /// partner.
    pub fn set_blocked(&mut self, user_id: i64, blocked: bool) {
        if let Some(user) = self.users.iter_mut().find(|u| u.id == user_id) {
            user.blocked = blocked;
        }
        for conversation in self.conversations.values_mut() {
            if conversation.partner.id == user_id {
                conversation.partner.blocked = blocked;
            }
        }
    }

    // -- Derived views --

    pub fn users(&self) -> &[veil_types::api::RosterUser] {
        &self.users
    }

    pub fn conversation(&self, id: i64) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Conversations the caller started, most recently active first.
    pub fn anonymous_view(&self) -> Vec<&Conversation> {
        self.view(ViewSide::Anonymous)
    }

    /// Conversations where the caller is the known party, most recently
    /// active first.
    pub fn known_view(&self) -> Vec<&Conversation> {
        self.view(ViewSide::Known)
    }

    fn view(&self, side: ViewSide) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| c.side == side)
            .collect();
        list.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then(b.id.cmp(&a.id))
        });
        list
    }

    pub fn unread_total(&self, side: ViewSide) -> u32 {
        self.conversations
            .values()
            .filter(|c| c.side == side)
            .map(|c| c.unread)
            .sum()
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(data).map_err(|e| StoreError::MalformedEvent {
        event: event.to_string(),
        detail: e.to_string(),
    })
}

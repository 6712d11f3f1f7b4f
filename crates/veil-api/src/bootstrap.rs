//! Bootstrap payload: everything a client needs to render on first load.
//! Realtime events keep it current afterwards.

use std::collections::HashSet;

use axum::Json;
use axum::extract::{Extension, State};

use veil_db::models::{ConversationRow, Side, parse_timestamp};
use veil_types::api::{
    Claims, ConversationPartner, ConversationSummary, MessageView, RosterUser, StateResponse,
};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn get_state(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<StateResponse>> {
    let caller_id = claims.sub;
    let blocked: HashSet<i64> = state.db.blocked_user_ids(caller_id)?.into_iter().collect();

    let users = state
        .db
        .list_users_except(caller_id)?
        .into_iter()
        .map(|user| RosterUser {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            blocked: blocked.contains(&user.id),
            created_at: parse_timestamp(&user.created_at),
        })
        .collect();

    let mut anonymous_conversations = Vec::new();
    for row in state.db.conversations_where_anonymous(caller_id)? {
        anonymous_conversations.push(summarize(&state, caller_id, &blocked, row)?);
    }

    let mut known_conversations = Vec::new();
    for row in state.db.conversations_where_known(caller_id)? {
        known_conversations.push(summarize(&state, caller_id, &blocked, row)?);
    }

    Ok(Json(StateResponse {
        users,
        anonymous_conversations,
        known_conversations,
    }))
}

fn summarize(
    state: &AppState,
    caller_id: i64,
    blocked: &HashSet<i64>,
    row: ConversationRow,
) -> anyhow::Result<ConversationSummary> {
    let partner_id = row.counterpart(caller_id);
    // the caller only ever sees the partner's name when the partner is the
    // known side, i.e. the caller is anonymous
    let partner_named = row.side_of(caller_id) == Some(Side::Anonymous);
    let partner = match state.db.get_user(partner_id)? {
        Some(user) if partner_named => ConversationPartner {
            id: user.id,
            first_name: Some(user.first_name),
            last_name: Some(user.last_name),
            blocked: blocked.contains(&partner_id),
        },
        _ => ConversationPartner {
            id: partner_id,
            first_name: None,
            last_name: None,
            blocked: blocked.contains(&partner_id),
        },
    };

    let unread = match row.side_of(caller_id) {
        Some(Side::Anonymous) => row.anonymous_unread,
        _ => row.known_unread,
    };

    let messages = state
        .db
        .messages_for_conversation(row.id)?
        .into_iter()
        .map(|message| MessageView {
            id: message.id,
            me: message.from_user_id == caller_id,
            content: message.content,
            flagged: message.flagged,
            sent_at: parse_timestamp(&message.sent_at),
        })
        .collect();

    Ok(ConversationSummary {
        id: row.id,
        user: partner,
        special: row.special,
        unread: unread.max(0) as u32,
        messages,
        created_at: parse_timestamp(&row.created_at),
    })
}

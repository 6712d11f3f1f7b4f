//! Conversation and message mutations. Every write commits before any
//! realtime publish or downstream notification, and none of those failures
//! roll it back.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use veil_db::models::Side;
use veil_sequencer::queue::SpecialTrigger;
use veil_types::api::{
    Claims, CreateConversationRequest, CreateConversationResponse, CreatedMessage,
    SendMessageRequest, TypingRequest,
};
use veil_types::events::{self, ConversationCreated, FirstMessage, MessagePosted};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<CreateConversationResponse>> {
    let caller_id = claims.sub;
    let content = clean_content(&req.content)?;

    if req.user_id == caller_id {
        return Err(ApiError::Validation(
            "you can't message yourself".to_string(),
        ));
    }
    if state.db.get_user(req.user_id)?.is_none() {
        return Err(ApiError::NotFound("user not found".to_string()));
    }
    if state.db.is_blocked(req.user_id, caller_id)? {
        return Err(ApiError::Forbidden(
            "you're blocked by this user".to_string(),
        ));
    }

    let flagged = score_concurrently(&state, &content).await?;

    let now = Utc::now();
    let (conversation_id, message_id) = state.db.create_conversation_with_first_message(
        caller_id,
        req.user_id,
        false,
        &content,
        flagged,
        &now.to_rfc3339(),
    )?;

    state.dispatcher.publish(
        &events::personal_channel(req.user_id),
        events::CONVERSATION_EVENT,
        &ConversationCreated {
            id: conversation_id,
            anonymous_user_id: caller_id,
            special: false,
            first_message: FirstMessage {
                id: message_id,
                content: content.clone(),
                flagged,
            },
            created_at: now,
        },
    );

    state.queue.enqueue(&SpecialTrigger::SentMessage {
        from_user_id: caller_id,
        conversation_id,
        content: content.clone(),
    })?;

    Ok(Json(CreateConversationResponse {
        id: conversation_id,
        first_message: CreatedMessage {
            id: message_id,
            content,
            flagged,
            sent_at: now,
        },
        created_at: now,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<CreatedMessage>> {
    let caller_id = claims.sub;
    let content = clean_content(&req.content)?;

    let Some(conversation) = state.db.get_conversation(conversation_id)? else {
        return Err(ApiError::NotFound("conversation not found".to_string()));
    };
    let Some(side) = conversation.side_of(caller_id) else {
        return Err(ApiError::Forbidden(
            "you're not in this conversation".to_string(),
        ));
    };
    let counterpart_id = conversation.counterpart(caller_id);
    if state.db.is_blocked(counterpart_id, caller_id)? {
        return Err(ApiError::Forbidden(
            "you're blocked by this user".to_string(),
        ));
    }

    let flagged = score_concurrently(&state, &content).await?;

    let now = Utc::now();
    // bump the side the caller is NOT on
    let bump = match side {
        Side::Anonymous => Side::Known,
        Side::Known => Side::Anonymous,
    };
    let message_id = state.db.insert_message_and_bump_unread(
        conversation_id,
        caller_id,
        &content,
        flagged,
        &now.to_rfc3339(),
        bump,
    )?;

    state.dispatcher.publish(
        &events::personal_channel(counterpart_id),
        events::MESSAGE_EVENT,
        &MessagePosted {
            id: message_id,
            conversation_id,
            content: content.clone(),
            flagged,
            sent_at: now,
        },
    );

    state.queue.enqueue(&SpecialTrigger::SentMessage {
        from_user_id: caller_id,
        conversation_id,
        content: content.clone(),
    })?;

    state.notifier.send(format!(
        "message sent {}",
        serde_json::json!({
            "from": caller_id,
            "conversationId": conversation_id,
            "content": content,
            "flagged": flagged,
        })
    ));

    Ok(Json(CreatedMessage {
        id: message_id,
        content,
        flagged,
        sent_at: now,
    }))
}

pub async fn read_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let Some(conversation) = state.db.get_conversation(conversation_id)? else {
        return Err(ApiError::NotFound("conversation not found".to_string()));
    };
    let Some(side) = conversation.side_of(claims.sub) else {
        return Err(ApiError::Forbidden(
            "you're not in this conversation".to_string(),
        ));
    };

    state.db.reset_unread(conversation_id, side)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> ApiResult<StatusCode> {
    state.dispatcher.publish(
        &events::typing_channel(claims.sub),
        events::TYPING_EVENT,
        &req.typing,
    );
    Ok(StatusCode::NO_CONTENT)
}

fn clean_content(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("message can't be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Score content while the caller's other work proceeds; the result is only
/// awaited right before the insert needs it.
async fn score_concurrently(state: &AppState, content: &str) -> anyhow::Result<bool> {
    let moderation = state.moderation.clone();
    let content = content.to_string();
    let handle = tokio::spawn(async move { moderation.flagged(&content).await });
    Ok(handle.await?)
}

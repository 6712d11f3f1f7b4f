//! Public read-only share pages. The slug encodes
//! `<userId>,<conversationId>,<start>-<end>`, a 1-based inclusive message
//! range. Every malformed or unauthorized variant is a plain 404 so the slug
//! space leaks nothing.

use axum::Json;
use axum::extract::{Path, State};

use veil_db::models::parse_timestamp;
use veil_types::api::{ShareMessage, ShareResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const FLAGGED_PLACEHOLDER: &str =
    "this message did not comply with our content policy. remember to be nice!";

#[derive(Debug, PartialEq, Eq)]
struct ShareSlug {
    user_id: i64,
    conversation_id: i64,
    start: usize,
    end: usize,
}

fn parse_slug(slug: &str) -> Option<ShareSlug> {
    let mut parts = slug.split(',');
    let user_id = parts.next()?.parse().ok()?;
    let conversation_id = parts.next()?.parse().ok()?;
    let range = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    if start == 0 || end < start {
        return None;
    }
    Some(ShareSlug {
        user_id,
        conversation_id,
        start,
        end,
    })
}

pub async fn get_share(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ShareResponse>> {
    let not_found = || ApiError::NotFound("not found".to_string());
    let slug = parse_slug(&slug).ok_or_else(not_found)?;

    let user = state.db.get_user(slug.user_id)?.ok_or_else(not_found)?;
    let conversation = state
        .db
        .get_conversation(slug.conversation_id)?
        .ok_or_else(not_found)?;
    if conversation.side_of(slug.user_id).is_none() {
        return Err(not_found());
    }

    let messages = state.db.messages_for_conversation(slug.conversation_id)?;
    let selected: Vec<ShareMessage> = messages
        .into_iter()
        .skip(slug.start - 1)
        .take(slug.end - slug.start + 1)
        .map(|message| ShareMessage {
            id: message.id,
            author: if message.from_user_id == slug.user_id {
                format!("{} {}", user.first_name, user.last_name)
            } else {
                "other person".to_string()
            },
            content: if message.flagged {
                FLAGGED_PLACEHOLDER.to_string()
            } else {
                message.content
            },
            flagged: message.flagged,
            sent_at: parse_timestamp(&message.sent_at),
        })
        .collect();

    if selected.is_empty() {
        return Err(not_found());
    }

    Ok(Json(ShareResponse {
        user_first_name: user.first_name,
        user_last_name: user.last_name,
        messages: selected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    const NOW: &str = "2024-02-01T12:00:00Z";

    #[test]
    fn slug_parsing() {
        assert_eq!(
            parse_slug("5,12,1-3"),
            Some(ShareSlug {
                user_id: 5,
                conversation_id: 12,
                start: 1,
                end: 3,
            })
        );
        assert_eq!(parse_slug("5,12"), None);
        assert_eq!(parse_slug("5,12,0-3"), None); // 1-based
        assert_eq!(parse_slug("5,12,3-1"), None);
        assert_eq!(parse_slug("x,12,1-3"), None);
        assert_eq!(parse_slug("5,12,1-3,extra"), None);
    }

    #[tokio::test]
    async fn share_selects_range_and_attributes_authors() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");
        let b = test_support::add_user(&state, 15551230002, "Ben", "Franklin");
        let (cid, _) = state
            .db
            .create_conversation_with_first_message(a, b, false, "one", false, NOW)
            .unwrap();
        state
            .db
            .insert_message_and_bump_unread(cid, b, "two", false, NOW, veil_db::models::Side::Anonymous)
            .unwrap();
        state
            .db
            .insert_message_and_bump_unread(cid, a, "three", true, NOW, veil_db::models::Side::Known)
            .unwrap();

        // b shares messages 2..=3
        let Json(response) = get_share(State(state), Path(format!("{b},{cid},2-3")))
            .await
            .unwrap();

        assert_eq!(response.user_first_name, "Ben");
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[0].author, "Ben Franklin");
        assert_eq!(response.messages[0].content, "two");
        assert_eq!(response.messages[1].author, "other person");
        // flagged content is replaced by the policy notice
        assert!(response.messages[1].flagged);
        assert_eq!(response.messages[1].content, FLAGGED_PLACEHOLDER);
    }

    #[tokio::test]
    async fn non_party_slug_is_not_found() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");
        let b = test_support::add_user(&state, 15551230002, "Ben", "Franklin");
        let c = test_support::add_user(&state, 15551230003, "Eve", "Dropper");
        let (cid, _) = state
            .db
            .create_conversation_with_first_message(a, b, false, "one", false, NOW)
            .unwrap();

        let err = get_share(State(state), Path(format!("{c},{cid},1-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_range_is_not_found() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");
        let b = test_support::add_user(&state, 15551230002, "Ben", "Franklin");
        let (cid, _) = state
            .db
            .create_conversation_with_first_message(a, b, false, "one", false, NOW)
            .unwrap();

        // range starts past the last message
        let err = get_share(State(state), Path(format!("{b},{cid},5-9")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

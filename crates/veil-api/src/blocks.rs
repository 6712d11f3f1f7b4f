//! Block and unblock. Row presence is the whole feature: no realtime event
//! is published, so the blocked party never learns.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;

use veil_types::api::Claims;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn block(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if user_id == claims.sub {
        return Err(ApiError::Validation("you can't block yourself".to_string()));
    }
    if state.db.get_user(user_id)?.is_none() {
        return Err(ApiError::NotFound("user not found".to_string()));
    }

    state.db.insert_block(claims.sub, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.db.delete_block(claims.sub, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn block_unblock_round_trip() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");
        let b = test_support::add_user(&state, 15551230002, "Ben", "Franklin");
        let mut rx = state.dispatcher.subscribe();

        block(
            State(state.clone()),
            Extension(test_support::claims(a, "Ada", "Lovelace")),
            Path(b),
        )
        .await
        .unwrap();
        assert!(state.db.is_blocked(a, b).unwrap());

        // silent: nothing was published
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));

        unblock(
            State(state.clone()),
            Extension(test_support::claims(a, "Ada", "Lovelace")),
            Path(b),
        )
        .await
        .unwrap();
        assert!(!state.db.is_blocked(a, b).unwrap());
    }

    #[tokio::test]
    async fn blocking_unknown_user_is_not_found() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");

        let err = block(
            State(state),
            Extension(test_support::claims(a, "Ada", "Lovelace")),
            Path(999),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn unblock_without_block_is_a_no_op() {
        let state = test_support::state();
        let a = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");
        let b = test_support::add_user(&state, 15551230002, "Ben", "Franklin");

        unblock(
            State(state),
            Extension(test_support::claims(a, "Ada", "Lovelace")),
            Path(b),
        )
        .await
        .unwrap();
    }
}

//! Signup: OTP issue and verify. Codes and rate-limit flags live in the TTL
//! store; the user row is only written after a correct code.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use rand::Rng;
use tracing::info;

use veil_kv::keys;
use veil_sequencer::queue::SpecialTrigger;
use veil_types::api::{CreateUserRequest, CreateUserResponse, SendOtpRequest};
use veil_types::events::{self, UserJoined};

use crate::error::{ApiError, ApiResult};
use crate::middleware::create_token;
use crate::state::AppState;

const OTP_TTL: Duration = Duration::from_secs(5 * 60);
const RESEND_COOLDOWN: Duration = Duration::from_secs(60);
const VERIFICATION_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const VERIFICATION_ATTEMPTS_TTL: Duration = Duration::from_secs(10 * 60);
/// Attempts allowed within the TTL window before the cooldown flag is set.
const VERIFICATIONS_BEFORE_COOLDOWN: i64 = 10;

const NAME_MAX_CHARS: usize = 50;

pub async fn send_otp(
    State(state): State<AppState>,
    Json(req): Json<SendOtpRequest>,
) -> ApiResult<StatusCode> {
    let phone = req.phone_number;

    if state.kv.get(&keys::resend_cooldown(phone)).is_some() {
        return Err(ApiError::RateLimited(
            "slow down. please wait before requesting another code.".to_string(),
        ));
    }

    let code = rand::rng().random_range(0..1_000_000);
    state.kv.set_ex(&keys::otp(phone), OTP_TTL, code);
    state
        .kv
        .set_ex(&keys::resend_cooldown(phone), RESEND_COOLDOWN, 1);

    state
        .sms
        .send_detached(phone, format!("your veil verification code is {code:06}."));

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Json<CreateUserResponse>> {
    let phone = req.phone_number;

    let Some(stored_code) = state.kv.get(&keys::otp(phone)) else {
        return Err(ApiError::Validation(
            "verification code expired.".to_string(),
        ));
    };

    if state.kv.get(&keys::verification_cooldown(phone)).is_some() {
        return Err(ApiError::RateLimited(
            "slow down. please wait before entering another code.".to_string(),
        ));
    }

    // The increment itself is atomic, so concurrent guesses cannot slip past
    // the threshold between a read and a write.
    let attempts = state.kv.incr(&keys::verification_attempts(phone));
    if attempts >= VERIFICATIONS_BEFORE_COOLDOWN {
        state.kv.set_ex(
            &keys::verification_cooldown(phone),
            VERIFICATION_COOLDOWN,
            1,
        );
    }
    state
        .kv
        .expire(&keys::verification_attempts(phone), VERIFICATION_ATTEMPTS_TTL);

    if stored_code != i64::from(req.otp) {
        return Err(ApiError::Validation(
            "incorrect verification code.".to_string(),
        ));
    }

    let first_name = clean_name(&req.first_name)
        .ok_or_else(|| ApiError::Validation("first name is required".to_string()))?;
    let last_name = clean_name(&req.last_name)
        .ok_or_else(|| ApiError::Validation("last name is required".to_string()))?;

    if state.db.get_user_by_phone(phone)?.is_some() {
        return Err(ApiError::Validation(
            "an account with this phone number already exists".to_string(),
        ));
    }

    state.kv.del(&[
        keys::otp(phone),
        keys::resend_cooldown(phone),
        keys::verification_attempts(phone),
        keys::verification_cooldown(phone),
    ]);

    let user_id = state
        .db
        .create_user(phone, &first_name, &last_name, &Utc::now().to_rfc3339())?;
    info!("user {} created", user_id);

    let token = create_token(&state.jwt_secret, user_id, &first_name, &last_name)?;

    state.dispatcher.publish(
        events::USER_CHANNEL,
        events::JOINED_EVENT,
        &UserJoined {
            id: user_id,
            first_name,
            last_name,
        },
    );

    state.queue.enqueue(&SpecialTrigger::UserJoined {
        user_id,
        invited_by_user_id: req.invited_by_user_id,
    })?;

    Ok(Json(CreateUserResponse { user_id, token }))
}

fn clean_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(NAME_MAX_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    const PHONE: i64 = 15551230001;

    fn signup_request(otp: u32) -> CreateUserRequest {
        CreateUserRequest {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: PHONE,
            otp,
            invited_by_user_id: None,
        }
    }

    #[test]
    fn names_are_trimmed_and_capped() {
        assert_eq!(clean_name("  Ada  ").as_deref(), Some("Ada"));
        assert_eq!(clean_name("   "), None);
        let long = "x".repeat(80);
        assert_eq!(clean_name(&long).unwrap().chars().count(), NAME_MAX_CHARS);
    }

    #[tokio::test]
    async fn second_send_hits_resend_cooldown() {
        let state = test_support::state();
        let status = send_otp(
            State(state.clone()),
            Json(SendOtpRequest { phone_number: PHONE }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = send_otp(
            State(state),
            Json(SendOtpRequest { phone_number: PHONE }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited(_)));
    }

    #[tokio::test]
    async fn correct_code_creates_user_and_enqueues_onboarding() {
        let state = test_support::state();
        state.kv.set_ex(&keys::otp(PHONE), OTP_TTL, 123456);
        let mut rx = state.dispatcher.subscribe();

        let response = create_user(State(state.clone()), Json(signup_request(123456)))
            .await
            .unwrap();
        let user = state.db.get_user(response.user_id).unwrap().unwrap();
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.phone_number, PHONE);

        // code is single-use
        assert_eq!(state.kv.get(&keys::otp(PHONE)), None);

        let published = rx.recv().await.unwrap();
        assert_eq!(published.channel, events::USER_CHANNEL);
        assert_eq!(published.event, events::JOINED_EVENT);
        assert_eq!(published.data["firstName"], "Ada");

        assert_eq!(
            state.queue.due_jobs(Utc::now()).unwrap().len(),
            1,
            "signup enqueues the onboarding job"
        );
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_without_a_user_row() {
        let state = test_support::state();
        state.kv.set_ex(&keys::otp(PHONE), OTP_TTL, 123456);

        let err = create_user(State(state.clone()), Json(signup_request(654321)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(state.db.get_user_by_phone(PHONE).unwrap().is_none());
        // the stored code survives a wrong guess
        assert_eq!(state.kv.get(&keys::otp(PHONE)), Some(123456));
    }

    #[tokio::test]
    async fn missing_code_reads_as_expired() {
        let state = test_support::state();
        let err = create_user(State(state), Json(signup_request(123456)))
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(msg) => assert!(msg.contains("expired")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_wrong_guesses_trip_the_cooldown() {
        let state = test_support::state();
        state.kv.set_ex(&keys::otp(PHONE), OTP_TTL, 123456);

        for _ in 0..VERIFICATIONS_BEFORE_COOLDOWN {
            let _ = create_user(State(state.clone()), Json(signup_request(0)))
                .await
                .unwrap_err();
        }

        // even the correct code is refused while cooling down
        let err = create_user(State(state), Json(signup_request(123456)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited(_)));
    }
}

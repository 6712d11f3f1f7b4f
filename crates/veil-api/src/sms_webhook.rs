//! Inbound SMS webhook (SignalWire-compatible). Carrier keywords STOP, START
//! and HELP get fixed XML auto-replies; STOP and START also flip the sender's
//! consent flag. Anything else is acknowledged with an empty body so the
//! provider stops retrying.

use axum::Form;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: String,
}

const STOP_REPLY: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<Response>
    <Message><Body>You've unsubscribed from messages from veil. Reply with START to resubscribe to notifications.</Body></Message>
</Response>";

const START_REPLY: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<Response>
    <Message><Body>You've subscribed to notifications from veil. Reply with STOP to opt-out. Message frequency depends on activity and Msg&amp;Data rates may apply.</Body></Message>
</Response>";

const HELP_REPLY: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<Response>
    <Message><Body>This is where you'll receive notifications from veil. Reply with STOP to opt-out.</Body></Message>
</Response>";

pub async fn inbound_sms(
    State(state): State<AppState>,
    Form(form): Form<InboundSms>,
) -> Response {
    match form.body.trim() {
        "STOP" => {
            set_consent(&state, &form.from, false);
            xml(STOP_REPLY)
        }
        "START" => {
            set_consent(&state, &form.from, true);
            xml(START_REPLY)
        }
        "HELP" => xml(HELP_REPLY),
        _ => ().into_response(),
    }
}

fn set_consent(state: &AppState, from: &str, consent: bool) {
    let Some(phone) = parse_phone(from) else {
        warn!("inbound SMS with unparseable From number");
        return;
    };
    match state.db.set_sms_consent(phone, consent) {
        Ok(true) => info!("SMS consent for +{} set to {}", phone, consent),
        Ok(false) => info!("SMS consent toggle from unknown number +{}", phone),
        Err(e) => warn!("SMS consent update failed: {:#}", e),
    }
}

/// Provider numbers arrive E.164 formatted ("+15551230001"); stored numbers
/// are bare digits.
fn parse_phone(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn xml(body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support;

    fn form(body: &str, from: &str) -> Form<InboundSms> {
        Form(InboundSms {
            body: body.to_string(),
            from: from.to_string(),
            to: "+15550000000".to_string(),
        })
    }

    #[test]
    fn phone_parsing_strips_formatting() {
        assert_eq!(parse_phone("+15551230001"), Some(15551230001));
        assert_eq!(parse_phone("15551230001"), Some(15551230001));
        assert_eq!(parse_phone("not a number"), None);
    }

    #[tokio::test]
    async fn stop_and_start_toggle_consent() {
        let state = test_support::state();
        let user = test_support::add_user(&state, 15551230001, "Ada", "Lovelace");

        let response = inbound_sms(State(state.clone()), form("STOP", "+15551230001")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            !state
                .db
                .get_user(user)
                .unwrap()
                .unwrap()
                .sms_notification_consent
        );

        inbound_sms(State(state.clone()), form("START", "+15551230001")).await;
        assert!(
            state
                .db
                .get_user(user)
                .unwrap()
                .unwrap()
                .sms_notification_consent
        );
    }

    #[tokio::test]
    async fn unknown_body_returns_empty_ok() {
        let state = test_support::state();
        let response = inbound_sms(State(state), form("hello?", "+15551230001")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_number_still_gets_the_auto_reply() {
        let state = test_support::state();
        let response = inbound_sms(State(state), form("STOP", "+19990000000")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

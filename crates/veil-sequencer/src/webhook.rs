//! Signed webhook that feeds the job queue. API handlers enqueue directly
//! in-process; this endpoint exists for external schedulers and for replaying
//! triggers by hand. The body is the JSON trigger, authenticated by an
//! HMAC-SHA256 of the raw bytes in the `x-veil-signature` header.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::queue::{SpecialQueue, SpecialTrigger};

pub const SIGNATURE_HEADER: &str = "x-veil-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
struct WebhookState {
    queue: SpecialQueue,
    secret: String,
}

pub fn router(queue: SpecialQueue, secret: String) -> Router {
    Router::new()
        .route("/hooks/special-message", post(receive))
        .with_state(WebhookState { queue, secret })
}

/// Hex HMAC-SHA256 of the body. Used by tests and by anything that needs to
/// produce a valid request.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let Some(signature) = signature else {
        return StatusCode::UNAUTHORIZED;
    };
    if !verify_signature(&state.secret, &body, signature) {
        warn!("webhook signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    let trigger: SpecialTrigger = match serde_json::from_slice(&body) {
        Ok(trigger) => trigger,
        Err(e) => {
            warn!("webhook body unparseable: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.queue.enqueue(&trigger) {
        Ok(true) => info!("webhook enqueued trigger"),
        Ok(false) => info!("webhook trigger already queued"),
        Err(e) => {
            warn!("webhook enqueue failed: {:#}", e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    StatusCode::NO_CONTENT
}

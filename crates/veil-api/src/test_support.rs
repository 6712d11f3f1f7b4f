//! Shared fixtures for handler tests: a fully wired state over an in-memory
//! database, with every external collaborator unconfigured.

use std::sync::Arc;

use veil_db::Database;
use veil_gateway::dispatcher::Dispatcher;
use veil_kv::TtlStore;
use veil_sequencer::queue::SpecialQueue;

use crate::moderation::ModerationClient;
use crate::notify::Notifier;
use crate::sms::SmsClient;
use crate::state::{AppState, AppStateInner};

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn state() -> AppState {
    let db = Arc::new(Database::open_in_memory().unwrap());
    Arc::new(AppStateInner {
        queue: SpecialQueue::new(db.clone()),
        db,
        kv: TtlStore::new(),
        dispatcher: Dispatcher::new(),
        moderation: ModerationClient::new(None),
        sms: SmsClient::new(None),
        notifier: Notifier::new(None),
        jwt_secret: TEST_JWT_SECRET.to_string(),
    })
}

pub fn claims(user_id: i64, first_name: &str, last_name: &str) -> veil_types::api::Claims {
    veil_types::api::Claims {
        sub: user_id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        exp: usize::MAX,
    }
}

pub fn add_user(state: &AppState, phone: i64, first: &str, last: &str) -> i64 {
    state
        .db
        .create_user(phone, first, last, "2024-02-01T12:00:00Z")
        .unwrap()
}

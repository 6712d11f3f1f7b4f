use std::sync::Arc;

use veil_db::Database;
use veil_gateway::dispatcher::Dispatcher;
use veil_kv::TtlStore;
use veil_sequencer::queue::SpecialQueue;

use crate::moderation::ModerationClient;
use crate::notify::Notifier;
use crate::sms::SmsClient;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub kv: TtlStore,
    pub dispatcher: Dispatcher,
    pub queue: SpecialQueue,
    pub moderation: ModerationClient,
    pub sms: SmsClient,
    pub notifier: Notifier,
    pub jwt_secret: String,
}

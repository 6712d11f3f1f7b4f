pub mod auth;
pub mod blocks;
pub mod bootstrap;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod moderation;
pub mod notify;
pub mod share;
pub mod sms;
pub mod sms_webhook;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

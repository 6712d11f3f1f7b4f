//! Client-side reconciliation state: one normalized store keyed by
//! conversation id, with the anonymous and known lists derived from it.
//! Optimistic sends are tracked by client-generated tokens and replaced in
//! place when the server confirms.

pub mod store;

pub use store::{ClientStore, Conversation, Effect, Message, PendingToken, StoreError, ViewSide};

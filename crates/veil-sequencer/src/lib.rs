//! The special/drip sequencer: a durable step-indexed job queue that sends
//! scripted onboarding messages and runs the invite→reveal growth mechanic
//! through each user's special conversation.

pub mod handler;
pub mod queue;
pub mod script;
pub mod webhook;

/// Invites needed per reveal credit: credits = invited / THRESHOLD - revealed.
pub const REVEAL_THRESHOLD: i64 = 5;

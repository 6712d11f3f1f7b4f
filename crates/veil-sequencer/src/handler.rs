use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::warn;

use veil_db::models::{ConversationRow, Side};
use veil_db::{Database, SYSTEM_USER_ID};
use veil_gateway::dispatcher::Dispatcher;
use veil_types::events::{self, ConversationCreated, FirstMessage, MessagePosted};

use crate::REVEAL_THRESHOLD;
use crate::queue::SpecialTrigger;
use crate::script;

#[derive(Clone)]
pub struct SequencerContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub invite_link_base: String,
}

/// What the worker does with the job after a step.
#[derive(Debug)]
pub enum StepOutcome {
    Continue { next_step: u32, delay: Duration },
    Done,
}

/// Run one step of a job. Steps are individually idempotent: each one checks
/// for its own prior side effects before writing, so at-least-once delivery
/// cannot duplicate user-facing messages.
pub async fn run_step(
    ctx: &SequencerContext,
    trigger: &SpecialTrigger,
    step: u32,
) -> Result<StepOutcome> {
    match trigger {
        SpecialTrigger::UserJoined {
            user_id,
            invited_by_user_id,
        } => user_joined_step(ctx, *user_id, *invited_by_user_id, step),
        SpecialTrigger::SentMessage {
            from_user_id,
            conversation_id,
            content,
        } => sent_message_step(ctx, *from_user_id, *conversation_id, content, step),
    }
}

fn user_joined_step(
    ctx: &SequencerContext,
    user_id: i64,
    invited_by_user_id: Option<i64>,
    step: u32,
) -> Result<StepOutcome> {
    if user_id == SYSTEM_USER_ID {
        return Ok(StepOutcome::Done);
    }

    match step {
        0 => {
            // A redelivered job finds the conversation already created and
            // skips straight to scheduling the next step.
            if ctx.db.special_conversation(user_id)?.is_none() {
                let now = Utc::now();
                let (conversation_id, message_id) = ctx.db.create_conversation_with_first_message(
                    SYSTEM_USER_ID,
                    user_id,
                    true,
                    script::WELCOME_FIRST,
                    false,
                    &now.to_rfc3339(),
                )?;

                // The first script step announces the conversation itself;
                // later steps are plain message events.
                ctx.dispatcher.publish(
                    &events::personal_channel(user_id),
                    events::CONVERSATION_EVENT,
                    &ConversationCreated {
                        id: conversation_id,
                        anonymous_user_id: SYSTEM_USER_ID,
                        special: true,
                        first_message: FirstMessage {
                            id: message_id,
                            content: script::WELCOME_FIRST.to_string(),
                            flagged: false,
                        },
                        created_at: now,
                    },
                );

                if let Some(inviter_id) = invited_by_user_id {
                    invited_flow(ctx, user_id, inviter_id)?;
                }
            }

            Ok(StepOutcome::Continue {
                next_step: 1,
                delay: script::welcome_second_delay(),
            })
        }
        1 => {
            send_special_once(ctx, user_id, script::WELCOME_SECOND)?;
            Ok(StepOutcome::Continue {
                next_step: 2,
                delay: script::welcome_third_delay(),
            })
        }
        _ => {
            send_special_once(ctx, user_id, script::WELCOME_THIRD)?;
            Ok(StepOutcome::Done)
        }
    }
}

/// Credit the inviter and tell them about it in their special conversation.
fn invited_flow(ctx: &SequencerContext, joined_user_id: i64, inviter_id: i64) -> Result<()> {
    let Some(joined) = ctx.db.get_user(joined_user_id)? else {
        return Ok(());
    };
    let Some(inviter) = ctx.db.increment_invited_users(inviter_id)? else {
        return Ok(());
    };
    let Some(special) = ctx.db.special_conversation(inviter_id)? else {
        warn!("inviter {} has no special conversation", inviter_id);
        return Ok(());
    };

    let content = script::invited_user_joined(
        &joined.first_name,
        &joined.last_name,
        inviter.invited_users,
        inviter.revealed_users,
    );
    send_special_message(ctx, &special, &content)?;
    Ok(())
}

fn sent_message_step(
    ctx: &SequencerContext,
    from_user_id: i64,
    conversation_id: i64,
    content: &str,
    step: u32,
) -> Result<StepOutcome> {
    let Some(special) = ctx.db.special_conversation(from_user_id)? else {
        return Ok(StepOutcome::Done);
    };

    if conversation_id == special.id {
        // A message to the system itself: interpret as a reveal request.
        handle_reveal_request(ctx, from_user_id, &special, content)?;
        return Ok(StepOutcome::Done);
    }

    // Otherwise, maybe nudge the sender about the invite mechanic.
    match step {
        0 => {
            let Some(conversation) = ctx.db.get_conversation(conversation_id)? else {
                return Ok(StepOutcome::Done);
            };
            if conversation.known_user_id != from_user_id {
                return Ok(StepOutcome::Done);
            }

            let link = script::invite_link(&ctx.invite_link_base, from_user_id);
            // Once per user, ever: the link text in any prior special message
            // is the marker that the explainer was already delivered.
            if special_contains(ctx, special.id, &link)? {
                return Ok(StepOutcome::Done);
            }

            send_special_message(ctx, &special, &script::nudge(&link))?;
            Ok(StepOutcome::Continue {
                next_step: 1,
                delay: script::nudge_followup_delay(),
            })
        }
        _ => {
            send_special_once(ctx, from_user_id, script::NUDGE_FOLLOWUP)?;
            Ok(StepOutcome::Done)
        }
    }
}

fn handle_reveal_request(
    ctx: &SequencerContext,
    requester_id: i64,
    special: &ConversationRow,
    content: &str,
) -> Result<()> {
    let Some(target_id) = script::parse_reveal_target(content) else {
        // Not a reveal request; the system has nothing to say.
        return Ok(());
    };

    // Validate the target before spending, so a failed reveal never needs a
    // credit refund.
    let target = ctx.db.get_conversation(target_id)?;
    let reply = match target {
        Some(target) if target.known_user_id == requester_id => {
            match ctx.db.get_user(target.anonymous_user_id)? {
                Some(anonymous_user) => {
                    match ctx.db.spend_reveal_credit(requester_id, REVEAL_THRESHOLD)? {
                        Some(_) => {
                            notify_revealed_party(ctx, &target)?;
                            script::reveal_reply(
                                &anonymous_user.first_name,
                                &anonymous_user.last_name,
                            )
                        }
                        None => not_enough_credits_reply(ctx, requester_id)?,
                    }
                }
                None => script::USER_NOT_FOUND.to_string(),
            }
        }
        _ => script::NOT_IN_CONVERSATION.to_string(),
    };

    send_special_message(ctx, special, &reply)?;
    Ok(())
}

fn not_enough_credits_reply(ctx: &SequencerContext, requester_id: i64) -> Result<String> {
    let (invited, revealed) = match ctx.db.get_user(requester_id)? {
        Some(user) => (user.invited_users, user.revealed_users),
        None => (0, 0),
    };
    let link = script::invite_link(&ctx.invite_link_base, requester_id);
    Ok(script::not_enough_credits(invited, revealed, &link))
}

/// Tell the anonymous party their identity was disclosed, via their own
/// special conversation.
fn notify_revealed_party(ctx: &SequencerContext, revealed: &ConversationRow) -> Result<()> {
    let Some(their_special) = ctx.db.special_conversation(revealed.anonymous_user_id)? else {
        return Ok(());
    };
    send_special_message(ctx, &their_special, &script::identity_disclosed(revealed.id))
}

/// Insert a system message into a special conversation, bump the recipient's
/// unread, and publish the realtime event.
fn send_special_message(
    ctx: &SequencerContext,
    conversation: &ConversationRow,
    content: &str,
) -> Result<()> {
    let now = Utc::now();
    let message_id = ctx.db.insert_message_and_bump_unread(
        conversation.id,
        SYSTEM_USER_ID,
        content,
        false,
        &now.to_rfc3339(),
        Side::Known,
    )?;

    ctx.dispatcher.publish(
        &events::personal_channel(conversation.known_user_id),
        events::MESSAGE_EVENT,
        &MessagePosted {
            id: message_id,
            conversation_id: conversation.id,
            content: content.to_string(),
            flagged: false,
            sent_at: now,
        },
    );
    Ok(())
}

/// Like `send_special_message`, but a no-op if the content was already sent.
fn send_special_once(ctx: &SequencerContext, user_id: i64, content: &str) -> Result<()> {
    let Some(special) = ctx.db.special_conversation(user_id)? else {
        warn!("user {} has no special conversation for script step", user_id);
        return Ok(());
    };
    if special_contains(ctx, special.id, content)? {
        return Ok(());
    }
    send_special_message(ctx, &special, content)
}

fn special_contains(ctx: &SequencerContext, conversation_id: i64, needle: &str) -> Result<bool> {
    let messages = ctx.db.messages_for_conversation(conversation_id)?;
    Ok(messages
        .iter()
        .any(|message| message.content.contains(needle)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-02-01T12:00:00Z";

    fn context() -> SequencerContext {
        SequencerContext {
            db: Arc::new(Database::open_in_memory().unwrap()),
            dispatcher: Dispatcher::new(),
            invite_link_base: "https://veil.example".to_string(),
        }
    }

    fn join(ctx: &SequencerContext, phone: i64) -> i64 {
        ctx.db.create_user(phone, "Test", "User", NOW).unwrap()
    }

    async fn run_user_joined_to_completion(
        ctx: &SequencerContext,
        user_id: i64,
        inviter: Option<i64>,
    ) {
        let trigger = SpecialTrigger::UserJoined {
            user_id,
            invited_by_user_id: inviter,
        };
        let mut step = 0;
        loop {
            match run_step(ctx, &trigger, step).await.unwrap() {
                StepOutcome::Continue { next_step, .. } => step = next_step,
                StepOutcome::Done => break,
            }
        }
    }

    #[tokio::test]
    async fn onboarding_script_runs_in_order() {
        let ctx = context();
        let user = join(&ctx, 15551230001);
        let mut rx = ctx.dispatcher.subscribe();

        run_user_joined_to_completion(&ctx, user, None).await;

        let special = ctx.db.special_conversation(user).unwrap().unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, script::WELCOME_FIRST);
        assert_eq!(messages[1].content, script::WELCOME_SECOND);
        assert_eq!(messages[2].content, script::WELCOME_THIRD);

        // the recipient has three unread system messages
        assert_eq!(special.anonymous_user_id, SYSTEM_USER_ID);
        let refreshed = ctx.db.get_conversation(special.id).unwrap().unwrap();
        assert_eq!(refreshed.known_unread, 3);

        // first event is the conversation creation, then plain messages
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, "conversation");
        assert_eq!(first.data["firstMessage"]["content"], script::WELCOME_FIRST);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, "message");
    }

    #[tokio::test]
    async fn redelivered_steps_do_not_duplicate() {
        let ctx = context();
        let user = join(&ctx, 15551230001);
        let trigger = SpecialTrigger::UserJoined {
            user_id: user,
            invited_by_user_id: None,
        };

        run_step(&ctx, &trigger, 0).await.unwrap();
        run_step(&ctx, &trigger, 0).await.unwrap(); // whole-job redelivery
        run_step(&ctx, &trigger, 1).await.unwrap();
        run_step(&ctx, &trigger, 1).await.unwrap(); // crash-before-cursor replay

        let special = ctx.db.special_conversation(user).unwrap().unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn system_user_join_is_ignored() {
        let ctx = context();
        let trigger = SpecialTrigger::UserJoined {
            user_id: SYSTEM_USER_ID,
            invited_by_user_id: None,
        };
        assert!(matches!(
            run_step(&ctx, &trigger, 0).await.unwrap(),
            StepOutcome::Done
        ));
    }

    #[tokio::test]
    async fn inviter_is_credited_and_told() {
        let ctx = context();
        let inviter = join(&ctx, 15551230001);
        run_user_joined_to_completion(&ctx, inviter, None).await;

        let invitee = join(&ctx, 15551230002);
        run_user_joined_to_completion(&ctx, invitee, Some(inviter)).await;

        let inviter_row = ctx.db.get_user(inviter).unwrap().unwrap();
        assert_eq!(inviter_row.invited_users, 1);

        let special = ctx.db.special_conversation(inviter).unwrap().unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        let last = messages.last().unwrap();
        assert!(last.content.contains("1st invited user"));
        assert!(last.content.contains("only 4 more invites"));
    }

    #[tokio::test]
    async fn nudge_is_sent_exactly_once_per_user() {
        let ctx = context();
        let sender = join(&ctx, 15551230001);
        let recipient = join(&ctx, 15551230002);
        run_user_joined_to_completion(&ctx, sender, None).await;

        // sender started an anonymous conversation, then messaged in it
        let (cid, _) = ctx
            .db
            .create_conversation_with_first_message(recipient, sender, false, "hi", false, NOW)
            .unwrap();
        let trigger = SpecialTrigger::SentMessage {
            from_user_id: sender,
            conversation_id: cid,
            content: "hello again".into(),
        };

        // first delivery sends the nudge and schedules the followup
        assert!(matches!(
            run_step(&ctx, &trigger, 0).await.unwrap(),
            StepOutcome::Continue { next_step: 1, .. }
        ));
        // redelivery of the same event is stopped by the sentinel
        assert!(matches!(
            run_step(&ctx, &trigger, 0).await.unwrap(),
            StepOutcome::Done
        ));
        run_step(&ctx, &trigger, 1).await.unwrap();

        let special = ctx.db.special_conversation(sender).unwrap().unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        let link = script::invite_link(&ctx.invite_link_base, sender);
        let nudges = messages
            .iter()
            .filter(|m| m.content.contains(&link))
            .count();
        assert_eq!(nudges, 1);
        assert_eq!(
            messages.last().unwrap().content,
            script::NUDGE_FOLLOWUP
        );
    }

    #[tokio::test]
    async fn anonymous_sender_gets_no_nudge() {
        let ctx = context();
        let sender = join(&ctx, 15551230001);
        let recipient = join(&ctx, 15551230002);
        run_user_joined_to_completion(&ctx, sender, None).await;

        // sender is the anonymous party here
        let (cid, _) = ctx
            .db
            .create_conversation_with_first_message(sender, recipient, false, "hi", false, NOW)
            .unwrap();
        let trigger = SpecialTrigger::SentMessage {
            from_user_id: sender,
            conversation_id: cid,
            content: "hi".into(),
        };
        assert!(matches!(
            run_step(&ctx, &trigger, 0).await.unwrap(),
            StepOutcome::Done
        ));

        let special = ctx.db.special_conversation(sender).unwrap().unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert_eq!(messages.len(), 3); // onboarding only
    }

    #[tokio::test]
    async fn reveal_spends_a_credit_and_notifies_both_parties() {
        let ctx = context();
        let requester = join(&ctx, 15551230001);
        let anonymous = ctx.db.create_user(15551230002, "Ada", "Lovelace", NOW).unwrap();
        run_user_joined_to_completion(&ctx, requester, None).await;
        run_user_joined_to_completion(&ctx, anonymous, None).await;

        // someone messaged the requester anonymously
        let (target_cid, _) = ctx
            .db
            .create_conversation_with_first_message(anonymous, requester, false, "guess", false, NOW)
            .unwrap();

        for _ in 0..REVEAL_THRESHOLD {
            ctx.db.increment_invited_users(requester).unwrap();
        }

        let special = ctx.db.special_conversation(requester).unwrap().unwrap();
        let trigger = SpecialTrigger::SentMessage {
            from_user_id: requester,
            conversation_id: special.id,
            content: format!("#{target_cid}"),
        };
        run_step(&ctx, &trigger, 0).await.unwrap();

        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert_eq!(
            messages.last().unwrap().content,
            "their name is Ada Lovelace"
        );
        let requester_row = ctx.db.get_user(requester).unwrap().unwrap();
        assert_eq!(requester_row.revealed_users, 1);

        // the revealed party was told in their own special conversation
        let their_special = ctx.db.special_conversation(anonymous).unwrap().unwrap();
        let their_messages = ctx.db.messages_for_conversation(their_special.id).unwrap();
        assert!(
            their_messages
                .last()
                .unwrap()
                .content
                .contains(&format!("#{target_cid}"))
        );

        // a second reveal without more invites is refused
        let second = SpecialTrigger::SentMessage {
            from_user_id: requester,
            conversation_id: special.id,
            content: format!("{target_cid} again"),
        };
        run_step(&ctx, &second, 0).await.unwrap();
        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert!(messages.last().unwrap().content.contains("you still have to invite"));
        let requester_row = ctx.db.get_user(requester).unwrap().unwrap();
        assert_eq!(requester_row.revealed_users, 1);
    }

    #[tokio::test]
    async fn reveal_of_foreign_conversation_spends_nothing() {
        let ctx = context();
        let requester = join(&ctx, 15551230001);
        let bystander = ctx.db.create_user(15551230002, "By", "Stander", NOW).unwrap();
        let third = ctx.db.create_user(15551230003, "Third", "Party", NOW).unwrap();
        run_user_joined_to_completion(&ctx, requester, None).await;

        // a conversation the requester is not part of
        let (foreign_cid, _) = ctx
            .db
            .create_conversation_with_first_message(bystander, third, false, "psst", false, NOW)
            .unwrap();

        for _ in 0..REVEAL_THRESHOLD {
            ctx.db.increment_invited_users(requester).unwrap();
        }

        let special = ctx.db.special_conversation(requester).unwrap().unwrap();
        let trigger = SpecialTrigger::SentMessage {
            from_user_id: requester,
            conversation_id: special.id,
            content: format!("{foreign_cid}"),
        };
        run_step(&ctx, &trigger, 0).await.unwrap();

        let messages = ctx.db.messages_for_conversation(special.id).unwrap();
        assert_eq!(
            messages.last().unwrap().content,
            script::NOT_IN_CONVERSATION
        );
        // the credit is intact
        let row = ctx.db.get_user(requester).unwrap().unwrap();
        assert_eq!(row.revealed_users, 0);
    }

    #[tokio::test]
    async fn non_numeric_special_message_is_ignored() {
        let ctx = context();
        let user = join(&ctx, 15551230001);
        run_user_joined_to_completion(&ctx, user, None).await;

        let special = ctx.db.special_conversation(user).unwrap().unwrap();
        let before = ctx.db.messages_for_conversation(special.id).unwrap().len();

        let trigger = SpecialTrigger::SentMessage {
            from_user_id: user,
            conversation_id: special.id,
            content: "thanks!".into(),
        };
        run_step(&ctx, &trigger, 0).await.unwrap();

        let after = ctx.db.messages_for_conversation(special.id).unwrap().len();
        assert_eq!(before, after);
    }
}

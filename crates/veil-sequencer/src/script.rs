//! Fixed onboarding script content and the invite/reveal copy. Deterministic
//! content and delays; none of it is configurable at runtime. Message text
//! doubles as the idempotence marker: steps scan the special conversation for
//! their own content before inserting, so redelivered jobs cannot duplicate
//! a user-facing message.

use chrono::Duration;

use crate::REVEAL_THRESHOLD;

pub const WELCOME_FIRST: &str = "welcome to veil! send anyone you want anonymous messages—you \
     can see who they are, but they won't be able to see who you are. remember not to \
     cyberbully, or you will be banned. have fun!";

pub const WELCOME_SECOND: &str = "try picking someone from the user list to send an anonymous \
     message to—they'll (probably) never know it's you!";

pub const WELCOME_THIRD: &str = "it'll be fun i promise";

pub const NUDGE_FOLLOWUP: &str = "you should invite someone fr fr";

pub const NOT_IN_CONVERSATION: &str = "you're not in that conversation";

pub const USER_NOT_FOUND: &str = "we can't find that user";

pub fn welcome_second_delay() -> Duration {
    Duration::seconds(5)
}

pub fn welcome_third_delay() -> Duration {
    Duration::seconds(3)
}

pub fn nudge_followup_delay() -> Duration {
    Duration::seconds(5)
}

/// A user's unique invite link. Also the sentinel substring the nudge guard
/// scans for.
pub fn invite_link(base_url: &str, user_id: i64) -> String {
    format!("{base_url}/?invitedBy={user_id}")
}

/// Invites still needed before the next reveal credit unlocks.
pub fn invites_until_next_credit(invited: i64, revealed: i64) -> i64 {
    REVEAL_THRESHOLD - invited + REVEAL_THRESHOLD * revealed
}

/// Reveal credits currently available to spend.
pub fn available_credits(invited: i64, revealed: i64) -> i64 {
    invited / REVEAL_THRESHOLD - revealed
}

/// English ordinal suffix: 1st, 2nd, 3rd, 4th, ... 11th, 12th, 13th, 21st.
pub fn ordinal(n: i64) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{n}{suffix}")
}

/// Message to an inviter when someone joins through their link.
pub fn invited_user_joined(
    joined_first_name: &str,
    joined_last_name: &str,
    invited: i64,
    revealed: i64,
) -> String {
    let credits = available_credits(invited, revealed);
    let tail = if credits > 0 {
        let what = if credits == 1 {
            "an anonymous conversation".to_string()
        } else {
            format!("{credits} anonymous conversations")
        };
        format!(
            "you can pick {what} to reveal the identity of the person with whom you're talking. \
             just send the conversation #"
        )
    } else {
        format!(
            "only {} more invites before you can pick an anonymous conversation to reveal the \
             identity of the person with whom you're talking",
            invites_until_next_credit(invited, revealed)
        )
    };
    format!(
        "{joined_first_name} {joined_last_name} just joined using your invite link. this is \
         your {} invited user. {tail}",
        ordinal(invited)
    )
}

/// Reply when a reveal is requested without an available credit.
pub fn not_enough_credits(invited: i64, revealed: i64, invite_link: &str) -> String {
    let more = if revealed > 0 { " more" } else { "" };
    format!(
        "you still have to invite {} more users until you can reveal any{more} identities. \
         remember, here's your unique invite link: {invite_link}",
        invites_until_next_credit(invited, revealed)
    )
}

pub fn reveal_reply(first_name: &str, last_name: &str) -> String {
    format!("their name is {first_name} {last_name}")
}

/// Sent to the anonymous party whose identity was just disclosed.
pub fn identity_disclosed(conversation_id: i64) -> String {
    format!(
        "heads up: the person you've been anonymously messaging in conversation \
         #{conversation_id} earned a reveal and now knows your name"
    )
}

/// The one-time invite explainer. Contains the invite link, which is the
/// sentinel the already-sent guard scans for.
pub fn nudge(invite_link: &str) -> String {
    format!(
        "hey, for every {REVEAL_THRESHOLD} new people you invite here using your unique invite \
         link, you'll get to reveal the identity of someone who's anonymously messaged you. \
         here it is: {invite_link}. plus, this place will be a lot cooler when everyone you \
         know is on it"
    )
}

/// First integer appearing in a reveal request, read as a conversation id.
pub fn parse_reveal_target(content: &str) -> Option<i64> {
    let digits: String = content
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

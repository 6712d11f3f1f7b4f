use crate::Database;
use crate::models::{ConversationRow, MessageRow, Side, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        phone_number: i64,
        first_name: &str,
        last_name: &str,
        created_at: &str,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (phone_number, first_name, last_name, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![phone_number, first_name, last_name, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_COLUMNS} WHERE id = ?1"),
                [id],
                map_user_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_phone(&self, phone_number: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_COLUMNS} WHERE phone_number = ?1"),
                [phone_number],
                map_user_row,
            )
            .optional()
        })
    }

    /// Roster for the bootstrap state: everyone except the caller and the
    /// system user, newest first.
    pub fn list_users_except(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_COLUMNS} WHERE id != ?1 AND id != ?2 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id, crate::SYSTEM_USER_ID], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip SMS consent for the user owning a phone number.
    /// Returns false if no such user exists.
    pub fn set_sms_consent(&self, phone_number: i64, consent: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET sms_notification_consent = ?1 WHERE phone_number = ?2",
                rusqlite::params![consent, phone_number],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn increment_invited_users(&self, user_id: i64) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            conn.query_row(
                "UPDATE users SET invited_users = invited_users + 1 WHERE id = ?1
                 RETURNING id, phone_number, first_name, last_name,
                           sms_notification_consent, invited_users, revealed_users, created_at",
                [user_id],
                map_user_row,
            )
            .optional()
        })
    }

    /// Spend one reveal credit if any are available. The guard lives in the
    /// UPDATE itself so two concurrent requests cannot both spend the same
    /// credit: the loser sees zero rows and is told "not enough credits".
    pub fn spend_reveal_credit(&self, user_id: i64, threshold: i64) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            conn.query_row(
                "UPDATE users SET revealed_users = revealed_users + 1
                 WHERE id = ?1 AND (invited_users / ?2) - revealed_users > 0
                 RETURNING id, phone_number, first_name, last_name,
                           sms_notification_consent, invited_users, revealed_users, created_at",
                rusqlite::params![user_id, threshold],
                map_user_row,
            )
            .optional()
        })
    }

    // -- Conversations --

    /// Insert a conversation together with its first message in one
    /// transaction. The known side starts at one unread: the first message is
    /// always addressed to them.
    pub fn create_conversation_with_first_message(
        &self,
        anonymous_user_id: i64,
        known_user_id: i64,
        special: bool,
        content: &str,
        flagged: bool,
        created_at: &str,
    ) -> Result<(i64, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO conversations
                     (anonymous_user_id, known_user_id, special, known_unread, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![anonymous_user_id, known_user_id, special, created_at],
            )?;
            let conversation_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO messages (conversation_id, from_user_id, content, flagged, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![conversation_id, anonymous_user_id, content, flagged, created_at],
            )?;
            let message_id = tx.last_insert_rowid();

            tx.commit()?;
            Ok((conversation_id, message_id))
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{CONVERSATION_COLUMNS} WHERE id = ?1"),
                [id],
                map_conversation_row,
            )
            .optional()
        })
    }

    /// The permanent system channel for a user, if onboarding has created it.
    pub fn special_conversation(&self, known_user_id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{CONVERSATION_COLUMNS} WHERE known_user_id = ?1 AND special = 1"),
                [known_user_id],
                map_conversation_row,
            )
            .optional()
        })
    }

    pub fn conversations_where_known(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{CONVERSATION_COLUMNS} WHERE known_user_id = ?1 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn conversations_where_anonymous(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{CONVERSATION_COLUMNS} WHERE anonymous_user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and increment the recipient side's unread counter in
    /// one transaction, so a crash between the two cannot under- or
    /// over-count.
    pub fn insert_message_and_bump_unread(
        &self,
        conversation_id: i64,
        from_user_id: i64,
        content: &str,
        flagged: bool,
        sent_at: &str,
        bump: Side,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (conversation_id, from_user_id, content, flagged, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![conversation_id, from_user_id, content, flagged, sent_at],
            )?;
            let message_id = tx.last_insert_rowid();

            let column = match bump {
                Side::Anonymous => "anonymous_unread",
                Side::Known => "known_unread",
            };
            tx.execute(
                &format!("UPDATE conversations SET {column} = {column} + 1 WHERE id = ?1"),
                [conversation_id],
            )?;

            tx.commit()?;
            Ok(message_id)
        })
    }

    /// Zero the caller's own unread counter for one conversation. Idempotent.
    pub fn reset_unread(&self, conversation_id: i64, side: Side) -> Result<()> {
        self.with_conn_mut(|conn| {
            let column = match side {
                Side::Anonymous => "anonymous_unread",
                Side::Known => "known_unread",
            };
            conn.execute(
                &format!("UPDATE conversations SET {column} = 0 WHERE id = ?1"),
                [conversation_id],
            )?;
            Ok(())
        })
    }

    pub fn messages_for_conversation(&self, conversation_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }

    // -- Blocks --

    pub fn insert_block(&self, blocker_user_id: i64, blocked_user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blocks (blocker_user_id, blocked_user_id) VALUES (?1, ?2)",
                [blocker_user_id, blocked_user_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_block(&self, blocker_user_id: i64, blocked_user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM blocks WHERE blocker_user_id = ?1 AND blocked_user_id = ?2",
                [blocker_user_id, blocked_user_id],
            )?;
            Ok(())
        })
    }

    pub fn is_blocked(&self, blocker_user_id: i64, blocked_user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE blocker_user_id = ?1 AND blocked_user_id = ?2",
                    [blocker_user_id, blocked_user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(exists.is_some())
        })
    }

    pub fn blocked_user_ids(&self, blocker_user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT blocked_user_id FROM blocks WHERE blocker_user_id = ?1")?;
            let ids = stmt
                .query_map([blocker_user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

const USER_COLUMNS: &str = "SELECT id, phone_number, first_name, last_name, \
     sms_notification_consent, invited_users, revealed_users, created_at FROM users";

const CONVERSATION_COLUMNS: &str = "SELECT id, anonymous_user_id, known_user_id, special, \
     anonymous_unread, known_unread, created_at FROM conversations";

fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        sms_notification_consent: row.get(4)?,
        invited_users: row.get(5)?,
        revealed_users: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        anonymous_user_id: row.get(1)?,
        known_user_id: row.get(2)?,
        special: row.get(3)?,
        anonymous_unread: row.get(4)?,
        known_unread: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_messages(conn: &Connection, conversation_id: i64) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, from_user_id, content, flagged, sent_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY sent_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                from_user_id: row.get(2)?,
                content: row.get(3)?,
                flagged: row.get(4)?,
                sent_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2024-02-01T12:00:00Z";

    fn db_with_two_users() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user(15551230001, "Ada", "Lovelace", NOW).unwrap();
        let b = db.create_user(15551230002, "Ben", "Franklin", NOW).unwrap();
        (db, a, b)
    }

    #[test]
    fn send_increments_exactly_the_counterpart_unread() {
        let (db, a, b) = db_with_two_users();
        let (cid, _) = db
            .create_conversation_with_first_message(a, b, false, "hi", false, NOW)
            .unwrap();

        let convo = db.get_conversation(cid).unwrap().unwrap();
        assert_eq!(convo.known_unread, 1);
        assert_eq!(convo.anonymous_unread, 0);

        // b replies: the anonymous side's unread bumps, b's side untouched
        db.insert_message_and_bump_unread(cid, b, "hey", false, NOW, Side::Anonymous)
            .unwrap();
        let convo = db.get_conversation(cid).unwrap().unwrap();
        assert_eq!(convo.anonymous_unread, 1);
        assert_eq!(convo.known_unread, 1);
        assert_eq!(db.messages_for_conversation(cid).unwrap().len(), 2);
    }

    #[test]
    fn reset_unread_is_scoped_and_idempotent() {
        let (db, a, b) = db_with_two_users();
        let (cid1, _) = db
            .create_conversation_with_first_message(a, b, false, "one", false, NOW)
            .unwrap();
        let (cid2, _) = db
            .create_conversation_with_first_message(a, b, false, "two", false, NOW)
            .unwrap();

        db.reset_unread(cid1, Side::Known).unwrap();
        db.reset_unread(cid1, Side::Known).unwrap();

        assert_eq!(db.get_conversation(cid1).unwrap().unwrap().known_unread, 0);
        // the other conversation is untouched
        assert_eq!(db.get_conversation(cid2).unwrap().unwrap().known_unread, 1);
    }

    #[test]
    fn block_row_round_trip() {
        let (db, a, b) = db_with_two_users();
        assert!(!db.is_blocked(a, b).unwrap());

        db.insert_block(a, b).unwrap();
        db.insert_block(a, b).unwrap(); // duplicate insert is a no-op
        assert!(db.is_blocked(a, b).unwrap());
        assert!(!db.is_blocked(b, a).unwrap());
        assert_eq!(db.blocked_user_ids(a).unwrap(), vec![b]);

        db.delete_block(a, b).unwrap();
        assert!(!db.is_blocked(a, b).unwrap());
    }

    #[test]
    fn reveal_credit_spend_never_goes_negative() {
        let (db, a, _) = db_with_two_users();

        // no invites yet: nothing to spend
        assert!(db.spend_reveal_credit(a, 5).unwrap().is_none());

        for _ in 0..5 {
            db.increment_invited_users(a).unwrap();
        }

        // floor(5/5) - 0 = 1 credit
        let spent = db.spend_reveal_credit(a, 5).unwrap().unwrap();
        assert_eq!(spent.invited_users, 5);
        assert_eq!(spent.revealed_users, 1);

        // floor(5/5) - 1 = 0: the second spend loses
        assert!(db.spend_reveal_credit(a, 5).unwrap().is_none());
    }

    #[test]
    fn special_conversation_lookup() {
        let (db, _, b) = db_with_two_users();
        assert!(db.special_conversation(b).unwrap().is_none());

        let (cid, _) = db
            .create_conversation_with_first_message(
                crate::SYSTEM_USER_ID,
                b,
                true,
                "welcome",
                false,
                NOW,
            )
            .unwrap();

        let special = db.special_conversation(b).unwrap().unwrap();
        assert_eq!(special.id, cid);
        assert!(special.special);
    }

    #[test]
    fn roster_excludes_caller_and_system_user() {
        let (db, a, b) = db_with_two_users();
        let roster = db.list_users_except(a).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, b);
    }
}

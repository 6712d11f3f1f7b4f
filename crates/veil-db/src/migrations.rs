use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                       INTEGER PRIMARY KEY AUTOINCREMENT,
            phone_number             INTEGER NOT NULL UNIQUE,
            first_name               TEXT NOT NULL,
            last_name                TEXT NOT NULL,
            sms_notification_consent INTEGER NOT NULL DEFAULT 1,
            invited_users            INTEGER NOT NULL DEFAULT 0,
            revealed_users           INTEGER NOT NULL DEFAULT 0,
            created_at               TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            anonymous_user_id  INTEGER NOT NULL REFERENCES users(id),
            known_user_id      INTEGER NOT NULL REFERENCES users(id),
            special            INTEGER NOT NULL DEFAULT 0,
            anonymous_unread   INTEGER NOT NULL DEFAULT 0,
            known_unread       INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_known
            ON conversations(known_user_id, special);
        CREATE INDEX IF NOT EXISTS idx_conversations_anonymous
            ON conversations(anonymous_user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            from_user_id     INTEGER NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            flagged          INTEGER NOT NULL DEFAULT 0,
            sent_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sent_at);

        CREATE TABLE IF NOT EXISTS blocks (
            blocker_user_id  INTEGER NOT NULL REFERENCES users(id),
            blocked_user_id  INTEGER NOT NULL REFERENCES users(id),
            PRIMARY KEY (blocker_user_id, blocked_user_id)
        );

        -- Durable sequencer jobs: id is the content hash of the payload,
        -- so redelivered triggers collapse into one row.
        CREATE TABLE IF NOT EXISTS jobs (
            id           TEXT PRIMARY KEY,
            payload      TEXT NOT NULL,
            step         INTEGER NOT NULL DEFAULT 0,
            status       TEXT NOT NULL DEFAULT 'pending',
            next_run_at  TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_due
            ON jobs(status, next_run_at);

        -- Seed the system user that sends onboarding and reveal messages
        INSERT OR IGNORE INTO users
            (id, phone_number, first_name, last_name, created_at)
            VALUES (1, 0, 'veil', 'team', '2024-01-30T00:00:00Z');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

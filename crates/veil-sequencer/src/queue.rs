use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use veil_db::Database;

use crate::handler::{SequencerContext, StepOutcome};

/// What woke the sequencer up. Serialized form doubles as the queued-task
/// webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum SpecialTrigger {
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invited_by_user_id: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    SentMessage {
        from_user_id: i64,
        conversation_id: i64,
        content: String,
    },
}

impl SpecialTrigger {
    /// Content-based dedup key: identical payloads collapse into one job.
    pub fn dedup_key(&self) -> String {
        let canonical = serde_json::to_string(self).expect("trigger serializes");
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub trigger: SpecialTrigger,
    pub step: u32,
}

/// Durable job queue backed by the `jobs` table. Enqueue is deduplicated by
/// payload content; execution is at-least-once with the step cursor persisted
/// after every step, so a crash mid-sequence resumes at the right step
/// instead of replaying the whole script.
#[derive(Clone)]
pub struct SpecialQueue {
    db: Arc<Database>,
}

/// How long a failed step waits before redelivery.
const RETRY_DELAY_SECS: i64 = 10;

impl SpecialQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Enqueue a trigger. Returns false if an identical payload is already
    /// queued (or was already processed).
    pub fn enqueue(&self, trigger: &SpecialTrigger) -> Result<bool> {
        let id = trigger.dedup_key();
        let payload = serde_json::to_string(trigger)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO jobs (id, payload, next_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![id, payload, now],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Jobs whose next_run_at has passed, oldest first.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>> {
        let cutoff = now.to_rfc3339();
        let raw: Vec<(String, String, u32)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, payload, step FROM jobs
                 WHERE status = 'pending' AND next_run_at <= ?1
                 ORDER BY next_run_at ASC",
            )?;
            let rows = stmt
                .query_map([cutoff], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut jobs = Vec::with_capacity(raw.len());
        for (id, payload, step) in raw {
            match serde_json::from_str(&payload) {
                Ok(trigger) => jobs.push(JobRow { id, trigger, step }),
                Err(e) => {
                    // A job we can't parse will never succeed; drop it.
                    warn!("discarding unparseable job {}: {}", id, e);
                    self.complete(&id)?;
                }
            }
        }
        Ok(jobs)
    }

    /// Persist the step cursor and the wakeup time for the next step.
    pub fn advance(&self, id: &str, step: u32, next_run_at: DateTime<Utc>) -> Result<()> {
        let at = next_run_at.to_rfc3339();
        self.db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE jobs SET step = ?2, next_run_at = ?3 WHERE id = ?1",
                rusqlite::params![id, step, at],
            )?;
            Ok(())
        })
    }

    pub fn complete(&self, id: &str) -> Result<()> {
        self.db.with_conn_mut(|conn| {
            conn.execute("UPDATE jobs SET status = 'done' WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

/// Worker loop: polls for due jobs and runs one step of each. Failed steps
/// stay pending and are retried after a delay (at-least-once execution; the
/// step handlers carry their own idempotence guards).
pub async fn run_worker_loop(queue: SpecialQueue, ctx: SequencerContext, poll_interval_secs: u64) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
    loop {
        interval.tick().await;

        let due = match queue.due_jobs(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                warn!("job poll failed: {:#}", e);
                continue;
            }
        };

        for job in due {
            match crate::handler::run_step(&ctx, &job.trigger, job.step).await {
                Ok(StepOutcome::Continue { next_step, delay }) => {
                    debug!("job {} advancing to step {}", job.id, next_step);
                    let result = queue.advance(&job.id, next_step, Utc::now() + delay);
                    if let Err(e) = result {
                        warn!("job {} cursor persist failed: {:#}", job.id, e);
                    }
                }
                Ok(StepOutcome::Done) => {
                    if let Err(e) = queue.complete(&job.id) {
                        warn!("job {} completion persist failed: {:#}", job.id, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "job {} step {} failed, will retry: {:#}",
                        job.id, job.step, e
                    );
                    let retry_at = Utc::now() + Duration::seconds(RETRY_DELAY_SECS);
                    if let Err(e) = queue.advance(&job.id, job.step, retry_at) {
                        warn!("job {} retry schedule failed: {:#}", job.id, e);
                    }
                }
            }
        }
    }
}

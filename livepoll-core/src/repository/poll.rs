use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

use crate::{
    models::{Poll, PollId, PollStatus},
    Error, Result,
};

/// Poll repository for database operations
#[derive(Clone)]
pub struct PollRepository {
    pool: PgPool,
}

impl PollRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new poll
    pub async fn create(&self, poll: &Poll) -> Result<Poll> {
        let row = sqlx::query(
            r"
            INSERT INTO polls (id, question, options, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, question, options, status, created_at, expires_at
            ",
        )
        .bind(poll.id.as_str())
        .bind(&poll.question)
        .bind(Json(&poll.options))
        .bind(poll.status.as_str())
        .bind(poll.created_at)
        .bind(poll.expires_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_poll(&row)
    }

    /// Get a poll by ID
    pub async fn get(&self, poll_id: &PollId) -> Result<Option<Poll>> {
        let row = sqlx::query(
            r"
            SELECT id, question, options, status, created_at, expires_at
            FROM polls
            WHERE id = $1
            ",
        )
        .bind(poll_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_poll(&row)?)),
            None => Ok(None),
        }
    }

    /// Transaction-scoped variant of [`get`], used by the vote path so the
    /// open/expiry check and the upsert see the same snapshot.
    pub async fn get_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        poll_id: &PollId,
    ) -> Result<Option<Poll>> {
        let row = sqlx::query(
            r"
            SELECT id, question, options, status, created_at, expires_at
            FROM polls
            WHERE id = $1
            ",
        )
        .bind(poll_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_poll(&row)?)),
            None => Ok(None),
        }
    }

    /// Mark a poll closed. The status guard makes the transition idempotent:
    /// only the call that actually flips open -> closed reports `true`.
    pub async fn close(&self, poll_id: &PollId) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE polls
            SET status = 'closed'
            WHERE id = $1 AND status = 'open'
            ",
        )
        .bind(poll_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open, unexpired polls, newest first
    pub async fn list_open(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Poll>> {
        let rows = sqlx::query(
            r"
            SELECT id, question, options, status, created_at, expires_at
            FROM polls
            WHERE status = 'open' AND expires_at > $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_poll).collect()
    }

    /// Open polls whose expiry has passed. Feeds the lifecycle sweep that
    /// covers close timers lost to a process restart.
    pub async fn list_expired_open(&self, now: DateTime<Utc>) -> Result<Vec<PollId>> {
        let rows = sqlx::query(
            r"
            SELECT id
            FROM polls
            WHERE status = 'open' AND expires_at < $1
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(PollId::from_string(row.try_get("id")?)))
            .collect()
    }
}

/// Convert database row to `Poll`
fn row_to_poll(row: &PgRow) -> Result<Poll> {
    let status_str: String = row.try_get("status")?;
    let status = PollStatus::from_str(&status_str)
        .map_err(|e| Error::Internal(format!("Invalid poll status in database: {e}")))?;
    let Json(options): Json<Vec<String>> = row.try_get("options")?;

    Ok(Poll {
        id: PollId::from_string(row.try_get("id")?),
        question: row.try_get("question")?,
        options,
        status,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[cfg(test)]
mod tests {

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_create_and_get_poll() {
        // Integration test placeholder
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_close_is_idempotent() {
        // First close returns true, second returns false
    }
}

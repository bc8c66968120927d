use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    models::{PollId, Vote, VoterId},
    Result,
};

/// Vote repository for database operations
#[derive(Clone)]
pub struct VoteRepository {
    pool: PgPool,
}

impl VoteRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a vote keyed by (poll_id, voter_id). The composite primary key
    /// serializes concurrent casts for the same voter at the storage layer:
    /// a repeat cast overwrites the row, so the vote count per voter is
    /// always exactly one.
    pub async fn upsert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        poll_id: &PollId,
        voter_id: &VoterId,
        option_index: i32,
    ) -> Result<Vote> {
        let row = sqlx::query(
            r"
            INSERT INTO votes (poll_id, voter_id, option_index, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (poll_id, voter_id)
            DO UPDATE SET option_index = EXCLUDED.option_index, updated_at = NOW()
            RETURNING poll_id, voter_id, option_index, updated_at
            ",
        )
        .bind(poll_id.as_str())
        .bind(voter_id.as_str())
        .bind(option_index)
        .fetch_one(&mut **tx)
        .await?;

        Ok(Vote {
            poll_id: PollId::from_string(row.try_get("poll_id")?),
            voter_id: VoterId::from_string(row.try_get("voter_id")?),
            option_index: row.try_get("option_index")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Grouped vote counts for a poll, within the casting transaction so the
    /// returned tally includes the write that just happened.
    pub async fn counts_by_option_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        poll_id: &PollId,
    ) -> Result<Vec<(i32, i64)>> {
        let rows = sqlx::query(
            r"
            SELECT option_index, COUNT(*) as count
            FROM votes
            WHERE poll_id = $1
            GROUP BY option_index
            ",
        )
        .bind(poll_id.as_str())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("option_index")?, row.try_get("count")?)))
            .collect()
    }

    /// Grouped vote counts for a poll (plain read path)
    pub async fn counts_by_option(&self, poll_id: &PollId) -> Result<Vec<(i32, i64)>> {
        let rows = sqlx::query(
            r"
            SELECT option_index, COUNT(*) as count
            FROM votes
            WHERE poll_id = $1
            GROUP BY option_index
            ",
        )
        .bind(poll_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("option_index")?, row.try_get("count")?)))
            .collect()
    }
}

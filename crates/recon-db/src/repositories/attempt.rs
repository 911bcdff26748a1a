use crate::Result;
use recon_core::types::SettlementAttempt;
use sqlx::PgPool;

pub struct AttemptRepository;

impl AttemptRepository {
    pub async fn insert(pool: &PgPool, attempt: &SettlementAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_attempts
                (entry_id, job_id, attempt, outcome, error, tx_hash, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(attempt.entry_id)
        .bind(&attempt.job_id)
        .bind(attempt.attempt as i32)
        .bind(attempt.outcome.as_str())
        .bind(&attempt.error)
        .bind(&attempt.tx_hash)
        .bind(attempt.started_at)
        .bind(attempt.finished_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

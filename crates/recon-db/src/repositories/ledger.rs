use crate::models::DbLedgerEntry;
use crate::Result;
use recon_core::types::{LedgerEntry, LedgerStatus};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

pub struct LedgerRepository;

impl LedgerRepository {
    /// Insert a new entry, returning the stored row
    pub async fn insert(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<DbLedgerEntry> {
        let row = sqlx::query_as::<_, DbLedgerEntry>(
            r#"
            INSERT INTO ledger_entries (
                user_id, currency_id, balance_id, change_amount, change_type, status,
                proof, retry_count, previous_balance, new_balance, args
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.currency_id)
        .bind(entry.balance_id)
        .bind(entry.change_amount)
        .bind(entry.change_type.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.proof)
        .bind(entry.retry_count as i32)
        .bind(entry.previous_balance)
        .bind(entry.new_balance)
        .bind(Json(&entry.args))
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Write back the mutable columns of an entry
    pub async fn update(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<DbLedgerEntry> {
        let row = sqlx::query_as::<_, DbLedgerEntry>(
            r#"
            UPDATE ledger_entries SET
                status = $2,
                proof = $3,
                retry_count = $4,
                previous_balance = $5,
                new_balance = $6,
                args = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(&entry.proof)
        .bind(entry.retry_count as i32)
        .bind(entry.previous_balance)
        .bind(entry.new_balance)
        .bind(Json(&entry.args))
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<Option<DbLedgerEntry>> {
        let row = sqlx::query_as::<_, DbLedgerEntry>("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Row-lock an entry for the rest of the transaction
    pub async fn lock(conn: &mut PgConnection, id: i64) -> Result<Option<DbLedgerEntry>> {
        let row = sqlx::query_as::<_, DbLedgerEntry>(
            "SELECT * FROM ledger_entries WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn id_by_proof(conn: &mut PgConnection, proof: &str) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM ledger_entries WHERE proof = $1")
            .bind(proof)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn by_status(pool: &PgPool, status: LedgerStatus) -> Result<Vec<DbLedgerEntry>> {
        let rows = sqlx::query_as::<_, DbLedgerEntry>(
            "SELECT * FROM ledger_entries WHERE status = $1 ORDER BY id",
        )
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// PENDING entries that need an on-chain transfer
    pub async fn pending_outbound(pool: &PgPool) -> Result<Vec<DbLedgerEntry>> {
        let rows = sqlx::query_as::<_, DbLedgerEntry>(
            r#"
            SELECT * FROM ledger_entries
            WHERE status = 'pending' AND change_type IN ('withdraw', 'payout')
            ORDER BY id
            "#,
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

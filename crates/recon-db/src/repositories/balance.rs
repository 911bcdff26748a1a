use crate::models::DbBalance;
use crate::Result;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

pub struct BalanceRepository;

impl BalanceRepository {
    /// Create the (user, currency) row if it does not exist yet
    pub async fn ensure(conn: &mut PgConnection, user_id: i64, currency_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, currency_id, amount)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id, currency_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(currency_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Row-lock the balance for the rest of the transaction
    pub async fn lock(conn: &mut PgConnection, user_id: i64, currency_id: i64) -> Result<DbBalance> {
        Self::ensure(conn, user_id, currency_id).await?;
        let row = sqlx::query_as::<_, DbBalance>(
            "SELECT * FROM balances WHERE user_id = $1 AND currency_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(currency_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn set_amount(conn: &mut PgConnection, id: i64, amount: Decimal) -> Result<()> {
        sqlx::query("UPDATE balances SET amount = $1 WHERE id = $2")
            .bind(amount)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn get_amount(pool: &PgPool, user_id: i64, currency_id: i64) -> Result<Decimal> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            "SELECT amount FROM balances WHERE user_id = $1 AND currency_id = $2",
        )
        .bind(user_id)
        .bind(currency_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(a,)| a).unwrap_or(Decimal::ZERO))
    }
}

//! Fine ledger on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgConnection, types::Json, FromRow, Row};

use super::{books::conflict_on_unique, FineStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrowing::Borrowing,
        fine::{Fine, FineReason, FineRow, FineTransition, FineUpsert, NewFine},
    },
};

/// Insert a fine inside the caller's transaction
pub(crate) async fn insert_fine_on(
    conn: &mut PgConnection,
    data: &NewFine,
    now: DateTime<Utc>,
) -> AppResult<Fine> {
    sqlx::query_as::<_, FineRow>(
        r#"
        INSERT INTO fines (student_id, borrowing_id, amount, reason, status,
                           paid_amount, is_paid, notes, crea_date)
        VALUES ($1, $2, $3, $4, 'pending', 0, FALSE, $5, $6)
        RETURNING *
        "#,
    )
    .bind(data.student_id)
    .bind(data.borrowing_id)
    .bind(data.amount)
    .bind(data.reason)
    .bind(&data.notes)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map(Fine::from)
    .map_err(|e| {
        conflict_on_unique(e, || {
            format!(
                "A {} fine already exists for borrowing {}",
                data.reason.as_str(),
                data.borrowing_id
            )
        })
    })
}

/// Single-statement upsert keyed on the `(borrowing_id, reason)` unique index.
///
/// The CTE reads the amount from the statement snapshot so the caller learns
/// whether the row was created, raised or left alone.
pub(crate) async fn upsert_overdue_fine_on(
    conn: &mut PgConnection,
    borrowing: &Borrowing,
    amount: Decimal,
    now: DateTime<Utc>,
) -> AppResult<FineUpsert> {
    let row = sqlx::query(
        r#"
        WITH previous AS (
            SELECT amount FROM fines WHERE borrowing_id = $2 AND reason = 'overdue'
        ), upserted AS (
            INSERT INTO fines (student_id, borrowing_id, amount, reason, status,
                               paid_amount, is_paid, crea_date)
            VALUES ($1, $2, $3, 'overdue', 'pending', 0, FALSE, $4)
            ON CONFLICT (borrowing_id, reason) DO UPDATE
                SET amount = GREATEST(fines.amount, EXCLUDED.amount),
                    status = CASE WHEN EXCLUDED.amount > fines.paid_amount
                                  THEN 'pending'::fine_status ELSE fines.status END,
                    is_paid = CASE WHEN EXCLUDED.amount > fines.paid_amount
                                   THEN FALSE ELSE fines.is_paid END,
                    modif_date = EXCLUDED.crea_date
                WHERE fines.status = 'pending'
                   OR (fines.status = 'paid' AND EXCLUDED.amount > fines.amount)
            RETURNING *
        )
        SELECT upserted.*, (SELECT amount FROM previous) AS previous_amount
        FROM upserted
        "#,
    )
    .bind(borrowing.student_id)
    .bind(borrowing.id)
    .bind(amount)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let previous: Option<Decimal> = row.try_get("previous_amount")?;
            let fine = Fine::from(FineRow::from_row(&row)?);
            if fine.status.is_open() {
                sqlx::query("UPDATE borrowings SET fine_paid = FALSE WHERE id = $1")
                    .bind(borrowing.id)
                    .execute(&mut *conn)
                    .await?;
            }
            Ok(FineUpsert {
                created: previous.is_none(),
                updated: previous.map(|p| p != fine.amount).unwrap_or(false),
                fine,
            })
        }
        None => {
            // Conflict with a fine that is no longer pending: leave it as is
            let fine = sqlx::query_as::<_, FineRow>(
                "SELECT * FROM fines WHERE borrowing_id = $1 AND reason = 'overdue'",
            )
            .bind(borrowing.id)
            .fetch_one(&mut *conn)
            .await?;
            Ok(FineUpsert {
                fine: fine.into(),
                created: false,
                updated: false,
            })
        }
    }
}

#[async_trait]
impl FineStore for Repository {
    async fn get_fine(&self, id: i32) -> AppResult<Fine> {
        sqlx::query_as::<_, FineRow>("SELECT * FROM fines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Fine::from)
            .ok_or_else(|| AppError::NotFound(format!("Fine with id {} not found", id)))
    }

    async fn find_fine(&self, borrowing_id: i32, reason: FineReason) -> AppResult<Option<Fine>> {
        let fine = sqlx::query_as::<_, FineRow>(
            "SELECT * FROM fines WHERE borrowing_id = $1 AND reason = $2",
        )
        .bind(borrowing_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fine.map(Fine::from))
    }

    async fn list_student_fines(&self, student_id: i32) -> AppResult<Vec<Fine>> {
        let rows = sqlx::query_as::<_, FineRow>(
            "SELECT * FROM fines WHERE student_id = $1 ORDER BY crea_date DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Fine::from).collect())
    }

    async fn outstanding_fines(&self, student_id: i32) -> AppResult<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(GREATEST(amount - paid_amount, 0)), 0)
            FROM fines
            WHERE student_id = $1 AND status IN ('pending', 'disputed')
            "#,
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn create_fine(&self, data: &NewFine, now: DateTime<Utc>) -> AppResult<Fine> {
        let mut conn = self.pool.acquire().await?;
        insert_fine_on(&mut conn, data, now).await
    }

    async fn upsert_overdue_fine(
        &self,
        borrowing: &Borrowing,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<FineUpsert> {
        let mut conn = self.pool.acquire().await?;
        upsert_overdue_fine_on(&mut conn, borrowing, amount, now).await
    }

    async fn apply_fine_transition(&self, id: i32, transition: &FineTransition) -> AppResult<Fine> {
        let mut tx = self.pool.begin().await?;

        let mut fine: Fine = sqlx::query_as::<_, FineRow>("SELECT * FROM fines WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(Fine::from)
            .ok_or_else(|| AppError::NotFound(format!("Fine with id {} not found", id)))?;

        fine.apply(transition)?;

        let updated = sqlx::query_as::<_, FineRow>(
            r#"
            UPDATE fines SET
                status = $2,
                paid_amount = $3,
                is_paid = $4,
                payments = $5,
                waived_by = $6,
                waived_at = $7,
                dispute_reason = $8,
                disputed_at = $9,
                resolved_by = $10,
                resolved_at = $11,
                resolution_notes = $12,
                modif_date = $13
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(fine.id)
        .bind(fine.status)
        .bind(fine.paid_amount)
        .bind(fine.is_paid)
        .bind(Json(fine.payments.clone()))
        .bind(fine.waived_by)
        .bind(fine.waived_at)
        .bind(&fine.dispute_reason)
        .bind(fine.disputed_at)
        .bind(fine.resolved_by)
        .bind(fine.resolved_at)
        .bind(&fine.resolution_notes)
        .bind(fine.modif_date)
        .fetch_one(&mut *tx)
        .await?;

        // A borrowing's fines are settled once none of them is still open
        sqlx::query(
            r#"
            UPDATE borrowings SET fine_paid = NOT EXISTS (
                SELECT 1 FROM fines WHERE borrowing_id = $1 AND status IN ('pending', 'disputed')
            )
            WHERE id = $1
            "#,
        )
        .bind(fine.borrowing_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.into())
    }
}

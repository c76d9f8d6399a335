//! Borrowing record store on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use super::{fines, BorrowingStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrowing::{
            self, Borrowing, BorrowingExtension, BorrowingRow, LostRecord, NewBorrowing,
            ReturnRecord, SentNotification,
        },
        fine::{Fine, FineReason, NewFine},
    },
};

impl Repository {
    /// Error for a conditional update that matched no active borrowing
    async fn inactive_borrowing_error(&self, id: i32) -> AppError {
        match self.get_borrowing(id).await {
            Ok(b) => borrowing::not_active(b.status),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl BorrowingStore for Repository {
    async fn get_borrowing(&self, id: i32) -> AppResult<Borrowing> {
        sqlx::query_as::<_, BorrowingRow>("SELECT * FROM borrowings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Borrowing::from)
            .ok_or_else(|| AppError::NotFound(format!("Borrowing with id {} not found", id)))
    }

    async fn list_student_borrowings(&self, student_id: i32) -> AppResult<Vec<Borrowing>> {
        let rows = sqlx::query_as::<_, BorrowingRow>(
            "SELECT * FROM borrowings WHERE student_id = $1 ORDER BY borrowed_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Borrowing::from).collect())
    }

    async fn count_active_borrowings(&self, student_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE student_id = $1 AND status IN ('borrowed', 'overdue')",
        )
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn create_borrowing(&self, data: &NewBorrowing, max_active: i64) -> AppResult<Borrowing> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent lends to the same student
        sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(data.student_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", data.student_id)))?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE student_id = $1 AND status IN ('borrowed', 'overdue')",
        )
        .bind(data.student_id)
        .fetch_one(&mut *tx)
        .await?;

        if active >= max_active {
            return Err(borrowing::borrowing_limit_reached(active, max_active));
        }

        let reserved = sqlx::query(
            r#"
            UPDATE books SET available_copies = available_copies - 1, modif_date = $2
            WHERE id = $1 AND is_active AND available_copies > 0
            "#,
        )
        .bind(data.book_id)
        .bind(data.borrowed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if reserved == 0 {
            return Err(borrowing::book_unavailable());
        }

        let row = sqlx::query_as::<_, BorrowingRow>(
            r#"
            INSERT INTO borrowings (student_id, book_id, staff_id, borrowed_at, due_date,
                                    status, fine_amount, fine_paid, crea_date)
            VALUES ($1, $2, $3, $4, $5, 'borrowed', 0, FALSE, $4)
            RETURNING *
            "#,
        )
        .bind(data.student_id)
        .bind(data.book_id)
        .bind(data.staff_id)
        .bind(data.borrowed_at)
        .bind(data.due_date)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET total_books_borrowed = total_books_borrowed + 1 WHERE id = $1")
            .bind(data.student_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn complete_return(
        &self,
        id: i32,
        data: &ReturnRecord,
    ) -> AppResult<(Borrowing, Option<Fine>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BorrowingRow>(
            r#"
            UPDATE borrowings SET
                status = 'returned',
                returned_at = $2,
                return_condition = $3,
                notes = COALESCE($4, notes),
                fine_amount = $5,
                modif_date = $2
            WHERE id = $1 AND status IN ('borrowed', 'overdue')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.returned_at)
        .bind(data.condition)
        .bind(&data.notes)
        .bind(data.fine_amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Err(self.inactive_borrowing_error(id).await);
        };
        let mut borrowing = Borrowing::from(row);

        sqlx::query(
            r#"
            UPDATE books SET available_copies = LEAST(available_copies + 1, total_copies),
                             modif_date = $2
            WHERE id = $1
            "#,
        )
        .bind(borrowing.book_id)
        .bind(data.returned_at)
        .execute(&mut *tx)
        .await?;

        let fine = if data.fine_amount > rust_decimal::Decimal::ZERO {
            let upsert =
                fines::upsert_overdue_fine_on(&mut tx, &borrowing, data.fine_amount, data.returned_at)
                    .await?;
            if upsert.fine.status.is_open() {
                borrowing.fine_paid = false;
            }
            Some(upsert.fine)
        } else {
            None
        };

        tx.commit().await?;
        Ok((borrowing, fine))
    }

    async fn extend_borrowing(
        &self,
        id: i32,
        extension: &BorrowingExtension,
        max_extensions: usize,
    ) -> AppResult<Borrowing> {
        let row = sqlx::query_as::<_, BorrowingRow>(
            r#"
            UPDATE borrowings SET
                due_date = $2,
                extensions = extensions || $3,
                status = 'borrowed',
                modif_date = $4
            WHERE id = $1
              AND status IN ('borrowed', 'overdue')
              AND jsonb_array_length(extensions) < $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(extension.new_due_date)
        .bind(Json(vec![extension.clone()]))
        .bind(extension.extended_at)
        .bind(max_extensions as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                let current = self.get_borrowing(id).await?;
                if current.status.is_terminal() {
                    Err(borrowing::not_active(current.status))
                } else {
                    Err(borrowing::extension_limit_reached(
                        current.extensions.len(),
                        max_extensions,
                    ))
                }
            }
        }
    }

    async fn mark_lost(&self, id: i32, data: &LostRecord) -> AppResult<(Borrowing, Option<Fine>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BorrowingRow>(
            r#"
            UPDATE borrowings SET
                status = 'lost',
                fine_amount = $2,
                notes = COALESCE($3, notes),
                modif_date = $4
            WHERE id = $1 AND status IN ('borrowed', 'overdue')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.fine_amount)
        .bind(&data.notes)
        .bind(data.at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Err(self.inactive_borrowing_error(id).await);
        };
        let borrowing = Borrowing::from(row);

        let fine = if data.fine_amount > rust_decimal::Decimal::ZERO {
            let new_fine = NewFine {
                student_id: borrowing.student_id,
                borrowing_id: borrowing.id,
                amount: data.fine_amount,
                reason: FineReason::Loss,
                notes: data.notes.clone(),
            };
            Some(fines::insert_fine_on(&mut tx, &new_fine, data.at).await?)
        } else {
            None
        };

        tx.commit().await?;
        Ok((borrowing, fine))
    }

    async fn list_overdue_borrowings(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>> {
        let rows = sqlx::query_as::<_, BorrowingRow>(
            r#"
            SELECT * FROM borrowings
            WHERE status IN ('borrowed', 'overdue') AND due_date < $1
            ORDER BY due_date
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Borrowing::from).collect())
    }

    async fn list_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>> {
        let rows = sqlx::query_as::<_, BorrowingRow>(
            r#"
            SELECT * FROM borrowings
            WHERE status IN ('borrowed', 'overdue') AND due_date BETWEEN $1 AND $2
            ORDER BY due_date
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Borrowing::from).collect())
    }

    async fn mark_overdue(&self, id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE borrowings SET status = 'overdue', modif_date = $2
            WHERE id = $1 AND status = 'borrowed' AND due_date < $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn record_notification_sent(&self, id: i32, sent: &SentNotification) -> AppResult<()> {
        sqlx::query(
            "UPDATE borrowings SET notifications_sent = notifications_sent || $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Json(vec![sent.clone()]))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

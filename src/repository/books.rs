//! Book availability ledger on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BookStore, Repository};
use crate::{
    error::{AppError, AppResult},
    models::book::{Book, CreateBook, UpdateBook},
};

/// Map a unique violation to `Conflict`, keep other database errors as is
pub(crate) fn conflict_on_unique(error: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(error),
    }
}

#[async_trait]
impl BookStore for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_book(&self, data: &CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (isbn, title, author, total_copies, available_copies,
                               lending_period_days, is_active, crea_date)
            VALUES ($1, $2, $3, $4, $4, $5, TRUE, $6)
            RETURNING *
            "#,
        )
        .bind(&data.isbn)
        .bind(&data.title)
        .bind(&data.author)
        .bind(data.total_copies)
        .bind(data.lending_period_days)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("A book with ISBN {} already exists", data.isbn)))
    }

    async fn get_book(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    async fn update_book(&self, id: i32, data: &UpdateBook, now: DateTime<Utc>) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let (total, available) = current.copies_after_update(data);

        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                title = COALESCE($2, title),
                author = COALESCE($3, author),
                total_copies = $4,
                available_copies = $5,
                lending_period_days = COALESCE($6, lending_period_days),
                modif_date = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.author)
        .bind(total)
        .bind(available)
        .bind(data.lending_period_days)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(book)
    }

    async fn deactivate_book(&self, id: i32, now: DateTime<Utc>) -> AppResult<Book> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET is_active = FALSE, modif_date = $2
            WHERE id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM borrowings
                  WHERE book_id = $1 AND status IN ('borrowed', 'overdue')
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match book {
            Some(book) => Ok(book),
            None => {
                // Distinguish unknown book from book still on loan
                self.get_book(id).await?;
                Err(AppError::Conflict(
                    "Book has active borrowings and cannot be deactivated".to_string(),
                ))
            }
        }
    }
}

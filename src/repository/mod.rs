//! Repository layer for database operations
//!
//! Storage is reached through the [`LibraryStore`] trait family so the services
//! run the same way against PostgreSQL ([`Repository`]) and the in-process
//! [`memory::MemoryRepository`].
//!
//! Every operation that has to be race-free is a single store call: the copy
//! reservation and active-loan check on lend, the status transition on return,
//! extend and loss, the overdue fine upsert and fine ledger transitions.

pub mod books;
pub mod borrowings;
pub mod fines;
pub mod memory;
pub mod notifications;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        book::{Book, CreateBook, UpdateBook},
        borrowing::{
            Borrowing, BorrowingExtension, LostRecord, NewBorrowing, ReturnRecord,
            SentNotification,
        },
        fine::{Fine, FineReason, FineTransition, FineUpsert, NewFine},
        notification::{NewNotification, Notification},
        user::{CreateUser, User},
    },
};

/// Book availability ledger
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn create_book(&self, data: &CreateBook, now: DateTime<Utc>) -> AppResult<Book>;

    async fn get_book(&self, id: i32) -> AppResult<Book>;

    /// Admin edit; copy counts are clamped into `[0, total]`
    async fn update_book(&self, id: i32, data: &UpdateBook, now: DateTime<Utc>) -> AppResult<Book>;

    /// Soft delete; refused while active borrowings reference the book
    async fn deactivate_book(&self, id: i32, now: DateTime<Utc>) -> AppResult<Book>;

    /// Round trip to the backing storage
    async fn ping(&self) -> AppResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, data: &CreateUser, now: DateTime<Utc>) -> AppResult<User>;

    async fn get_user(&self, id: i32) -> AppResult<User>;

    /// Activate or deactivate an account; inactive students cannot borrow
    async fn set_user_active(&self, id: i32, is_active: bool) -> AppResult<User>;
}

/// Borrowing record store
#[async_trait]
pub trait BorrowingStore: Send + Sync {
    async fn get_borrowing(&self, id: i32) -> AppResult<Borrowing>;

    async fn list_student_borrowings(&self, student_id: i32) -> AppResult<Vec<Borrowing>>;

    /// Borrowings in `borrowed` or `overdue`
    async fn count_active_borrowings(&self, student_id: i32) -> AppResult<i64>;

    /// Atomically re-check the active limit, take one copy and insert the loan.
    ///
    /// Fails with `Validation` when no copy is left or the student reached
    /// `max_active`; in both cases nothing is written.
    async fn create_borrowing(&self, data: &NewBorrowing, max_active: i64) -> AppResult<Borrowing>;

    /// `borrowed|overdue → returned`, give the copy back and record the overdue fine.
    ///
    /// Fails with `Validation` if the loan is no longer active.
    async fn complete_return(
        &self,
        id: i32,
        data: &ReturnRecord,
    ) -> AppResult<(Borrowing, Option<Fine>)>;

    /// Append an extension and move the due date; the loan is `borrowed` afterwards.
    async fn extend_borrowing(
        &self,
        id: i32,
        extension: &BorrowingExtension,
        max_extensions: usize,
    ) -> AppResult<Borrowing>;

    /// `borrowed|overdue → lost` and record the loss fine.
    async fn mark_lost(&self, id: i32, data: &LostRecord) -> AppResult<(Borrowing, Option<Fine>)>;

    /// Active borrowings with `due_date < now`
    async fn list_overdue_borrowings(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>>;

    /// Active borrowings with `from <= due_date <= to`
    async fn list_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>>;

    /// `borrowed → overdue`; returns false when the loan was not `borrowed`
    async fn mark_overdue(&self, id: i32, now: DateTime<Utc>) -> AppResult<bool>;

    async fn record_notification_sent(&self, id: i32, sent: &SentNotification) -> AppResult<()>;
}

/// Fine ledger
#[async_trait]
pub trait FineStore: Send + Sync {
    async fn get_fine(&self, id: i32) -> AppResult<Fine>;

    async fn find_fine(&self, borrowing_id: i32, reason: FineReason) -> AppResult<Option<Fine>>;

    async fn list_student_fines(&self, student_id: i32) -> AppResult<Vec<Fine>>;

    /// Sum of unpaid balances over `pending` and `disputed` fines
    async fn outstanding_fines(&self, student_id: i32) -> AppResult<Decimal>;

    /// Insert a fine; `Conflict` if one exists for the same borrowing and reason
    async fn create_fine(&self, data: &NewFine, now: DateTime<Utc>) -> AppResult<Fine>;

    /// Insert the overdue fine of a borrowing or raise a pending one to `amount`.
    ///
    /// The stored amount never decreases and fines that are no longer pending
    /// are left untouched.
    async fn upsert_overdue_fine(
        &self,
        borrowing: &Borrowing,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<FineUpsert>;

    async fn apply_fine_transition(&self, id: i32, transition: &FineTransition) -> AppResult<Fine>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> AppResult<Notification>;

    async fn list_notifications(&self, recipient_id: i32) -> AppResult<Vec<Notification>>;
}

/// Everything the services need from storage
pub trait LibraryStore: BookStore + UserStore + BorrowingStore + FineStore + NotificationStore {}

impl<T> LibraryStore for T where T: BookStore + UserStore + BorrowingStore + FineStore + NotificationStore {}

/// PostgreSQL repository holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

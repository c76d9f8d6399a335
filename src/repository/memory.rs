//! In-process store
//!
//! Every operation runs under one async mutex, which gives the same atomicity
//! the PostgreSQL repository gets from conditional updates and transactions.
//! Used by the test suites and by `database.backend = "memory"`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{BookStore, BorrowingStore, FineStore, NotificationStore, UserStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, CreateBook, UpdateBook},
        borrowing::{
            self, Borrowing, BorrowingExtension, BorrowingStatus, LostRecord, NewBorrowing,
            ReturnRecord, SentNotification,
        },
        fine::{Fine, FineReason, FineTransition, FineUpsert, NewFine},
        notification::{NewNotification, Notification},
        user::{CreateUser, User},
    },
};

#[derive(Default)]
struct MemoryState {
    last_id: i32,
    books: BTreeMap<i32, Book>,
    users: BTreeMap<i32, User>,
    borrowings: BTreeMap<i32, Borrowing>,
    fines: BTreeMap<i32, Fine>,
    notifications: Vec<Notification>,
}

impl MemoryState {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn book_mut(&mut self, id: i32) -> AppResult<&mut Book> {
        self.books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn borrowing_mut(&mut self, id: i32) -> AppResult<&mut Borrowing> {
        self.borrowings
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Borrowing with id {} not found", id)))
    }

    /// Borrowing that is still `borrowed` or `overdue`
    fn active_borrowing_mut(&mut self, id: i32) -> AppResult<&mut Borrowing> {
        let b = self.borrowing_mut(id)?;
        if b.status.is_terminal() {
            return Err(borrowing::not_active(b.status));
        }
        Ok(b)
    }

    /// Copy of a borrowing allowed to move to `next`
    fn staged_transition(&self, id: i32, next: BorrowingStatus) -> AppResult<Borrowing> {
        let b = self
            .borrowings
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Borrowing with id {} not found", id)))?;
        if !b.status.can_transition_to(next) {
            return Err(borrowing::not_active(b.status));
        }
        Ok(b.clone())
    }

    fn active_count(&self, student_id: i32) -> i64 {
        self.borrowings
            .values()
            .filter(|b| b.student_id == student_id && b.status.is_active())
            .count() as i64
    }

    fn find_fine_id(&self, borrowing_id: i32, reason: FineReason) -> Option<i32> {
        self.fines
            .values()
            .find(|f| f.borrowing_id == borrowing_id && f.reason == reason)
            .map(|f| f.id)
    }

    fn insert_fine(&mut self, data: &NewFine, now: DateTime<Utc>) -> AppResult<Fine> {
        if self.find_fine_id(data.borrowing_id, data.reason).is_some() {
            return Err(AppError::Conflict(format!(
                "A {} fine already exists for borrowing {}",
                data.reason.as_str(),
                data.borrowing_id
            )));
        }
        let id = self.next_id();
        let fine = Fine::from_new(id, data, now);
        self.fines.insert(id, fine.clone());
        Ok(fine)
    }

    fn upsert_overdue(
        &mut self,
        borrowing: &Borrowing,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<FineUpsert> {
        match self.find_fine_id(borrowing.id, FineReason::Overdue) {
            Some(id) => {
                let fine = self
                    .fines
                    .get_mut(&id)
                    .ok_or_else(|| AppError::Internal(format!("Fine {} vanished", id)))?;
                let raised = fine.raise_overdue(amount, now);
                let fine = fine.clone();
                if raised && fine.status.is_open() {
                    if let Some(b) = self.borrowings.get_mut(&borrowing.id) {
                        b.fine_paid = false;
                    }
                }
                Ok(FineUpsert {
                    fine,
                    created: false,
                    updated: raised,
                })
            }
            None => {
                let fine = self.insert_fine(
                    &NewFine {
                        student_id: borrowing.student_id,
                        borrowing_id: borrowing.id,
                        amount,
                        reason: FineReason::Overdue,
                        notes: None,
                    },
                    now,
                )?;
                Ok(FineUpsert {
                    fine,
                    created: true,
                    updated: false,
                })
            }
        }
    }

    fn active_borrowings(&self, filter: impl Fn(&Borrowing) -> bool) -> Vec<Borrowing> {
        let mut found: Vec<Borrowing> = self
            .borrowings
            .values()
            .filter(|b| b.status.is_active() && filter(b))
            .cloned()
            .collect();
        found.sort_by_key(|b| b.due_date);
        found
    }
}

/// Store backed by in-process maps
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for MemoryRepository {
    async fn ping(&self) -> AppResult<()> {
        let _state = self.state.lock().await;
        Ok(())
    }

    async fn create_book(&self, data: &CreateBook, now: DateTime<Utc>) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        if state.books.values().any(|b| b.isbn == data.isbn) {
            return Err(AppError::Conflict(format!(
                "A book with ISBN {} already exists",
                data.isbn
            )));
        }
        let id = state.next_id();
        let book = Book {
            id,
            isbn: data.isbn.clone(),
            title: data.title.clone(),
            author: data.author.clone(),
            total_copies: data.total_copies,
            available_copies: data.total_copies,
            lending_period_days: data.lending_period_days,
            is_active: true,
            crea_date: now,
            modif_date: None,
        };
        state.books.insert(id, book.clone());
        Ok(book)
    }

    async fn get_book(&self, id: i32) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        state.book_mut(id).map(|b| b.clone())
    }

    async fn update_book(&self, id: i32, data: &UpdateBook, now: DateTime<Utc>) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        let book = state.book_mut(id)?;
        let (total, available) = book.copies_after_update(data);
        if let Some(title) = &data.title {
            book.title = title.clone();
        }
        if data.author.is_some() {
            book.author = data.author.clone();
        }
        if data.lending_period_days.is_some() {
            book.lending_period_days = data.lending_period_days;
        }
        book.total_copies = total;
        book.available_copies = available;
        book.modif_date = Some(now);
        Ok(book.clone())
    }

    async fn deactivate_book(&self, id: i32, now: DateTime<Utc>) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        state.book_mut(id)?;
        let on_loan = state
            .borrowings
            .values()
            .any(|b| b.book_id == id && b.status.is_active());
        if on_loan {
            return Err(AppError::Conflict(
                "Book has active borrowings and cannot be deactivated".to_string(),
            ));
        }
        let book = state.book_mut(id)?;
        book.is_active = false;
        book.modif_date = Some(now);
        Ok(book.clone())
    }
}

#[async_trait]
impl UserStore for MemoryRepository {
    async fn create_user(&self, data: &CreateUser, now: DateTime<Utc>) -> AppResult<User> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let user = User {
            id,
            name: data.name.clone(),
            email: data.email.clone(),
            role: data.role,
            is_active: true,
            total_books_borrowed: 0,
            crea_date: now,
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn set_user_active(&self, id: i32, is_active: bool) -> AppResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;
        user.is_active = is_active;
        Ok(user.clone())
    }
}

#[async_trait]
impl BorrowingStore for MemoryRepository {
    async fn get_borrowing(&self, id: i32) -> AppResult<Borrowing> {
        let mut state = self.state.lock().await;
        state.borrowing_mut(id).map(|b| b.clone())
    }

    async fn list_student_borrowings(&self, student_id: i32) -> AppResult<Vec<Borrowing>> {
        let state = self.state.lock().await;
        let mut found: Vec<Borrowing> = state
            .borrowings
            .values()
            .filter(|b| b.student_id == student_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at));
        Ok(found)
    }

    async fn count_active_borrowings(&self, student_id: i32) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state.active_count(student_id))
    }

    async fn create_borrowing(&self, data: &NewBorrowing, max_active: i64) -> AppResult<Borrowing> {
        let mut state = self.state.lock().await;

        if !state.users.contains_key(&data.student_id) {
            return Err(AppError::NotFound(format!(
                "User with id {} not found",
                data.student_id
            )));
        }

        let active = state.active_count(data.student_id);
        if active >= max_active {
            return Err(borrowing::borrowing_limit_reached(active, max_active));
        }

        let book = state.book_mut(data.book_id)?;
        if !book.is_available() {
            return Err(borrowing::book_unavailable());
        }
        book.available_copies = book.availability_after(-1);
        book.modif_date = Some(data.borrowed_at);

        if let Some(student) = state.users.get_mut(&data.student_id) {
            student.total_books_borrowed += 1;
        }

        let id = state.next_id();
        let borrowing = Borrowing {
            id,
            student_id: data.student_id,
            book_id: data.book_id,
            staff_id: data.staff_id,
            borrowed_at: data.borrowed_at,
            due_date: data.due_date,
            returned_at: None,
            status: BorrowingStatus::Borrowed,
            return_condition: None,
            notes: None,
            fine_amount: Decimal::ZERO,
            fine_paid: false,
            extensions: Vec::new(),
            notifications_sent: Vec::new(),
            crea_date: data.borrowed_at,
            modif_date: None,
        };
        state.borrowings.insert(id, borrowing.clone());
        Ok(borrowing)
    }

    async fn complete_return(
        &self,
        id: i32,
        data: &ReturnRecord,
    ) -> AppResult<(Borrowing, Option<Fine>)> {
        let mut state = self.state.lock().await;

        let mut returned = state.staged_transition(id, BorrowingStatus::Returned)?;
        returned.status = BorrowingStatus::Returned;
        returned.returned_at = Some(data.returned_at);
        returned.return_condition = data.condition;
        if data.notes.is_some() {
            returned.notes = data.notes.clone();
        }
        returned.fine_amount = data.fine_amount;
        returned.modif_date = Some(data.returned_at);

        let fine = if data.fine_amount > Decimal::ZERO {
            let upsert = state.upsert_overdue(&returned, data.fine_amount, data.returned_at)?;
            if upsert.fine.status.is_open() {
                returned.fine_paid = false;
            }
            Some(upsert.fine)
        } else {
            None
        };

        let book = state.book_mut(returned.book_id)?;
        book.available_copies = book.availability_after(1);
        book.modif_date = Some(data.returned_at);
        state.borrowings.insert(id, returned.clone());

        Ok((returned, fine))
    }

    async fn extend_borrowing(
        &self,
        id: i32,
        extension: &BorrowingExtension,
        max_extensions: usize,
    ) -> AppResult<Borrowing> {
        let mut state = self.state.lock().await;
        let b = state.active_borrowing_mut(id)?;
        if b.extensions.len() >= max_extensions {
            return Err(borrowing::extension_limit_reached(
                b.extensions.len(),
                max_extensions,
            ));
        }
        b.extensions.push(extension.clone());
        b.due_date = extension.new_due_date;
        b.status = BorrowingStatus::Borrowed;
        b.modif_date = Some(extension.extended_at);
        Ok(b.clone())
    }

    async fn mark_lost(&self, id: i32, data: &LostRecord) -> AppResult<(Borrowing, Option<Fine>)> {
        let mut state = self.state.lock().await;

        let mut lost = state.staged_transition(id, BorrowingStatus::Lost)?;
        lost.status = BorrowingStatus::Lost;
        lost.fine_amount = data.fine_amount;
        if data.notes.is_some() {
            lost.notes = data.notes.clone();
        }
        lost.modif_date = Some(data.at);

        // The fine insert may still fail with a conflict; the loan is saved after it
        let fine = if data.fine_amount > Decimal::ZERO {
            Some(state.insert_fine(
                &NewFine {
                    student_id: lost.student_id,
                    borrowing_id: lost.id,
                    amount: data.fine_amount,
                    reason: FineReason::Loss,
                    notes: data.notes.clone(),
                },
                data.at,
            )?)
        } else {
            None
        };
        state.borrowings.insert(id, lost.clone());

        Ok((lost, fine))
    }

    async fn list_overdue_borrowings(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>> {
        let state = self.state.lock().await;
        Ok(state.active_borrowings(|b| b.is_overdue_at(now)))
    }

    async fn list_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>> {
        let state = self.state.lock().await;
        Ok(state.active_borrowings(|b| b.due_date >= from && b.due_date <= to))
    }

    async fn mark_overdue(&self, id: i32, now: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let b = state.borrowing_mut(id)?;
        if !b.status.can_transition_to(BorrowingStatus::Overdue) || !b.is_overdue_at(now) {
            return Ok(false);
        }
        b.status = BorrowingStatus::Overdue;
        b.modif_date = Some(now);
        Ok(true)
    }

    async fn record_notification_sent(&self, id: i32, sent: &SentNotification) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.borrowing_mut(id)?.notifications_sent.push(sent.clone());
        Ok(())
    }
}

#[async_trait]
impl FineStore for MemoryRepository {
    async fn get_fine(&self, id: i32) -> AppResult<Fine> {
        let state = self.state.lock().await;
        state
            .fines
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Fine with id {} not found", id)))
    }

    async fn find_fine(&self, borrowing_id: i32, reason: FineReason) -> AppResult<Option<Fine>> {
        let state = self.state.lock().await;
        Ok(state
            .find_fine_id(borrowing_id, reason)
            .and_then(|id| state.fines.get(&id).cloned()))
    }

    async fn list_student_fines(&self, student_id: i32) -> AppResult<Vec<Fine>> {
        let state = self.state.lock().await;
        let mut found: Vec<Fine> = state
            .fines
            .values()
            .filter(|f| f.student_id == student_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.crea_date.cmp(&a.crea_date));
        Ok(found)
    }

    async fn outstanding_fines(&self, student_id: i32) -> AppResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .fines
            .values()
            .filter(|f| f.student_id == student_id)
            .map(Fine::unpaid_balance)
            .sum())
    }

    async fn create_fine(&self, data: &NewFine, now: DateTime<Utc>) -> AppResult<Fine> {
        let mut state = self.state.lock().await;
        state.insert_fine(data, now)
    }

    async fn upsert_overdue_fine(
        &self,
        borrowing: &Borrowing,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<FineUpsert> {
        let mut state = self.state.lock().await;
        state.upsert_overdue(borrowing, amount, now)
    }

    async fn apply_fine_transition(&self, id: i32, transition: &FineTransition) -> AppResult<Fine> {
        let mut state = self.state.lock().await;
        let fine = state
            .fines
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Fine with id {} not found", id)))?;

        // Apply on a copy so a rejected transition leaves the stored fine untouched
        let mut updated = fine.clone();
        updated.apply(transition)?;
        *fine = updated.clone();

        let settled = !state
            .fines
            .values()
            .any(|f| f.borrowing_id == updated.borrowing_id && f.status.is_open());
        if let Some(b) = state.borrowings.get_mut(&updated.borrowing_id) {
            b.fine_paid = settled;
        }

        Ok(updated)
    }
}

#[async_trait]
impl NotificationStore for MemoryRepository {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> AppResult<Notification> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let stored = Notification {
            id,
            recipient_id: notification.recipient_id,
            kind: notification.kind,
            title: notification.title.clone(),
            message: notification.message.clone(),
            priority: notification.priority,
            book_id: notification.book_id,
            borrowing_id: notification.borrowing_id,
            fine_id: notification.fine_id,
            is_read: false,
            crea_date: now,
        };
        state.notifications.push(stored.clone());
        Ok(stored)
    }

    async fn list_notifications(&self, recipient_id: i32) -> AppResult<Vec<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }
}

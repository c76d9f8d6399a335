//! Borrowing lifecycle: lend, return, extend, mark lost

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{
    clock::Clock,
    email::{EmailData, EmailTemplate},
    notifications::NotificationService,
};
use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{
        borrowing::{
            self, Borrowing, BorrowingDetails, BorrowingExtension, BorrowingOutcome,
            BorrowingStatus, ExtendRequest, LendRequest, LostRecord, MarkLostRequest,
            NewBorrowing, ReturnRecord, ReturnRequest,
        },
        fine::FineReason,
        notification::{NewNotification, NotificationKind, Priority},
        user::Role,
    },
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct BorrowingsService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    notifications: NotificationService,
    loans: LoansConfig,
}

impl BorrowingsService {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        clock: Arc<dyn Clock>,
        notifications: NotificationService,
        loans: LoansConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifications,
            loans,
        }
    }

    fn details(&self, borrowing: Borrowing) -> BorrowingDetails {
        borrowing.details(self.clock.now(), self.loans.daily_fine_amount)
    }

    /// Lend a book to a student on behalf of `staff_id`.
    ///
    /// Preconditions are checked in order so the first unmet one is reported:
    /// active student account, book on the shelf, no unpaid fines, borrowing
    /// limit. The limit and the copy count are re-checked atomically by the store.
    pub async fn lend(&self, staff_id: i32, request: LendRequest) -> AppResult<BorrowingDetails> {
        let student = self.store.get_user(request.student_id).await?;
        if !student.is_active {
            return Err(AppError::Validation("Student account is inactive".to_string()));
        }
        if student.role != Role::Student {
            return Err(AppError::Validation(
                "Only student accounts can borrow books".to_string(),
            ));
        }

        let book = self.store.get_book(request.book_id).await?;
        if !book.is_available() {
            return Err(borrowing::book_unavailable());
        }

        let outstanding = self.store.outstanding_fines(student.id).await?;
        if outstanding > Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Student has unpaid fines totalling {}",
                outstanding
            )));
        }

        let max_active = self.loans.max_active_borrowings;
        let active = self.store.count_active_borrowings(student.id).await?;
        if active >= max_active {
            return Err(borrowing::borrowing_limit_reached(active, max_active));
        }

        let now = self.clock.now();
        let due_date = request
            .due_date
            .unwrap_or_else(|| now + book.lending_period(self.loans.lending_period_days));
        if due_date <= now {
            return Err(AppError::Validation(
                "Due date must be in the future".to_string(),
            ));
        }

        let created = self
            .store
            .create_borrowing(
                &NewBorrowing {
                    student_id: student.id,
                    book_id: book.id,
                    staff_id,
                    borrowed_at: now,
                    due_date,
                },
                max_active,
            )
            .await?;

        tracing::info!(
            borrowing_id = created.id,
            student_id = student.id,
            book_id = book.id,
            staff_id,
            due_date = %created.due_date,
            "Book lent"
        );

        let notification = NewNotification::new(
            student.id,
            NotificationKind::Lend,
            "Book borrowed",
            format!(
                "You borrowed \"{}\". Please return it by {}.",
                book.title,
                created.due_date.format("%Y-%m-%d")
            ),
        )
        .book(book.id)
        .borrowing(created.id);
        let email = EmailData {
            recipient_name: student.name.clone(),
            book_title: Some(book.title.clone()),
            due_date: Some(created.due_date),
            ..Default::default()
        };
        self.notifications
            .emit(&student, notification, Some((EmailTemplate::BookLent, email)))
            .await;

        Ok(self.details(created))
    }

    /// Return a borrowed book and freeze its overdue fine
    pub async fn return_book(
        &self,
        id: i32,
        staff_id: i32,
        request: ReturnRequest,
    ) -> AppResult<BorrowingOutcome> {
        let current = self.store.get_borrowing(id).await?;
        if !current.status.can_transition_to(BorrowingStatus::Returned) {
            return Err(borrowing::not_active(current.status));
        }

        let now = self.clock.now();
        let days_overdue = current.days_overdue(now);
        let computed = borrowing::overdue_fine(days_overdue, self.loans.daily_fine_amount);
        // The accrual engine may already have charged more than today's figure
        let accrued = self
            .store
            .find_fine(id, FineReason::Overdue)
            .await?
            .map(|f| f.amount)
            .unwrap_or(Decimal::ZERO);
        let fine_amount = computed.max(accrued);

        let (returned, fine) = self
            .store
            .complete_return(
                id,
                &ReturnRecord {
                    returned_at: now,
                    condition: request.condition,
                    notes: request.notes,
                    fine_amount,
                },
            )
            .await?;

        tracing::info!(
            borrowing_id = id,
            staff_id,
            days_overdue,
            fine = %fine_amount,
            "Book returned"
        );

        let title = self.notifications.book_title(returned.book_id).await;
        let mut message = format!(
            "\"{}\" was returned.",
            title.as_deref().unwrap_or("Your book")
        );
        if fine_amount > Decimal::ZERO {
            message.push_str(&format!(
                " It was {} day(s) late; a fine of {} was recorded.",
                days_overdue, fine_amount
            ));
        }
        let notification = NewNotification::new(
            returned.student_id,
            NotificationKind::Return,
            "Book returned",
            message,
        )
        .book(returned.book_id)
        .borrowing(id)
        .fine(fine.as_ref().map(|f| f.id));
        self.notifications
            .notify_user(
                returned.student_id,
                notification,
                Some((
                    EmailTemplate::BookReturned,
                    EmailData {
                        book_title: title,
                        fine_amount: Some(fine_amount),
                        days_overdue: Some(days_overdue),
                        ..Default::default()
                    },
                )),
            )
            .await;

        Ok(BorrowingOutcome {
            borrowing: self.details(returned),
            fine,
        })
    }

    /// Move the due date later; an overdue loan becomes `borrowed` again
    pub async fn extend(
        &self,
        id: i32,
        staff_id: i32,
        request: ExtendRequest,
    ) -> AppResult<BorrowingDetails> {
        let current = self.store.get_borrowing(id).await?;
        if current.status.is_terminal() {
            return Err(borrowing::not_active(current.status));
        }

        let now = self.clock.now();
        if request.new_due_date <= current.due_date || request.new_due_date <= now {
            return Err(AppError::Validation(
                "New due date must be later than the current due date and now".to_string(),
            ));
        }

        let max_extensions = self.loans.max_extensions;
        if current.extensions.len() >= max_extensions {
            return Err(borrowing::extension_limit_reached(
                current.extensions.len(),
                max_extensions,
            ));
        }

        let extension = BorrowingExtension {
            previous_due_date: current.due_date,
            new_due_date: request.new_due_date,
            reason: request.reason,
            extended_by: staff_id,
            extended_at: now,
        };
        let extended = self
            .store
            .extend_borrowing(id, &extension, max_extensions)
            .await?;

        tracing::info!(
            borrowing_id = id,
            staff_id,
            previous_due_date = %extension.previous_due_date,
            new_due_date = %extension.new_due_date,
            "Borrowing extended"
        );

        Ok(self.details(extended))
    }

    /// Declare the book lost and charge the replacement fee
    pub async fn mark_lost(
        &self,
        id: i32,
        staff_id: i32,
        request: MarkLostRequest,
    ) -> AppResult<BorrowingOutcome> {
        if request.fine_amount < Decimal::ZERO {
            return Err(AppError::Validation(
                "Fine amount cannot be negative".to_string(),
            ));
        }

        let current = self.store.get_borrowing(id).await?;
        if !current.status.can_transition_to(BorrowingStatus::Lost) {
            return Err(borrowing::not_active(current.status));
        }

        let now = self.clock.now();
        let (lost, fine) = self
            .store
            .mark_lost(
                id,
                &LostRecord {
                    fine_amount: request.fine_amount,
                    notes: request.notes,
                    at: now,
                },
            )
            .await?;

        tracing::info!(borrowing_id = id, staff_id, fine = %request.fine_amount, "Book marked lost");

        let title = self.notifications.book_title(lost.book_id).await;
        let notification = NewNotification::new(
            lost.student_id,
            NotificationKind::Lost,
            "Book marked as lost",
            format!(
                "\"{}\" was marked as lost. A fee of {} was charged.",
                title.as_deref().unwrap_or("Your book"),
                request.fine_amount
            ),
        )
        .priority(Priority::High)
        .book(lost.book_id)
        .borrowing(id)
        .fine(fine.as_ref().map(|f| f.id));
        self.notifications
            .notify_user(
                lost.student_id,
                notification,
                Some((
                    EmailTemplate::BookLost,
                    EmailData {
                        book_title: title,
                        fine_amount: Some(request.fine_amount),
                        ..Default::default()
                    },
                )),
            )
            .await;

        Ok(BorrowingOutcome {
            borrowing: self.details(lost),
            fine,
        })
    }

    /// Borrowing with live overdue figures
    pub async fn get(&self, id: i32) -> AppResult<BorrowingDetails> {
        let b = self.store.get_borrowing(id).await?;
        Ok(self.details(b))
    }

    /// Active loans past their due date, as of now
    pub async fn list_overdue(&self) -> AppResult<Vec<BorrowingDetails>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_overdue_borrowings(now)
            .await?
            .into_iter()
            .map(|b| self.details(b))
            .collect())
    }

    /// Active loans due within `days` (default: the reminder window)
    pub async fn list_due_soon(&self, days: Option<i64>) -> AppResult<Vec<BorrowingDetails>> {
        let days = days.unwrap_or(self.loans.reminder_days_before_due);
        if !(0..=365).contains(&days) {
            return Err(AppError::BadRequest(
                "days must be between 0 and 365".to_string(),
            ));
        }
        let now = self.clock.now();
        Ok(self
            .store
            .list_due_between(now, now + Duration::days(days))
            .await?
            .into_iter()
            .map(|b| self.details(b))
            .collect())
    }
}

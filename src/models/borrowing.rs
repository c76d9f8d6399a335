//! Borrowing (loan) model, lifecycle states and overdue fine math

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{fine::Fine, notification::NotificationKind};
use crate::error::AppError;

const MILLIS_PER_DAY: i64 = 86_400_000;

pub fn book_unavailable() -> AppError {
    AppError::Validation("Book is currently unavailable".to_string())
}

pub fn borrowing_limit_reached(active: i64, max: i64) -> AppError {
    AppError::Validation(format!("Borrowing limit reached ({}/{})", active, max))
}

pub fn extension_limit_reached(used: usize, max: usize) -> AppError {
    AppError::Validation(format!("Extension limit reached ({}/{})", used, max))
}

pub fn not_active(status: BorrowingStatus) -> AppError {
    AppError::Validation(format!("Borrowing is already {}", status))
}

/// Loan lifecycle status
///
/// `borrowed → {overdue, returned, lost}`, `overdue → {borrowed, returned, lost}`.
/// `returned` and `lost` are terminal. `overdue → borrowed` only happens when
/// an extension moves the due date back into the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "borrowing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BorrowingStatus {
    Borrowed,
    Overdue,
    Returned,
    Lost,
}

impl BorrowingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowingStatus::Borrowed => "borrowed",
            BorrowingStatus::Overdue => "overdue",
            BorrowingStatus::Returned => "returned",
            BorrowingStatus::Lost => "lost",
        }
    }

    /// Book is still out with the student
    pub fn is_active(&self) -> bool {
        matches!(self, BorrowingStatus::Borrowed | BorrowingStatus::Overdue)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: BorrowingStatus) -> bool {
        use BorrowingStatus::*;
        matches!(
            (self, next),
            (Borrowed, Overdue)
                | (Borrowed, Returned)
                | (Borrowed, Lost)
                | (Overdue, Borrowed)
                | (Overdue, Returned)
                | (Overdue, Lost)
        )
    }
}

impl std::fmt::Display for BorrowingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Condition of a returned book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "book_condition", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookCondition {
    Good,
    Fair,
    Damaged,
}

/// One entry of the append-only due date change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BorrowingExtension {
    pub previous_due_date: DateTime<Utc>,
    pub new_due_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub extended_by: i32,
    pub extended_at: DateTime<Utc>,
}

/// One entry of the reminder log, used to send at most one reminder of a kind per day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
}

/// Internal row structure for database queries (JSONB logs)
#[derive(Debug, Clone, FromRow)]
pub struct BorrowingRow {
    id: i32,
    student_id: i32,
    book_id: i32,
    staff_id: i32,
    borrowed_at: DateTime<Utc>,
    due_date: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    status: BorrowingStatus,
    return_condition: Option<BookCondition>,
    notes: Option<String>,
    fine_amount: Decimal,
    fine_paid: bool,
    extensions: Json<Vec<BorrowingExtension>>,
    notifications_sent: Json<Vec<SentNotification>>,
    crea_date: DateTime<Utc>,
    modif_date: Option<DateTime<Utc>>,
}

impl From<BorrowingRow> for Borrowing {
    fn from(row: BorrowingRow) -> Self {
        Borrowing {
            id: row.id,
            student_id: row.student_id,
            book_id: row.book_id,
            staff_id: row.staff_id,
            borrowed_at: row.borrowed_at,
            due_date: row.due_date,
            returned_at: row.returned_at,
            status: row.status,
            return_condition: row.return_condition,
            notes: row.notes,
            fine_amount: row.fine_amount,
            fine_paid: row.fine_paid,
            extensions: row.extensions.0,
            notifications_sent: row.notifications_sent.0,
            crea_date: row.crea_date,
            modif_date: row.modif_date,
        }
    }
}

/// Borrowing model
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Borrowing {
    pub id: i32,
    pub student_id: i32,
    pub book_id: i32,
    /// Staff member who lent the book
    pub staff_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowingStatus,
    pub return_condition: Option<BookCondition>,
    pub notes: Option<String>,
    /// Frozen at return or loss; zero while the loan is active
    pub fine_amount: Decimal,
    pub fine_paid: bool,
    pub extensions: Vec<BorrowingExtension>,
    pub notifications_sent: Vec<SentNotification>,
    pub crea_date: DateTime<Utc>,
    pub modif_date: Option<DateTime<Utc>>,
}

impl Borrowing {
    /// Started days past due as of `now`, or as of the return for returned loans
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        days_overdue(self.due_date, self.returned_at.unwrap_or(now))
    }

    /// Fine owed for lateness: live while active, frozen once terminal
    pub fn current_fine(&self, now: DateTime<Utc>, daily_fine: Decimal) -> Decimal {
        if self.status.is_terminal() {
            self.fine_amount
        } else {
            overdue_fine(self.days_overdue(now), daily_fine)
        }
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.due_date < now
    }

    /// Whether a reminder of `kind` was already sent on `day` (UTC)
    pub fn was_notified_on(&self, kind: NotificationKind, day: NaiveDate) -> bool {
        self.notifications_sent
            .iter()
            .any(|sent| sent.kind == kind && sent.sent_at.date_naive() == day)
    }

    pub fn details(self, now: DateTime<Utc>, daily_fine: Decimal) -> BorrowingDetails {
        BorrowingDetails {
            days_overdue: self.days_overdue(now),
            current_fine: self.current_fine(now, daily_fine),
            borrowing: self,
        }
    }
}

/// `max(0, ceil((at - due) / 1 day))`
pub fn days_overdue(due_date: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    let late = (at - due_date).num_milliseconds();
    if late <= 0 {
        0
    } else {
        (late + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    }
}

pub fn overdue_fine(days_overdue: i64, daily_fine: Decimal) -> Decimal {
    Decimal::from(days_overdue.max(0)) * daily_fine
}

/// Borrowing with figures computed at read time
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowingDetails {
    #[serde(flatten)]
    pub borrowing: Borrowing,
    pub days_overdue: i64,
    pub current_fine: Decimal,
}

/// Borrowing after a return or loss, with the fine it produced
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BorrowingOutcome {
    pub borrowing: BorrowingDetails,
    pub fine: Option<Fine>,
}

/// Lend request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LendRequest {
    pub student_id: i32,
    pub book_id: i32,
    /// Overrides `borrowed_at + lending period`
    pub due_date: Option<DateTime<Utc>>,
}

/// Return request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ReturnRequest {
    pub condition: Option<BookCondition>,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

/// Extend (change due date) request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ExtendRequest {
    pub new_due_date: DateTime<Utc>,
    #[validate(length(max = 500, message = "Reason is limited to 500 characters"))]
    pub reason: Option<String>,
}

/// Mark-lost request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MarkLostRequest {
    /// Replacement fee charged to the student
    pub fine_amount: Decimal,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

/// Due-soon query parameters
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct DueSoonQuery {
    /// Look-ahead window in days
    pub days: Option<i64>,
}

/// Values of a borrowing to be inserted
#[derive(Debug, Clone)]
pub struct NewBorrowing {
    pub student_id: i32,
    pub book_id: i32,
    pub staff_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// Values written when a borrowing is returned
#[derive(Debug, Clone)]
pub struct ReturnRecord {
    pub returned_at: DateTime<Utc>,
    pub condition: Option<BookCondition>,
    pub notes: Option<String>,
    pub fine_amount: Decimal,
}

/// Values written when a borrowing is declared lost
#[derive(Debug, Clone)]
pub struct LostRecord {
    pub fine_amount: Decimal,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn borrowing(due_in: Duration, status: BorrowingStatus) -> (Borrowing, DateTime<Utc>) {
        let now = Utc::now();
        let b = Borrowing {
            id: 1,
            student_id: 2,
            book_id: 3,
            staff_id: 4,
            borrowed_at: now - Duration::days(10),
            due_date: now + due_in,
            returned_at: None,
            status,
            return_condition: None,
            notes: None,
            fine_amount: Decimal::ZERO,
            fine_paid: false,
            extensions: Vec::new(),
            notifications_sent: Vec::new(),
            crea_date: now,
            modif_date: None,
        };
        (b, now)
    }

    #[test]
    fn days_overdue_rounds_partial_days_up() {
        let due = Utc::now();
        assert_eq!(days_overdue(due, due), 0);
        assert_eq!(days_overdue(due, due - Duration::days(2)), 0);
        assert_eq!(days_overdue(due, due + Duration::minutes(1)), 1);
        assert_eq!(days_overdue(due, due + Duration::days(3)), 3);
        assert_eq!(days_overdue(due, due + Duration::days(3) + Duration::seconds(1)), 4);
    }

    #[test]
    fn three_days_late_costs_three_daily_fines() {
        let (b, now) = borrowing(-Duration::days(3), BorrowingStatus::Overdue);
        assert_eq!(b.days_overdue(now), 3);
        assert_eq!(b.current_fine(now, dec!(5)), dec!(15));
    }

    #[test]
    fn terminal_borrowings_report_frozen_fine() {
        let (mut b, now) = borrowing(-Duration::days(3), BorrowingStatus::Returned);
        b.returned_at = Some(now - Duration::days(1));
        b.fine_amount = dec!(10);
        assert_eq!(b.days_overdue(now + Duration::days(30)), 2);
        assert_eq!(b.current_fine(now + Duration::days(30), dec!(5)), dec!(10));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use BorrowingStatus::*;
        for next in [Borrowed, Overdue, Returned, Lost] {
            assert!(!Returned.can_transition_to(next));
            assert!(!Lost.can_transition_to(next));
        }
        assert!(Borrowed.can_transition_to(Overdue));
        assert!(Overdue.can_transition_to(Returned));
        assert!(Overdue.can_transition_to(Lost));
        assert!(!Borrowed.can_transition_to(Borrowed));
    }

    #[test]
    fn reminder_log_is_checked_per_kind_and_day() {
        let (mut b, now) = borrowing(-Duration::days(1), BorrowingStatus::Overdue);
        b.notifications_sent.push(SentNotification {
            kind: NotificationKind::Overdue,
            sent_at: now,
        });
        assert!(b.was_notified_on(NotificationKind::Overdue, now.date_naive()));
        assert!(!b.was_notified_on(NotificationKind::DueSoon, now.date_naive()));
        assert!(!b.was_notified_on(
            NotificationKind::Overdue,
            (now + Duration::days(1)).date_naive()
        ));
    }
}

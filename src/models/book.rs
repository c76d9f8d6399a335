//! Book (catalog entry) model and availability ledger rules

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub isbn: String,
    pub title: String,
    pub author: Option<String>,
    pub total_copies: i32,
    pub available_copies: i32,
    /// Lending period override in days
    pub lending_period_days: Option<i32>,
    pub is_active: bool,
    pub crea_date: DateTime<Utc>,
    pub modif_date: Option<DateTime<Utc>>,
}

impl Book {
    /// Clamp an availability value into `[0, total]`.
    pub fn clamp_available(available: i32, total: i32) -> i32 {
        available.clamp(0, total.max(0))
    }

    /// Availability after applying `delta`, clamped into `[0, total_copies]`.
    pub fn availability_after(&self, delta: i32) -> i32 {
        Self::clamp_available(self.available_copies.saturating_add(delta), self.total_copies)
    }

    /// Copies currently out on loan
    pub fn copies_on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    pub fn is_available(&self) -> bool {
        self.is_active && self.available_copies > 0
    }

    /// Lending period for this book, falling back to the library default
    pub fn lending_period(&self, default_days: i64) -> Duration {
        Duration::days(
            self.lending_period_days
                .map(i64::from)
                .unwrap_or(default_days),
        )
    }

    /// Resolve `(total_copies, available_copies)` after an admin edit.
    ///
    /// Changing the total keeps the number of copies on loan constant unless an
    /// explicit availability is supplied; either way the result is clamped.
    pub fn copies_after_update(&self, update: &UpdateBook) -> (i32, i32) {
        let total = update.total_copies.unwrap_or(self.total_copies).max(1);
        let available = match update.available_copies {
            Some(available) => available,
            None => total - self.copies_on_loan(),
        };
        (total, Self::clamp_available(available, total))
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: String,
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    pub author: Option<String>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: i32,
    #[validate(range(min = 1, max = 365, message = "Lending period must be 1 to 365 days"))]
    pub lending_period_days: Option<i32>,
}

/// Update book request (admin edit)
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    pub author: Option<String>,
    #[validate(range(min = 1, message = "A book needs at least one copy"))]
    pub total_copies: Option<i32>,
    pub available_copies: Option<i32>,
    #[validate(range(min = 1, max = 365, message = "Lending period must be 1 to 365 days"))]
    pub lending_period_days: Option<i32>,
}

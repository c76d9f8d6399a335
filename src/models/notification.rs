//! In-app notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Lend,
    Return,
    DueSoon,
    Overdue,
    Lost,
    FineIssued,
    FinePayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "notification_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Notification model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Notification {
    pub id: i32,
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub book_id: Option<i32>,
    pub borrowing_id: Option<i32>,
    pub fine_id: Option<i32>,
    pub is_read: bool,
    pub crea_date: DateTime<Utc>,
}

/// Notification to be recorded
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i32,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub book_id: Option<i32>,
    pub borrowing_id: Option<i32>,
    pub fine_id: Option<i32>,
}

impl NewNotification {
    pub fn new(recipient_id: i32, kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient_id,
            kind,
            title: title.into(),
            message: message.into(),
            priority: Priority::Normal,
            book_id: None,
            borrowing_id: None,
            fine_id: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn book(mut self, book_id: i32) -> Self {
        self.book_id = Some(book_id);
        self
    }

    pub fn borrowing(mut self, borrowing_id: i32) -> Self {
        self.borrowing_id = Some(borrowing_id);
        self
    }

    pub fn fine(mut self, fine_id: Option<i32>) -> Self {
        self.fine_id = fine_id;
        self
    }
}

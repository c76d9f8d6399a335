//! Data models for the circulation server

pub mod book;
pub mod borrowing;
pub mod fine;
pub mod notification;
pub mod user;

// Re-export commonly used types
pub use book::Book;
pub use borrowing::{Borrowing, BorrowingDetails, BorrowingStatus};
pub use fine::{Fine, FineReason, FineStatus};
pub use notification::{Notification, NotificationKind};
pub use user::{Role, User};

//! Shared fixtures: in-memory store, hand-driven clock and a recording mailer

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use circulation_server::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{
        book::{Book, CreateBook},
        borrowing::{BorrowingDetails, LendRequest},
        notification::{NewNotification, Notification},
        user::{CreateUser, Role, User},
    },
    repository::{memory::MemoryRepository, BookStore, UserStore},
    services::{
        clock::{Clock, ManualClock},
        email::{EmailData, EmailTemplate, Mailer},
        notifications::{NotificationService, Notifier},
        Services,
    },
};

/// Mailer that keeps every email it is asked to send
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, EmailTemplate, EmailData)>>,
    down: AtomicBool,
}

impl RecordingMailer {
    pub fn templates(&self) -> Vec<EmailTemplate> {
        self.sent.lock().unwrap().iter().map(|(_, t, _)| *t).collect()
    }

    pub fn count(&self, template: EmailTemplate) -> usize {
        self.templates().into_iter().filter(|t| *t == template).count()
    }

    /// Refuse every send from now on
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_templated_email(
        &self,
        to: &str,
        template: EmailTemplate,
        data: &EmailData,
    ) -> AppResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::Dependency("smtp unreachable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), template, data.clone()));
        Ok(())
    }
}

/// Notifier whose channel is down
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &NewNotification) -> AppResult<Notification> {
        Err(AppError::Dependency("notification channel unavailable".to_string()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryRepository>,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    pub services: Services,
    pub loans: LoansConfig,
}

pub fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_loans(LoansConfig::default())
    }

    pub fn with_loans(loans: LoansConfig) -> Self {
        let store = Arc::new(MemoryRepository::new());
        let clock = Arc::new(ManualClock::new(day0()));
        let mailer = Arc::new(RecordingMailer::default());
        let services = Services::new(store.clone(), clock.clone(), &loans, mailer.clone());
        Self {
            store,
            clock,
            mailer,
            services,
            loans,
        }
    }

    /// Services whose in-app notifications always fail
    pub fn with_failing_notifier() -> Self {
        let loans = LoansConfig::default();
        let store = Arc::new(MemoryRepository::new());
        let clock = Arc::new(ManualClock::new(day0()));
        let mailer = Arc::new(RecordingMailer::default());
        let notifications =
            NotificationService::new(store.clone(), Arc::new(FailingNotifier), mailer.clone());
        let services = Services::from_parts(store.clone(), clock.clone(), &loans, notifications);
        Self {
            store,
            clock,
            mailer,
            services,
            loans,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }

    pub async fn user(&self, name: &str, role: Role) -> User {
        self.store
            .create_user(
                &CreateUser {
                    name: name.to_string(),
                    email: Some(format!("{}@example.org", name.to_lowercase())),
                    role,
                },
                self.now(),
            )
            .await
            .unwrap()
    }

    pub async fn student(&self, name: &str) -> User {
        self.user(name, Role::Student).await
    }

    pub async fn staff(&self) -> User {
        self.user("Desk", Role::Staff).await
    }

    pub async fn book(&self, isbn: &str, copies: i32) -> Book {
        self.store
            .create_book(
                &CreateBook {
                    isbn: isbn.to_string(),
                    title: format!("Book {}", isbn),
                    author: None,
                    total_copies: copies,
                    lending_period_days: None,
                },
                self.now(),
            )
            .await
            .unwrap()
    }

    /// Book with its own lending period
    pub async fn book_with_period(&self, isbn: &str, copies: i32, days: i32) -> Book {
        self.store
            .create_book(
                &CreateBook {
                    isbn: isbn.to_string(),
                    title: format!("Book {}", isbn),
                    author: None,
                    total_copies: copies,
                    lending_period_days: Some(days),
                },
                self.now(),
            )
            .await
            .unwrap()
    }

    pub async fn lend(&self, staff: &User, student: &User, book: &Book) -> AppResult<BorrowingDetails> {
        self.services
            .borrowings
            .lend(
                staff.id,
                LendRequest {
                    student_id: student.id,
                    book_id: book.id,
                    due_date: None,
                },
            )
            .await
    }

    pub async fn available(&self, book: &Book) -> i32 {
        self.store.get_book(book.id).await.unwrap().available_copies
    }
}

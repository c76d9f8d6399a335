//! Notification emitter
//!
//! Records in-app notifications and sends the matching email. Both channels
//! are fire-and-forget: failures are logged and never fail the caller.

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    clock::Clock,
    email::{EmailData, EmailTemplate, Mailer},
};
use crate::{
    error::AppResult,
    models::{
        notification::{NewNotification, Notification},
        user::User,
    },
    repository::LibraryStore,
};

/// In-app notification channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &NewNotification) -> AppResult<Notification>;
}

/// Notifier writing to the notifications table
pub struct StoreNotifier {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(&self, notification: &NewNotification) -> AppResult<Notification> {
        self.store
            .insert_notification(notification, self.clock.now())
            .await
    }
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn LibraryStore>,
    notifier: Arc<dyn Notifier>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        notifier: Arc<dyn Notifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            notifier,
            mailer,
        }
    }

    /// Same as [`emit`](Self::emit), looking the recipient up first
    pub async fn notify_user(
        &self,
        user_id: i32,
        notification: NewNotification,
        email: Option<(EmailTemplate, EmailData)>,
    ) -> bool {
        match self.store.get_user(user_id).await {
            Ok(user) => self.emit(&user, notification, email).await,
            Err(e) => {
                tracing::warn!(user_id, "Cannot notify user: {}", e);
                false
            }
        }
    }

    /// Title of a book for message texts; `None` if it cannot be read
    pub async fn book_title(&self, book_id: i32) -> Option<String> {
        self.store.get_book(book_id).await.ok().map(|b| b.title)
    }

    /// Record `notification` for `recipient` and send the email if the account has an address.
    ///
    /// Returns whether at least one channel delivered it.
    pub async fn emit(
        &self,
        recipient: &User,
        notification: NewNotification,
        email: Option<(EmailTemplate, EmailData)>,
    ) -> bool {
        let recorded = match self.notifier.notify(&notification).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    recipient_id = recipient.id,
                    kind = ?notification.kind,
                    "Failed to record notification: {}",
                    e
                );
                false
            }
        };

        let mut mailed = false;
        if let (Some((template, mut data)), Some(address)) = (email, recipient.email.as_deref()) {
            if data.recipient_name.is_empty() {
                data.recipient_name = recipient.name.clone();
            }
            match self
                .mailer
                .send_templated_email(address, template, &data)
                .await
            {
                Ok(()) => mailed = true,
                Err(e) => tracing::warn!(
                    recipient_id = recipient.id,
                    ?template,
                    "Failed to send email: {}",
                    e
                ),
            }
        }

        recorded || mailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppError,
        models::{notification::NotificationKind, user::Role},
        repository::memory::MemoryRepository,
        services::email::MockMailer,
    };
    use chrono::Utc;

    fn student(email: Option<&str>) -> User {
        User {
            id: 3,
            name: "Ada".to_string(),
            email: email.map(str::to_string),
            role: Role::Student,
            is_active: true,
            total_books_borrowed: 0,
            crea_date: Utc::now(),
        }
    }

    fn lent() -> NewNotification {
        NewNotification::new(3, NotificationKind::Lend, "Book borrowed", "Dune is due soon")
    }

    fn service(notifier: MockNotifier, mailer: MockMailer) -> NotificationService {
        NotificationService::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(notifier),
            Arc::new(mailer),
        )
    }

    fn stored(n: &NewNotification) -> Notification {
        Notification {
            id: 1,
            recipient_id: n.recipient_id,
            kind: n.kind,
            title: n.title.clone(),
            message: n.message.clone(),
            priority: n.priority,
            book_id: n.book_id,
            borrowing_id: n.borrowing_id,
            fine_id: n.fine_id,
            is_read: false,
            crea_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mail_failure_is_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|n| Ok(stored(n)));
        let mut mailer = MockMailer::new();
        mailer
            .expect_send_templated_email()
            .times(1)
            .returning(|_, _, _| Err(AppError::Dependency("smtp down".into())));

        let service = service(notifier, mailer);
        let recorded = service
            .emit(
                &student(Some("ada@example.org")),
                lent(),
                Some((EmailTemplate::BookLent, EmailData::default())),
            )
            .await;
        assert!(recorded);
    }

    #[tokio::test]
    async fn email_alone_counts_as_delivered() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(|_| Err(AppError::Dependency("queue full".into())));
        let mut mailer = MockMailer::new();
        mailer
            .expect_send_templated_email()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(notifier, mailer);
        let recorded = service
            .emit(
                &student(Some("ada@example.org")),
                lent(),
                Some((EmailTemplate::BookLent, EmailData::default())),
            )
            .await;
        assert!(recorded);
    }

    #[tokio::test]
    async fn nothing_delivered_when_both_channels_fail() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(|_| Err(AppError::Dependency("queue full".into())));
        let mut mailer = MockMailer::new();
        mailer
            .expect_send_templated_email()
            .times(1)
            .returning(|_, _, _| Err(AppError::Dependency("smtp down".into())));

        let service = service(notifier, mailer);
        let delivered = service
            .emit(
                &student(Some("ada@example.org")),
                lent(),
                Some((EmailTemplate::OverdueNotice, EmailData::default())),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn unknown_recipient_is_skipped() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(0);
        let mut mailer = MockMailer::new();
        mailer.expect_send_templated_email().times(0);

        let service = service(notifier, mailer);
        assert!(!service.notify_user(42, lent(), None).await);
    }

    #[tokio::test]
    async fn accounts_without_address_get_no_email() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|n| Ok(stored(n)));
        let mut mailer = MockMailer::new();
        mailer.expect_send_templated_email().times(0);

        let service = service(notifier, mailer);
        assert!(
            service
                .emit(
                    &student(None),
                    lent(),
                    Some((EmailTemplate::BookLent, EmailData::default())),
                )
                .await
        );
    }
}

//! Overdue accrual engine and its scheduler
//!
//! One pass marks late loans overdue, brings each overdue fine up to the
//! day-rate figure and sends reminders. Passes never overlap: a timer tick
//! and a manual run wait for each other on the run lock.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use utoipa::ToSchema;

use super::{
    clock::Clock,
    email::{EmailData, EmailTemplate},
    notifications::NotificationService,
};
use crate::{
    config::LoansConfig,
    error::AppResult,
    models::{
        borrowing::{overdue_fine, Borrowing, BorrowingStatus, SentNotification},
        notification::{NewNotification, NotificationKind, Priority},
    },
    repository::LibraryStore,
};

/// Counters of one accrual pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccrualReport {
    /// Borrowings looked at (overdue and due soon)
    pub scanned: usize,
    pub newly_overdue: usize,
    pub fines_created: usize,
    pub fines_updated: usize,
    pub reminders_sent: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct AccrualEngine {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    notifications: NotificationService,
    daily_fine: Decimal,
    reminder_days: i64,
    run_lock: Arc<Mutex<()>>,
}

impl AccrualEngine {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        clock: Arc<dyn Clock>,
        notifications: NotificationService,
        loans: &LoansConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifications,
            daily_fine: loans.daily_fine_amount,
            reminder_days: loans.reminder_days_before_due,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one full pass. Item failures are logged and counted, never fatal.
    pub async fn run_once(&self) -> AccrualReport {
        let _guard = self.run_lock.lock().await;
        let now = self.clock.now();
        let today = now.date_naive();
        let mut report = AccrualReport::default();

        match self.store.list_overdue_borrowings(now).await {
            Ok(overdue) => {
                for b in overdue {
                    report.scanned += 1;
                    if let Err(e) = self.accrue(&b, now, today, &mut report).await {
                        report.failures += 1;
                        tracing::error!(borrowing_id = b.id, "Overdue accrual failed: {}", e);
                    }
                }
            }
            Err(e) => {
                report.failures += 1;
                tracing::error!("Cannot list overdue borrowings: {}", e);
            }
        }

        let horizon = now + Duration::days(self.reminder_days);
        match self.store.list_due_between(now, horizon).await {
            Ok(due_soon) => {
                for b in due_soon {
                    report.scanned += 1;
                    if let Err(e) = self.remind_due_soon(&b, now, today, &mut report).await {
                        report.failures += 1;
                        tracing::error!(borrowing_id = b.id, "Due-soon reminder failed: {}", e);
                    }
                }
            }
            Err(e) => {
                report.failures += 1;
                tracing::error!("Cannot list borrowings due soon: {}", e);
            }
        }

        tracing::info!(
            scanned = report.scanned,
            newly_overdue = report.newly_overdue,
            fines_created = report.fines_created,
            fines_updated = report.fines_updated,
            reminders_sent = report.reminders_sent,
            failures = report.failures,
            "Accrual pass finished"
        );
        report
    }

    async fn accrue(
        &self,
        b: &Borrowing,
        now: DateTime<Utc>,
        today: NaiveDate,
        report: &mut AccrualReport,
    ) -> AppResult<()> {
        if b.status == BorrowingStatus::Borrowed && self.store.mark_overdue(b.id, now).await? {
            report.newly_overdue += 1;
        }

        let days_overdue = b.days_overdue(now);
        let mut fine = overdue_fine(days_overdue, self.daily_fine);
        if fine > Decimal::ZERO {
            let upsert = self.store.upsert_overdue_fine(b, fine, now).await?;
            if upsert.created {
                report.fines_created += 1;
            } else if upsert.updated {
                report.fines_updated += 1;
            }
            fine = upsert.fine.amount;
        }

        if b.was_notified_on(NotificationKind::Overdue, today) {
            return Ok(());
        }

        let title = self.notifications.book_title(b.book_id).await;
        let notification = NewNotification::new(
            b.student_id,
            NotificationKind::Overdue,
            "Book overdue",
            format!(
                "\"{}\" is {} day(s) overdue. Your fine so far is {}.",
                title.as_deref().unwrap_or("Your book"),
                days_overdue,
                fine
            ),
        )
        .priority(Priority::High)
        .book(b.book_id)
        .borrowing(b.id);
        let email = EmailData {
            book_title: title,
            due_date: Some(b.due_date),
            fine_amount: Some(fine),
            days_overdue: Some(days_overdue),
            ..Default::default()
        };
        self.deliver(b, notification, EmailTemplate::OverdueNotice, email, now, report)
            .await
    }

    async fn remind_due_soon(
        &self,
        b: &Borrowing,
        now: DateTime<Utc>,
        today: NaiveDate,
        report: &mut AccrualReport,
    ) -> AppResult<()> {
        if b.was_notified_on(NotificationKind::DueSoon, today) {
            return Ok(());
        }

        let title = self.notifications.book_title(b.book_id).await;
        let notification = NewNotification::new(
            b.student_id,
            NotificationKind::DueSoon,
            "Book due soon",
            format!(
                "\"{}\" is due on {}.",
                title.as_deref().unwrap_or("Your book"),
                b.due_date.format("%Y-%m-%d")
            ),
        )
        .book(b.book_id)
        .borrowing(b.id);
        let email = EmailData {
            book_title: title,
            due_date: Some(b.due_date),
            ..Default::default()
        };
        self.deliver(b, notification, EmailTemplate::DueSoonReminder, email, now, report)
            .await
    }

    /// Emit a reminder and, once any channel delivered it, log it on the
    /// borrowing so it is not repeated today
    async fn deliver(
        &self,
        b: &Borrowing,
        notification: NewNotification,
        template: EmailTemplate,
        email: EmailData,
        now: DateTime<Utc>,
        report: &mut AccrualReport,
    ) -> AppResult<()> {
        let kind = notification.kind;
        let delivered = self
            .notifications
            .notify_user(b.student_id, notification, Some((template, email)))
            .await;
        if delivered {
            self.store
                .record_notification_sent(b.id, &SentNotification { kind, sent_at: now })
                .await?;
            report.reminders_sent += 1;
        }
        Ok(())
    }
}

/// Runs [`AccrualEngine::run_once`] on a fixed interval until stopped
pub struct AccrualScheduler {
    engine: AccrualEngine,
    interval: std::time::Duration,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl AccrualScheduler {
    pub fn new(engine: AccrualEngine, interval: std::time::Duration) -> Self {
        Self {
            engine,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Start ticking; the first pass runs immediately. No-op if already started.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.run_once().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        tracing::info!(interval_secs = period.as_secs(), "Accrual scheduler started");
        *running = Some((stop_tx, handle));
    }

    /// Prevent further ticks and wait for a pass in progress to finish
    pub async fn stop(&self) {
        let Some((stop_tx, handle)) = self.running.lock().await.take() else {
            return;
        };
        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            tracing::error!("Accrual scheduler task ended abnormally: {}", e);
        }
        tracing::info!("Accrual scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

//! Fine ledger service

use rust_decimal::Decimal;
use std::sync::Arc;

use super::{
    clock::Clock,
    email::{EmailData, EmailTemplate},
    notifications::NotificationService,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        fine::{
            CreateFineRequest, Fine, FineStatusUpdate, FineTransition, NewFine, PaymentMethod,
            UpdateFineStatusRequest,
        },
        notification::{NewNotification, NotificationKind, Priority},
    },
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct FinesService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    notifications: NotificationService,
}

impl FinesService {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        clock: Arc<dyn Clock>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            store,
            clock,
            notifications,
        }
    }

    pub async fn get(&self, id: i32) -> AppResult<Fine> {
        self.store.get_fine(id).await
    }

    /// Sum still owed over pending and disputed fines
    pub async fn outstanding(&self, student_id: i32) -> AppResult<Decimal> {
        self.store.outstanding_fines(student_id).await
    }

    /// Staff-issued fine (damage, loss, ...) on a borrowing
    pub async fn create(&self, staff_id: i32, request: CreateFineRequest) -> AppResult<Fine> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "Fine amount must be positive".to_string(),
            ));
        }

        let borrowing = self.store.get_borrowing(request.borrowing_id).await?;
        let fine = self
            .store
            .create_fine(
                &NewFine {
                    student_id: borrowing.student_id,
                    borrowing_id: borrowing.id,
                    amount: request.amount,
                    reason: request.reason,
                    notes: request.notes,
                },
                self.clock.now(),
            )
            .await?;

        tracing::info!(
            fine_id = fine.id,
            borrowing_id = borrowing.id,
            staff_id,
            reason = fine.reason.as_str(),
            amount = %fine.amount,
            "Fine issued"
        );

        let title = self.notifications.book_title(borrowing.book_id).await;
        let notification = NewNotification::new(
            fine.student_id,
            NotificationKind::FineIssued,
            "Fine issued",
            format!(
                "A {} fine of {} was added to your account.",
                fine.reason.as_str(),
                fine.amount
            ),
        )
        .priority(Priority::High)
        .book(borrowing.book_id)
        .borrowing(borrowing.id)
        .fine(Some(fine.id));
        self.notifications
            .notify_user(
                fine.student_id,
                notification,
                Some((
                    EmailTemplate::FineIssued,
                    EmailData {
                        book_title: title,
                        fine_amount: Some(fine.amount),
                        ..Default::default()
                    },
                )),
            )
            .await;

        Ok(fine)
    }

    /// Record a payment; anything above the outstanding amount is not accepted
    pub async fn pay(
        &self,
        id: i32,
        amount: Decimal,
        method: PaymentMethod,
        received_by: Option<i32>,
    ) -> AppResult<Fine> {
        let fine = self
            .store
            .apply_fine_transition(
                id,
                &FineTransition::Payment {
                    amount,
                    method,
                    received_by,
                    at: self.clock.now(),
                },
            )
            .await?;

        tracing::info!(
            fine_id = id,
            paid = %fine.paid_amount,
            status = %fine.status,
            "Fine payment recorded"
        );
        self.payment_notice(&fine).await;
        Ok(fine)
    }

    /// Admin confirmation that the whole balance was received
    pub async fn confirm_payment(&self, id: i32, admin_id: i32) -> AppResult<Fine> {
        let fine = self
            .store
            .apply_fine_transition(
                id,
                &FineTransition::SettleInFull {
                    confirmed_by: admin_id,
                    at: self.clock.now(),
                },
            )
            .await?;

        tracing::info!(fine_id = id, admin_id, "Fine payment confirmed");
        self.payment_notice(&fine).await;
        Ok(fine)
    }

    /// Waive, dispute, or reject a dispute
    pub async fn update_status(
        &self,
        id: i32,
        staff_id: i32,
        request: UpdateFineStatusRequest,
    ) -> AppResult<Fine> {
        let at = self.clock.now();
        let transition = match request.status {
            FineStatusUpdate::Waived => FineTransition::Waive {
                by: staff_id,
                notes: request.notes,
                at,
            },
            FineStatusUpdate::Disputed => FineTransition::Dispute {
                reason: request.notes,
                at,
            },
            FineStatusUpdate::Pending => FineTransition::ResolveDispute {
                by: staff_id,
                notes: request.notes,
                at,
            },
        };

        let fine = self.store.apply_fine_transition(id, &transition).await?;
        tracing::info!(fine_id = id, staff_id, status = %fine.status, "Fine status changed");
        Ok(fine)
    }

    async fn payment_notice(&self, fine: &Fine) {
        let message = if fine.is_paid {
            format!("Your fine of {} is fully paid.", fine.amount)
        } else {
            format!(
                "Payment received. {} of {} remains outstanding.",
                fine.outstanding(),
                fine.amount
            )
        };
        let notification = NewNotification::new(
            fine.student_id,
            NotificationKind::FinePayment,
            "Fine payment",
            message,
        )
        .priority(Priority::Low)
        .borrowing(fine.borrowing_id)
        .fine(Some(fine.id));
        self.notifications
            .notify_user(fine.student_id, notification, None)
            .await;
    }
}

//! Fine model, ledger transitions and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "fine_reason", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FineReason {
    Overdue,
    Damage,
    Loss,
    Other,
}

impl FineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FineReason::Overdue => "overdue",
            FineReason::Damage => "damage",
            FineReason::Loss => "loss",
            FineReason::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "fine_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FineStatus {
    Pending,
    Paid,
    Waived,
    Disputed,
}

impl FineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FineStatus::Pending => "pending",
            FineStatus::Paid => "paid",
            FineStatus::Waived => "waived",
            FineStatus::Disputed => "disputed",
        }
    }

    /// Still owed by the student
    pub fn is_open(&self) -> bool {
        matches!(self, FineStatus::Pending | FineStatus::Disputed)
    }
}

impl std::fmt::Display for FineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
    Other,
}

/// One accepted payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FinePayment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub received_by: Option<i32>,
    pub paid_at: DateTime<Utc>,
}

/// Internal row structure for database queries (JSONB payments)
#[derive(Debug, Clone, FromRow)]
pub struct FineRow {
    id: i32,
    student_id: i32,
    borrowing_id: i32,
    amount: Decimal,
    reason: FineReason,
    status: FineStatus,
    paid_amount: Decimal,
    is_paid: bool,
    payments: Json<Vec<FinePayment>>,
    notes: Option<String>,
    waived_by: Option<i32>,
    waived_at: Option<DateTime<Utc>>,
    dispute_reason: Option<String>,
    disputed_at: Option<DateTime<Utc>>,
    resolved_by: Option<i32>,
    resolved_at: Option<DateTime<Utc>>,
    resolution_notes: Option<String>,
    crea_date: DateTime<Utc>,
    modif_date: Option<DateTime<Utc>>,
}

impl From<FineRow> for Fine {
    fn from(row: FineRow) -> Self {
        Fine {
            id: row.id,
            student_id: row.student_id,
            borrowing_id: row.borrowing_id,
            amount: row.amount,
            reason: row.reason,
            status: row.status,
            paid_amount: row.paid_amount,
            is_paid: row.is_paid,
            payments: row.payments.0,
            notes: row.notes,
            waived_by: row.waived_by,
            waived_at: row.waived_at,
            dispute_reason: row.dispute_reason,
            disputed_at: row.disputed_at,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            resolution_notes: row.resolution_notes,
            crea_date: row.crea_date,
            modif_date: row.modif_date,
        }
    }
}

/// Fine model
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Fine {
    pub id: i32,
    pub student_id: i32,
    pub borrowing_id: i32,
    pub amount: Decimal,
    pub reason: FineReason,
    pub status: FineStatus,
    pub paid_amount: Decimal,
    pub is_paid: bool,
    pub payments: Vec<FinePayment>,
    pub notes: Option<String>,
    pub waived_by: Option<i32>,
    pub waived_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i32>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub crea_date: DateTime<Utc>,
    pub modif_date: Option<DateTime<Utc>>,
}

/// A change applied to a fine by the ledger
#[derive(Debug, Clone)]
pub enum FineTransition {
    Payment {
        amount: Decimal,
        method: PaymentMethod,
        received_by: Option<i32>,
        at: DateTime<Utc>,
    },
    /// Admin confirms the whole outstanding balance was received
    SettleInFull { confirmed_by: i32, at: DateTime<Utc> },
    Waive {
        by: i32,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    Dispute {
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    /// Dispute rejected; the fine is owed again
    ResolveDispute {
        by: i32,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
}

impl Fine {
    /// Build a pending fine from creation values
    pub fn from_new(id: i32, data: &NewFine, at: DateTime<Utc>) -> Self {
        Fine {
            id,
            student_id: data.student_id,
            borrowing_id: data.borrowing_id,
            amount: data.amount,
            reason: data.reason,
            status: FineStatus::Pending,
            paid_amount: Decimal::ZERO,
            is_paid: false,
            payments: Vec::new(),
            notes: data.notes.clone(),
            waived_by: None,
            waived_at: None,
            dispute_reason: None,
            disputed_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            crea_date: at,
            modif_date: None,
        }
    }

    /// `amount - paid_amount`, never negative
    pub fn outstanding(&self) -> Decimal {
        (self.amount - self.paid_amount).max(Decimal::ZERO)
    }

    /// Amount still owed if the fine is open, zero otherwise
    pub fn unpaid_balance(&self) -> Decimal {
        if self.status.is_open() {
            self.outstanding()
        } else {
            Decimal::ZERO
        }
    }

    /// Bring an overdue fine up to `amount` while its loan keeps accruing.
    ///
    /// Pending fines are raised. A paid fine is raised and reopened so the
    /// extra lateness is owed again. Waived and disputed fines are left alone.
    /// Returns whether the fine changed.
    pub fn raise_overdue(&mut self, amount: Decimal, at: DateTime<Utc>) -> bool {
        let raisable = matches!(self.status, FineStatus::Pending | FineStatus::Paid);
        if !raisable || amount <= self.amount {
            return false;
        }
        self.amount = amount;
        if self.paid_amount < amount {
            self.status = FineStatus::Pending;
            self.is_paid = false;
        }
        self.modif_date = Some(at);
        true
    }

    fn require_open(&self) -> AppResult<()> {
        if self.status.is_open() {
            Ok(())
        } else {
            Err(AppError::Validation(format!("Fine is already {}", self.status)))
        }
    }

    fn accept_payment(
        &mut self,
        amount: Decimal,
        method: PaymentMethod,
        received_by: Option<i32>,
        at: DateTime<Utc>,
    ) -> Decimal {
        let accepted = amount.min(self.outstanding());
        self.paid_amount += accepted;
        self.payments.push(FinePayment {
            amount: accepted,
            method,
            received_by,
            paid_at: at,
        });
        if self.paid_amount >= self.amount {
            self.is_paid = true;
            self.status = FineStatus::Paid;
        }
        accepted
    }

    /// Apply a ledger transition in place.
    pub fn apply(&mut self, transition: &FineTransition) -> AppResult<()> {
        match transition {
            FineTransition::Payment {
                amount,
                method,
                received_by,
                at,
            } => {
                if *amount <= Decimal::ZERO {
                    return Err(AppError::Validation(
                        "Payment amount must be positive".to_string(),
                    ));
                }
                self.require_open()?;
                self.accept_payment(*amount, *method, *received_by, *at);
                self.modif_date = Some(*at);
            }
            FineTransition::SettleInFull { confirmed_by, at } => {
                self.require_open()?;
                let outstanding = self.outstanding();
                self.accept_payment(outstanding, PaymentMethod::Other, Some(*confirmed_by), *at);
                self.modif_date = Some(*at);
            }
            FineTransition::Waive { by, notes, at } => {
                self.require_open()?;
                if self.status == FineStatus::Disputed {
                    self.resolved_by = Some(*by);
                    self.resolved_at = Some(*at);
                    self.resolution_notes = notes.clone();
                }
                self.status = FineStatus::Waived;
                self.waived_by = Some(*by);
                self.waived_at = Some(*at);
                self.modif_date = Some(*at);
            }
            FineTransition::Dispute { reason, at } => {
                if self.status != FineStatus::Pending {
                    return Err(AppError::Validation(format!(
                        "Only pending fines can be disputed (fine is {})",
                        self.status
                    )));
                }
                self.status = FineStatus::Disputed;
                self.dispute_reason = reason.clone();
                self.disputed_at = Some(*at);
                self.modif_date = Some(*at);
            }
            FineTransition::ResolveDispute { by, notes, at } => {
                if self.status != FineStatus::Disputed {
                    return Err(AppError::Validation(format!(
                        "Fine is not under dispute (fine is {})",
                        self.status
                    )));
                }
                self.status = FineStatus::Pending;
                self.resolved_by = Some(*by);
                self.resolved_at = Some(*at);
                self.resolution_notes = notes.clone();
                self.modif_date = Some(*at);
            }
        }
        Ok(())
    }
}

/// Values of a fine to be inserted
#[derive(Debug, Clone)]
pub struct NewFine {
    pub student_id: i32,
    pub borrowing_id: i32,
    pub amount: Decimal,
    pub reason: FineReason,
    pub notes: Option<String>,
}

/// Result of the overdue fine upsert
#[derive(Debug, Clone)]
pub struct FineUpsert {
    pub fine: Fine,
    pub created: bool,
    /// Amount changed on an existing fine
    pub updated: bool,
}

/// Create fine request (staff)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateFineRequest {
    pub borrowing_id: i32,
    pub amount: Decimal,
    pub reason: FineReason,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

/// Pay fine request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PayFineRequest {
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
}

/// Target status of a fine status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FineStatusUpdate {
    /// Waive the fine (also closes an open dispute)
    Waived,
    /// Put the fine under dispute
    Disputed,
    /// Reject a dispute; the fine is owed again
    Pending,
}

/// Fine status change request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateFineStatusRequest {
    pub status: FineStatusUpdate,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

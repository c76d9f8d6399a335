//! Administration endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::fine::Fine, services::accrual::AccrualReport, AppState};

use super::AuthenticatedUser;

/// Confirm that the whole outstanding balance of a fine was received
#[utoipa::path(
    put,
    path = "/admin/fines/{id}/confirm-payment",
    tag = "admin",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Fine ID")),
    responses(
        (status = 200, description = "Fine settled", body = Fine),
        (status = 400, description = "Fine already settled"),
        (status = 403, description = "Administrator privileges required"),
        (status = 404, description = "Fine not found")
    )
)]
pub async fn confirm_fine_payment(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Fine>> {
    claims.require_admin()?;

    let fine = state
        .services
        .fines
        .confirm_payment(id, claims.user_id)
        .await?;
    Ok(Json(fine))
}

/// Run one overdue accrual pass now
#[utoipa::path(
    post,
    path = "/admin/accrual/run",
    tag = "admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pass finished", body = AccrualReport),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn run_accrual(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<AccrualReport>> {
    claims.require_staff()?;

    tracing::info!(user_id = claims.user_id, "Manual accrual pass requested");
    let report = state.services.accrual.run_once().await;
    Ok(Json(report))
}

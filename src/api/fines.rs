//! Fine endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::fine::{CreateFineRequest, Fine, PayFineRequest, PaymentMethod, UpdateFineStatusRequest},
    AppState,
};

use super::AuthenticatedUser;

/// Issue a fine on a borrowing
#[utoipa::path(
    post,
    path = "/fines",
    tag = "fines",
    security(("bearer_auth" = [])),
    request_body = CreateFineRequest,
    responses(
        (status = 201, description = "Fine created", body = Fine),
        (status = 400, description = "Invalid amount"),
        (status = 404, description = "Borrowing not found"),
        (status = 409, description = "A fine with this reason already exists for the borrowing")
    )
)]
pub async fn create_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateFineRequest>,
) -> AppResult<(StatusCode, Json<Fine>)> {
    claims.require_staff()?;
    request.validate()?;

    let fine = state.services.fines.create(claims.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(fine)))
}

/// Get a fine
#[utoipa::path(
    get,
    path = "/fines/{id}",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Fine ID")),
    responses(
        (status = 200, description = "Fine", body = Fine),
        (status = 403, description = "Not your fine"),
        (status = 404, description = "Fine not found")
    )
)]
pub async fn get_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Fine>> {
    let fine = state.services.fines.get(id).await?;
    claims.require_self_or_staff(fine.student_id)?;
    Ok(Json(fine))
}

/// Pay a fine, fully or in part
#[utoipa::path(
    post,
    path = "/fines/{id}/pay",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Fine ID")),
    request_body = PayFineRequest,
    responses(
        (status = 200, description = "Payment recorded", body = Fine),
        (status = 400, description = "Invalid amount or fine already settled"),
        (status = 403, description = "Not your fine"),
        (status = 404, description = "Fine not found")
    )
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<PayFineRequest>,
) -> AppResult<Json<Fine>> {
    let fine = state.services.fines.get(id).await?;
    claims.require_self_or_staff(fine.student_id)?;

    // Desk payments are recorded with the staff member who took them
    let (received_by, default_method) = if claims.is_staff() {
        (Some(claims.user_id), PaymentMethod::Cash)
    } else {
        (None, PaymentMethod::Online)
    };

    let fine = state
        .services
        .fines
        .pay(
            id,
            request.amount,
            request.method.unwrap_or(default_method),
            received_by,
        )
        .await?;
    Ok(Json(fine))
}

/// Waive a fine, put it under dispute, or reject a dispute
#[utoipa::path(
    put,
    path = "/fines/{id}/status",
    tag = "fines",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Fine ID")),
    request_body = UpdateFineStatusRequest,
    responses(
        (status = 200, description = "Fine updated", body = Fine),
        (status = 400, description = "Transition not allowed from the current status"),
        (status = 404, description = "Fine not found")
    )
)]
pub async fn update_fine_status(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateFineStatusRequest>,
) -> AppResult<Json<Fine>> {
    claims.require_staff()?;
    request.validate()?;

    let fine = state
        .services
        .fines
        .update_status(id, claims.user_id, request)
        .await?;
    Ok(Json(fine))
}

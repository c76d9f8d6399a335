//! Borrowing lifecycle endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::AppResult,
    models::borrowing::{
        BorrowingDetails, BorrowingOutcome, DueSoonQuery, ExtendRequest, LendRequest,
        MarkLostRequest, ReturnRequest,
    },
    AppState,
};

use super::AuthenticatedUser;

/// Lend a book to a student
#[utoipa::path(
    post,
    path = "/borrowings/lend",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    request_body = LendRequest,
    responses(
        (status = 201, description = "Book lent", body = BorrowingDetails),
        (status = 400, description = "Book unavailable, unpaid fines or borrowing limit reached", body = crate::error::ErrorResponse),
        (status = 403, description = "Staff privileges required"),
        (status = 404, description = "Student or book not found")
    )
)]
pub async fn lend(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<LendRequest>,
) -> AppResult<(StatusCode, Json<BorrowingDetails>)> {
    claims.require_staff()?;

    let borrowing = state
        .services
        .borrowings
        .lend(claims.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(borrowing)))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/borrowings/return/{id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    request_body = ReturnRequest,
    responses(
        (status = 200, description = "Book returned", body = BorrowingOutcome),
        (status = 400, description = "Borrowing is not active"),
        (status = 404, description = "Borrowing not found")
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    request: Option<Json<ReturnRequest>>,
) -> AppResult<Json<BorrowingOutcome>> {
    claims.require_staff()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let outcome = state
        .services
        .borrowings
        .return_book(id, claims.user_id, request)
        .await?;
    Ok(Json(outcome))
}

/// Move the due date of an active borrowing
#[utoipa::path(
    post,
    path = "/borrowings/{id}/extend",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    request_body = ExtendRequest,
    responses(
        (status = 200, description = "Borrowing extended", body = BorrowingDetails),
        (status = 400, description = "Invalid due date, inactive borrowing or extension limit reached"),
        (status = 404, description = "Borrowing not found")
    )
)]
pub async fn extend(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<ExtendRequest>,
) -> AppResult<Json<BorrowingDetails>> {
    claims.require_staff()?;
    request.validate()?;

    let borrowing = state
        .services
        .borrowings
        .extend(id, claims.user_id, request)
        .await?;
    Ok(Json(borrowing))
}

/// Declare a borrowed book lost
#[utoipa::path(
    post,
    path = "/borrowings/{id}/mark-lost",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    request_body = MarkLostRequest,
    responses(
        (status = 200, description = "Borrowing marked lost", body = BorrowingOutcome),
        (status = 400, description = "Borrowing is not active or negative fee"),
        (status = 404, description = "Borrowing not found")
    )
)]
pub async fn mark_lost(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<MarkLostRequest>,
) -> AppResult<Json<BorrowingOutcome>> {
    claims.require_staff()?;
    request.validate()?;

    let outcome = state
        .services
        .borrowings
        .mark_lost(id, claims.user_id, request)
        .await?;
    Ok(Json(outcome))
}

/// Get a borrowing with its live overdue figures
#[utoipa::path(
    get,
    path = "/borrowings/{id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrowing ID")),
    responses(
        (status = 200, description = "Borrowing", body = BorrowingDetails),
        (status = 403, description = "Not your borrowing"),
        (status = 404, description = "Borrowing not found")
    )
)]
pub async fn get_borrowing(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowingDetails>> {
    let borrowing = state.services.borrowings.get(id).await?;
    claims.require_self_or_staff(borrowing.borrowing.student_id)?;
    Ok(Json(borrowing))
}

/// Active borrowings past their due date
#[utoipa::path(
    get,
    path = "/borrowings/overdue",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue borrowings", body = Vec<BorrowingDetails>)
    )
)]
pub async fn list_overdue(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowings = state.services.borrowings.list_overdue().await?;
    Ok(Json(borrowings))
}

/// Active borrowings due within the next days
#[utoipa::path(
    get,
    path = "/borrowings/due-soon",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(DueSoonQuery),
    responses(
        (status = 200, description = "Borrowings due soon", body = Vec<BorrowingDetails>)
    )
)]
pub async fn list_due_soon(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<DueSoonQuery>,
) -> AppResult<Json<Vec<BorrowingDetails>>> {
    claims.require_staff()?;

    let borrowings = state.services.borrowings.list_due_soon(query.days).await?;
    Ok(Json(borrowings))
}

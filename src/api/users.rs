//! User endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        borrowing::BorrowingDetails,
        fine::Fine,
        user::{CreateUser, User, UserDetails},
    },
    AppState,
};

use super::AuthenticatedUser;

/// Account activation request
#[derive(Deserialize, ToSchema)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

/// Create an account
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    security(("bearer_auth" = [])),
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Administrator privileges required")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateUser>,
) -> AppResult<(StatusCode, Json<User>)> {
    claims.require_admin()?;
    request.validate()?;

    let user = state.services.users.create_user(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Get an account with its active loan count and outstanding fines
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = UserDetails),
        (status = 403, description = "Not your account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<UserDetails>> {
    claims.require_self_or_staff(id)?;

    let user = state.services.users.get_user(id).await?;
    Ok(Json(user))
}

/// Activate or deactivate an account
#[utoipa::path(
    put,
    path = "/users/{id}/active",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn set_user_active(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(request): Json<SetActiveRequest>,
) -> AppResult<Json<User>> {
    claims.require_admin()?;

    let user = state.services.users.set_active(id, request.is_active).await?;
    Ok(Json(user))
}

/// Borrowings of a student, newest first
#[utoipa::path(
    get,
    path = "/users/{id}/borrowings",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Borrowings", body = Vec<BorrowingDetails>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_borrowings(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<BorrowingDetails>>> {
    claims.require_self_or_staff(id)?;

    let borrowings = state.services.users.borrowings(id).await?;
    Ok(Json(borrowings))
}

/// Fines of a student
#[utoipa::path(
    get,
    path = "/users/{id}/fines",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Fines", body = Vec<Fine>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_fines(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<Fine>>> {
    claims.require_self_or_staff(id)?;

    let fines = state.services.users.fines(id).await?;
    Ok(Json(fines))
}

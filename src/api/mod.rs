//! API handlers for the circulation REST endpoints

pub mod admin;
pub mod books;
pub mod borrowings;
pub mod fines;
pub mod health;
pub mod openapi;
pub mod users;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Get the Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = UserClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

/// Create the application router with all routes
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Catalog
        .route("/books", post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book)
                .put(books::update_book)
                .delete(books::deactivate_book),
        )
        // Users
        .route("/users", post(users::create_user))
        .route("/users/:id", get(users::get_user))
        .route("/users/:id/active", put(users::set_user_active))
        .route("/users/:id/borrowings", get(users::get_user_borrowings))
        .route("/users/:id/fines", get(users::get_user_fines))
        // Borrowings
        .route("/borrowings/lend", post(borrowings::lend))
        .route("/borrowings/return/:id", post(borrowings::return_book))
        .route("/borrowings/overdue", get(borrowings::list_overdue))
        .route("/borrowings/due-soon", get(borrowings::list_due_soon))
        .route("/borrowings/:id", get(borrowings::get_borrowing))
        .route("/borrowings/:id/extend", post(borrowings::extend))
        .route("/borrowings/:id/mark-lost", post(borrowings::mark_lost))
        // Fines
        .route("/fines", post(fines::create_fine))
        .route("/fines/:id", get(fines::get_fine))
        .route("/fines/:id/pay", post(fines::pay_fine))
        .route("/fines/:id/status", put(fines::update_fine_status))
        // Administration
        .route(
            "/admin/fines/:id/confirm-payment",
            put(admin::confirm_fine_payment),
        )
        .route("/admin/accrual/run", post(admin::run_accrual))
        .with_state(state);

    // OpenAPI documentation
    let openapi = openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

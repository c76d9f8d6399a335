//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{admin, books, borrowings, fines, health, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Circulation API",
        version = "1.0.0",
        description = "Library borrowing, overdue fines and availability REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    modifiers(&SecurityAddon),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::create_book,
        books::get_book,
        books::update_book,
        books::deactivate_book,
        // Users
        users::create_user,
        users::get_user,
        users::set_user_active,
        users::get_user_borrowings,
        users::get_user_fines,
        // Borrowings
        borrowings::lend,
        borrowings::return_book,
        borrowings::extend,
        borrowings::mark_lost,
        borrowings::get_borrowing,
        borrowings::list_overdue,
        borrowings::list_due_soon,
        // Fines
        fines::create_fine,
        fines::get_fine,
        fines::pay_fine,
        fines::update_fine_status,
        // Admin
        admin::confirm_fine_payment,
        admin::run_accrual,
    ),
    components(
        schemas(
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Users
            crate::models::user::Role,
            crate::models::user::User,
            crate::models::user::UserDetails,
            crate::models::user::CreateUser,
            users::SetActiveRequest,
            // Borrowings
            crate::models::borrowing::BorrowingStatus,
            crate::models::borrowing::BookCondition,
            crate::models::borrowing::BorrowingExtension,
            crate::models::borrowing::SentNotification,
            crate::models::borrowing::Borrowing,
            crate::models::borrowing::BorrowingDetails,
            crate::models::borrowing::BorrowingOutcome,
            crate::models::borrowing::LendRequest,
            crate::models::borrowing::ReturnRequest,
            crate::models::borrowing::ExtendRequest,
            crate::models::borrowing::MarkLostRequest,
            crate::models::notification::NotificationKind,
            // Fines
            crate::models::fine::Fine,
            crate::models::fine::FineReason,
            crate::models::fine::FineStatus,
            crate::models::fine::FinePayment,
            crate::models::fine::PaymentMethod,
            crate::models::fine::CreateFineRequest,
            crate::models::fine::PayFineRequest,
            crate::models::fine::FineStatusUpdate,
            crate::models::fine::UpdateFineStatusRequest,
            // Admin
            crate::services::accrual::AccrualReport,
            // Health
            health::HealthResponse,
            health::ReadinessResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Catalog and copy availability"),
        (name = "users", description = "User accounts"),
        (name = "borrowings", description = "Borrowing lifecycle"),
        (name = "fines", description = "Fine ledger"),
        (name = "admin", description = "Administration")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme used by the secured paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_circulation_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/borrowings/lend"));
        assert!(doc.paths.paths.contains_key("/admin/accrual/run"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}

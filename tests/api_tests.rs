//! HTTP surface: routing, authentication and error bodies

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

use circulation_server::{
    api,
    config::{AppConfig, StorageBackend},
    models::user::{Role, User, UserClaims},
    repository::Repository,
    services::Services,
    AppState,
};
use common::Harness;

fn app(h: &Harness) -> Router {
    let mut config = AppConfig::default();
    config.database.backend = StorageBackend::Memory;
    let services = Services::new(h.store.clone(), h.clock.clone(), &h.loans, h.mailer.clone());
    api::router(AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    })
}

fn token(user: &User) -> String {
    UserClaims::new(user.id, user.role, 1)
        .create_token(&AppConfig::default().auth.jwt_secret)
        .unwrap()
}

fn request(method: Method, uri: &str, auth: Option<&User>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new();
    let (status, body) = send(app(&h), request(Method::GET, "/api/v1/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

}

#[tokio::test]
async fn readiness_reports_a_reachable_store() {
    let h = Harness::new();
    let (status, body) = send(app(&h), request(Method::GET, "/api/v1/ready", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["storage"], "memory");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn readiness_fails_when_the_database_is_down() {
    let h = Harness::new();
    let pool = PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(500))
        .connect_lazy("postgres://circulation@127.0.0.1:1/circulation")
        .unwrap();
    let services = Services::new(
        Arc::new(Repository::new(pool)),
        h.clock.clone(),
        &h.loans,
        h.mailer.clone(),
    );
    let app = api::router(AppState {
        config: Arc::new(AppConfig::default()),
        services: Arc::new(services),
    });

    let (status, body) = send(app, request(Method::GET, "/api/v1/ready", None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["storage"], "postgres");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let h = Harness::new();
    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/api/v1/borrowings/lend",
            None,
            Some(json!({"student_id": 1, "book_id": 2})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 2);
    assert_eq!(body["error"], "NotAuthorized");
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let h = Harness::new();
    let staff = h.staff().await;
    let forged = UserClaims::new(staff.id, Role::Admin, 1)
        .create_token("not-the-server-secret")
        .unwrap();
    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/borrowings/overdue")
        .header(header::AUTHORIZATION, format!("Bearer {}", forged))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(app(&h), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn students_cannot_lend() {
    let h = Harness::new();
    let student = h.student("Ada").await;
    let book = h.book("9780441013593", 1).await;

    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/api/v1/borrowings/lend",
            Some(&student),
            Some(json!({"student_id": student.id, "book_id": book.id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Staff privileges required");
    assert_eq!(h.available(&book).await, 1);
}

#[tokio::test]
async fn staff_lend_and_return_over_http() {
    let h = Harness::new();
    let staff = h.staff().await;
    let student = h.student("Ada").await;
    let book = h.book("9780441013593", 1).await;

    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/api/v1/borrowings/lend",
            Some(&staff),
            Some(json!({"student_id": student.id, "book_id": book.id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "borrowed");
    assert_eq!(body["student_id"], student.id);
    assert_eq!(body["days_overdue"], 0);
    let id = body["id"].as_i64().unwrap();
    assert_eq!(h.available(&book).await, 0);

    // Second lend of the only copy
    let other = h.student("Bob").await;
    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            "/api/v1/borrowings/lend",
            Some(&staff),
            Some(json!({"student_id": other.id, "book_id": book.id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "BadValue");
    assert_eq!(body["message"], "Book is currently unavailable");

    // Return without a body
    let (status, body) = send(
        app(&h),
        request(
            Method::POST,
            &format!("/api/v1/borrowings/return/{}", id),
            Some(&staff),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["borrowing"]["status"], "returned");
    assert!(body["fine"].is_null());
    assert_eq!(h.available(&book).await, 1);
}

#[tokio::test]
async fn students_see_only_their_own_borrowings() {
    let h = Harness::new();
    let staff = h.staff().await;
    let ada = h.student("Ada").await;
    let bob = h.student("Bob").await;
    let book = h.book("9780441013593", 1).await;
    let lent = h.lend(&staff, &ada, &book).await.unwrap();
    let uri = format!("/api/v1/borrowings/{}", lent.borrowing.id);

    let (status, body) = send(app(&h), request(Method::GET, &uri, Some(&ada), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], lent.borrowing.id);

    let (status, _) = send(app(&h), request(Method::GET, &uri, Some(&bob), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        app(&h),
        request(Method::GET, &format!("/api/v1/users/{}/borrowings", ada.id), Some(&ada), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_borrowing_is_not_found() {
    let h = Harness::new();
    let staff = h.staff().await;
    let (status, body) = send(
        app(&h),
        request(Method::GET, "/api/v1/borrowings/777", Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4);
}

#[tokio::test]
async fn overdue_list_and_manual_accrual() {
    let h = Harness::new();
    let staff = h.staff().await;
    let student = h.student("Ada").await;
    let book = h.book_with_period("9780441013593", 1, 5).await;
    h.lend(&staff, &student, &book).await.unwrap();
    h.advance_days(8);

    let (status, body) = send(
        app(&h),
        request(Method::POST, "/api/v1/admin/accrual/run", Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newly_overdue"], 1);
    assert_eq!(body["fines_created"], 1);

    let (status, body) = send(
        app(&h),
        request(Method::GET, "/api/v1/borrowings/overdue", Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "overdue");
    assert_eq!(listed[0]["days_overdue"], 3);

    let (status, _) = send(
        app(&h),
        request(Method::POST, "/api/v1/admin/accrual/run", Some(&student), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn due_soon_window_is_validated() {
    let h = Harness::new();
    let staff = h.staff().await;
    let (status, body) = send(
        app(&h),
        request(Method::GET, "/api/v1/borrowings/due-soon?days=-3", Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = send(
        app(&h),
        request(Method::GET, "/api/v1/borrowings/due-soon", Some(&staff), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn only_admins_deactivate_accounts() {
    let h = Harness::new();
    let staff = h.staff().await;
    let admin = h.user("Root", Role::Admin).await;
    let student = h.student("Ada").await;
    let uri = format!("/api/v1/users/{}/active", student.id);

    let (status, _) = send(
        app(&h),
        request(Method::PUT, &uri, Some(&staff), Some(json!({"is_active": false}))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        app(&h),
        request(Method::PUT, &uri, Some(&admin), Some(json!({"is_active": false}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let h = Harness::new();
    let (status, body) = send(
        app(&h),
        request(Method::GET, "/api-docs/openapi.json", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/borrowings/lend"].is_object());
}

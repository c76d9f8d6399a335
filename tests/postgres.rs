//! The PostgreSQL store against a live database.
//!
//! Ignored by default. Run with a scratch database:
//! `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use circulation_server::{
    error::AppError,
    models::{
        book::{Book, CreateBook},
        borrowing::{BorrowingExtension, BorrowingStatus, NewBorrowing},
        fine::{FineStatus, FineTransition, PaymentMethod},
        user::{CreateUser, Role, User},
    },
    repository::{BookStore, BorrowingStore, FineStore, Repository, UserStore},
};

async fn repository() -> Arc<Repository> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("database reachable");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations applied");
    Arc::new(Repository::new(pool))
}

/// ISBNs are unique, so every run gets its own
fn isbn(tag: &str) -> String {
    format!("{}-{}", tag, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

async fn user(repo: &Repository, name: &str, role: Role) -> User {
    repo.create_user(
        &CreateUser {
            name: name.to_string(),
            email: None,
            role,
        },
        Utc::now(),
    )
    .await
    .unwrap()
}

async fn book(repo: &Repository, tag: &str, copies: i32) -> Book {
    repo.create_book(
        &CreateBook {
            isbn: isbn(tag),
            title: format!("Book {}", tag),
            author: None,
            total_copies: copies,
            lending_period_days: None,
        },
        Utc::now(),
    )
    .await
    .unwrap()
}

fn loan(student: &User, book: &Book, staff: &User, borrowed_at: DateTime<Utc>, days: i64) -> NewBorrowing {
    NewBorrowing {
        student_id: student.id,
        book_id: book.id,
        staff_id: staff.id,
        borrowed_at,
        due_date: borrowed_at + Duration::days(days),
    }
}

#[tokio::test]
#[ignore]
async fn last_copy_goes_to_exactly_one_student() {
    let repo = repository().await;
    let staff = user(&repo, "Desk", Role::Staff).await;
    let ada = user(&repo, "Ada", Role::Student).await;
    let bob = user(&repo, "Bob", Role::Student).await;
    let book = book(&repo, "last-copy", 1).await;
    let now = Utc::now();

    let loan_a = loan(&ada, &book, &staff, now, 14);
    let loan_b = loan(&bob, &book, &staff, now, 14);
    let (a, b) = tokio::join!(
        repo.create_borrowing(&loan_a, 5),
        repo.create_borrowing(&loan_b, 5)
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(AppError::Validation(_))));

    assert_eq!(repo.get_book(book.id).await.unwrap().available_copies, 0);
}

#[tokio::test]
#[ignore]
async fn active_limit_holds_under_concurrent_lends() {
    let repo = repository().await;
    let staff = user(&repo, "Desk", Role::Staff).await;
    let ada = user(&repo, "Ada", Role::Student).await;
    let first = book(&repo, "limit-a", 1).await;
    let second = book(&repo, "limit-b", 1).await;
    let now = Utc::now();

    let loan_a = loan(&ada, &first, &staff, now, 14);
    let loan_b = loan(&ada, &second, &staff, now, 14);
    let (a, b) = tokio::join!(
        repo.create_borrowing(&loan_a, 1),
        repo.create_borrowing(&loan_b, 1)
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(repo.count_active_borrowings(ada.id).await.unwrap(), 1);

    // The refused lend left its copy on the shelf
    let available = repo.get_book(first.id).await.unwrap().available_copies
        + repo.get_book(second.id).await.unwrap().available_copies;
    assert_eq!(available, 1);
}

#[tokio::test]
#[ignore]
async fn overdue_fine_upsert_creates_raises_and_never_lowers() {
    let repo = repository().await;
    let staff = user(&repo, "Desk", Role::Staff).await;
    let ada = user(&repo, "Ada", Role::Student).await;
    let book = book(&repo, "upsert", 1).await;
    let lent_at = Utc::now() - Duration::days(10);
    let borrowing = repo
        .create_borrowing(&loan(&ada, &book, &staff, lent_at, 5), 5)
        .await
        .unwrap();
    let now = Utc::now();

    let created = repo.upsert_overdue_fine(&borrowing, dec!(25), now).await.unwrap();
    assert!(created.created);
    assert_eq!(created.fine.amount, dec!(25));
    assert_eq!(created.fine.status, FineStatus::Pending);

    let raised = repo.upsert_overdue_fine(&borrowing, dec!(30), now).await.unwrap();
    assert!(!raised.created);
    assert!(raised.updated);
    assert_eq!(raised.fine.id, created.fine.id);
    assert_eq!(raised.fine.amount, dec!(30));

    let lower = repo.upsert_overdue_fine(&borrowing, dec!(10), now).await.unwrap();
    assert!(!lower.updated);
    assert_eq!(lower.fine.amount, dec!(30));

    // Paid in full, then the loan keeps running late
    repo.apply_fine_transition(
        created.fine.id,
        &FineTransition::Payment {
            amount: dec!(30),
            method: PaymentMethod::Cash,
            received_by: Some(staff.id),
            at: now,
        },
    )
    .await
    .unwrap();
    assert!(repo.get_borrowing(borrowing.id).await.unwrap().fine_paid);

    let reopened = repo.upsert_overdue_fine(&borrowing, dec!(35), now).await.unwrap();
    assert!(reopened.updated);
    assert_eq!(reopened.fine.status, FineStatus::Pending);
    assert_eq!(reopened.fine.outstanding(), dec!(5));
    assert!(!repo.get_borrowing(borrowing.id).await.unwrap().fine_paid);
    assert_eq!(repo.outstanding_fines(ada.id).await.unwrap(), dec!(5));
}

#[tokio::test]
#[ignore]
async fn overdue_flip_requires_a_past_due_date() {
    let repo = repository().await;
    let staff = user(&repo, "Desk", Role::Staff).await;
    let ada = user(&repo, "Ada", Role::Student).await;
    let on_time = book(&repo, "on-time", 1).await;
    let late = book(&repo, "late", 1).await;
    let now = Utc::now();

    let current = repo
        .create_borrowing(&loan(&ada, &on_time, &staff, now, 14), 5)
        .await
        .unwrap();
    let past_due = repo
        .create_borrowing(&loan(&ada, &late, &staff, now - Duration::days(20), 14), 5)
        .await
        .unwrap();

    assert!(!repo.mark_overdue(current.id, now).await.unwrap());
    assert!(repo.mark_overdue(past_due.id, now).await.unwrap());
    assert!(!repo.mark_overdue(past_due.id, now).await.unwrap());
    assert_eq!(
        repo.get_borrowing(past_due.id).await.unwrap().status,
        BorrowingStatus::Overdue
    );
}

#[tokio::test]
#[ignore]
async fn extension_cap_is_enforced_by_the_update() {
    let repo = repository().await;
    let staff = user(&repo, "Desk", Role::Staff).await;
    let ada = user(&repo, "Ada", Role::Student).await;
    let book = book(&repo, "extend", 1).await;
    let now = Utc::now();
    let borrowing = repo
        .create_borrowing(&loan(&ada, &book, &staff, now, 14), 5)
        .await
        .unwrap();

    let extension = |from: DateTime<Utc>| BorrowingExtension {
        previous_due_date: from,
        new_due_date: from + Duration::days(7),
        reason: None,
        extended_by: staff.id,
        extended_at: now,
    };

    let once = repo
        .extend_borrowing(borrowing.id, &extension(borrowing.due_date), 1)
        .await
        .unwrap();
    assert_eq!(once.extensions.len(), 1);

    let err = repo
        .extend_borrowing(borrowing.id, &extension(once.due_date), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let stored = repo.get_borrowing(borrowing.id).await.unwrap();
    assert_eq!(stored.due_date, once.due_date);
    assert_eq!(stored.fine_amount, Decimal::ZERO);
}

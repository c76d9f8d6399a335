//! User accounts and derived per-student views

use rust_decimal::Decimal;
use std::sync::Arc;

use super::clock::Clock;
use crate::{
    config::LoansConfig,
    error::AppResult,
    models::{
        borrowing::BorrowingDetails,
        fine::Fine,
        user::{CreateUser, User, UserDetails},
    },
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct UsersService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
    daily_fine: Decimal,
}

impl UsersService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>, loans: &LoansConfig) -> Self {
        Self {
            store,
            clock,
            daily_fine: loans.daily_fine_amount,
        }
    }

    pub async fn create_user(&self, data: CreateUser) -> AppResult<User> {
        let user = self.store.create_user(&data, self.clock.now()).await?;
        tracing::info!(user_id = user.id, role = %user.role, "User created");
        Ok(user)
    }

    /// User with active loan count and outstanding fines, both computed from the ledgers
    pub async fn get_user(&self, id: i32) -> AppResult<UserDetails> {
        let user = self.store.get_user(id).await?;
        let active_borrowings = self.store.count_active_borrowings(id).await?;
        let outstanding_fines = self.store.outstanding_fines(id).await?;
        Ok(UserDetails {
            user,
            active_borrowings,
            outstanding_fines,
        })
    }

    pub async fn set_active(&self, id: i32, is_active: bool) -> AppResult<User> {
        self.store.set_user_active(id, is_active).await
    }

    /// All borrowings of a student, newest first
    pub async fn borrowings(&self, id: i32) -> AppResult<Vec<BorrowingDetails>> {
        self.store.get_user(id).await?;
        let now = self.clock.now();
        Ok(self
            .store
            .list_student_borrowings(id)
            .await?
            .into_iter()
            .map(|b| b.details(now, self.daily_fine))
            .collect())
    }

    pub async fn fines(&self, id: i32) -> AppResult<Vec<Fine>> {
        self.store.get_user(id).await?;
        self.store.list_student_fines(id).await
    }
}

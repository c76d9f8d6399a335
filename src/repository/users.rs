//! Users on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Repository, UserStore};
use crate::{
    error::{AppError, AppResult},
    models::user::{CreateUser, User},
};

#[async_trait]
impl UserStore for Repository {
    async fn create_user(&self, data: &CreateUser, now: DateTime<Utc>) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, role, is_active, total_books_borrowed, crea_date)
            VALUES ($1, $2, $3, TRUE, 0, $4)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.email)
        .bind(data.role)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> AppResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    async fn set_user_active(&self, id: i32, is_active: bool) -> AppResult<User> {
        sqlx::query_as::<_, User>("UPDATE users SET is_active = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(is_active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }
}

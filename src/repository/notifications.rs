//! In-app notifications on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{NotificationStore, Repository};
use crate::{
    error::AppResult,
    models::notification::{NewNotification, Notification},
};

#[async_trait]
impl NotificationStore for Repository {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> AppResult<Notification> {
        let row = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (recipient_id, kind, title, message, priority,
                                       book_id, borrowing_id, fine_id, is_read, crea_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)
            RETURNING *
            "#,
        )
        .bind(notification.recipient_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.priority)
        .bind(notification.book_id)
        .bind(notification.borrowing_id)
        .bind(notification.fine_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_notifications(&self, recipient_id: i32) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE recipient_id = $1 ORDER BY crea_date DESC, id DESC",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

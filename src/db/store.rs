//! Persistence boundary for notifications and hook records.
//!
//! Components only see the [`NotificationStore`] trait. Every method is a
//! single atomic statement; the composite operations the queue needs
//! (insert-if-absent, compare-and-swap on the assignee) are expressed as one
//! statement each so callers never do check-then-act against the store.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{
    HookRecord, NewHookRecord, NewNotification, Notification, NotificationFilter,
    NotificationOrder,
};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};

const NOTIFICATION_COLUMNS: &str = "id, project_id, group_name, project_name, kind, object_id, message, channel, web_url, project_url, assigned_user, created_at, updated_at";

/// Record store used by every component.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert `new` unless a notification with the same identity key exists.
    ///
    /// Returns the created row, or `None` when the identity was already queued.
    async fn insert_if_absent(
        &self,
        new: &NewNotification,
        now: i64,
    ) -> Result<Option<Notification>, AppError>;

    async fn find(
        &self,
        filter: &NotificationFilter,
        order: NotificationOrder,
    ) -> Result<Vec<Notification>, AppError>;

    async fn find_first(
        &self,
        filter: &NotificationFilter,
        order: NotificationOrder,
    ) -> Result<Option<Notification>, AppError>;

    async fn count(&self, filter: &NotificationFilter) -> Result<i64, AppError>;

    /// Delete every matching notification, returning how many were removed.
    async fn delete(&self, filter: &NotificationFilter) -> Result<u64, AppError>;

    /// Set `updated_at` without changing anything else.
    async fn touch(&self, id: i64, at: i64) -> Result<bool, AppError>;

    /// Set the assignee only if it still equals `expected`.
    async fn compare_and_set_assignee(
        &self,
        id: i64,
        expected: &str,
        assignee: &str,
        at: i64,
    ) -> Result<bool, AppError>;

    async fn find_hook(&self, project_id: i64) -> Result<Option<HookRecord>, AppError>;

    async fn insert_hook(&self, new: &NewHookRecord, at: i64) -> Result<HookRecord, AppError>;

    /// Clear the skipped flag after a retried registration succeeded.
    async fn mark_hook_registered(&self, project_id: i64) -> Result<(), AppError>;
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Append a WHERE clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &NotificationFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id);
    }
    if let Some(key) = &filter.identity {
        qb.push(" AND project_id = ")
            .push_bind(key.scope.project_id)
            .push(" AND group_name = ")
            .push_bind(key.scope.group_name.clone())
            .push(" AND project_name = ")
            .push_bind(key.scope.project_name.clone())
            .push(" AND kind = ")
            .push_bind(key.kind)
            .push(" AND object_id = ")
            .push_bind(key.object_id);
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind);
    }
    if let Some(channel) = &filter.channel {
        qb.push(" AND channel = ").push_bind(channel.clone());
    }
    if let Some(user) = &filter.assigned_user {
        qb.push(" AND assigned_user = ").push_bind(user.clone());
    }
}

fn select_notifications<'a>(
    filter: &NotificationFilter,
    order: NotificationOrder,
) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM notifications", NOTIFICATION_COLUMNS));
    push_filter(&mut qb, filter);
    qb.push(order.sql());
    qb
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert_if_absent(
        &self,
        new: &NewNotification,
        now: i64,
    ) -> Result<Option<Notification>, AppError> {
        let query = format!(
            r#"
            INSERT INTO notifications (
                project_id, group_name, project_name, kind, object_id,
                message, channel, web_url, project_url, assigned_user, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)
            ON CONFLICT (project_id, group_name, project_name, kind, object_id) DO NOTHING
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );

        let created = sqlx::query_as::<_, Notification>(&query)
            .bind(new.scope.project_id)
            .bind(&new.scope.group_name)
            .bind(&new.scope.project_name)
            .bind(new.kind)
            .bind(new.object_id)
            .bind(&new.message)
            .bind(&new.channel)
            .bind(&new.web_url)
            .bind(&new.project_url)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(created)
    }

    async fn find(
        &self,
        filter: &NotificationFilter,
        order: NotificationOrder,
    ) -> Result<Vec<Notification>, AppError> {
        let mut qb = select_notifications(filter, order);
        let rows = qb
            .build_query_as::<Notification>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_first(
        &self,
        filter: &NotificationFilter,
        order: NotificationOrder,
    ) -> Result<Option<Notification>, AppError> {
        let mut qb = select_notifications(filter, order);
        qb.push(" LIMIT 1");
        let row = qb
            .build_query_as::<Notification>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count(&self, filter: &NotificationFilter) -> Result<i64, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM notifications");
        push_filter(&mut qb, filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn delete(&self, filter: &NotificationFilter) -> Result<u64, AppError> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM notifications");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn touch(&self, id: i64, at: i64) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE notifications SET updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_assignee(
        &self,
        id: i64,
        expected: &str,
        assignee: &str,
        at: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET assigned_user = ?, updated_at = ? WHERE id = ? AND assigned_user = ?",
        )
        .bind(assignee)
        .bind(at)
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_hook(&self, project_id: i64) -> Result<Option<HookRecord>, AppError> {
        let hook = sqlx::query_as::<_, HookRecord>(
            "SELECT id, project_id, project_name, skipped, created_at FROM hooks WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hook)
    }

    async fn insert_hook(&self, new: &NewHookRecord, at: i64) -> Result<HookRecord, AppError> {
        let hook = sqlx::query_as::<_, HookRecord>(
            r#"
            INSERT INTO hooks (project_id, project_name, skipped, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, project_id, project_name, skipped, created_at
            "#,
        )
        .bind(new.project_id)
        .bind(&new.project_name)
        .bind(new.skipped)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(hook)
    }

    async fn mark_hook_registered(&self, project_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE hooks SET skipped = 0 WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

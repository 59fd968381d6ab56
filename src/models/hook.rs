//! Project webhook registration record.

use serde::Serialize;
use sqlx::FromRow;

/// Outcome of registering the relay's webhook on a GitLab project.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HookRecord {
    pub id: i64,

    /// GitLab project ID.
    pub project_id: i64,

    /// Full namespaced name (e.g., "Acme / Widgets").
    pub project_name: String,

    /// GitLab refused the registration with 403.
    pub skipped: bool,

    /// Unix seconds.
    pub created_at: i64,
}

/// Input for a new hook record.
#[derive(Debug, Clone)]
pub struct NewHookRecord {
    pub project_id: i64,
    pub project_name: String,
    pub skipped: bool,
}

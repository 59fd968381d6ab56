//! Data models for the notification queue.
//!
//! These models represent the entities stored in the local SQLite database.
//! All persisted models derive FromRow for SQLx queries.

pub mod hook;
pub mod notification;

// Re-exports for convenient access
pub use hook::{HookRecord, NewHookRecord};
pub use notification::{
    IdentityKey, NewNotification, Notification, NotificationFilter, NotificationKind,
    NotificationOrder, ProjectRef, ProjectScope,
};

/// Current Unix timestamp in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

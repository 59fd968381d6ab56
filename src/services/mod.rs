//! Business logic services.
//!
//! This module contains the relay's core logic: talking to GitLab, turning
//! webhook events into queue changes, assigning queued items, and the
//! background reminder and hook provisioning loops.
//!
//! Services depend on the `Forge` and `NotificationStore` traits only, so
//! they are testable without a GitLab instance.

pub mod assignment;
pub mod chat;
pub mod gitlab_client;
pub mod hooks;
pub mod ingest;
pub mod listing;
pub mod notifier;
pub mod permissions;
pub mod reminders;
pub mod webhook_events;

pub use assignment::{AssignOutcome, AssignmentEngine, Selector};
pub use chat::{ChatDelivery, ChatMessage, ChatOutbox};
pub use gitlab_client::{Forge, GitLabClient};
pub use hooks::HookProvisioner;
pub use ingest::{EventIngestor, IngestOutcome};
pub use notifier::Notifier;
pub use permissions::{PermissionResolver, UserAliases};
pub use reminders::{PresenceEvent, ReminderScheduler};

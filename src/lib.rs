//! gitlab-relay - GitLab to chat notification relay.
//!
//! Receives GitLab webhooks, keeps a queue of open merge requests and issues,
//! reminds maintainers about unassigned items and lets them assign items from
//! chat after checking their GitLab access level.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod runtime;
pub mod server;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

//! Chat command handlers.
//!
//! A chat bridge posts every message addressed to the relay here. Commands
//! are organized by functionality:
//! - `assign ...`: claim the latest item of the channel
//! - `merge-request ...` / `issue ...`: list, view and assign queued items
//!
//! Every command answers with plain text; failures are rendered into the
//! reply rather than returned.

pub mod grammar;

use crate::config::NotifyConfig;
use crate::db::NotificationStore;
use crate::error::AppError;
use crate::models::{NotificationFilter, NotificationKind, NotificationOrder};
use crate::services::assignment::{AssignError, AssignOutcome, AssignmentEngine, Selector};
use crate::services::listing::render_queue;
use clap::Parser;
use grammar::{tokenize, AssignTarget, ChatCommand, QueueAction, TopCommand};
use serde::Deserialize;
use std::sync::Arc;

const NOTHING_TO_ASSIGN: &str = "Sorry there is no issues or merge request opened";
const MISSING_USER: &str = "I can't assign someone to the last merge request, no user name was given (it can be 'me' or other user name).";
const INCORRECT_ID: &str = "You gave me an incorrect id.";

/// Who sent a command, and where.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEnvelope {
    /// Chat handle of the sender.
    pub user: String,
    /// Channel the command was typed in.
    pub channel: String,
}

/// Parses chat messages and runs them against the queue.
pub struct CommandHandler {
    store: Arc<dyn NotificationStore>,
    engine: Arc<AssignmentEngine>,
    notify: NotifyConfig,
}

fn missing_id(kind: NotificationKind) -> String {
    format!(
        "I need the id retrieve from list to be able to show you the content of the {}.",
        kind.label()
    )
}

fn parse_id(raw: Option<&str>, kind: NotificationKind) -> Result<i64, String> {
    let raw = raw.ok_or_else(|| missing_id(kind))?;
    raw.parse::<i64>().map_err(|_| INCORRECT_ID.to_string())
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        engine: Arc<AssignmentEngine>,
        notify: NotifyConfig,
    ) -> Self {
        Self {
            store,
            engine,
            notify,
        }
    }

    /// Run `message` on behalf of `envelope` and return the reply text.
    pub async fn handle(&self, envelope: &ChatEnvelope, message: &str) -> String {
        let command = match ChatCommand::try_parse_from(tokenize(message)) {
            Ok(command) => command,
            // Covers `help` as well as usage errors.
            Err(e) => return e.render().to_string(),
        };

        let kind = command.command.queue_kind();
        let reply = match command.command {
            TopCommand::Assign { target } => self.assign_latest(envelope, target).await,
            TopCommand::MergeRequest { action } | TopCommand::Issue { action } => {
                // queue_kind is always set for these two.
                let kind = kind.unwrap_or(NotificationKind::Issue);
                self.queue_action(envelope, kind, action).await
            }
        };

        reply.unwrap_or_else(|e| {
            log::error!("[commands] '{}' from {} failed: {}", message, envelope.user, e);
            format!("Sorry, something went wrong: {}", e)
        })
    }

    async fn assign_latest(
        &self,
        envelope: &ChatEnvelope,
        target: AssignTarget,
    ) -> Result<String, AppError> {
        let (user, kind) = match target {
            AssignTarget::Me => (Some("me".to_string()), None),
            AssignTarget::Last { user } => (user, None),
            AssignTarget::MergeRequest { user } => (user, Some(NotificationKind::MergeRequest)),
            AssignTarget::Issue { user } => (user, Some(NotificationKind::Issue)),
        };
        let Some(user) = user else {
            return Ok(MISSING_USER.to_string());
        };

        let selector = Selector::Latest {
            channel: envelope.channel.clone(),
            kind,
        };
        Ok(self.run_assign(envelope, &user, &selector).await)
    }

    async fn queue_action(
        &self,
        envelope: &ChatEnvelope,
        kind: NotificationKind,
        action: QueueAction,
    ) -> Result<String, AppError> {
        match action {
            QueueAction::List => {
                let queued = self
                    .store
                    .find(&NotificationFilter::by_kind(kind), NotificationOrder::ProjectAsc)
                    .await?;
                Ok(render_queue(&queued, Some(kind), true, &self.notify))
            }
            QueueAction::See { id } => {
                let id = match parse_id(id.as_deref(), kind) {
                    Ok(id) => id,
                    Err(reply) => return Ok(reply),
                };
                let found = self
                    .store
                    .find_first(
                        &NotificationFilter::by_id(id).with_kind(Some(kind)),
                        NotificationOrder::CreatedDesc,
                    )
                    .await?;
                Ok(match found {
                    Some(notification) => notification.message,
                    None => format!("I can't found this {}.", kind.label()),
                })
            }
            QueueAction::Assign { user, id } => {
                let Some(user) = user else {
                    return Ok(MISSING_USER.to_string());
                };
                let id = match parse_id(id.as_deref(), kind) {
                    Ok(id) => id,
                    Err(reply) => return Ok(reply),
                };
                let selector = Selector::ById { kind, id };
                Ok(self.run_assign(envelope, &user, &selector).await)
            }
        }
    }

    async fn run_assign(&self, envelope: &ChatEnvelope, user: &str, selector: &Selector) -> String {
        match self.engine.assign(&envelope.user, user, selector).await {
            Ok(AssignOutcome::NothingToAssign) => NOTHING_TO_ASSIGN.to_string(),
            Ok(AssignOutcome::Assigned { message, .. }) => message,
            Err(e) => {
                if e.error.is_permission_denied() {
                    log::info!("[commands] Refused to assign {}: not a maintainer", user);
                } else {
                    log::warn!("[commands] Assignment for {} failed: {}", envelope.user, e);
                }
                render_assign_error(envelope, user, &e)
            }
        }
    }
}

fn render_assign_error(envelope: &ChatEnvelope, user: &str, e: &AssignError) -> String {
    let who = if user == "me" {
        envelope.user.as_str()
    } else {
        user.trim_start_matches('@')
    };
    match e.target {
        Some((kind, id)) => format!(
            "Sorry I can't assign {} to {} with id {}, I had this error: {}",
            who,
            kind.label(),
            id,
            e.error
        ),
        None => format!("Sorry I can't assign {}, I had this error: {}", who, e.error),
    }
}

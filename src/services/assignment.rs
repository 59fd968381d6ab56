//! Assigning queued items to people.
//!
//! An assignment picks a queued notification, checks that the target user is
//! at least maintainer on its project (or group), assigns the item on GitLab
//! and finally records the assignee locally. Local state only changes after
//! GitLab accepted the update.

use crate::db::NotificationStore;
use crate::error::AppError;
use crate::models::{
    unix_now, Notification, NotificationFilter, NotificationKind, NotificationOrder,
};
use crate::services::gitlab_client::{Forge, IssueUpdate, MergeRequestUpdate};
use crate::services::permissions::{authorize, PermissionResolver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Which queued notification an assignment targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A queued item by its queue id, as shown in listings.
    ById { kind: NotificationKind, id: i64 },
    /// Most recently created notification on a channel, optionally of one kind.
    Latest {
        channel: String,
        kind: Option<NotificationKind>,
    },
}

impl Selector {
    fn filter(&self) -> NotificationFilter {
        match self {
            Self::ById { kind, id } => NotificationFilter::by_id(*id).with_kind(Some(*kind)),
            Self::Latest { channel, kind } => NotificationFilter::all()
                .with_channel(channel.clone())
                .with_kind(*kind),
        }
    }
}

/// Result of an assignment that did not fail.
#[derive(Debug, Clone)]
pub enum AssignOutcome {
    /// No queued notification matched the selector.
    NothingToAssign,
    Assigned {
        notification: Notification,
        assignee: String,
        /// Confirmation for the chat.
        message: String,
    },
}

/// A failed assignment.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AssignError {
    /// Kind and queue id of the targeted item, once one was picked.
    pub target: Option<(NotificationKind, i64)>,
    pub error: AppError,
}

impl From<AppError> for AssignError {
    fn from(error: AppError) -> Self {
        Self {
            target: None,
            error,
        }
    }
}

/// Per-notification async locks.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody holds or waits on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id).or_default().clone()
    }
}

/// Resolve the raw assignee token of a chat command to a chat handle.
///
/// `me` is the caller; a leading `@` is ignored.
pub fn resolve_assignee(caller: &str, requested: &str) -> Result<String, AppError> {
    let requested = requested.trim();
    let handle = if requested == "me" {
        caller
    } else {
        requested.trim_start_matches('@')
    };
    if handle.is_empty() {
        return Err(AppError::invalid_input(
            "no user name was given (it can be 'me' or other user name)",
        ));
    }
    Ok(handle.to_string())
}

pub struct AssignmentEngine {
    store: Arc<dyn NotificationStore>,
    forge: Arc<dyn Forge>,
    resolver: Arc<PermissionResolver>,
    locks: KeyedLocks,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        forge: Arc<dyn Forge>,
        resolver: Arc<PermissionResolver>,
    ) -> Self {
        Self {
            store,
            forge,
            resolver,
            locks: KeyedLocks::default(),
        }
    }

    /// Assign the notification picked by `selector` to `requested`.
    ///
    /// `caller` is the chat handle of whoever issued the command.
    pub async fn assign(
        &self,
        caller: &str,
        requested: &str,
        selector: &Selector,
    ) -> Result<AssignOutcome, AssignError> {
        let assignee = resolve_assignee(caller, requested)?;

        let Some(target) = self
            .store
            .find_first(&selector.filter(), NotificationOrder::CreatedDesc)
            .await?
        else {
            return Ok(AssignOutcome::NothingToAssign);
        };

        let lock = self.locks.lock_for(target.id);
        let _guard = lock.lock().await;

        self.assign_locked(&target, assignee)
            .await
            .map_err(|error| AssignError {
                target: Some((target.kind, target.id)),
                error,
            })
    }

    async fn assign_locked(
        &self,
        target: &Notification,
        assignee: String,
    ) -> Result<AssignOutcome, AppError> {
        // Re-read under the lock; a concurrent assignment may have finished.
        let current = self
            .store
            .find_first(&NotificationFilter::by_id(target.id), NotificationOrder::CreatedDesc)
            .await?
            .ok_or_else(|| AppError::conflict("it left the queue while assigning"))?;

        if !current.kind.is_queued() {
            return Err(AppError::invalid_input(format!(
                "a {} cannot be assigned",
                current.kind.label()
            )));
        }

        let forge_username = self.resolver.forge_identity(&assignee);
        let user = self
            .forge
            .find_user(&forge_username)
            .await?
            .ok_or_else(|| {
                AppError::not_found_with_id(format!("User {}", forge_username), &forge_username)
            })?;

        let level = self
            .resolver
            .access_level(&current.scope, user.id)
            .await
            .map_err(|e| {
                log::debug!(
                    "[assign] Access level of {} on {} unknown: {}",
                    forge_username,
                    current.scope.path(),
                    e
                );
                AppError::permission_denied()
            })?;
        authorize(level)?;

        self.update_remote(&current, user.id).await?;

        let swapped = self
            .store
            .compare_and_set_assignee(current.id, &current.assigned_user, &assignee, unix_now())
            .await?;
        if !swapped {
            return Err(AppError::conflict("it changed while assigning"));
        }

        log::info!(
            "[assign] {} {} of {} assigned to {}",
            current.kind.label(),
            current.object_id,
            current.scope.path(),
            assignee
        );

        let message = format!(
            "@{} have been assigned to the {} with id {} available here: {}",
            assignee,
            current.kind.label(),
            current.id,
            current.web_url
        );
        let mut notification = current;
        notification.assigned_user = assignee.clone();

        Ok(AssignOutcome::Assigned {
            notification,
            assignee,
            message,
        })
    }

    async fn update_remote(&self, target: &Notification, user_id: i64) -> Result<(), AppError> {
        let project = target.scope.project_ref();
        match target.kind {
            NotificationKind::Issue => {
                let update = IssueUpdate {
                    assignee_ids: vec![user_id],
                };
                self.forge
                    .update_issue(&project, target.object_id, &update)
                    .await
            }
            NotificationKind::MergeRequest => {
                // Send the current fields back so GitLab does not blank them.
                let mr = self
                    .forge
                    .get_merge_request(&project, target.object_id)
                    .await?;
                let update = MergeRequestUpdate {
                    assignee_id: user_id,
                    title: mr.title,
                    description: mr.description.unwrap_or_default(),
                    target_branch: mr.target_branch,
                };
                self.forge
                    .update_merge_request(&project, target.object_id, &update)
                    .await
            }
            NotificationKind::Build | NotificationKind::Pipeline => Ok(()),
        }
    }
}

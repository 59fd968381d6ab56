//! Permission resolution against GitLab's membership model.
//!
//! Two tiers are consulted: the project's own members, then the members of the
//! owning group. Maintainer access on either is enough to receive
//! notifications and to be assigned.

use crate::error::AppError;
use crate::models::ProjectScope;
use crate::services::gitlab_client::{Forge, GitLabMember};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// GitLab's maintainer access level.
pub const MAINTAINER_ACCESS: i64 = 40;

/// Bidirectional GitLab username <-> chat handle map.
///
/// Names without an alias are the same on both sides.
#[derive(Debug, Clone, Default)]
pub struct UserAliases {
    to_chat: HashMap<String, String>,
    to_forge: HashMap<String, String>,
}

impl UserAliases {
    /// Build from a GitLab username -> chat handle map.
    pub fn new(forge_to_chat: &HashMap<String, String>) -> Self {
        let to_forge = forge_to_chat
            .iter()
            .map(|(forge, chat)| (chat.clone(), forge.clone()))
            .collect();
        Self {
            to_chat: forge_to_chat.clone(),
            to_forge,
        }
    }

    /// Chat handle for a GitLab username.
    pub fn chat_alias(&self, forge_username: &str) -> String {
        self.to_chat
            .get(forge_username)
            .cloned()
            .unwrap_or_else(|| forge_username.to_string())
    }

    /// GitLab username for a chat handle.
    pub fn forge_identity(&self, chat_handle: &str) -> String {
        self.to_forge
            .get(chat_handle)
            .cloned()
            .unwrap_or_else(|| chat_handle.to_string())
    }
}

/// Succeeds iff `level` is at least maintainer.
pub fn authorize(level: i64) -> Result<(), AppError> {
    if level >= MAINTAINER_ACCESS {
        Ok(())
    } else {
        Err(AppError::permission_denied())
    }
}

/// Computes who may see and act on a notification.
pub struct PermissionResolver {
    forge: Arc<dyn Forge>,
    aliases: UserAliases,
}

impl PermissionResolver {
    pub fn new(forge: Arc<dyn Forge>, aliases: UserAliases) -> Self {
        Self { forge, aliases }
    }

    pub fn chat_alias(&self, forge_username: &str) -> String {
        self.aliases.chat_alias(forge_username)
    }

    pub fn forge_identity(&self, chat_handle: &str) -> String {
        self.aliases.forge_identity(chat_handle)
    }

    /// Chat handles of every maintainer of the project or its group.
    ///
    /// A failing project lookup is an error; a failing group lookup only
    /// narrows the result to project maintainers.
    pub async fn candidate_set(&self, scope: &ProjectScope) -> Result<BTreeSet<String>, AppError> {
        let project = scope.project_ref();
        let project_lookup = self.forge.list_project_members(&project);
        let group_lookup = async {
            match scope.group() {
                Some(group) => self.forge.list_group_members(group).await,
                None => Ok(Vec::new()),
            }
        };

        let (project_members, group_members) = futures::join!(project_lookup, group_lookup);
        let mut handles = self.maintainer_handles(&project_members?);

        match group_members {
            Ok(members) => handles.extend(self.maintainer_handles(&members)),
            Err(e) => log::debug!(
                "[permissions] Group lookup for {} failed, using project members only: {}",
                scope.path(),
                e
            ),
        }

        Ok(handles)
    }

    fn maintainer_handles(&self, members: &[GitLabMember]) -> BTreeSet<String> {
        members
            .iter()
            .filter(|m| m.access_level >= MAINTAINER_ACCESS)
            .map(|m| self.chat_alias(&m.username))
            .collect()
    }

    /// Access level of `user_id` on the project, falling back to its group.
    ///
    /// Returns the group error when neither lookup yields a membership.
    pub async fn access_level(&self, scope: &ProjectScope, user_id: i64) -> Result<i64, AppError> {
        let project_err = match self
            .forge
            .get_project_member(&scope.project_ref(), user_id)
            .await
        {
            Ok(member) if member.id != 0 => return Ok(member.access_level),
            Ok(_) => AppError::not_found("Project membership"),
            Err(e) => e,
        };

        let Some(group) = scope.group() else {
            return Err(project_err);
        };

        let member = self.forge.get_group_member(group, user_id).await?;
        Ok(member.access_level)
    }
}

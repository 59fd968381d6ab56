//! Notification queue model.
//!
//! A notification is identified by its natural key: the owning project, the
//! kind of object and the object's project-scoped number. Only open items are
//! stored; closing an item upstream deletes its row.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of GitLab object a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    MergeRequest,
    Issue,
    Build,
    Pipeline,
}

impl NotificationKind {
    /// Parse a webhook `object_kind` value.
    pub fn from_object_kind(kind: &str) -> Option<Self> {
        match kind {
            "merge_request" => Some(Self::MergeRequest),
            "issue" => Some(Self::Issue),
            "build" => Some(Self::Build),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }

    /// Wire name, as used in webhook payloads and the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergeRequest => "merge_request",
            Self::Issue => "issue",
            Self::Build => "build",
            Self::Pipeline => "pipeline",
        }
    }

    /// Human-readable name ("merge request").
    pub fn label(&self) -> &'static str {
        match self {
            Self::MergeRequest => "merge request",
            Self::Issue => "issue",
            Self::Build => "build",
            Self::Pipeline => "pipeline",
        }
    }

    /// Chat command name ("merge-request").
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::MergeRequest => "merge-request",
            Self::Issue => "issue",
            Self::Build => "build",
            Self::Pipeline => "pipeline",
        }
    }

    /// Whether notifications of this kind are queued and assignable.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::MergeRequest | Self::Issue)
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a project is addressed on the GitLab REST API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectRef {
    Id(i64),
    /// `group/project`, URL-encoded when rendered.
    Path(String),
}

impl std::fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Path(path) => f.write_str(&urlencoding::encode(path)),
        }
    }
}

/// Owning project of a notification.
///
/// `project_id` is 0 when the event did not carry one; the project is then
/// identified by its group and project names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct ProjectScope {
    pub project_id: i64,
    pub group_name: String,
    pub project_name: String,
}

impl ProjectScope {
    /// Build a scope from `group/subgroup/project`.
    pub fn from_path(project_id: i64, path_with_namespace: &str) -> Self {
        let (group, project) = match path_with_namespace.rsplit_once('/') {
            Some((group, project)) => (group, project),
            None => ("", path_with_namespace),
        };
        Self {
            project_id,
            group_name: group.to_string(),
            project_name: project.to_string(),
        }
    }

    /// `group/project`, or just the project name when there is no group.
    pub fn path(&self) -> String {
        if self.group_name.is_empty() {
            self.project_name.clone()
        } else {
            format!("{}/{}", self.group_name, self.project_name)
        }
    }

    pub fn project_ref(&self) -> ProjectRef {
        if self.project_id != 0 {
            ProjectRef::Id(self.project_id)
        } else {
            ProjectRef::Path(self.path())
        }
    }

    /// Owning group path, if known.
    pub fn group(&self) -> Option<&str> {
        if self.group_name.is_empty() {
            None
        } else {
            Some(&self.group_name)
        }
    }
}

/// Natural identity of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub scope: ProjectScope,
    pub kind: NotificationKind,
    pub object_id: i64,
}

/// A queued notification.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notification {
    /// Local row ID (ordering and updates only).
    pub id: i64,

    #[sqlx(flatten)]
    pub scope: ProjectScope,

    pub kind: NotificationKind,

    /// Project-scoped object number (`iid`).
    pub object_id: i64,

    /// Message broadcast to chat.
    pub message: String,

    /// Chat channel the notification belongs to.
    pub channel: String,

    /// Link to the merge request or issue.
    pub web_url: String,

    /// Link to the project.
    pub project_url: String,

    /// Chat handle of the assignee, empty when unassigned.
    pub assigned_user: String,

    /// Unix seconds.
    pub created_at: i64,

    /// Unix seconds, bumped by reminders and assignment.
    pub updated_at: i64,
}

impl Notification {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            scope: self.scope.clone(),
            kind: self.kind,
            object_id: self.object_id,
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.assigned_user.is_empty()
    }
}

/// Input for a new notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub scope: ProjectScope,
    pub kind: NotificationKind,
    pub object_id: i64,
    pub message: String,
    pub channel: String,
    pub web_url: String,
    pub project_url: String,
}

impl NewNotification {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            scope: self.scope.clone(),
            kind: self.kind,
            object_id: self.object_id,
        }
    }
}

/// Field-equality filter over notifications. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub id: Option<i64>,
    pub identity: Option<IdentityKey>,
    pub kind: Option<NotificationKind>,
    pub channel: Option<String>,
    pub assigned_user: Option<String>,
}

impl NotificationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_identity(key: IdentityKey) -> Self {
        Self {
            identity: Some(key),
            ..Self::default()
        }
    }

    pub fn by_kind(kind: NotificationKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn assigned_to(user: impl Into<String>) -> Self {
        Self {
            assigned_user: Some(user.into()),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_kind(mut self, kind: Option<NotificationKind>) -> Self {
        self.kind = kind;
        self
    }
}

/// Result ordering for notification queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOrder {
    /// Most recently created first.
    CreatedDesc,
    /// Most recently updated first.
    UpdatedDesc,
    /// Grouped by project, oldest first within a project.
    ProjectAsc,
}

impl NotificationOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::CreatedDesc => " ORDER BY created_at DESC, id DESC",
            Self::UpdatedDesc => " ORDER BY updated_at DESC, id DESC",
            Self::ProjectAsc => " ORDER BY group_name ASC, project_name ASC, project_id ASC, id ASC",
        }
    }
}

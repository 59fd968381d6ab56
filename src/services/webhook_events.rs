//! GitLab webhook payloads.
//!
//! Only the fields the relay reads are modelled; everything else in the
//! payload is ignored. Missing optional fields default so that older GitLab
//! versions (which omit `assignees`, `project` on build events, ...) decode.

use serde::Deserialize;

/// Discriminant shared by every event payload.
#[derive(Debug, Deserialize)]
pub struct EventHeader {
    pub object_kind: String,
}

/// State of an issue or merge request after the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    Opened,
    Closed,
    Merged,
    Other(String),
}

impl From<&str> for ObjectState {
    fn from(s: &str) -> Self {
        match s {
            "opened" => Self::Opened,
            "closed" => Self::Closed,
            "merged" => Self::Merged,
            other => Self::Other(other.to_string()),
        }
    }
}

impl ObjectState {
    /// Closed or merged: the item leaves the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Merged)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventUser {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventProject {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub homepage: String,
}

impl EventProject {
    /// Project page, whichever field this GitLab version fills in.
    pub fn url(&self) -> &str {
        if self.web_url.is_empty() {
            &self.homepage
        } else {
            &self.web_url
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueAttributes {
    pub iid: i64,
    #[serde(default)]
    pub project_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueEvent {
    #[serde(default)]
    pub user: EventUser,
    #[serde(default)]
    pub project: EventProject,
    pub object_attributes: IssueAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeRequestTarget {
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestAttributes {
    pub iid: i64,
    #[serde(default)]
    pub target_project_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub target: MergeRequestTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestEvent {
    #[serde(default)]
    pub user: EventUser,
    #[serde(default)]
    pub project: EventProject,
    pub object_attributes: MergeRequestAttributes,
    #[serde(default)]
    pub assignee: Option<EventUser>,
    #[serde(default)]
    pub assignees: Option<Vec<EventUser>>,
}

impl MergeRequestEvent {
    /// Whether someone already took the merge request upstream.
    pub fn has_assignee(&self) -> bool {
        let legacy = self
            .assignee
            .as_ref()
            .is_some_and(|a| !a.username.is_empty());
        let by_id = self.object_attributes.assignee_id.is_some_and(|id| id != 0);
        let listed = self.assignees.as_ref().is_some_and(|a| !a.is_empty());
        legacy || by_id || listed
    }

    /// `group/project` of the target project.
    pub fn target_path(&self) -> &str {
        if self.object_attributes.target.path_with_namespace.is_empty() {
            &self.project.path_with_namespace
        } else {
            &self.object_attributes.target.path_with_namespace
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildRepository {
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub git_http_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildEvent {
    #[serde(default)]
    pub build_id: i64,
    #[serde(default)]
    pub build_status: String,
    #[serde(default)]
    pub project_id: i64,
    /// "Group / Project" display name.
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project: Option<EventProject>,
    #[serde(default)]
    pub repository: BuildRepository,
}

impl BuildEvent {
    /// `group/project`, falling back to the display name with its spacing removed.
    pub fn path(&self) -> String {
        if let Some(project) = self.project.as_ref() {
            if !project.path_with_namespace.is_empty() {
                return project.path_with_namespace.clone();
            }
        }
        if !self.repository.path_with_namespace.is_empty() {
            return self.repository.path_with_namespace.clone();
        }
        self.project_name.replace(" / ", "/")
    }

    pub fn repository_url(&self) -> &str {
        if self.repository.homepage.is_empty() {
            &self.repository.git_http_url
        } else {
            &self.repository.homepage
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineAttributes {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineEvent {
    pub object_attributes: PipelineAttributes,
    #[serde(default)]
    pub project: EventProject,
}

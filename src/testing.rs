//! In-memory GitLab and fixtures for tests.
//!
//! Used by unit tests and by the integration tests under `tests/`. Only
//! compiled for tests or with the `testing` feature.

use crate::config::Config;
use crate::db::{self, SqliteStore};
use crate::error::AppError;
use crate::models::ProjectRef;
use crate::runtime::{AppContext, Services};
use crate::services::chat::{ChatMessage, ChatOutbox};
use crate::services::gitlab_client::{
    Forge, GitLabMember, GitLabMergeRequest, GitLabProject, GitLabUser, IssueUpdate,
    MergeRequestUpdate, ProjectHookOptions,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

/// A mutating call received by [`FakeForge`].
#[derive(Debug, Clone, PartialEq)]
pub enum ForgeCall {
    UpdateIssue {
        project: String,
        iid: i64,
        update: IssueUpdate,
    },
    UpdateMergeRequest {
        project: String,
        iid: i64,
        update: MergeRequestUpdate,
    },
    AddHook {
        project_id: i64,
        hook: ProjectHookOptions,
    },
}

/// How [`FakeForge`] answers a hook registration.
#[derive(Debug, Clone)]
pub enum HookResponse {
    Created,
    Forbidden,
    Fail(String),
}

#[derive(Default)]
struct FakeState {
    projects: Vec<GitLabProject>,
    project_members: HashMap<String, Vec<GitLabMember>>,
    group_members: HashMap<String, Vec<GitLabMember>>,
    users: Vec<GitLabUser>,
    merge_requests: HashMap<(String, i64), GitLabMergeRequest>,
    hook_responses: HashMap<i64, HookResponse>,
    update_error: Option<String>,
    calls: Vec<ForgeCall>,
}

/// GitLab stand-in that serves canned data and records mutations.
#[derive(Default)]
pub struct FakeForge {
    state: Mutex<FakeState>,
}

fn not_found(endpoint: String) -> AppError {
    AppError::gitlab_api_full("404 Not found", 404, endpoint)
}

impl FakeForge {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_project(&self, id: i64, path_with_namespace: &str) {
        let name = path_with_namespace
            .rsplit('/')
            .next()
            .unwrap_or(path_with_namespace)
            .to_string();
        self.state().projects.push(GitLabProject {
            id,
            name,
            name_with_namespace: path_with_namespace.replace('/', " / "),
            path_with_namespace: path_with_namespace.to_string(),
            web_url: format!("https://gitlab.example.com/{}", path_with_namespace),
        });
    }

    pub fn add_project_member(&self, project: &ProjectRef, members: Vec<GitLabMember>) {
        self.state()
            .project_members
            .entry(project.to_string())
            .or_default()
            .extend(members);
    }

    pub fn add_group_member(&self, group: &str, members: Vec<GitLabMember>) {
        self.state()
            .group_members
            .entry(group.to_string())
            .or_default()
            .extend(members);
    }

    pub fn add_user(&self, id: i64, username: &str) {
        self.state().users.push(GitLabUser {
            id,
            username: username.to_string(),
            name: username.to_string(),
        });
    }

    pub fn add_merge_request(&self, project: &ProjectRef, mr: GitLabMergeRequest) {
        self.state()
            .merge_requests
            .insert((project.to_string(), mr.iid), mr);
    }

    pub fn set_hook_response(&self, project_id: i64, response: HookResponse) {
        self.state().hook_responses.insert(project_id, response);
    }

    /// Make every issue/merge request update fail with `message`.
    pub fn fail_updates(&self, message: &str) {
        self.state().update_error = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<ForgeCall> {
        self.state().calls.clone()
    }

    /// Number of issue and merge request updates received.
    pub fn update_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| !matches!(c, ForgeCall::AddHook { .. }))
            .count()
    }
}

#[async_trait]
impl Forge for FakeForge {
    async fn list_projects(&self, per_page: u32) -> Result<Vec<GitLabProject>, AppError> {
        Ok(self
            .state()
            .projects
            .iter()
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn list_project_members(
        &self,
        project: &ProjectRef,
    ) -> Result<Vec<GitLabMember>, AppError> {
        self.state()
            .project_members
            .get(&project.to_string())
            .cloned()
            .ok_or_else(|| not_found(format!("/projects/{}/members", project)))
    }

    async fn list_group_members(&self, group: &str) -> Result<Vec<GitLabMember>, AppError> {
        self.state()
            .group_members
            .get(group)
            .cloned()
            .ok_or_else(|| not_found(format!("/groups/{}/members", group)))
    }

    async fn get_project_member(
        &self,
        project: &ProjectRef,
        user_id: i64,
    ) -> Result<GitLabMember, AppError> {
        self.state()
            .project_members
            .get(&project.to_string())
            .and_then(|members| members.iter().find(|m| m.id == user_id).cloned())
            .ok_or_else(|| not_found(format!("/projects/{}/members/{}", project, user_id)))
    }

    async fn get_group_member(&self, group: &str, user_id: i64) -> Result<GitLabMember, AppError> {
        self.state()
            .group_members
            .get(group)
            .and_then(|members| members.iter().find(|m| m.id == user_id).cloned())
            .ok_or_else(|| not_found(format!("/groups/{}/members/{}", group, user_id)))
    }

    async fn find_user(&self, username: &str) -> Result<Option<GitLabUser>, AppError> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, AppError> {
        self.state()
            .merge_requests
            .get(&(project.to_string(), mr_iid))
            .cloned()
            .ok_or_else(|| not_found(format!("/projects/{}/merge_requests/{}", project, mr_iid)))
    }

    async fn update_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
        update: &MergeRequestUpdate,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        state.calls.push(ForgeCall::UpdateMergeRequest {
            project: project.to_string(),
            iid: mr_iid,
            update: update.clone(),
        });
        match &state.update_error {
            Some(message) => Err(AppError::gitlab_api(message.clone())),
            None => Ok(()),
        }
    }

    async fn update_issue(
        &self,
        project: &ProjectRef,
        issue_iid: i64,
        update: &IssueUpdate,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        state.calls.push(ForgeCall::UpdateIssue {
            project: project.to_string(),
            iid: issue_iid,
            update: update.clone(),
        });
        match &state.update_error {
            Some(message) => Err(AppError::gitlab_api(message.clone())),
            None => Ok(()),
        }
    }

    async fn add_project_hook(
        &self,
        project_id: i64,
        hook: &ProjectHookOptions,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        state.calls.push(ForgeCall::AddHook {
            project_id,
            hook: hook.clone(),
        });
        let endpoint = format!("/projects/{}/hooks", project_id);
        match state.hook_responses.get(&project_id) {
            None | Some(HookResponse::Created) => Ok(()),
            Some(HookResponse::Forbidden) => {
                Err(AppError::gitlab_api_full("403 Forbidden", 403, endpoint))
            }
            Some(HookResponse::Fail(message)) => {
                Err(AppError::gitlab_api_full(message.clone(), 500, endpoint))
            }
        }
    }
}

/// Valid configuration pointing at nothing in particular.
pub fn test_config() -> Config {
    Config::from_toml_str(
        r#"
        public_url = "https://relay.example.com"

        [gitlab]
        base_url = "https://gitlab.example.com"
        token = "test-token"

        [notify]
        channel = "dev"
        excluded_repos = ["acme/legacy"]
        "#,
    )
    .unwrap_or_default()
}

/// Open a migrated store at `db_path`.
pub async fn open_store(db_path: &Path) -> Result<SqliteStore, AppError> {
    let pool = db::initialize(db_path).await?;
    Ok(SqliteStore::new(pool))
}

/// Fully wired services over a [`FakeForge`] and a real SQLite store.
pub struct Harness {
    pub forge: Arc<FakeForge>,
    pub store: Arc<SqliteStore>,
    pub ctx: AppContext,
    pub services: Services,
    pub chat_rx: UnboundedReceiver<ChatMessage>,
}

impl Harness {
    pub async fn new(db_path: &Path, config: Config) -> Result<Self, AppError> {
        let forge = Arc::new(FakeForge::new());
        let store = Arc::new(open_store(db_path).await?);
        let (outbox, chat_rx) = ChatOutbox::new();
        let ctx = AppContext::new(config, forge.clone(), store.clone(), outbox);
        let services = ctx.build_services();
        Ok(Self {
            forge,
            store,
            ctx,
            services,
            chat_rx,
        })
    }

    /// Chat messages sent so far.
    pub fn sent(&mut self) -> Vec<ChatMessage> {
        let mut sent = Vec::new();
        while let Ok(message) = self.chat_rx.try_recv() {
            sent.push(message);
        }
        sent
    }
}

//! GitLab API client.
//!
//! Provides the [`Forge`] trait the relay's components talk to, and
//! [`GitLabClient`], its HTTP implementation against GitLab API v4.

use crate::error::AppError;
use crate::models::ProjectRef;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates from the instance.
    pub accept_invalid_certs: bool,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
            accept_invalid_certs: false,
        }
    }
}

impl From<&crate::config::GitLabConfig> for GitLabClientConfig {
    fn from(config: &crate::config::GitLabConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            timeout_secs: config.timeout_secs,
            accept_invalid_certs: config.tls_insecure_skip_verify,
        }
    }
}

/// GitLab user from API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// Project or group member from API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabMember {
    pub id: i64,
    pub username: String,
    /// GitLab access level (10 guest .. 40 maintainer, 50 owner).
    pub access_level: i64,
}

/// GitLab project from API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabProject {
    pub id: i64,
    pub name: String,
    pub name_with_namespace: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
}

/// The merge request fields an assignment must echo back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLabMergeRequest {
    pub iid: i64,
    pub title: String,
    pub description: Option<String>,
    pub target_branch: String,
    #[serde(default)]
    pub web_url: String,
}

/// Body of `PUT /projects/:id/merge_requests/:iid` when assigning.
///
/// GitLab may blank title, description or target branch on a partial update,
/// so their current values are always sent along with the assignee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRequestUpdate {
    pub assignee_id: i64,
    pub title: String,
    pub description: String,
    pub target_branch: String,
}

/// Body of `PUT /projects/:id/issues/:iid` when assigning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueUpdate {
    pub assignee_ids: Vec<i64>,
}

/// Body of `POST /projects/:id/hooks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectHookOptions {
    pub url: String,
    pub merge_requests_events: bool,
    pub issues_events: bool,
    /// Build events are called job events on the API.
    pub job_events: bool,
    pub pipeline_events: bool,
    pub enable_ssl_verification: bool,
}

impl ProjectHookOptions {
    /// Hook for every event kind the relay consumes.
    pub fn relay(url: impl Into<String>, enable_ssl_verification: bool) -> Self {
        Self {
            url: url.into(),
            merge_requests_events: true,
            issues_events: true,
            job_events: true,
            pipeline_events: true,
            enable_ssl_verification,
        }
    }
}

/// Remote operations the relay needs from GitLab.
#[async_trait]
pub trait Forge: Send + Sync {
    /// List projects visible to the token, single page.
    async fn list_projects(&self, per_page: u32) -> Result<Vec<GitLabProject>, AppError>;

    async fn list_project_members(&self, project: &ProjectRef)
        -> Result<Vec<GitLabMember>, AppError>;

    async fn list_group_members(&self, group: &str) -> Result<Vec<GitLabMember>, AppError>;

    async fn get_project_member(
        &self,
        project: &ProjectRef,
        user_id: i64,
    ) -> Result<GitLabMember, AppError>;

    async fn get_group_member(&self, group: &str, user_id: i64) -> Result<GitLabMember, AppError>;

    /// Look up a user by exact username.
    async fn find_user(&self, username: &str) -> Result<Option<GitLabUser>, AppError>;

    async fn get_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, AppError>;

    async fn update_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
        update: &MergeRequestUpdate,
    ) -> Result<(), AppError>;

    async fn update_issue(
        &self,
        project: &ProjectRef,
        issue_iid: i64,
        update: &IssueUpdate,
    ) -> Result<(), AppError>;

    async fn add_project_hook(
        &self,
        project_id: i64,
        hook: &ProjectHookOptions,
    ) -> Result<(), AppError>;
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::config("Invalid GitLab token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    /// Turn a response into `T`, or into an error carrying GitLab's message.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)));
        }

        Err(Self::error_from(response, endpoint).await)
    }

    /// Like `handle_response` but discards the body on success.
    async fn expect_success(&self, response: Response, endpoint: &str) -> Result<(), AppError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response, endpoint).await)
        }
    }

    async fn error_from(response: Response, endpoint: &str) -> AppError {
        let status = response.status();
        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();

        // GitLab returns errors as {"message": "..."} or {"error": "..."}
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message").or_else(|| v.get("error")).map(|m| match m.as_str() {
                    Some(s) => s.to_string(),
                    // Sometimes "message" is an object like {"base":["msg"]}
                    None => m.to_string(),
                })
            });

        let message = match (status, body_message) {
            (_, Some(msg)) => msg,
            (StatusCode::UNAUTHORIZED, None) => "GitLab token expired or revoked".to_string(),
            (StatusCode::FORBIDDEN, None) => "Access denied".to_string(),
            (StatusCode::NOT_FOUND, None) => "Resource not found".to_string(),
            (StatusCode::TOO_MANY_REQUESTS, None) => "Rate limit exceeded".to_string(),
            (_, None) => format!("Request failed ({}): {}", status_code, body),
        };

        AppError::gitlab_api_full(message, status_code, endpoint)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let url = self.api_url(endpoint);
        let response = self.client.get(&url).query(query).send().await?;
        self.handle_response(response, endpoint).await
    }
}

#[async_trait]
impl Forge for GitLabClient {
    async fn list_projects(&self, per_page: u32) -> Result<Vec<GitLabProject>, AppError> {
        self.get("/projects", &[("per_page", per_page.to_string())])
            .await
    }

    async fn list_project_members(
        &self,
        project: &ProjectRef,
    ) -> Result<Vec<GitLabMember>, AppError> {
        self.get(&format!("/projects/{}/members", project), &[])
            .await
    }

    async fn list_group_members(&self, group: &str) -> Result<Vec<GitLabMember>, AppError> {
        let endpoint = format!("/groups/{}/members", urlencoding::encode(group));
        self.get(&endpoint, &[]).await
    }

    async fn get_project_member(
        &self,
        project: &ProjectRef,
        user_id: i64,
    ) -> Result<GitLabMember, AppError> {
        self.get(&format!("/projects/{}/members/{}", project, user_id), &[])
            .await
    }

    async fn get_group_member(&self, group: &str, user_id: i64) -> Result<GitLabMember, AppError> {
        let endpoint = format!("/groups/{}/members/{}", urlencoding::encode(group), user_id);
        self.get(&endpoint, &[]).await
    }

    async fn find_user(&self, username: &str) -> Result<Option<GitLabUser>, AppError> {
        let users: Vec<GitLabUser> = self
            .get("/users", &[("username", username.to_string())])
            .await?;
        Ok(users.into_iter().next())
    }

    async fn get_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, AppError> {
        self.get(&format!("/projects/{}/merge_requests/{}", project, mr_iid), &[])
            .await
    }

    async fn update_merge_request(
        &self,
        project: &ProjectRef,
        mr_iid: i64,
        update: &MergeRequestUpdate,
    ) -> Result<(), AppError> {
        let endpoint = format!("/projects/{}/merge_requests/{}", project, mr_iid);
        let url = self.api_url(&endpoint);
        let response = self.client.put(&url).json(update).send().await?;
        self.expect_success(response, &endpoint).await
    }

    async fn update_issue(
        &self,
        project: &ProjectRef,
        issue_iid: i64,
        update: &IssueUpdate,
    ) -> Result<(), AppError> {
        let endpoint = format!("/projects/{}/issues/{}", project, issue_iid);
        let url = self.api_url(&endpoint);
        let response = self.client.put(&url).json(update).send().await?;
        self.expect_success(response, &endpoint).await
    }

    async fn add_project_hook(
        &self,
        project_id: i64,
        hook: &ProjectHookOptions,
    ) -> Result<(), AppError> {
        let endpoint = format!("/projects/{}/hooks", project_id);
        let url = self.api_url(&endpoint);
        let response = self.client.post(&url).json(hook).send().await?;
        self.expect_success(response, &endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GitLabClient {
        GitLabClient::new(GitLabClientConfig {
            base_url: format!("{}/", server.uri()),
            token: "test-token".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_user_sends_token_and_username() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/users"))
            .and(query_param("username", "alice"))
            .and(header("PRIVATE-TOKEN", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 12, "username": "alice", "name": "Alice"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let user = client_for(&server).find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.id, 12);
    }

    #[tokio::test]
    async fn test_find_user_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        assert!(client_for(&server).find_user("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_project_path_is_url_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/acme%2Fwidgets/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "username": "root", "access_level": 50}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let members = client_for(&server)
            .list_project_members(&ProjectRef::Path("acme/widgets".to_string()))
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].access_level, 50);
    }

    #[tokio::test]
    async fn test_update_merge_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v4/projects/9/merge_requests/7"))
            .and(body_json(serde_json::json!({
                "assignee_id": 12,
                "title": "Add widgets",
                "description": "",
                "target_branch": "main"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .update_merge_request(
                &ProjectRef::Id(9),
                7,
                &MergeRequestUpdate {
                    assignee_id: 12,
                    title: "Add widgets".to_string(),
                    description: String::new(),
                    target_branch: "main".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forbidden_hook_keeps_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/4/hooks"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({"message": "403 Forbidden"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .add_project_hook(4, &ProjectHookOptions::relay("https://relay/gitlab/webhook", true))
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(err.to_string(), "GitLab API error: 403 Forbidden");
    }

    #[tokio::test]
    async fn test_error_without_body_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/groups/acme/members/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_group_member("acme", 3)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.to_string(), "GitLab API error: Resource not found");
    }

    #[test]
    fn test_hook_options_serialization() {
        let hook = ProjectHookOptions::relay("https://r/gitlab/webhook", false);
        let json = serde_json::to_value(hook).unwrap();
        assert_eq!(json["job_events"], true);
        assert_eq!(json["enable_ssl_verification"], false);
        assert_eq!(json["url"], "https://r/gitlab/webhook");
    }
}

//! Webhook event ingestion.
//!
//! Turns GitLab events into queue changes:
//! - opened issues and unassigned merge requests are queued once and broadcast
//! - closing or merging removes the queued item
//! - failed builds and pipelines are broadcast without being stored

use crate::config::NotifyConfig;
use crate::db::NotificationStore;
use crate::error::AppError;
use crate::models::{
    unix_now, NewNotification, NotificationFilter, NotificationKind, ProjectScope,
};
use crate::services::notifier::Notifier;
use crate::services::webhook_events::{
    BuildEvent, EventHeader, IssueEvent, MergeRequestEvent, ObjectState, PipelineEvent,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// What an event did to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// `object_kind` is not one the relay handles.
    Unsupported,
    /// The body could not be decoded.
    Malformed,
    /// The project is in the exclusion list.
    Excluded,
    /// Nothing to do for this state or status.
    Ignored,
    /// The item was closed or merged; `removed` rows were deleted.
    Removed { removed: u64 },
    /// The item is already queued.
    Duplicate,
    /// A new notification was stored.
    Queued { id: i64, notified: bool },
    /// A transient failure notification was sent.
    Broadcast { notified: bool },
}

/// Applies inbound webhook events to the notification queue.
pub struct EventIngestor {
    store: Arc<dyn NotificationStore>,
    notifier: Notifier,
    notify: NotifyConfig,
}

fn decode<T: DeserializeOwned>(kind: NotificationKind, body: &[u8]) -> Option<T> {
    match serde_json::from_slice(body) {
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("[ingest] Dropping malformed {} event: {}", kind, e);
            None
        }
    }
}

impl EventIngestor {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        notifier: Notifier,
        notify: NotifyConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            notify,
        }
    }

    /// Ingest a raw webhook body, dispatching on its `object_kind`.
    pub async fn ingest_raw(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let header: EventHeader = match serde_json::from_slice(body) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("[ingest] Dropping webhook without object_kind: {}", e);
                return Ok(IngestOutcome::Malformed);
            }
        };

        match NotificationKind::from_object_kind(&header.object_kind) {
            Some(kind) => self.ingest(kind, body).await,
            None => {
                log::debug!("[ingest] Ignoring {} event", header.object_kind);
                Ok(IngestOutcome::Unsupported)
            }
        }
    }

    /// Ingest a webhook body already known to be of `kind`.
    pub async fn ingest(
        &self,
        kind: NotificationKind,
        body: &[u8],
    ) -> Result<IngestOutcome, AppError> {
        match kind {
            NotificationKind::Issue => self.ingest_issue(body).await,
            NotificationKind::MergeRequest => self.ingest_merge_request(body).await,
            NotificationKind::Build => self.ingest_build(body).await,
            NotificationKind::Pipeline => self.ingest_pipeline(body).await,
        }
    }

    async fn ingest_issue(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let Some(event) = decode::<IssueEvent>(NotificationKind::Issue, body) else {
            return Ok(IngestOutcome::Malformed);
        };
        let path = event.project.path_with_namespace.as_str();
        if self.notify.is_excluded(path) {
            return Ok(IngestOutcome::Excluded);
        }

        let attrs = &event.object_attributes;
        let project_id = if attrs.project_id != 0 {
            attrs.project_id
        } else {
            event.project.id
        };
        let project_url = event.project.url();
        let author = self.notifier.resolver().chat_alias(&event.user.username);

        let candidate = NewNotification {
            scope: ProjectScope::from_path(project_id, path),
            kind: NotificationKind::Issue,
            object_id: attrs.iid,
            message: format!(
                "**Issue** on project [{}]({}) from @{}, [click here]({}), title: \n> {}",
                path, project_url, author, attrs.url, attrs.title
            ),
            channel: self.notify.channel.clone(),
            web_url: attrs.url.clone(),
            project_url: project_url.to_string(),
        };

        self.apply(ObjectState::from(attrs.state.as_str()), false, candidate)
            .await
    }

    async fn ingest_merge_request(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let Some(event) = decode::<MergeRequestEvent>(NotificationKind::MergeRequest, body) else {
            return Ok(IngestOutcome::Malformed);
        };
        if self.notify.is_excluded(&event.project.path_with_namespace) {
            return Ok(IngestOutcome::Excluded);
        }

        let attrs = &event.object_attributes;
        let path = event.target_path();
        let project_id = if attrs.target_project_id != 0 {
            attrs.target_project_id
        } else {
            event.project.id
        };
        let project_url = if attrs.target.web_url.is_empty() {
            event.project.url()
        } else {
            attrs.target.web_url.as_str()
        };
        let author = self.notifier.resolver().chat_alias(&event.user.username);

        let candidate = NewNotification {
            scope: ProjectScope::from_path(project_id, path),
            kind: NotificationKind::MergeRequest,
            object_id: attrs.iid,
            message: format!(
                "**Merge request** on project [{}]({}) from @{}, [click here]({}), title: \n> {}",
                path, project_url, author, attrs.url, attrs.title
            ),
            channel: self.notify.channel.clone(),
            web_url: attrs.url.clone(),
            project_url: project_url.to_string(),
        };

        self.apply(
            ObjectState::from(attrs.state.as_str()),
            event.has_assignee(),
            candidate,
        )
        .await
    }

    /// Queue transition shared by issues and merge requests.
    async fn apply(
        &self,
        state: ObjectState,
        assigned_upstream: bool,
        candidate: NewNotification,
    ) -> Result<IngestOutcome, AppError> {
        if state.is_terminal() {
            let removed = self
                .store
                .delete(&NotificationFilter::by_identity(candidate.identity()))
                .await?;
            if removed > 0 {
                log::info!(
                    "[ingest] Removed {} {} of {} from queue",
                    candidate.kind.label(),
                    candidate.object_id,
                    candidate.scope.path()
                );
            }
            return Ok(IngestOutcome::Removed { removed });
        }

        if state != ObjectState::Opened || assigned_upstream {
            return Ok(IngestOutcome::Ignored);
        }

        let Some(created) = self.store.insert_if_absent(&candidate, unix_now()).await? else {
            log::debug!(
                "[ingest] {} {} of {} already queued",
                candidate.kind.label(),
                candidate.object_id,
                candidate.scope.path()
            );
            return Ok(IngestOutcome::Duplicate);
        };

        log::info!(
            "[ingest] Queued {} {} of {}",
            created.kind.label(),
            created.object_id,
            created.scope.path()
        );
        let notified = self
            .notifier
            .broadcast(&created.scope, &created.channel, &created.message)
            .await;
        Ok(IngestOutcome::Queued {
            id: created.id,
            notified,
        })
    }

    async fn ingest_build(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let Some(event) = decode::<BuildEvent>(NotificationKind::Build, body) else {
            return Ok(IngestOutcome::Malformed);
        };
        if event.build_status != "failed" {
            return Ok(IngestOutcome::Ignored);
        }
        let path = event.path();
        if self.notify.is_excluded(&path) {
            return Ok(IngestOutcome::Excluded);
        }

        let message = format!(
            "Build failed on project [{}]({})",
            path,
            event.repository_url()
        );
        let scope = ProjectScope::from_path(event.project_id, &path);
        self.broadcast_transient(&scope, &message).await
    }

    async fn ingest_pipeline(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let Some(event) = decode::<PipelineEvent>(NotificationKind::Pipeline, body) else {
            return Ok(IngestOutcome::Malformed);
        };
        if event.object_attributes.status != "failed" {
            return Ok(IngestOutcome::Ignored);
        }
        let path = event.project.path_with_namespace.as_str();
        if self.notify.is_excluded(path) {
            return Ok(IngestOutcome::Excluded);
        }

        let message = format!(
            "Pipeline failed on project [{}]({})",
            path,
            event.project.url()
        );
        let scope = ProjectScope::from_path(event.project.id, path);
        self.broadcast_transient(&scope, &message).await
    }

    async fn broadcast_transient(
        &self,
        scope: &ProjectScope,
        message: &str,
    ) -> Result<IngestOutcome, AppError> {
        let notified = self
            .notifier
            .broadcast(scope, &self.notify.channel, message)
            .await;
        Ok(IngestOutcome::Broadcast { notified })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{NotificationOrder, ProjectRef};
    use crate::services::chat::{ChatMessage, ChatOutbox};
    use crate::services::gitlab_client::GitLabMember;
    use crate::services::permissions::{PermissionResolver, UserAliases};
    use crate::testing::{open_store, test_config, FakeForge};
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        _dir: TempDir,
        store: Arc<SqliteStore>,
        ingestor: EventIngestor,
        rx: UnboundedReceiver<ChatMessage>,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(&dir.path().join("ingest.db")).await.unwrap());
        let forge = Arc::new(FakeForge::new());
        forge.add_project_member(
            &ProjectRef::Id(7),
            vec![GitLabMember {
                id: 1,
                username: "jdoe".to_string(),
                access_level: 40,
            }],
        );
        let mut aliases = HashMap::new();
        aliases.insert("jdoe".to_string(), "john".to_string());
        let resolver = Arc::new(PermissionResolver::new(forge, UserAliases::new(&aliases)));
        let (outbox, rx) = ChatOutbox::new();
        let ingestor = EventIngestor::new(
            store.clone(),
            Notifier::new(resolver, outbox),
            test_config().notify,
        );
        Fixture {
            _dir: dir,
            store,
            ingestor,
            rx,
        }
    }

    fn merge_request(state: &str) -> serde_json::Value {
        serde_json::json!({
            "object_kind": "merge_request",
            "user": {"username": "jdoe"},
            "project": {"id": 7, "path_with_namespace": "acme/widgets", "web_url": "https://gitlab.example.com/acme/widgets"},
            "object_attributes": {
                "iid": 5,
                "target_project_id": 7,
                "title": "Add widgets",
                "state": state,
                "url": "https://gitlab.example.com/acme/widgets/-/merge_requests/5",
                "target": {"path_with_namespace": "acme/widgets", "web_url": "https://gitlab.example.com/acme/widgets"}
            }
        })
    }

    #[tokio::test]
    async fn test_merge_request_message_format() {
        let mut fx = fixture().await;
        let body = serde_json::to_vec(&merge_request("opened")).unwrap();

        let outcome = fx.ingestor.ingest_raw(&body).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Queued { notified: true, .. }));

        let sent = fx.rx.recv().await.unwrap();
        assert_eq!(
            sent,
            ChatMessage::Channel {
                channel: "dev".to_string(),
                text: "@john : **Merge request** on project [acme/widgets](https://gitlab.example.com/acme/widgets) from @john, [click here](https://gitlab.example.com/acme/widgets/-/merge_requests/5), title: \n> Add widgets".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_merge_request_assigned_upstream_is_ignored() {
        let mut fx = fixture().await;
        let mut event = merge_request("opened");
        event["assignees"] = serde_json::json!([{"username": "alice"}]);

        let outcome = fx
            .ingestor
            .ingest_raw(&serde_json::to_vec(&event).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert_eq!(fx.store.count(&NotificationFilter::all()).await.unwrap(), 0);
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_merge_removes_queued_item() {
        let fx = fixture().await;
        let opened = serde_json::to_vec(&merge_request("opened")).unwrap();
        let merged = serde_json::to_vec(&merge_request("merged")).unwrap();

        fx.ingestor.ingest_raw(&opened).await.unwrap();
        let outcome = fx.ingestor.ingest_raw(&merged).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Removed { removed: 1 });

        let again = fx.ingestor.ingest_raw(&merged).await.unwrap();
        assert_eq!(again, IngestOutcome::Removed { removed: 0 });
    }

    #[tokio::test]
    async fn test_transitional_state_is_ignored() {
        let fx = fixture().await;
        let body = serde_json::to_vec(&merge_request("locked")).unwrap();
        assert_eq!(
            fx.ingestor.ingest_raw(&body).await.unwrap(),
            IngestOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unsupported_bodies() {
        let fx = fixture().await;
        assert_eq!(
            fx.ingestor.ingest_raw(b"not json").await.unwrap(),
            IngestOutcome::Malformed
        );
        assert_eq!(
            fx.ingestor
                .ingest_raw(br#"{"object_kind": "push"}"#)
                .await
                .unwrap(),
            IngestOutcome::Unsupported
        );
        assert_eq!(
            fx.ingestor
                .ingest_raw(br#"{"object_kind": "issue", "object_attributes": "oops"}"#)
                .await
                .unwrap(),
            IngestOutcome::Malformed
        );
    }

    #[tokio::test]
    async fn test_failed_pipeline_is_broadcast_every_time() {
        let mut fx = fixture().await;
        let body = serde_json::to_vec(&serde_json::json!({
            "object_kind": "pipeline",
            "object_attributes": {"id": 99, "status": "failed"},
            "project": {"id": 7, "path_with_namespace": "acme/widgets", "web_url": "https://gitlab.example.com/acme/widgets"}
        }))
        .unwrap();

        for _ in 0..2 {
            let outcome = fx.ingestor.ingest_raw(&body).await.unwrap();
            assert_eq!(outcome, IngestOutcome::Broadcast { notified: true });
            assert_eq!(
                fx.rx.recv().await.unwrap().text(),
                "@john : Pipeline failed on project [acme/widgets](https://gitlab.example.com/acme/widgets)"
            );
        }

        let stored = fx
            .store
            .find(&NotificationFilter::all(), NotificationOrder::CreatedDesc)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_successful_build_is_ignored() {
        let fx = fixture().await;
        let body = br#"{"object_kind": "build", "build_status": "success", "project_id": 7}"#;
        assert_eq!(
            fx.ingestor.ingest_raw(body).await.unwrap(),
            IngestOutcome::Ignored
        );
    }
}

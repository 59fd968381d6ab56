//! HTTP routes exercised in-process with `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use gitlab_relay::db::NotificationStore;
use gitlab_relay::models::{NotificationFilter, ProjectRef};
use gitlab_relay::server::{self, ServerState};
use gitlab_relay::services::gitlab_client::GitLabMember;
use gitlab_relay::services::PresenceEvent;
use gitlab_relay::testing::{test_config, Harness};
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use tower::ServiceExt;

async fn setup() -> (TempDir, Harness, Router, mpsc::Receiver<PresenceEvent>) {
    let dir = tempdir().unwrap();
    let h = Harness::new(&dir.path().join("relay.db"), test_config())
        .await
        .unwrap();
    h.forge.add_project_member(
        &ProjectRef::Id(7),
        vec![GitLabMember {
            id: 1,
            username: "alice".to_string(),
            access_level: 40,
        }],
    );
    let (presence_tx, presence_rx) = mpsc::channel(4);
    let app = server::router(ServerState {
        ingestor: h.services.ingestor.clone(),
        commands: h.services.commands.clone(),
        presence_tx,
    });
    (dir, h, app, presence_rx)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_webhook_queues_and_always_answers_ok() {
    let (_dir, mut h, app, _presence) = setup().await;

    let event = serde_json::json!({
        "object_kind": "merge_request",
        "user": {"username": "alice"},
        "project": {"id": 7, "path_with_namespace": "acme/widgets"},
        "object_attributes": {
            "iid": 3,
            "target_project_id": 7,
            "title": "Refactor",
            "state": "opened",
            "url": "https://gitlab.example.com/acme/widgets/-/merge_requests/3"
        }
    });
    let response = app
        .clone()
        .oneshot(post_json("/gitlab/webhook", event))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.is_empty());
    assert_eq!(h.store.count(&NotificationFilter::all()).await.unwrap(), 1);
    assert_eq!(h.sent().len(), 1);

    let garbage = Request::builder()
        .method("POST")
        .uri("/gitlab/webhook")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(garbage).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.store.count(&NotificationFilter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_chat_command_replies_in_body() {
    let (_dir, _h, app, _presence) = setup().await;

    let response = app
        .oneshot(post_json(
            "/chat/command",
            serde_json::json!({"user": "alice", "channel": "dev", "message": "gitlab assign me"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Sorry there is no issues or merge request opened"
    );
}

#[tokio::test]
async fn test_presence_is_forwarded() {
    let (_dir, _h, app, mut presence) = setup().await;

    let response = app
        .clone()
        .oneshot(post_json("/chat/presence", serde_json::json!({"user": "alice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        presence.recv().await.unwrap(),
        PresenceEvent::Online {
            user: "alice".to_string()
        }
    );

    let response = app
        .oneshot(post_json("/chat/presence", serde_json::json!({"user": " "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let (_dir, _h, app, _presence) = setup().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

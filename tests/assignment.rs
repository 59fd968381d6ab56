//! Assignment of queued items through the engine and the chat commands.

use gitlab_relay::commands::ChatEnvelope;
use gitlab_relay::db::NotificationStore;
use gitlab_relay::models::{
    NewNotification, Notification, NotificationFilter, NotificationKind, NotificationOrder,
    ProjectRef, ProjectScope,
};
use gitlab_relay::services::gitlab_client::{
    GitLabMember, GitLabMergeRequest, IssueUpdate, MergeRequestUpdate,
};
use gitlab_relay::services::{AssignOutcome, Selector};
use gitlab_relay::testing::{test_config, ForgeCall, Harness};
use tempfile::{tempdir, TempDir};

fn member(id: i64, username: &str, access_level: i64) -> GitLabMember {
    GitLabMember {
        id,
        username: username.to_string(),
        access_level,
    }
}

async fn setup() -> (TempDir, Harness) {
    let dir = tempdir().unwrap();
    let h = Harness::new(&dir.path().join("relay.db"), test_config())
        .await
        .unwrap();
    h.forge.add_user(11, "alice");
    h.forge.add_user(12, "bob");
    h.forge.add_user(13, "carol");
    h.forge.add_project_member(
        &ProjectRef::Id(7),
        vec![member(11, "alice", 40), member(12, "bob", 30)],
    );
    h.forge
        .add_group_member("acme", vec![member(13, "carol", 50)]);
    h.forge.add_merge_request(
        &ProjectRef::Id(7),
        GitLabMergeRequest {
            iid: 7,
            title: "Add widgets".to_string(),
            description: Some("Adds the widget factory".to_string()),
            target_branch: "main".to_string(),
            web_url: "https://gitlab.example.com/acme/widgets/-/merge_requests/7".to_string(),
        },
    );
    (dir, h)
}

async fn queue(
    h: &Harness,
    kind: NotificationKind,
    object_id: i64,
    created_at: i64,
) -> Notification {
    queue_in(h, 7, "acme/widgets", kind, object_id, created_at).await
}

async fn queue_in(
    h: &Harness,
    project_id: i64,
    project: &str,
    kind: NotificationKind,
    object_id: i64,
    created_at: i64,
) -> Notification {
    let segment = match kind {
        NotificationKind::MergeRequest => "merge_requests",
        _ => "issues",
    };
    let new = NewNotification {
        scope: ProjectScope::from_path(project_id, project),
        kind,
        object_id,
        message: format!("{} {} of {}", kind.label(), object_id, project),
        channel: "dev".to_string(),
        web_url: format!("https://gitlab.example.com/{}/-/{}/{}", project, segment, object_id),
        project_url: format!("https://gitlab.example.com/{}", project),
    };
    h.store
        .insert_if_absent(&new, created_at)
        .await
        .unwrap()
        .unwrap()
}

async fn stored(h: &Harness, id: i64) -> Notification {
    h.store
        .find_first(&NotificationFilter::by_id(id), NotificationOrder::CreatedDesc)
        .await
        .unwrap()
        .unwrap()
}

fn envelope(user: &str) -> ChatEnvelope {
    ChatEnvelope {
        user: user.to_string(),
        channel: "dev".to_string(),
    }
}

#[tokio::test]
async fn test_non_maintainer_cannot_take_issue() {
    let (_dir, h) = setup().await;
    let issue = queue(&h, NotificationKind::Issue, 42, 100).await;

    let reply = h
        .services
        .commands
        .handle(&envelope("bob"), &format!("gitlab issue assign me {}", issue.id))
        .await;

    assert_eq!(
        reply,
        format!(
            "Sorry I can't assign bob to issue with id {}, I had this error: Nice try but you don't have the correct permission.",
            issue.id
        )
    );
    assert!(h.forge.calls().is_empty());
    let after = stored(&h, issue.id).await;
    assert!(!after.is_assigned());
    assert_eq!(after.updated_at, issue.updated_at);
}

#[tokio::test]
async fn test_unknown_membership_is_denied() {
    let (_dir, h) = setup().await;
    h.forge.add_user(14, "dave");
    let issue = queue(&h, NotificationKind::Issue, 42, 100).await;

    let err = h
        .services
        .engine
        .assign(
            "bob",
            "dave",
            &Selector::ById {
                kind: NotificationKind::Issue,
                id: issue.id,
            },
        )
        .await
        .unwrap_err();

    assert!(err.error.is_permission_denied());
    assert_eq!(err.target, Some((NotificationKind::Issue, issue.id)));
    assert_eq!(h.forge.update_count(), 0);
}

#[tokio::test]
async fn test_merge_request_assignment_keeps_fields() {
    let (_dir, h) = setup().await;
    let mr = queue(&h, NotificationKind::MergeRequest, 7, 100).await;

    let outcome = h
        .services
        .engine
        .assign(
            "bob",
            "@alice",
            &Selector::ById {
                kind: NotificationKind::MergeRequest,
                id: mr.id,
            },
        )
        .await
        .unwrap();

    let AssignOutcome::Assigned { message, assignee, .. } = outcome else {
        panic!("expected an assignment");
    };
    assert_eq!(assignee, "alice");
    assert_eq!(
        message,
        format!(
            "@alice have been assigned to the merge request with id {} available here: https://gitlab.example.com/acme/widgets/-/merge_requests/7",
            mr.id
        )
    );

    assert_eq!(
        h.forge.calls(),
        vec![ForgeCall::UpdateMergeRequest {
            project: "7".to_string(),
            iid: 7,
            update: MergeRequestUpdate {
                assignee_id: 11,
                title: "Add widgets".to_string(),
                description: "Adds the widget factory".to_string(),
                target_branch: "main".to_string(),
            },
        }]
    );

    let after = stored(&h, mr.id).await;
    assert_eq!(after.assigned_user, "alice");
    assert_eq!(after.message, mr.message);
    assert_eq!(after.web_url, mr.web_url);
    assert_eq!(after.created_at, mr.created_at);
    assert!(after.updated_at >= mr.updated_at);
}

#[tokio::test]
async fn test_group_maintainer_can_take_latest_issue() {
    let (_dir, h) = setup().await;
    queue(&h, NotificationKind::Issue, 1, 100).await;
    let newest = queue(&h, NotificationKind::Issue, 2, 200).await;
    queue(&h, NotificationKind::MergeRequest, 7, 300).await;

    let reply = h
        .services
        .commands
        .handle(&envelope("carol"), "assign issue me")
        .await;

    assert_eq!(
        reply,
        format!(
            "@carol have been assigned to the issue with id {} available here: https://gitlab.example.com/acme/widgets/-/issues/2",
            newest.id
        )
    );
    assert_eq!(
        h.forge.calls(),
        vec![ForgeCall::UpdateIssue {
            project: "7".to_string(),
            iid: 2,
            update: IssueUpdate {
                assignee_ids: vec![13],
            },
        }]
    );
    assert_eq!(stored(&h, newest.id).await.assigned_user, "carol");
}

#[tokio::test]
async fn test_remote_failure_leaves_local_state() {
    let (_dir, h) = setup().await;
    let issue = queue(&h, NotificationKind::Issue, 42, 100).await;
    h.forge.fail_updates("500 Internal Server Error");

    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), "assign me")
        .await;

    assert_eq!(
        reply,
        format!(
            "Sorry I can't assign alice to issue with id {}, I had this error: GitLab API error: 500 Internal Server Error",
            issue.id
        )
    );
    assert_eq!(h.forge.update_count(), 1);
    assert!(!stored(&h, issue.id).await.is_assigned());
}

#[tokio::test]
async fn test_unknown_user_and_empty_queue() {
    let (_dir, h) = setup().await;

    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), "assign last alice")
        .await;
    assert_eq!(reply, "Sorry there is no issues or merge request opened");

    let issue = queue(&h, NotificationKind::Issue, 42, 100).await;
    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), "assign last @ghost")
        .await;
    assert_eq!(
        reply,
        format!(
            "Sorry I can't assign ghost to issue with id {}, I had this error: User ghost not found.",
            issue.id
        )
    );
}

#[tokio::test]
async fn test_concurrent_assignments_are_serialized() {
    let (_dir, h) = setup().await;
    let issue = queue(&h, NotificationKind::Issue, 42, 100).await;
    let selector = Selector::ById {
        kind: NotificationKind::Issue,
        id: issue.id,
    };

    let (first, second) = tokio::join!(
        h.services.engine.assign("x", "alice", &selector),
        h.services.engine.assign("x", "carol", &selector),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());

    // Local state matches whichever update reached GitLab last.
    let calls = h.forge.calls();
    assert_eq!(calls.len(), 2);
    let last_assignee = match calls.last() {
        Some(ForgeCall::UpdateIssue { update, .. }) => update.assignee_ids[0],
        other => panic!("unexpected call {:?}", other),
    };
    let expected = if last_assignee == 11 { "alice" } else { "carol" };
    assert_eq!(stored(&h, issue.id).await.assigned_user, expected);
}

#[tokio::test]
async fn test_see_and_list_commands() {
    let (_dir, h) = setup().await;
    let mr = queue(&h, NotificationKind::MergeRequest, 7, 100).await;

    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), &format!("gitlab mr see {}", mr.id))
        .await;
    assert_eq!(reply, "merge request 7 of acme/widgets");

    // Queue ids are scoped to their kind.
    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), &format!("gitlab issue see {}", mr.id))
        .await;
    assert_eq!(reply, "I can't found this issue.");

    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), "gitlab merge-request list")
        .await;
    assert!(reply.starts_with("- Project [acme/widgets](https://gitlab.example.com/acme/widgets)\n"));
    assert!(reply.contains(&format!("`gitlab merge-request assign me {}`", mr.id)));

    let reply = h
        .services
        .commands
        .handle(&envelope("alice"), "gitlab issue list")
        .await;
    assert_eq!(reply, "There is no issues in queue.");
}

#[tokio::test]
async fn test_same_number_in_two_projects_is_addressable() {
    let (_dir, h) = setup().await;
    let widgets = queue_in(&h, 7, "acme/widgets", NotificationKind::Issue, 1, 100).await;
    let gadgets = queue_in(&h, 8, "acme/gadgets", NotificationKind::Issue, 1, 200).await;
    assert_ne!(widgets.id, gadgets.id);

    let listing = h
        .services
        .commands
        .handle(&envelope("carol"), "gitlab issue list")
        .await;
    assert!(listing.contains(&format!("`gitlab issue assign me {}`", widgets.id)));
    assert!(listing.contains(&format!("`gitlab issue assign me {}`", gadgets.id)));

    let reply = h
        .services
        .commands
        .handle(&envelope("carol"), &format!("gitlab issue see {}", widgets.id))
        .await;
    assert_eq!(reply, "issue 1 of acme/widgets");

    // The older item is reachable even though the newer one shares its number.
    let reply = h
        .services
        .commands
        .handle(&envelope("carol"), &format!("gitlab issue assign me {}", widgets.id))
        .await;
    assert_eq!(
        reply,
        format!(
            "@carol have been assigned to the issue with id {} available here: https://gitlab.example.com/acme/widgets/-/issues/1",
            widgets.id
        )
    );
    assert_eq!(
        h.forge.calls(),
        vec![ForgeCall::UpdateIssue {
            project: "7".to_string(),
            iid: 1,
            update: IssueUpdate {
                assignee_ids: vec![13],
            },
        }]
    );
    assert_eq!(stored(&h, widgets.id).await.assigned_user, "carol");
    assert!(!stored(&h, gadgets.id).await.is_assigned());
}

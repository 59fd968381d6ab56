//! Plain-text rendering of the queue for chat.

use crate::config::NotifyConfig;
use crate::models::{Notification, NotificationKind};

/// "There is no ... in queue." for an empty listing.
pub fn empty_queue_text(kind: Option<NotificationKind>) -> String {
    let what = match kind {
        Some(NotificationKind::MergeRequest) => "merge requests",
        Some(NotificationKind::Issue) => "issues",
        _ => "issues or merge requests",
    };
    format!("There is no {} in queue.", what)
}

/// Render `notifications` grouped by project.
///
/// Expects them ordered by project. Each line starts with the queue id that
/// `see` and `assign` take; the link text is the GitLab number. With
/// `show_assigned`, each line tells who has the item or how to take it.
pub fn render_queue(
    notifications: &[Notification],
    kind: Option<NotificationKind>,
    show_assigned: bool,
    notify: &NotifyConfig,
) -> String {
    let visible: Vec<&Notification> = notifications
        .iter()
        .filter(|n| !notify.is_excluded(&n.scope.path()))
        .collect();
    if visible.is_empty() {
        return empty_queue_text(kind);
    }

    let mut out = String::new();
    let mut current_project = None;
    for notification in visible {
        if current_project != Some(&notification.scope) {
            out.push_str(&format!(
                "- Project [{}]({})\n",
                notification.scope.path(),
                notification.project_url
            ));
            current_project = Some(&notification.scope);
        }

        let label = notification.kind.label();
        out.push_str(&format!(
            "  - {} {}: [#{}]({}) ",
            label, notification.id, notification.object_id, notification.web_url
        ));
        if show_assigned {
            if notification.is_assigned() {
                out.push_str(&format!(" -- Assigned to {}", notification.assigned_user));
            } else {
                out.push_str(&format!(
                    " -- this {} is not assigned, assign to you by doing `gitlab {} assign me {}`",
                    label,
                    notification.kind.command_name(),
                    notification.id
                ));
            }
        }
        out.push('\n');
    }
    out
}

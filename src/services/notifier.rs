//! Channel broadcasts addressed to a project's maintainers.

use crate::models::ProjectScope;
use crate::services::chat::ChatOutbox;
use crate::services::permissions::PermissionResolver;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Mention line for a set of chat handles: `@a @b : `.
pub fn mention_prefix(handles: &BTreeSet<String>) -> String {
    let mut prefix = String::new();
    for handle in handles {
        prefix.push('@');
        prefix.push_str(handle);
        prefix.push(' ');
    }
    prefix.push_str(": ");
    prefix
}

/// Sends a message to a channel, mentioning everyone allowed to act on it.
#[derive(Clone)]
pub struct Notifier {
    resolver: Arc<PermissionResolver>,
    outbox: ChatOutbox,
}

impl Notifier {
    pub fn new(resolver: Arc<PermissionResolver>, outbox: ChatOutbox) -> Self {
        Self { resolver, outbox }
    }

    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    pub fn outbox(&self) -> &ChatOutbox {
        &self.outbox
    }

    /// Broadcast `message` on `channel` to the project's maintainers.
    ///
    /// The candidate set is recomputed on every call. Returns `false` when the
    /// project lookup failed and nothing was sent.
    pub async fn broadcast(&self, scope: &ProjectScope, channel: &str, message: &str) -> bool {
        let handles = match self.resolver.candidate_set(scope).await {
            Ok(handles) => handles,
            Err(e) => {
                log::error!("[notify] Cannot notify on {}: {}", scope.path(), e);
                return false;
            }
        };

        let text = format!("{}{}", mention_prefix(&handles), message);
        self.outbox.send_to_channel(channel, text);
        true
    }
}

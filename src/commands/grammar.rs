//! Chat command grammar.
//!
//! Commands arrive as whitespace-separated words, optionally prefixed with
//! `gitlab`, and are parsed with clap as if they were a command line.

use crate::models::NotificationKind;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "gitlab",
    no_binary_name = true,
    disable_version_flag = true,
    about = "Track and assign GitLab merge requests and issues"
)]
pub struct ChatCommand {
    #[command(subcommand)]
    pub command: TopCommand,
}

#[derive(Debug, Subcommand)]
pub enum TopCommand {
    /// Assign a merge request or an issue to a user
    Assign {
        #[command(subcommand)]
        target: AssignTarget,
    },
    /// Manipulate merge requests
    #[command(name = "merge-request", visible_aliases = ["pull-request", "pr", "mr"])]
    MergeRequest {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Manipulate issues
    Issue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum AssignTarget {
    /// Assign the latest merge request or issue of the channel to yourself
    Me,
    /// Assign the latest merge request or issue of the channel to someone or yourself
    Last { user: Option<String> },
    /// Assign the latest merge request of the channel to someone or yourself
    #[command(name = "merge-request", visible_aliases = ["pull-request", "pr", "mr"])]
    MergeRequest { user: Option<String> },
    /// Assign the latest issue of the channel to someone or yourself
    Issue { user: Option<String> },
}

#[derive(Debug, Subcommand)]
pub enum QueueAction {
    /// List everything queued
    List,
    /// Show the content of a queued item
    See { id: Option<String> },
    /// Assign a queued item to someone or yourself
    Assign {
        user: Option<String>,
        id: Option<String>,
    },
}

impl TopCommand {
    /// Kind addressed by `merge-request ...` / `issue ...`.
    pub fn queue_kind(&self) -> Option<NotificationKind> {
        match self {
            Self::MergeRequest { .. } => Some(NotificationKind::MergeRequest),
            Self::Issue { .. } => Some(NotificationKind::Issue),
            Self::Assign { .. } => None,
        }
    }
}

/// Split a chat message into words, dropping a leading `gitlab`.
pub fn tokenize(message: &str) -> Vec<&str> {
    let mut words: Vec<&str> = message.split_whitespace().collect();
    if words.first() == Some(&"gitlab") {
        words.remove(0);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(message: &str) -> Result<ChatCommand, clap::Error> {
        ChatCommand::try_parse_from(tokenize(message))
    }

    #[test]
    fn test_tokenize_strips_prefix() {
        assert_eq!(tokenize("  gitlab  assign me "), vec!["assign", "me"]);
        assert_eq!(tokenize("issue list"), vec!["issue", "list"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_assign_aliases() {
        for alias in ["merge-request", "mr", "pr", "pull-request"] {
            let cmd = parse(&format!("gitlab assign {} @alice", alias)).unwrap();
            match cmd.command {
                TopCommand::Assign {
                    target: AssignTarget::MergeRequest { user },
                } => assert_eq!(user.as_deref(), Some("@alice")),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_queue_assign_arguments() {
        let cmd = parse("mr assign me 7").unwrap();
        assert_eq!(cmd.command.queue_kind(), Some(NotificationKind::MergeRequest));
        match cmd.command {
            TopCommand::MergeRequest {
                action: QueueAction::Assign { user, id },
            } => {
                assert_eq!(user.as_deref(), Some("me"));
                assert_eq!(id.as_deref(), Some("7"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        assert!(parse("deploy everything").is_err());
        assert!(parse("").is_err());
    }
}

//! Outbound chat messages.
//!
//! Components push messages into a [`ChatOutbox`]; a single delivery task
//! drains it and forwards each message to the chat system's incoming webhook,
//! or logs it when no webhook is configured.

use crate::config::ChatConfig;
use crate::error::AppError;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message for the chat surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatMessage {
    /// Posted to a channel.
    Channel { channel: String, text: String },
    /// Sent privately to a user.
    Direct { user: String, text: String },
}

impl ChatMessage {
    pub fn text(&self) -> &str {
        match self {
            Self::Channel { text, .. } | Self::Direct { text, .. } => text,
        }
    }
}

/// Sending half of the chat queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatOutbox {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl ChatOutbox {
    /// Create an outbox and the receiver the delivery task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_to_channel(&self, channel: &str, text: impl Into<String>) {
        self.send(ChatMessage::Channel {
            channel: channel.to_string(),
            text: text.into(),
        });
    }

    pub fn send_direct(&self, user: &str, text: impl Into<String>) {
        self.send(ChatMessage::Direct {
            user: user.to_string(),
            text: text.into(),
        });
    }

    fn send(&self, message: ChatMessage) {
        if self.tx.send(message).is_err() {
            log::warn!("[chat] Delivery task stopped, dropping message");
        }
    }
}

/// Forwards queued messages to the chat system.
#[derive(Debug, Clone)]
pub struct ChatDelivery {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl ChatDelivery {
    /// Each POST gives up after `config.timeout()` so a hung endpoint cannot
    /// hold back the rest of the queue.
    pub fn new(config: &ChatConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_url: config.outgoing_webhook_url.clone(),
        })
    }

    async fn deliver(&self, message: &ChatMessage) {
        let Some(url) = &self.webhook_url else {
            match message {
                ChatMessage::Channel { channel, text } => {
                    log::info!("[chat] #{}: {}", channel, text)
                }
                ChatMessage::Direct { user, text } => log::info!("[chat] @{}: {}", user, text),
            }
            return;
        };

        match self.client.post(url).json(message).send().await {
            Ok(response) if !response.status().is_success() => {
                log::error!("[chat] Delivery rejected with status {}", response.status());
            }
            Ok(_) => {}
            Err(e) => log::error!("[chat] Delivery failed: {}", e),
        }
    }

    /// Drain `rx` until it closes or `cancel` fires.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<ChatMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.deliver(&message).await,
                    None => break,
                },
            }
        }
        log::info!("[chat] Delivery stopped");
    }
}

//! Reminder sweeps.
//!
//! Two behaviours share one background task:
//! - unassigned items older than the reminder threshold are re-broadcast,
//!   at most once per threshold window
//! - a user coming online is nagged about items they hold if the most recently
//!   touched one is over a day old

use crate::config::NotifyConfig;
use crate::db::NotificationStore;
use crate::error::AppError;
use crate::models::{unix_now, NotificationFilter, NotificationOrder};
use crate::services::listing::render_queue;
use crate::services::notifier::Notifier;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Prefix of a stale-item reminder.
pub const REMINDER_PREFIX: &str = "Guys, don't forget -- ";

/// First line of the reconnect nag.
pub const NAG_HEADER: &str = "Dont forget that you have merge requests and issues in queues:\n";

/// Age of a user's freshest assigned item before they get nagged.
pub const NAG_THRESHOLD_SECS: i64 = 24 * 60 * 60;

/// Chat presence change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Online { user: String },
}

pub struct ReminderScheduler {
    store: Arc<dyn NotificationStore>,
    notifier: Notifier,
    notify: NotifyConfig,
}

impl ReminderScheduler {
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

    /// Re-broadcast unassigned notifications not touched for the threshold.
    ///
    /// Each reminded record is touched first so the next reminder waits a
    /// full window. Returns how many reminders were sent.
    pub async fn sweep_stale(&self, now: i64) -> Result<usize, AppError> {
        let threshold = self.notify.reminder_threshold_secs();
        let unassigned = self
            .store
            .find(&NotificationFilter::assigned_to(""), NotificationOrder::ProjectAsc)
            .await?;

        let mut reminded = 0;
        for notification in unassigned {
            if now - notification.updated_at < threshold {
                continue;
            }
            // Gone or changed since the scan.
            if !self.store.touch(notification.id, now).await? {
                continue;
            }

            let message = format!("{}{}", REMINDER_PREFIX, notification.message);
            if self
                .notifier
                .broadcast(&notification.scope, &notification.channel, &message)
                .await
            {
                reminded += 1;
            }
        }
        Ok(reminded)
    }

    /// Nag `user` about their assigned items if they have been sitting idle.
    ///
    /// Never touches timestamps. Returns whether a message was sent.
    pub async fn on_user_online(&self, user: &str, now: i64) -> Result<bool, AppError> {
        if user.is_empty() {
            return Ok(false);
        }

        let filter = NotificationFilter::assigned_to(user);
        let Some(latest) = self
            .store
            .find_first(&filter, NotificationOrder::UpdatedDesc)
            .await?
        else {
            return Ok(false);
        };
        if now - latest.updated_at < NAG_THRESHOLD_SECS {
            return Ok(false);
        }

        let assigned = self.store.find(&filter, NotificationOrder::ProjectAsc).await?;
        let text = format!(
            "{}{}",
            NAG_HEADER,
            render_queue(&assigned, None, false, &self.notify)
        );
        self.notifier.outbox().send_direct(user, text);
        log::info!("[reminders] Reminded {} of {} assigned items", user, assigned.len());
        Ok(true)
    }

    /// Run sweeps on the configured interval and react to presence events
    /// until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        mut presence_rx: mpsc::Receiver<PresenceEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.notify.sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut presence_open = true;

            log::info!(
                "[reminders] Started, sweeping every {}s",
                self.notify.sweep_interval().as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match self.sweep_stale(unix_now()).await {
                            Ok(0) => {}
                            Ok(n) => log::info!("[reminders] Sent {} reminders", n),
                            Err(e) => log::error!("[reminders] Sweep failed: {}", e),
                        }
                    }
                    event = presence_rx.recv(), if presence_open => match event {
                        Some(PresenceEvent::Online { user }) => {
                            if let Err(e) = self.on_user_online(&user, unix_now()).await {
                                log::error!("[reminders] Nag for {} failed: {}", user, e);
                            }
                        }
                        None => presence_open = false,
                    },
                }
            }
            log::info!("[reminders] Stopped");
        })
    }
}

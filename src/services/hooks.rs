//! Webhook provisioning.
//!
//! Makes sure every project visible to the token sends its events to the
//! relay. Each project gets a hook record after its first attempt, whether it
//! succeeded or GitLab refused with 403; refused projects are only retried
//! when `notify.retry_skipped_hooks` is set.

use crate::config::{Config, NotifyConfig};
use crate::db::NotificationStore;
use crate::error::AppError;
use crate::models::{unix_now, NewHookRecord};
use crate::services::gitlab_client::{Forge, GitLabProject, ProjectHookOptions};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Projects listed per reconciliation (a single page).
pub const PROJECTS_PER_PAGE: u32 = 500;

/// What happened to one project during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    AlreadyHooked,
    Registered,
    Skipped,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: usize,
    pub skipped: usize,
    /// One entry per project that failed for another reason.
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// All project errors joined by newlines, if any.
    pub fn joined_errors(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("\n"))
        }
    }
}

pub struct HookProvisioner {
    store: Arc<dyn NotificationStore>,
    forge: Arc<dyn Forge>,
    notify: NotifyConfig,
    hook: ProjectHookOptions,
}

impl HookProvisioner {
    pub fn new(store: Arc<dyn NotificationStore>, forge: Arc<dyn Forge>, config: &Config) -> Self {
        Self {
            store,
            forge,
            notify: config.notify.clone(),
            hook: ProjectHookOptions::relay(
                config.webhook_url(),
                !config.gitlab.tls_insecure_skip_verify,
            ),
        }
    }

    /// Register the relay hook on every project still missing it.
    ///
    /// Fails only when the project list itself cannot be fetched; per-project
    /// failures are collected in the report and do not stop the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let projects = self.forge.list_projects(PROJECTS_PER_PAGE).await?;
        let mut report = ReconcileReport::default();

        for project in &projects {
            if self.notify.is_excluded(&project.path_with_namespace) {
                continue;
            }
            match self.provision(project).await {
                Ok(HookStatus::Registered) => report.registered += 1,
                Ok(HookStatus::Skipped) => report.skipped += 1,
                Ok(HookStatus::AlreadyHooked) => {}
                Err(e) => report
                    .errors
                    .push(format!("{}: {}", project.path_with_namespace, e)),
            }
        }

        Ok(report)
    }

    async fn provision(&self, project: &GitLabProject) -> Result<HookStatus, AppError> {
        let retry = match self.store.find_hook(project.id).await? {
            None => false,
            Some(record) if record.skipped && self.notify.retry_skipped_hooks => true,
            Some(_) => return Ok(HookStatus::AlreadyHooked),
        };

        match self.forge.add_project_hook(project.id, &self.hook).await {
            Ok(()) => {
                if retry {
                    self.store.mark_hook_registered(project.id).await?;
                } else {
                    self.record(project, false).await?;
                }
                log::info!("[hooks] Registered webhook on {}", project.name_with_namespace);
                Ok(HookStatus::Registered)
            }
            Err(e) if e.is_forbidden() => {
                if !retry {
                    log::info!(
                        "[hooks] Skipping project {} because you don't have correct permission to create hook",
                        project.name_with_namespace
                    );
                    self.record(project, true).await?;
                }
                Ok(HookStatus::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn record(&self, project: &GitLabProject, skipped: bool) -> Result<(), AppError> {
        let record = NewHookRecord {
            project_id: project.id,
            project_name: project.name_with_namespace.clone(),
            skipped,
        };
        self.store.insert_hook(&record, unix_now()).await?;
        Ok(())
    }

    /// Reconcile on the configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.notify.sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => match self.reconcile().await {
                        Ok(report) => {
                            if let Some(errors) = report.joined_errors() {
                                log::error!(
                                    "[hooks] Error when creating required webhooks: {}",
                                    errors
                                );
                            }
                        }
                        Err(e) => log::error!("[hooks] Cannot list projects: {}", e),
                    },
                }
            }
            log::info!("[hooks] Stopped");
        })
    }
}

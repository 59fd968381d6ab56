//! Process wiring.
//!
//! Builds every component from an [`AppContext`], starts the background
//! loops and the HTTP server, and stops them all on one cancellation token.

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::db::{self, NotificationStore, SqliteStore};
use crate::error::AppError;
use crate::server::{self, ServerState};
use crate::services::chat::{ChatDelivery, ChatMessage, ChatOutbox};
use crate::services::gitlab_client::{Forge, GitLabClient, GitLabClientConfig};
use crate::services::{
    AssignmentEngine, EventIngestor, HookProvisioner, Notifier, PermissionResolver,
    ReminderScheduler, UserAliases,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the presence event queue.
const PRESENCE_QUEUE: usize = 64;

/// Everything components need, passed explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub forge: Arc<dyn Forge>,
    pub store: Arc<dyn NotificationStore>,
    pub outbox: ChatOutbox,
}

/// Components built from an [`AppContext`].
pub struct Services {
    pub ingestor: Arc<EventIngestor>,
    pub engine: Arc<AssignmentEngine>,
    pub commands: Arc<CommandHandler>,
    pub reminders: Arc<ReminderScheduler>,
    pub hooks: Arc<HookProvisioner>,
}

impl AppContext {
    pub fn new(
        config: Config,
        forge: Arc<dyn Forge>,
        store: Arc<dyn NotificationStore>,
        outbox: ChatOutbox,
    ) -> Self {
        Self {
            config: Arc::new(config),
            forge,
            store,
            outbox,
        }
    }

    /// Construct every component sharing this context.
    pub fn build_services(&self) -> Services {
        let resolver = Arc::new(PermissionResolver::new(
            self.forge.clone(),
            UserAliases::new(&self.config.users),
        ));
        let notifier = Notifier::new(resolver.clone(), self.outbox.clone());
        let engine = Arc::new(AssignmentEngine::new(
            self.store.clone(),
            self.forge.clone(),
            resolver,
        ));

        Services {
            ingestor: Arc::new(EventIngestor::new(
                self.store.clone(),
                notifier.clone(),
                self.config.notify.clone(),
            )),
            commands: Arc::new(CommandHandler::new(
                self.store.clone(),
                engine.clone(),
                self.config.notify.clone(),
            )),
            engine,
            reminders: Arc::new(ReminderScheduler::new(
                self.store.clone(),
                notifier,
                self.config.notify.clone(),
            )),
            hooks: Arc::new(HookProvisioner::new(
                self.store.clone(),
                self.forge.clone(),
                &self.config,
            )),
        }
    }
}

/// Open the database and GitLab client described by `config`.
pub async fn connect(
    config: Config,
) -> Result<(AppContext, mpsc::UnboundedReceiver<ChatMessage>), AppError> {
    let pool = db::initialize(&config.database_path).await?;
    let store: Arc<dyn NotificationStore> = Arc::new(SqliteStore::new(pool));
    let client = GitLabClient::new(GitLabClientConfig::from(&config.gitlab))?;
    let forge: Arc<dyn Forge> = Arc::new(client);
    let (outbox, chat_rx) = ChatOutbox::new();
    Ok((AppContext::new(config, forge, store, outbox), chat_rx))
}

/// Run the relay until `cancel` fires.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), AppError> {
    let (ctx, chat_rx) = connect(config).await?;
    let services = ctx.build_services();
    let (presence_tx, presence_rx) = mpsc::channel(PRESENCE_QUEUE);

    let delivery = ChatDelivery::new(&ctx.config.chat)?;
    let delivery = tokio::spawn(delivery.run(chat_rx, cancel.clone()));
    let reminders = services.reminders.clone().spawn(presence_rx, cancel.clone());
    let hooks = services.hooks.clone().spawn(cancel.clone());

    let app = server::router(ServerState {
        ingestor: services.ingestor.clone(),
        commands: services.commands.clone(),
        presence_tx,
    });
    let served = server::serve(&ctx.config.listen_addr, app, cancel.clone()).await;

    // Stop the loops too if the server exited on its own.
    cancel.cancel();
    for (name, task) in [("chat", delivery), ("reminders", reminders), ("hooks", hooks)] {
        if let Err(e) = task.await {
            log::error!("[runtime] {} task panicked: {}", name, e);
        }
    }

    served
}

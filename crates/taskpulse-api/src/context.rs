//! Composition root.
//!
//! [`AppContext`] owns every long-lived collaborator: repositories, cache,
//! event bus, mail queue and the services built on them. [`AppState`] is the
//! cheap, cloneable slice of it that axum handlers receive.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tracing::info;

use taskpulse_core::{Error, EventBus, Mailer, Result, UserRepository};
use taskpulse_db::{Database, MemoryStore, PoolConfig, Repositories};
use taskpulse_jobs::{
    DeadlineReminderHandler, DeadlineSweep, JobWorker, MailDeps, MailQueue, SweepConfig,
    TaskAssignmentHandler, WorkerBuilder, WorkerConfig,
};

use crate::config::{ApiConfig, RelayBackend, StoreBackend};
use crate::services::{RedisEventRelay, ReportAggregator, TaskCoordinator, TaskListCache};

/// Long-lived application components.
pub struct AppContext {
    pub repos: Repositories,
    pub cache: TaskListCache,
    pub events: Arc<EventBus>,
    pub mail: MailQueue,
    pub coordinator: TaskCoordinator,
    pub reports: ReportAggregator,
    /// Present when running against PostgreSQL.
    pub database: Option<Database>,
    ws_connections: Arc<AtomicUsize>,
}

impl AppContext {
    /// Wire the services around a set of repositories.
    pub fn new(
        repos: Repositories,
        cache: TaskListCache,
        events: Arc<EventBus>,
        max_retries: i32,
    ) -> Self {
        let mail = MailQueue::new(repos.jobs.clone()).with_max_retries(max_retries);
        let coordinator =
            TaskCoordinator::new(repos.tasks.clone(), cache.clone(), events.clone(), mail.clone());
        let reports = ReportAggregator::new(repos.tasks.clone());
        Self {
            repos,
            cache,
            events,
            mail,
            coordinator,
            reports,
            database: None,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// In-memory context with default cache and bus settings.
    pub fn in_memory(store: &MemoryStore) -> Self {
        let defaults = ApiConfig::default();
        Self::new(
            Repositories::from(store),
            TaskListCache::memory(defaults.cache_ttl),
            Arc::new(EventBus::new(defaults.event_bus_capacity)),
            defaults.job_max_retries,
        )
    }

    /// Connect the configured backends and run migrations.
    pub async fn from_config(config: &ApiConfig) -> Result<Self> {
        let events = Arc::new(EventBus::new(config.event_bus_capacity));
        let cache = TaskListCache::from_config(config).await;

        let (repos, database) = match config.store {
            StoreBackend::Postgres => {
                let url = config.database_url.as_deref().ok_or_else(|| {
                    Error::Config("DATABASE_URL is required when STORE_BACKEND=postgres".into())
                })?;
                let db = Database::connect_with_config(url, PoolConfig::from_env()).await?;
                db.migrate().await?;
                info!(subsystem = "db", "Database migrations applied");
                (Repositories::from(&db), Some(db))
            }
            StoreBackend::Memory => {
                info!(subsystem = "db", "Using in-memory store; data is lost on exit");
                (Repositories::from(&MemoryStore::new()), None)
            }
        };

        info!(
            subsystem = "api",
            cache = cache.backend_name(),
            node_id = %events.node_id(),
            "Application context ready"
        );

        let mut context = Self::new(repos, cache, events, config.job_max_retries);
        context.database = database;
        Ok(context)
    }

    /// Handler state.
    pub fn state(&self) -> AppState {
        AppState {
            users: self.repos.users.clone(),
            coordinator: self.coordinator.clone(),
            reports: self.reports.clone(),
            events: self.events.clone(),
            ws_connections: self.ws_connections.clone(),
        }
    }

    /// Mail worker wired with both email handlers.
    pub fn worker(&self, config: WorkerConfig, mailer: Arc<dyn Mailer>, from: String) -> JobWorker {
        let deps = MailDeps {
            tasks: self.repos.tasks.clone(),
            users: self.repos.users.clone(),
            mailer,
            from,
        };
        WorkerBuilder::new(self.repos.jobs.clone())
            .with_config(config)
            .with_handler(TaskAssignmentHandler::new(deps.clone()))
            .with_handler(DeadlineReminderHandler::new(deps))
            .build()
    }

    /// Daily deadline sweep feeding the mail queue.
    pub fn sweep(&self, config: SweepConfig) -> DeadlineSweep {
        DeadlineSweep::new(self.repos.tasks.clone(), self.mail.clone(), config)
    }

    /// Cross-process relay, if one is configured.
    pub fn relay(&self, config: &ApiConfig) -> Result<Option<RedisEventRelay>> {
        match config.event_relay {
            RelayBackend::None => Ok(None),
            RelayBackend::Redis => {
                RedisEventRelay::new(&config.redis_url, self.events.clone()).map(Some)
            }
        }
    }
}

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub coordinator: TaskCoordinator,
    pub reports: ReportAggregator,
    pub events: Arc<EventBus>,
    /// Open WebSocket sessions.
    pub ws_connections: Arc<AtomicUsize>,
}

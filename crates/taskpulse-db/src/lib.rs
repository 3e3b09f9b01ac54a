//! # taskpulse-db
//!
//! Storage layer for taskpulse.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for tasks, users and the mail job queue
//! - In-memory repositories with the same contracts
//!
//! ## Example
//!
//! ```rust,ignore
//! use taskpulse_db::{Database, NewTask, TaskRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/taskpulse").await?;
//!     db.migrate().await?;
//!     let tasks = db.tasks.query_by_owner(owner_id, &Default::default()).await?;
//!     println!("{} tasks", tasks.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod jobs;
pub mod memory;
pub mod pool;
pub mod tasks;
pub mod test_fixtures;
pub mod users;

// Re-export core types
pub use taskpulse_core::*;

pub use jobs::PgJobRepository;
pub use memory::{MemoryJobRepository, MemoryStore, MemoryTaskRepository, MemoryUserRepository};
pub use pool::{connect_pool, PoolConfig};
pub use tasks::PgTaskRepository;
pub use users::{hash_token, PgUserRepository};

/// Combined PostgreSQL context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub tasks: PgTaskRepository,
    pub users: PgUserRepository,
    pub jobs: PgJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            tasks: PgTaskRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

/// Trait-object view of a storage backend.
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub users: Arc<dyn UserRepository>,
    pub jobs: Arc<dyn JobRepository>,
}

impl From<&Database> for Repositories {
    fn from(db: &Database) -> Self {
        Self {
            tasks: Arc::new(db.tasks.clone()),
            users: Arc::new(db.users.clone()),
            jobs: Arc::new(db.jobs.clone()),
        }
    }
}

impl From<&MemoryStore> for Repositories {
    fn from(store: &MemoryStore) -> Self {
        Self {
            tasks: store.tasks.clone(),
            users: store.users.clone(),
            jobs: store.jobs.clone(),
        }
    }
}

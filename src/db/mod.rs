use crate::config::{DatabaseConfig, StoreBackend};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

pub mod frames;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repositories;

use models::{ConversationTurn, Event};

pub use frames::FrameWriter;
pub use memory::MemoryEventStore;
pub use repositories::PgEventStore;

/// Durable, append-only storage for events and their conversations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new event and return its id
    async fn save(&self, event: &Event) -> Result<Uuid, Error>;

    async fn get(&self, id: Uuid) -> Result<Option<Event>, Error>;

    /// Append a turn. Fails when the event is unknown or the turn index is
    /// not the next one for that event.
    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), Error>;

    /// All turns of an event ordered by turn index
    async fn turns(&self, event_id: Uuid) -> Result<Vec<ConversationTurn>, Error>;

    /// Newest events first
    async fn recent(&self, limit: usize) -> Result<Vec<Event>, Error>;
}

/// Database service for handling connections and migrations
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
    config: DatabaseConfig,
}

impl DatabaseService {
    /// Create a new database service
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        let service = Self {
            pool: Arc::new(pool),
            config: config.clone(),
        };

        if service.config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    /// Health check for database
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Build the event store selected by configuration
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn EventStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory event store");
            Ok(Arc::new(MemoryEventStore::new()))
        }
        StoreBackend::Postgres => {
            let service = DatabaseService::new(config).await?;
            if !service.health_check().await? {
                return Err(Error::Database("Database health check failed".into()).into());
            }
            Ok(Arc::new(PgEventStore::new(service.pool.clone())))
        }
    }
}

use std::time::Duration;

use sift_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::broker::{DEFAULT_LEASE, PgBroker};
use crate::config::DatabaseConfig;
use crate::failed_repository::FailedRepository;
use crate::invalid_repository::InvalidRepository;
use crate::product_repository::ProductRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    broker_lease: Duration,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self {
            pool,
            broker_lease: config.broker_lease,
        })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            broker_lease: DEFAULT_LEASE,
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`PgBroker`] backed by this pool, using the configured lease.
    pub fn broker(&self) -> PgBroker {
        PgBroker::new(self.pool.clone()).with_lease(self.broker_lease)
    }

    /// Get a [`ProductRepository`] backed by this pool.
    pub fn product_repo(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    /// Get a [`FailedRepository`] backed by this pool.
    pub fn failed_repo(&self) -> FailedRepository {
        FailedRepository::new(self.pool.clone())
    }

    /// Get an [`InvalidRepository`] backed by this pool.
    pub fn invalid_repo(&self) -> InvalidRepository {
        InvalidRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

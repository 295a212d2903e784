pub mod broker;
pub mod config;
pub mod database;
pub mod failed_repository;
pub mod invalid_repository;
pub mod product_repository;

pub use broker::PgBroker;
pub use config::DatabaseConfig;
pub use database::Database;
pub use failed_repository::FailedRepository;
pub use invalid_repository::InvalidRepository;
pub use product_repository::ProductRepository;

/// Map a sqlx error, surfacing unique-key collisions as their own variant.
pub(crate) fn db_error(e: sqlx::Error) -> sift_core::AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            sift_core::AppError::UniqueViolation
        }
        _ => sift_core::AppError::DatabaseError(e.to_string()),
    }
}

//! Document store layer
//!
//! Provides:
//! - Connection pool management
//! - Corpus record types shared by retrieval and answer assembly
//! - The `DocumentStore` abstraction over the pre-built index

mod documents;
mod store;

pub use documents::{
    ColumnDescription, DocumentRecord, Provenance, SourceCitation, TableDescription,
    UNKNOWN_SOURCE,
};
pub use store::{escape_like, DocumentStore, PgDocumentStore};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
///
/// The index is built and maintained elsewhere; this service only reads.
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to document store...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to document store: {}", e),
            })?;

        info!("Document store connection established");

        Ok(Self { primary })
    }

    /// Get the connection used for all queries
    pub fn read(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}

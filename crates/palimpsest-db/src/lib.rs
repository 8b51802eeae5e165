//! # palimpsest-db
//!
//! PostgreSQL + pgvector persistence layer for palimpsest.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for chunks, annotations, connections, and jobs
//! - Batched writes with transient-failure retry
//!
//! ## Example
//!
//! ```rust,ignore
//! use palimpsest_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/palimpsest").await?;
//!     let generation = db.chunks.current_generation(document_id).await?;
//!     println!("current generation: {:?}", generation);
//!     Ok(())
//! }
//! ```

pub mod annotations;
pub mod batch;
pub mod chunks;
pub mod connections;
pub mod jobs;
pub mod pool;

// Re-export core types
pub use palimpsest_core::*;

pub use annotations::PgAnnotationRepository;
pub use batch::BatchWriter;
pub use chunks::PgChunkRepository;
pub use connections::PgConnectionRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Versioned chunk storage.
    pub chunks: PgChunkRepository,
    /// Annotation storage and recovery outcomes.
    pub annotations: PgAnnotationRepository,
    /// Cross-document connection storage and remaps.
    pub connections: PgConnectionRepository,
    /// Background job queue.
    pub jobs: PgJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            chunks: PgChunkRepository::new(pool.clone()),
            annotations: PgAnnotationRepository::new(pool.clone()),
            connections: PgConnectionRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::new(pool))
    }
}

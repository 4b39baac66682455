//! Relational persistence with vector-augmented search
//!
//! A deadpool-managed PostgreSQL pool behind typed repositories. Embeddings
//! cross the wire as `real[]` parameters and are cast to `vector` in SQL, so
//! the store needs no ORM and no client-side vector type.

pub mod contexts;
pub mod library;
pub mod missions;
pub mod models;
pub mod requests;
pub mod schema;
pub mod targets;

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

use crate::{Error, Result};

pub use contexts::{ContextDiff, ContextRepo, FieldDiff};
pub use library::{LibraryRepo, LibraryStats};
pub use missions::{ActionRepo, MissionRepo, MissionUpdate, TechniqueAggregate, TechniqueStats};
pub use requests::RequestRepo;
pub use targets::{TargetDefaults, TargetRepo};

/// Shared handle over the connection pool; repositories are cheap views.
#[derive(Clone, Debug)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Connect to PostgreSQL and verify the connection with a probe query.
    pub async fn connect(database_url: &str, pool_size: usize) -> Result<Self> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size.max(1)));

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::internal(format!("failed to create PostgreSQL pool: {e}")))?;

        let client = pool.get().await?;
        client.query("SELECT 1", &[]).await?;
        info!(pool_size, "connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Create the extension, tables and indexes. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await?;
        client.batch_execute(schema::SCHEMA).await?;
        info!("database schema initialized");
        Ok(())
    }

    pub fn targets(&self) -> TargetRepo {
        TargetRepo::new(self.pool.clone())
    }

    pub fn contexts(&self) -> ContextRepo {
        ContextRepo::new(self.pool.clone())
    }

    pub fn missions(&self) -> MissionRepo {
        MissionRepo::new(self.pool.clone())
    }

    pub fn actions(&self) -> ActionRepo {
        ActionRepo::new(self.pool.clone())
    }

    pub fn requests(&self) -> RequestRepo {
        RequestRepo::new(self.pool.clone())
    }

    pub fn library(&self) -> LibraryRepo {
        LibraryRepo::new(self.pool.clone())
    }
}

/// Parse a pgvector text literal back into floats.
pub(crate) fn parse_vector_literal(raw: &str) -> Result<Vec<f32>> {
    let trimmed = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::Parse(format!("not a vector literal: {raw}")))?;
    if trimmed.trim().is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| Error::Parse(format!("bad vector component {part:?}: {e}")))
        })
        .collect()
}

/// True when the database error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
}

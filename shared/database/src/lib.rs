pub mod catalog;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod repositories;
pub mod seed;
pub mod store;

pub use catalog::{cosine_similarity, CatalogSearch, Embedder, EmbeddingSearch};
pub use memory::{MemoryCatalog, MemoryStore};
pub use postgres::{create_postgres_pool, health_check as postgres_health_check, PostgresPool};
pub use repositories::*;
pub use seed::CatalogSeed;
pub use store::Store;

use anyhow::Result;
use procura_utils::DatabaseConfig;
use std::time::Duration;

/// Connects to PostgreSQL and brings the schema up to date.
pub async fn initialize_postgres(config: &DatabaseConfig) -> Result<PostgresPool> {
    let pool = create_postgres_pool(
        &config.postgres_url,
        config.max_connections,
        Duration::from_secs(config.connection_timeout_seconds),
    )
    .await?;
    postgres_health_check(&pool).await?;

    migrations::run_postgres_migrations(&pool).await?;

    Ok(pool)
}

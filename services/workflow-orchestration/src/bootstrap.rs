//! Wires the configured store, catalog and embedder into a `RunService`.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use procura_database::{
    initialize_postgres, CatalogSearch, CatalogSeed, Embedder, EmbeddingSearch, MemoryCatalog, MemoryStore, PgCatalog,
    PgStore, Store,
};
use procura_utils::{AppConfig, BomParser, DatabaseConfig, ProcuraResult, StoreBackend};

use crate::embedding::OpenAiEmbedder;
use crate::engine::{EngineSettings, WorkflowEngine};
use crate::matching::{MatchEngine, MatchSettings};
use crate::progress::ProgressReporter;
use crate::service::RunService;

pub async fn build_service(config: &AppConfig) -> Result<RunService> {
    let embedder: Option<Arc<dyn Embedder>> = match OpenAiEmbedder::from_config(&config.embedding)? {
        Some(embedder) => Some(Arc::new(embedder)),
        None => {
            info!("No embedding API key configured; semantic matching disabled");
            None
        }
    };

    let (store, catalog, embeddings) = match config.database.backend {
        StoreBackend::Memory => {
            let mut catalog = memory_catalog(&config.database)?;
            if let Some(embedder) = embedder {
                catalog = catalog.with_embedder(embedder);
            }
            let catalog = Arc::new(catalog);
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let search: Arc<dyn CatalogSearch> = catalog.clone();
            let embeddings: Arc<dyn EmbeddingSearch> = catalog;
            (store, search, embeddings)
        }
        StoreBackend::Postgres => {
            let pool = initialize_postgres(&config.database).await?;
            let mut catalog = PgCatalog::new(pool.clone());
            if let Some(embedder) = embedder {
                catalog = catalog.with_embedder(embedder);
            }
            let catalog = Arc::new(catalog);
            let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
            let search: Arc<dyn CatalogSearch> = catalog.clone();
            let embeddings: Arc<dyn EmbeddingSearch> = catalog;
            (store, search, embeddings)
        }
    };

    let matcher = Arc::new(MatchEngine::new(catalog, embeddings, MatchSettings::from(&config.matching)));
    let engine = WorkflowEngine::new(
        store.clone(),
        Arc::new(BomParser::new()?),
        matcher,
        ProgressReporter::new(store),
        EngineSettings::from(config),
    );

    Ok(RunService::new(Arc::new(engine)))
}

/// The memory backend's catalog: the configured seed file, the bundled demo
/// catalog, or nothing when seeding is off.
fn memory_catalog(config: &DatabaseConfig) -> ProcuraResult<MemoryCatalog> {
    if !config.seed_catalog {
        info!("Catalog seeding disabled; memory catalog starts empty");
        return Ok(MemoryCatalog::new());
    }

    let seed = match &config.catalog_seed_path {
        Some(path) => CatalogSeed::from_path(path)?,
        None => CatalogSeed::demo()?,
    };
    Ok(MemoryCatalog::from_seed(&seed))
}

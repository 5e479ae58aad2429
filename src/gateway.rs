//! The [`Gateway`] context: every long-lived component, built once at
//! startup and shared by the HTTP server and the CLI.
//!
//! [`Gateway::open`] selects the storage backend and providers from the
//! config, connects, and migrates. [`Gateway::from_parts`] takes explicit
//! backends and providers, which is how tests wire in mocks.
//! [`Gateway::shutdown`] closes the database pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;

use rag_gateway_core::chunk::Chunker;
use rag_gateway_core::classify::PromptClassifier;
use rag_gateway_core::embedding::EmbeddingProvider;
use rag_gateway_core::store::memory::InMemoryStore;
use rag_gateway_core::store::{CollectionStore, VectorIndex};
use rag_gateway_core::Result;

use crate::config::{self, Config};
use crate::db;
use crate::embedding::{self, EmbeddingClient, EmbeddingSettings};
use crate::generation::{self, GenerationClient, GenerationProvider, GenerationSettings};
use crate::index::VectorIndexAdapter;
use crate::ingest::IngestionPipeline;
use crate::migrate;
use crate::orchestrator::Orchestrator;
use crate::planner::{self, RetrievalPlanner};
use crate::registry::CollectionRegistry;
use crate::sqlite_store::SqliteStore;

/// Backends and providers for [`Gateway::from_parts`].
pub struct GatewayParts {
    pub index: Arc<dyn VectorIndex>,
    pub catalog: Arc<dyn CollectionStore>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub generation: Arc<dyn GenerationProvider>,
    /// Overrides the classifier named by `planner.classifier`.
    pub classifier: Option<Arc<dyn PromptClassifier>>,
}

impl GatewayParts {
    /// In-memory storage with the given providers.
    pub fn in_memory(
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let index: Arc<dyn VectorIndex> = store.clone();
        Self {
            index,
            catalog: store,
            embedding,
            generation,
            classifier: None,
        }
    }
}

pub struct Gateway {
    config: Config,
    pool: Option<SqlitePool>,
    index: VectorIndexAdapter,
    registry: Arc<CollectionRegistry>,
    pipeline: Arc<IngestionPipeline>,
    planner: Arc<RetrievalPlanner>,
    orchestrator: Orchestrator,
}

impl Gateway {
    /// Build every component from configuration.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        config::validate(&config)?;

        let embedding = embedding::create_provider(&config.embedding)?;
        let generation = generation::create_provider(&config.generation)?;

        let index: Arc<dyn VectorIndex>;
        let catalog: Arc<dyn CollectionStore>;
        let mut pool = None;
        match config.store.backend.as_str() {
            "memory" => {
                let store = Arc::new(InMemoryStore::new());
                index = store.clone();
                catalog = store;
            }
            _ => {
                let sqlite = db::connect(&config)
                    .await
                    .with_context(|| format!("opening {}", config.db.path.display()))?;
                migrate::migrate_pool(&sqlite).await?;
                let store = Arc::new(SqliteStore::new(sqlite.clone()));
                index = store.clone();
                catalog = store;
                pool = Some(sqlite);
            }
        }

        let mut gateway = Self::from_parts(
            config,
            GatewayParts {
                index,
                catalog,
                embedding,
                generation,
                classifier: None,
            },
        )?;
        gateway.pool = pool;

        tracing::info!(
            backend = %gateway.config.store.backend,
            embedding = %gateway.config.embedding.provider,
            generation = %gateway.config.generation.provider,
            classifier = gateway.planner.classifier_name(),
            "gateway ready"
        );
        Ok(gateway)
    }

    /// Build every component from explicit backends and providers.
    pub fn from_parts(config: Config, parts: GatewayParts) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.max_chars, config.chunking.overlap_chars)?;

        let embedder = EmbeddingClient::new(
            parts.embedding,
            EmbeddingSettings::from(&config.embedding),
        );
        let generation = GenerationClient::new(
            parts.generation,
            GenerationSettings::from(&config.generation),
        );

        let index = VectorIndexAdapter::new(
            parts.index,
            parts.catalog.clone(),
            Duration::from_secs(config.store.timeout_secs),
        );
        let registry = Arc::new(CollectionRegistry::new(parts.catalog, index.clone()));

        let classifier = match parts.classifier {
            Some(c) => c,
            None => planner::create_classifier(&config.planner, &generation)?,
        };
        let planner = Arc::new(RetrievalPlanner::new(
            classifier,
            registry.clone(),
            &config.retrieval,
        ));

        let pipeline = Arc::new(IngestionPipeline::new(
            chunker,
            embedder.clone(),
            index.clone(),
            registry.clone(),
        ));
        let orchestrator = Orchestrator::new(
            planner.clone(),
            embedder,
            index.clone(),
            generation,
            config.retrieval.min_relevance,
            config.generation.stream_buffer,
        );

        Ok(Self {
            config,
            pool: None,
            index,
            registry,
            pipeline,
            planner,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &VectorIndexAdapter {
        &self.index
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn planner(&self) -> &Arc<RetrievalPlanner> {
        &self.planner
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Close the database pool, waiting for checked-out connections.
    pub async fn shutdown(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::info!("gateway shut down");
    }
}

//! # RAG Gateway
//!
//! The retrieval-augmented generation core of an LLM-serving gateway.
//!
//! Documents are chunked, embedded, and indexed into named collections.
//! Generation requests are planned (retrieve or not), optionally augmented
//! with retrieved passages, and streamed back token by token with
//! cancellation reaching all the way to the provider.
//!
//! ## Architecture
//!
//! ```text
//!  ingest ──▶ Chunker ──▶ EmbeddingClient ──▶ VectorIndexAdapter ──▶ SQLite / memory
//!                                                   ▲
//!  generate ──▶ Planner ──▶ (embed + query) ────────┘
//!                  │
//!                  ▼
//!            GenerationClient ──▶ token stream ──▶ SSE / stdout
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragd init
//! ragd ingest admissions.txt --collection uni-admissions
//! ragd ask "Điểm chuẩn Bách Khoa là bao nhiêu?" --collection uni-admissions --adaptive
//! ragd serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector index and collection catalog |
//! | [`embedding`] | Embedding providers and the batching client |
//! | [`generation`] | Generation providers and cancellable token streams |
//! | [`index`] | Namespace-checked vector index adapter |
//! | [`registry`] | Collection registry and ingestion locks |
//! | [`ingest`] | Ingestion pipeline with rollback |
//! | [`planner`] | Retrieval planner and route classifiers |
//! | [`orchestrator`] | Per-request generation state machine |
//! | [`gateway`] | Context object wiring every component |
//! | [`server`] | HTTP + SSE surface |
//!
//! Runtime-free pieces (models, chunker, errors, storage traits, the
//! in-memory backend, prompt templates) live in `rag_gateway_core`.

pub mod config;
pub mod db;
pub mod embedding;
pub mod gateway;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod server;
pub mod sqlite_store;

pub use rag_gateway_core::{ProviderError, RagError, Result};

//! # RAG Gateway Core
//!
//! Runtime-free logic shared by the RAG Gateway: data models, chunking,
//! the error taxonomy, provider and storage traits, the in-memory backend,
//! prompt classification, and prompt envelopes.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything
//! that performs I/O lives in the `rag-gateway` app crate.

pub mod chunk;
pub mod classify;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod store;

pub use error::{ProviderError, RagError, Result};

//! # flowrag core
//!
//! Runtime-free retrieval logic for flowrag: data models, chunking, query
//! analysis, service-aware multi-collection retrieval, context assembly and
//! the collaborator traits (embedding provider, vector store, weight source)
//! that the application crate implements.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Timeouts and
//! persistence are supplied by the caller through the collaborator traits.
//!
//! ```text
//! query ──▶ QueryAnalyzer ──▶ Retriever ──▶ ContextAssembler ──▶ instruction text
//!                               ▲
//!                               └── WeightSource (feedback effectiveness)
//! ```

pub mod analyze;
pub mod assemble;
pub mod catalog;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieve;
pub mod shape;
pub mod store;
pub mod vocab;

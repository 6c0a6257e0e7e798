//! # flowrag
//!
//! Retrieval-augmented context for workflow generation. Given a natural
//! language request ("when a webhook arrives, post to Slack"), flowrag
//! classifies its intent, works out which building blocks it needs,
//! retrieves block documentation, workflow patterns and examples from
//! several vector collections, and assembles a structured context for an
//! external generator. Generation outcomes feed back into retrieval.
//!
//! The algorithms live in the runtime-free `flowrag-core` crate; this crate
//! supplies configuration, SQLite persistence, HTTP embedding providers,
//! timeouts, ingestion and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌────────────────┐
//! │ Analyzer │──▶│ Retriever │──▶│ Assembler │──▶│ AssembledContext│
//! └──────────┘   └─────┬─────┘   └───────────┘   └───────┬────────┘
//!                      │ weights                          │ outcome
//!                ┌─────┴──────┐                           ▼
//!                │  Feedback  │◀──────────────── external generator
//!                └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | OpenAI, Ollama and local embedding providers |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`timeout`] | Timeout decorators for collaborators |
//! | [`feedback`] | Generation history, effectiveness weights, analytics |
//! | [`ingest`] | Directory ingestion |
//! | [`pipeline`] | End-to-end wiring |
//! | [`stats`] | `flowrag stats` |

pub mod config;
pub mod db;
pub mod embedding;
pub mod feedback;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod sqlite_store;
pub mod stats;
pub mod timeout;

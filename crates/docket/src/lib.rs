//! # Docket
//!
//! A document indexing and hybrid semantic retrieval engine for legal
//! case-analysis corpora.
//!
//! Docket ingests uploaded documents into overlapping text fragments
//! with unit-normalized embedding vectors, stores them in Postgres with
//! pgvector, and answers questions by tiered retrieval (kind-scoped
//! vector search, unscoped vector search, lexical fallback) feeding a
//! strictly source-grounded prompt to an external answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Extractor │──▶│ Chunk + Embed │──▶│  Postgres    │
//! │ pdf/docx/… │   │   pipeline    │   │  + pgvector  │
//! └───────────┘   └──────────────┘   └──────┬──────┘
//!                                           │
//!                 ┌─────────────────────────┤
//!                 ▼                         ▼
//!          ┌────────────┐           ┌──────────────┐
//!          │  retrieval  │──────────▶│ chat service │──▶ answer + sources
//!          │  (tiered)   │           │  (history)   │
//!          └────────────┘           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Multi-format text extraction |
//! | [`db`] | Postgres connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`pg_store`] | Postgres + pgvector fragment store |
//! | [`providers`] | HTTP embedding and answer-generation providers |
//! | [`retry`] | Resilient store-operation wrapper |
//! | [`ingest`] | Ingestion pipeline |
//! | [`chat`] | Chat turns over retrieval |

pub mod chat;
pub mod config;
pub mod db;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod pg_store;
pub mod providers;
pub mod retry;

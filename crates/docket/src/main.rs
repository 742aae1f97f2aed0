//! # Docket CLI
//!
//! The `docket` binary drives the indexing and retrieval engine. It
//! stands in for the outer application surfaces (upload endpoints, chat
//! UI) that call into this core in a full deployment.
//!
//! ## Usage
//!
//! ```bash
//! docket --config ./config/docket.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docket init` | Create the schema (pgvector extension included) |
//! | `docket ingest <file>` | Extract, chunk, embed, and store a document |
//! | `docket search "<query>"` | Run the tiered retrieval over the corpus |
//! | `docket chat "<message>"` | Run a chat turn against a session |
//! | `docket documents` | List ingested documents |
//! | `docket delete <document>` | Delete a document and its fragments |
//! | `docket context <fragment>` | Expand a cited fragment with its neighbors |
//! | `docket sessions` | List a user's chat sessions |
//!
//! ## Examples
//!
//! ```bash
//! docket init
//! docket ingest ./cases/bail-act.pdf --kind bail --title "Bail Act"
//! docket search "bail conditions" --kind bail
//! docket chat "What are the bail conditions?" --kind bail
//! docket chat "And the sureties?" --session <uuid>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use docket_core::chunk::ChunkParams;
use docket_core::models::AnalysisKind;
use docket_core::retrieval::{retrieve, RetrievalParams};
use docket_core::store::FragmentStore;

use docket::chat::ChatEngine;
use docket::config::{load_config, Config};
use docket::db;
use docket::ingest::{ingest_document, IngestParams};
use docket::migrate;
use docket::pg_store::PgStore;
use docket::providers::{create_answerer, create_embedder};
use docket::retry::RetryPolicy;

/// Command-line interface for the Docket indexing and retrieval
/// engine.
#[derive(Parser)]
#[command(
    name = "docket",
    about = "Docket — document indexing and hybrid semantic retrieval for legal case analysis",
    version,
    long_about = "Docket ingests uploaded documents into overlapping text fragments with \
    unit-normalized embeddings stored in Postgres + pgvector, and answers questions through \
    tiered retrieval (kind-scoped vector, unscoped vector, lexical fallback) feeding a \
    source-grounded prompt to an external answer generator."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docket.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Enables the pgvector extension and creates all tables. Idempotent.
    Init,

    /// Ingest a document file.
    ///
    /// Extracts text (pdf, docx, xlsx, csv, tsv, txt, md), chunks it into
    /// overlapping fragments, embeds each fragment, and stores everything
    /// in one transaction.
    Ingest {
        /// File to ingest.
        file: PathBuf,

        /// Analysis kind: case-section, bail, or human-rights.
        #[arg(long)]
        kind: AnalysisKind,

        /// Display title; defaults to the file stem.
        #[arg(long)]
        title: Option<String>,

        /// Owning user id.
        #[arg(long, default_value_t = 1)]
        user: i64,
    },

    /// Search the corpus with the tiered retrieval.
    Search {
        /// Query text.
        query: String,

        /// Restrict to one analysis kind.
        #[arg(long)]
        kind: Option<AnalysisKind>,

        /// Maximum results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Run one chat turn.
    ///
    /// Starts a new session when `--session` is not given (then `--kind`
    /// is required). Prints the answer, the numbered sources backing its
    /// citations, and the session id for follow-up turns.
    Chat {
        /// The user message.
        message: String,

        /// Existing session to continue.
        #[arg(long)]
        session: Option<Uuid>,

        /// Analysis kind for a new session, or a retrieval-scope
        /// override for an existing one.
        #[arg(long)]
        kind: Option<AnalysisKind>,

        /// Owning user id.
        #[arg(long, default_value_t = 1)]
        user: i64,
    },

    /// List ingested documents.
    Documents {
        /// Restrict to one analysis kind.
        #[arg(long)]
        kind: Option<AnalysisKind>,
    },

    /// Delete a document and, by cascade, its fragments and embeddings.
    Delete {
        /// Document id.
        document: Uuid,
    },

    /// Show a cited fragment with the surrounding text of its
    /// neighbors.
    Context {
        /// Fragment id from a search result or source list.
        fragment: Uuid,

        /// How many neighboring fragments to include on each side.
        #[arg(long, default_value_t = 2)]
        radius: i64,
    },

    /// List a user's chat sessions.
    Sessions {
        #[arg(long, default_value_t = 1)]
        user: i64,
    },
}

fn retrieval_params(config: &Config, limit: Option<i64>) -> RetrievalParams {
    RetrievalParams {
        limit: limit.unwrap_or(config.retrieval.limit),
        similarity_threshold: config.retrieval.similarity_threshold,
        relaxed_threshold: config.retrieval.relaxed_threshold,
    }
}

fn chunk_params(config: &Config) -> ChunkParams {
    ChunkParams {
        target_chars: config.chunking.target_chars,
        overlap_chars: config.chunking.overlap_chars,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docket=info,docket_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db).await?;
            migrate::run_migrations(&pool).await?;
            println!("database initialized");
            pool.close().await;
        }

        Commands::Ingest {
            file,
            kind,
            title,
            user,
        } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload.bin");
            let title = title.unwrap_or_else(|| {
                file.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("Untitled")
                    .to_string()
            });

            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            let embedder = create_embedder(&config.embedding)?;
            let retry = RetryPolicy::from(&config.retry);

            let report = ingest_document(
                &store,
                embedder.as_ref(),
                &chunk_params(&config),
                &retry,
                IngestParams {
                    bytes: &bytes,
                    filename,
                    title: &title,
                    kind,
                    user_id: user,
                },
            )
            .await?;

            println!("ingested {} ({})", report.document_id, kind);
            println!("  fragments: {}", report.fragment_count);
            println!("  embedded: {}", report.embedded_count);
            if let Some(warning) = report.extraction_warning {
                println!("  warning: {warning}");
            }
            store.pool().close().await;
        }

        Commands::Search { query, kind, limit } => {
            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            let embedder = create_embedder(&config.embedding)?;

            let outcome = retrieve(
                &store,
                embedder.as_ref(),
                &query,
                kind,
                &retrieval_params(&config, limit),
            )
            .await;

            if outcome.results.is_empty() {
                println!("No results.");
            }
            for (i, result) in outcome.results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} / {}",
                    i + 1,
                    result.final_score,
                    result.document_name,
                    result.kind
                );
                println!("    reason: {}", result.relevance_reason);
                println!(
                    "    excerpt: \"{}\"",
                    result.preview.replace('\n', " ").trim()
                );
                println!("    id: {}", result.fragment_id);
                println!();
            }
            println!("tier: {}", outcome.tier.as_str());
            store.pool().close().await;
        }

        Commands::Chat {
            message,
            session,
            kind,
            user,
        } => {
            let pool = db::connect(&config.db).await?;
            let store = Arc::new(PgStore::new(pool));
            let engine = ChatEngine::new(
                store,
                create_embedder(&config.embedding)?,
                create_answerer(&config.answerer)?,
                retrieval_params(&config, None),
                RetryPolicy::from(&config.retry),
            );

            let session_id = match session {
                Some(id) => id,
                None => {
                    let kind = kind.ok_or_else(|| {
                        anyhow::anyhow!("--kind is required when starting a new session")
                    })?;
                    let session = engine.start_session(user, kind).await?;
                    println!("started session {} ({})", session.id, session.kind);
                    session.id
                }
            };

            let turn = engine.respond(session_id, &message, kind).await?;

            println!("{}", turn.answer);
            if !turn.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &turn.sources {
                    println!(
                        "  {}. {} [{:.0}%] {}",
                        source.number,
                        source.document_name,
                        source.score * 100.0,
                        source.relevance_reason
                    );
                }
            }
            println!();
            println!("tier: {}", turn.tier.as_str());
            println!("session: {session_id}");
        }

        Commands::Documents { kind } => {
            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            let documents = store.list_documents(kind).await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for document in documents {
                println!(
                    "{}  {}  {}  uploaded {}",
                    document.id,
                    document.kind,
                    document.name,
                    document.uploaded_at.format("%Y-%m-%d %H:%M")
                );
            }
            store.pool().close().await;
        }

        Commands::Delete { document } => {
            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            if store.delete_document(document).await? {
                println!("deleted {document}");
            } else {
                println!("Document not found.");
            }
            store.pool().close().await;
        }

        Commands::Context { fragment, radius } => {
            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            match store.fragment_neighborhood(fragment, radius).await? {
                Some(context) => {
                    println!(
                        "{} / {} (fragment {})",
                        context.document_name, context.kind, context.ordinal
                    );
                    println!();
                    println!("{}", context.expanded_text);
                }
                None => println!("Fragment not found."),
            }
            store.pool().close().await;
        }

        Commands::Sessions { user } => {
            let pool = db::connect(&config.db).await?;
            let store = PgStore::new(pool);
            let sessions = store.list_sessions(user).await?;
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for session in sessions {
                println!(
                    "{}  {}  started {}",
                    session.id,
                    session.kind,
                    session.started_at.format("%Y-%m-%d %H:%M")
                );
            }
            store.pool().close().await;
        }
    }

    Ok(())
}

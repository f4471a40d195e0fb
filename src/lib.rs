//! # repolens
//!
//! **Retrieval-augmented question answering over source-code repositories.**
//!
//! repolens ingests a versioned snapshot of a repository, decomposes each
//! file into semantically meaningful chunks with structural metadata,
//! embeds chunks and hierarchical summaries into vector space, and serves
//! hybrid similarity search that feeds a prompt composed for an LLM
//! backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ SourceProvider│──▶│ Pipeline                 │──▶│  SQLite   │
//! │ git / local  │   │ chunk workers → embed    │   │ snapshots │
//! └──────────────┘   │ workers (bounded queues) │   │ + vectors │
//!                    └──────────────────────────┘   └────┬─────┘
//!                    ┌──────────────────────────┐        │
//!                    │ Summary engine           │◀───────┤
//!                    │ file → dir → architecture│        │
//!                    └──────────────────────────┘        ▼
//!                                             ┌───────────────────┐
//!                                             │ search → ask/wiki │
//!                                             └───────────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. A [`clients::SourceProvider`] yields [`models::SourceDocument`]s and a
//!    version identifier.
//! 2. The [`ingest::IngestService`] upserts product and source rows and
//!    resolves the [`models::SourceSnapshot`] for that version, reusing an
//!    unfinished snapshot when one exists.
//! 3. The [`pipeline::IngestPipeline`] streams documents through chunk
//!    workers ([`chunker`]) into embedding workers, persisting chunks and
//!    vectors through the [`store::Store`] port; the snapshot is marked
//!    indexed only after the whole run succeeds.
//! 4. The [`summary::SummaryEngine`] generates file, directory, and
//!    architecture summaries bottom-up, regenerating only what changed
//!    (content-hash diffing).
//! 5. [`search`] merges chunk and summary similarity for [`ask`] and
//!    [`wiki`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, selected by `--env` |
//! | [`models`] | Core data types: products, snapshots, files, chunks, summaries |
//! | [`tokenizer`] | Token counting/trimming against the embedder's tokenizer |
//! | [`content_type`] | Path + byte sniffing to MIME-style labels |
//! | [`chunker`] | AST, markup, and line-based chunking strategies |
//! | [`graph`] | Cross-chunk dependency graph (cycles, topo order, centrality) |
//! | [`pipeline`] | Two-stage concurrent ingestion with backpressure |
//! | [`ingest`] | Snapshot lifecycle: upsert, version check, finalize |
//! | [`summary`] | Incremental three-phase hierarchical summarization |
//! | [`store`] | Persistence port, in-memory and SQLite backends |
//! | [`clients`] | Embedding/LLM/source-provider ports and OpenAI clients |
//! | [`source_git`] | Git source provider (clone, fetch, per-file metadata) |
//! | [`search`] | Hybrid chunk + summary retrieval |
//! | [`ask`] | Prompt assembly and grounded answering |
//! | [`wiki`] | Markdown wiki generation from stored summaries |

pub mod ask;
pub mod chunker;
pub mod clients;
pub mod config;
pub mod content_type;
pub mod graph;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod source_git;
pub mod store;
pub mod summary;
pub mod tokenizer;
pub mod wiki;

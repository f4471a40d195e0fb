//! Command-line entry point.
//!
//! Three verbs: `index` a repository into a product, `ask` a question over
//! an indexed product, and `wiki generate` a markdown wiki from stored
//! summaries. Exits 0 on success and 1 with a single-line reason on
//! failure. Provider API keys come from the environment
//! (`OPENAI_API_KEY`); everything else from `config/<env>.toml`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use repolens::ask::AskService;
use repolens::clients::{OpenAiEmbedder, OpenAiLlm};
use repolens::config::{self, Config};
use repolens::ingest::{IndexParams, IngestService};
use repolens::pipeline::IngestPipeline;
use repolens::search::SearchEngine;
use repolens::source_git::{GitProvider, GitProviderConfig};
use repolens::store::sqlite::SqliteStore;
use repolens::store::Store;
use repolens::summary::SummaryEngine;
use repolens::wiki::WikiGenerator;

#[derive(Parser)]
#[command(
    name = "repolens",
    about = "Retrieval-augmented question answering over source-code repositories",
    version
)]
struct Cli {
    /// Environment name; selects config/<env>.toml
    #[arg(long, global = true, default_value = "dev")]
    env: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository snapshot and generate summaries
    Index {
        /// Product the source belongs to
        #[arg(long)]
        product: String,

        /// Repository URL
        #[arg(long)]
        url: String,

        /// Branch, tag, or commit to pin
        #[arg(long = "ref")]
        reference: Option<String>,

        /// Discard an existing snapshot of the same version and re-ingest
        #[arg(long)]
        force_init: bool,
    },

    /// Ask a question over an indexed product
    Ask {
        /// Product to query
        #[arg(long)]
        product: String,

        /// The question
        question: String,

        /// Print the retrieval hits the answer was grounded on
        #[arg(long)]
        show_sources: bool,
    },

    /// Wiki operations
    Wiki {
        #[command(subcommand)]
        action: WikiAction,
    },
}

#[derive(Subcommand)]
enum WikiAction {
    /// Generate a markdown wiki from stored summaries
    Generate {
        /// Product to generate for
        #[arg(long)]
        product: String,

        /// Output directory
        #[arg(long, default_value = "wiki")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&config::config_path(&cli.env))?;
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&config.database.path).await?);

    match cli.command {
        Commands::Index {
            product,
            url,
            reference,
            force_init,
        } => run_index(&config, store, product, url, reference, force_init).await,
        Commands::Ask {
            product,
            question,
            show_sources,
        } => run_ask(&config, store, product, question, show_sources).await,
        Commands::Wiki {
            action: WikiAction::Generate { product, out },
        } => run_wiki(store, product, out).await,
    }
}

fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")
}

fn build_embedder(config: &Config) -> Result<Arc<OpenAiEmbedder>> {
    Ok(Arc::new(OpenAiEmbedder::new(
        api_key()?,
        config.embedding.model.clone(),
        config.embedding.dimension,
    )?))
}

async fn run_index(
    config: &Config,
    store: Arc<SqliteStore>,
    product: String,
    url: String,
    reference: Option<String>,
    force_init: bool,
) -> Result<()> {
    let embedder = build_embedder(config)?;
    let llm = Arc::new(OpenAiLlm::new(
        api_key()?,
        config.llm.model.clone(),
        config.llm.timeout_secs,
    )?);

    let cache_dir = config.git.cache_dir.clone().unwrap_or_else(|| {
        config
            .database
            .path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(".git-cache")
    });
    let provider = Arc::new(GitProvider::new(GitProviderConfig {
        cache_dir,
        include_globs: config.git.include_globs.clone(),
        exclude_globs: config.git.exclude_globs.clone(),
        shallow: config.git.shallow.unwrap_or(true),
    })?);

    let store_dyn: Arc<dyn Store> = store.clone();
    let pipeline = Arc::new(IngestPipeline::new(
        store_dyn.clone(),
        embedder.clone(),
        config.chunking.limits(),
        config.pipeline.pipeline_config(),
    ));
    let service = IngestService::new(store_dyn.clone(), provider, pipeline);

    let result = service
        .index_source(IndexParams {
            identifier: url,
            product_name: product,
            reference,
            force_init,
        })
        .await?;

    let summary_engine = SummaryEngine::new(
        store_dyn,
        llm,
        embedder,
        config.summary.summary_config(),
    );
    let summary_stats = summary_engine.run(result.snapshot_id).await?;

    println!("index");
    println!("  snapshot: {}", result.snapshot_id);
    println!("  version: {}", result.version);
    println!("  processed files: {}", result.processed_files);
    println!("  chunks: {}", result.total_chunks);
    println!(
        "  summaries: {} files, {} directories, {} architecture",
        summary_stats.files_generated,
        summary_stats.directories_generated,
        summary_stats.architecture_generated
    );
    println!("  duration: {:.1}s", result.duration.as_secs_f64());
    println!("ok");
    store.close().await;
    Ok(())
}

async fn run_ask(
    config: &Config,
    store: Arc<SqliteStore>,
    product: String,
    question: String,
    show_sources: bool,
) -> Result<()> {
    let embedder = build_embedder(config)?;
    let llm = Arc::new(OpenAiLlm::new(
        api_key()?,
        config.llm.model.clone(),
        config.llm.timeout_secs,
    )?);

    let store_dyn: Arc<dyn Store> = store.clone();
    let search = SearchEngine::new(
        store_dyn.clone(),
        embedder,
        config.search.search_config(),
    );
    let service = AskService::new(store_dyn, llm, search);

    let answer = service.ask(&product, &question).await?;
    println!("{}", answer.text.trim());
    if show_sources {
        println!("\nsources:");
        for hit in &answer.sources {
            println!("  [{:.3}] {}", hit.score, hit.reference);
        }
    }
    store.close().await;
    Ok(())
}

async fn run_wiki(store: Arc<SqliteStore>, product: String, out: PathBuf) -> Result<()> {
    let store_dyn: Arc<dyn Store> = store.clone();
    let product_row = store_dyn
        .get_product_by_name(&product)
        .await?
        .with_context(|| format!("product '{product}' not found"))?;

    let mut newest = None;
    for source in store_dyn.list_sources(product_row.id).await? {
        if let Some(snapshot) = store_dyn.latest_indexed_snapshot(source.id).await? {
            let is_newer = newest
                .as_ref()
                .map(|n: &repolens::models::SourceSnapshot| snapshot.created_at > n.created_at)
                .unwrap_or(true);
            if is_newer {
                newest = Some(snapshot);
            }
        }
    }
    let snapshot =
        newest.with_context(|| format!("product '{product}' has no indexed snapshot"))?;

    let generator = WikiGenerator::new(store_dyn);
    let report = generator.generate(&product, snapshot.id, &out).await?;
    println!("wiki generate");
    println!("  pages: {}", report.pages_written);
    println!("  out: {}", report.out_dir.display());
    println!("ok");
    store.close().await;
    Ok(())
}

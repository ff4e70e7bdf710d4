use anyhow::{Context, bail};
use casefile_embed::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use casefile_retriever::{
    config::Settings,
    retrieval::{
        chunking_strategy::ChunkingStrategy,
        citation::{Claim, SourceRef},
        extraction::{BasicExtractor, ExtractedText},
        generation::parse_generation_output,
        ingestion::{DocumentOutcome, IngestReport, IngestionPipeline},
        ranking::RankingPolicy,
        retriever::{Retriever, build_context},
    },
    storage::{
        Chunk, ChunkFilter, ChunkStore, DocumentOrigin, QueryResult, SourceType,
        sqlite_store::SqliteStore,
    },
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Index case evidence and retrieve it with audio-first ranking.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (defaults to ./casefile.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index database file, overriding the settings
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use deterministic offline hash embeddings instead of the configured API
    #[arg(long, global = true)]
    mock_embeddings: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the index database
    Init,
    /// Ingest individual files
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Use corpus chunk ids instead of upload ids
        #[arg(long)]
        corpus: bool,
        /// Re-embed files whose content is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Ingest every eligible file under a directory as a corpus
    IngestDir {
        dir: PathBuf,
        /// Re-embed files whose content is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Ingest a transcript produced by an external speech-to-text service
    IngestTranscript {
        /// Transcript text file
        transcript: PathBuf,
        /// Name of the original audio file, e.g. call.mp3
        #[arg(long)]
        source: String,
        /// Transcript language code
        #[arg(long)]
        language: Option<String>,
    },
    /// Search the index
    Search {
        query: String,
        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Rank by similarity alone, without the protected class
        #[arg(long)]
        similarity_only: bool,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Print the generation context block for a query
    Context {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Repair the citations of generated claims
    Cite {
        /// JSON file holding a claim array or a generator reply
        #[arg(long)]
        claims: PathBuf,
        /// Retrieved source files, comma-separated, in rank order
        #[arg(long, value_delimiter = ',', conflicts_with = "query", required_unless_present = "query")]
        sources: Vec<String>,
        /// Retrieve sources for this query instead
        #[arg(long)]
        query: Option<String>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// List chunks in scan order
    List {
        /// Only chunks of this source file
        #[arg(long)]
        source_file: Option<String>,
        /// Limit number of results
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Get a specific chunk by ID
    Get {
        id: String,
        /// Output format
        #[arg(short, long, default_value = "full")]
        format: OutputFormat,
    },
    /// List ingested documents
    Documents,
    /// Show index statistics
    Stats,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// Chunk as shown to users; the embedding is summarized by its dimension.
#[derive(Serialize)]
struct ChunkOutput<'a> {
    id: &'a str,
    source_file: &'a str,
    source_type: Option<&'a SourceType>,
    chunk_index: usize,
    dimension: usize,
    text: &'a str,
}

impl<'a> From<&'a Chunk> for ChunkOutput<'a> {
    fn from(chunk: &'a Chunk) -> Self {
        Self {
            id: &chunk.id,
            source_file: &chunk.metadata.source_file,
            source_type: chunk.metadata.source_type.as_ref(),
            chunk_index: chunk.metadata.chunk_index,
            dimension: chunk.embedding.len(),
            text: &chunk.text,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = &args.db {
        settings.database.path = db.clone();
    }

    match args.command {
        Commands::Init => {
            open_store(&settings, settings.ranking_policy()).await?;
            println!("Initialized index at {}", settings.database.path.display());
            Ok(())
        }
        Commands::Ingest {
            files,
            corpus,
            force,
        } => {
            let pipeline = build_pipeline(&settings, args.mock_embeddings, force).await?;
            let mut named = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                named.push((display_name(path)?, bytes));
            }
            let origin = if corpus {
                DocumentOrigin::Corpus
            } else {
                DocumentOrigin::Upload
            };
            let report = pipeline.ingest_files(named, origin).await?;
            print_report(&report);
            Ok(())
        }
        Commands::IngestDir { dir, force } => {
            let pipeline = build_pipeline(&settings, args.mock_embeddings, force).await?;
            let report = pipeline.ingest_directory(&dir).await?;
            print_report(&report);
            Ok(())
        }
        Commands::IngestTranscript {
            transcript,
            source,
            language,
        } => {
            let pipeline = build_pipeline(&settings, args.mock_embeddings, false).await?;
            let text = tokio::fs::read_to_string(&transcript)
                .await
                .with_context(|| format!("Failed to read {}", transcript.display()))?;

            let mut extracted = ExtractedText::new(text, SourceType::Audio)
                .with_metadata("transcription_method", json!("external"));
            if let Some(language) = language {
                extracted = extracted.with_metadata("language", json!(language));
            }

            match pipeline
                .ingest_extracted(&source, extracted, DocumentOrigin::Upload)
                .await?
            {
                DocumentOutcome::Ingested(doc) => {
                    println!("Ingested {} ({} chunks)", doc.source_file, doc.chunk_count)
                }
                DocumentOutcome::Skipped(doc) => println!("Skipped {}: {}", doc.source_file, doc.reason),
                DocumentOutcome::Failed(doc) => bail!("{}: {}", doc.source_file, doc.reason),
            }
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            similarity_only,
            format,
        } => {
            let ranking = if similarity_only {
                RankingPolicy::similarity_only()
            } else {
                settings.ranking_policy()
            };
            let retriever = build_retriever(&settings, ranking, args.mock_embeddings).await?;
            let top_k = top_k.unwrap_or(settings.retrieval.top_k);
            let retrieval = retriever.retrieve(&query, top_k).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&retrieval.results)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} results:", retrieval.results.len());
                    for (rank, result) in retrieval.results.iter().enumerate() {
                        print_result_summary(rank + 1, result);
                    }
                }
                OutputFormat::Full => print!("{}", build_context(&retrieval.results)),
            }
            Ok(())
        }
        Commands::Context { query, top_k } => {
            let retriever =
                build_retriever(&settings, settings.ranking_policy(), args.mock_embeddings).await?;
            let top_k = top_k.unwrap_or(settings.retrieval.top_k);
            let retrieval = retriever.retrieve(&query, top_k).await?;
            print!("{}", retrieval.context);
            Ok(())
        }
        Commands::Cite {
            claims,
            sources,
            query,
            top_k,
        } => {
            let raw = tokio::fs::read_to_string(&claims)
                .await
                .with_context(|| format!("Failed to read {}", claims.display()))?;

            let sources = match query {
                Some(query) => {
                    let retriever =
                        build_retriever(&settings, settings.ranking_policy(), args.mock_embeddings)
                            .await?;
                    let top_k = top_k.unwrap_or(settings.retrieval.top_k);
                    retriever.retrieve(&query, top_k).await?.sources
                }
                None => sources
                    .iter()
                    .map(|file| SourceRef::new(file.trim(), 0.0))
                    .collect(),
            };

            let policy = settings.citation_policy();
            let output = match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(_)) => {
                    let mut claims: Vec<Claim> =
                        serde_json::from_str(&raw).context("Claims must be JSON objects")?;
                    policy.apply(&mut claims, &sources);
                    json!({ "issues": claims, "sources": sources })
                }
                _ => {
                    let mut parsed = parse_generation_output(&raw);
                    policy.apply(&mut parsed.issues, &sources);
                    json!({
                        "analysis": parsed.analysis,
                        "issues": parsed.issues,
                        "sources": sources,
                    })
                }
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::List {
            source_file,
            limit,
            format,
        } => {
            let store = open_store(&settings, settings.ranking_policy()).await?;
            let chunks = store
                .list_chunks(ChunkFilter {
                    source_file,
                    limit: Some(limit),
                })
                .await?;

            match format {
                OutputFormat::Json => {
                    let output: Vec<ChunkOutput> = chunks.iter().map(ChunkOutput::from).collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} chunks:", chunks.len());
                    for chunk in &chunks {
                        println!(
                            "  ID: {} | File: {} | Chunk: {} | Words: {}",
                            chunk.id,
                            chunk.metadata.source_file,
                            chunk.metadata.chunk_index,
                            chunk.text.split_whitespace().count()
                        );
                    }
                }
                OutputFormat::Full => {
                    for chunk in &chunks {
                        print_chunk_full(chunk);
                    }
                }
            }
            Ok(())
        }
        Commands::Get { id, format } => {
            let store = open_store(&settings, settings.ranking_policy()).await?;
            let Some(chunk) = store.get_chunk(&id).await? else {
                bail!("Chunk {id} not found");
            };

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&ChunkOutput::from(&chunk))?);
                }
                OutputFormat::Summary => {
                    println!(
                        "ID: {} | File: {} | Chunk: {}",
                        chunk.id, chunk.metadata.source_file, chunk.metadata.chunk_index
                    );
                }
                OutputFormat::Full => print_chunk_full(&chunk),
            }
            Ok(())
        }
        Commands::Documents => {
            let store = open_store(&settings, settings.ranking_policy()).await?;
            let documents = store.list_documents().await?;
            println!("Found {} documents:", documents.len());
            for doc in documents {
                println!(
                    "  {} | Origin: {} | Type: {} | Chunks: {} | Ingested: {} | Hash: {}",
                    doc.source_file,
                    doc.origin.as_str(),
                    doc.source_type
                        .as_ref()
                        .map(|t| t.as_str())
                        .unwrap_or("unknown"),
                    doc.chunk_count,
                    doc.ingested_at.format("%Y-%m-%d %H:%M:%S"),
                    &doc.content_hash[..doc.content_hash.len().min(12)]
                );
            }
            Ok(())
        }
        Commands::Stats => {
            let store = open_store(&settings, settings.ranking_policy()).await?;
            let stats = store.index_stats().await?;

            println!("Index Statistics:");
            println!("  Database: {}", settings.database.path.display());
            println!("  Chunks: {}", stats.chunk_count);
            println!("  Documents: {}", stats.document_count);
            for (source_type, count) in &stats.source_types {
                println!("    {source_type}: {count}");
            }
            if stats.embedding_dimensions.len() > 1 {
                println!(
                    "  Warning: mixed embedding dimensions {:?}",
                    stats.embedding_dimensions
                );
            } else if let Some(dimension) = stats.embedding_dimensions.first() {
                println!("  Embedding dimension: {dimension}");
            }
            Ok(())
        }
    }
}

async fn open_store(settings: &Settings, ranking: RankingPolicy) -> anyhow::Result<SqliteStore> {
    let path = &settings.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(path)
        .await
        .with_context(|| format!("Failed to open index at {}", path.display()))?;
    Ok(store.with_ranking_policy(ranking))
}

fn build_embedder(settings: &Settings, mock: bool) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    if mock {
        return Ok(Arc::new(MockEmbeddingProvider::default()));
    }
    Ok(Arc::new(HttpEmbeddingProvider::new(settings.embedding.clone())?))
}

async fn build_pipeline(
    settings: &Settings,
    mock: bool,
    force: bool,
) -> anyhow::Result<IngestionPipeline> {
    let store = open_store(settings, settings.ranking_policy()).await?;
    Ok(IngestionPipeline::new(
        Arc::new(store),
        build_embedder(settings, mock)?,
        Arc::new(BasicExtractor),
        ChunkingStrategy::new(settings.chunking),
    )
    .with_force(force))
}

async fn build_retriever(
    settings: &Settings,
    ranking: RankingPolicy,
    mock: bool,
) -> anyhow::Result<Retriever> {
    let store = open_store(settings, ranking).await?;
    Ok(
        Retriever::new(Arc::new(store), build_embedder(settings, mock)?)
            .with_citation_policy(settings.citation_policy()),
    )
}

fn display_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn print_report(report: &IngestReport) {
    println!(
        "Ingested {} documents ({} chunks), skipped {}, failed {}",
        report.ingested.len(),
        report.total_chunks(),
        report.skipped.len(),
        report.failures.len()
    );
    for doc in &report.ingested {
        println!("  + {} [{}] {} chunks", doc.source_file, doc.source_type, doc.chunk_count);
    }
    for doc in &report.skipped {
        println!("  = {}: {}", doc.source_file, doc.reason);
    }
    for doc in &report.failures {
        println!("  ! {}: {}", doc.source_file, doc.reason);
    }
}

fn print_result_summary(rank: usize, result: &QueryResult) {
    let preview: String = result.text.chars().take(80).collect();
    println!(
        "  {}. [{:.4}] {} | Type: {} | Chunk: {} | {}",
        rank,
        result.score,
        result.metadata.source_file,
        result
            .metadata
            .source_type
            .as_ref()
            .map(|t| t.as_str())
            .unwrap_or("unknown"),
        result.metadata.chunk_index,
        preview.replace('\n', " ")
    );
}

fn print_chunk_full(chunk: &Chunk) {
    println!("Chunk ID: {}", chunk.id);
    println!("File: {}", chunk.metadata.source_file);
    if let Some(source_type) = &chunk.metadata.source_type {
        println!("Type: {source_type}");
    }
    println!("Chunk: {}", chunk.metadata.chunk_index);
    println!("Embedding dimension: {}", chunk.embedding.len());
    for (key, value) in &chunk.metadata.extra {
        println!("{key}: {value}");
    }
    println!("Text:\n{}", chunk.text);
    println!("{}", "-".repeat(80));
}

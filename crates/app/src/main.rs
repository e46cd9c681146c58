use chrono::Utc;
use clap::{Parser, Subcommand};
use graphrag_core::{
    ActionDispatcher, Embedder, GraphNavigator, GraphStore, HashingEmbedder, HybridSearchEngine,
    IngestionOptions, IngestionPipeline, KeywordConceptExtractor, MemoryGraphStore,
    MemoryVectorStore, Neo4jGraphStore, QdrantVectorStore, RemoteEmbedder, SearchOptions,
    VectorStore,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "graphrag-engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "graphrag_chunks")]
    qdrant_collection: String,

    /// Neo4j HTTP transaction URL
    #[arg(long, default_value = "http://localhost:7474")]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, default_value = "neo4j")]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, default_value = "password")]
    neo4j_password: String,

    /// Remote embedding endpoint; the local hashing embedder is used when unset.
    #[arg(long)]
    embedding_url: Option<String>,

    /// Bearer token for the embedding endpoint.
    #[arg(long, env = "GRAPHRAG_EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Embedding dimensionality; must match the provider's output.
    #[arg(long, default_value_t = graphrag_core::DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Run against in-process stores instead of Qdrant and Neo4j.
    #[arg(long, default_value_t = false)]
    memory: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a text file, or every .txt/.md file under a folder.
    Ingest {
        #[arg(long)]
        path: String,
        /// Document title (single-file ingestion only).
        #[arg(long)]
        title: Option<String>,
        /// Comma-separated concept hints (single-file ingestion only).
        #[arg(long)]
        concepts: Option<String>,
    },
    /// Hybrid graph+vector search.
    Search {
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value = "5")]
        n_results: usize,
        /// Graph expansion depth; 0 is pure vector search.
        #[arg(long, default_value = "1")]
        max_hops: u32,
    },
    /// Serve the JSON action protocol: one request per stdin line, one
    /// response per stdout line.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder: Arc<dyn Embedder + Send + Sync> = match &cli.embedding_url {
        Some(endpoint) => Arc::new(
            RemoteEmbedder::new(
                endpoint,
                cli.embedding_api_key.clone(),
                cli.embedding_dimensions,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?,
        ),
        None => Arc::new(HashingEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        memory = cli.memory,
        "graphrag-engine boot"
    );

    if cli.memory {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(cli.embedding_dimensions));
        run(cli, graph, vector, embedder).await
    } else {
        let graph = Arc::new(Neo4jGraphStore::new(
            &cli.neo4j_url,
            &cli.neo4j_db,
            &cli.neo4j_user,
            &cli.neo4j_password,
        ));
        let vector = Arc::new(QdrantVectorStore::new(
            &cli.qdrant_url,
            &cli.qdrant_collection,
            cli.embedding_dimensions,
        ));
        vector
            .ensure_collection()
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
        run(cli, graph, vector, embedder).await
    }
}

async fn run<G, V>(
    cli: Cli,
    graph: Arc<G>,
    vector: Arc<V>,
    embedder: Arc<dyn Embedder + Send + Sync>,
) -> anyhow::Result<()>
where
    G: GraphStore + Send + Sync + 'static,
    V: VectorStore + Send + Sync + 'static,
{
    let extractor = Arc::new(
        KeywordConceptExtractor::new().map_err(|error| anyhow::anyhow!(error.to_string()))?,
    );

    match cli.command {
        Command::Ingest {
            path,
            title,
            concepts,
        } => {
            let pipeline = IngestionPipeline::new(
                graph,
                vector,
                embedder,
                extractor,
                IngestionOptions::default(),
            );
            let target = Path::new(&path);

            if target.is_dir() {
                let report = pipeline
                    .ingest_folder(target)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
                }
                let chunks: usize = report.outcomes.iter().map(|outcome| outcome.chunk_count).sum();
                println!(
                    "{} documents ingested ({} chunks, {} skipped files) at {}",
                    report.outcomes.len(),
                    chunks,
                    report.skipped_files.len(),
                    Utc::now().to_rfc3339()
                );
            } else {
                let text = std::fs::read_to_string(target)?;
                let mut metadata = BTreeMap::new();
                if let Some(title) = title {
                    metadata.insert("title".to_string(), title);
                }
                if let Some(concepts) = concepts {
                    metadata.insert("concepts".to_string(), concepts);
                }

                let outcome = pipeline
                    .ingest(&text, metadata)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                if !outcome.failed_chunks.is_empty() {
                    warn!(failed = ?outcome.failed_chunks, "some chunks failed to ingest");
                }
                println!(
                    "document {} ingested: {} chunks, {} concepts",
                    outcome.document_id, outcome.chunk_count, outcome.concept_count
                );
            }
        }
        Command::Search {
            query,
            n_results,
            max_hops,
        } => {
            let engine = HybridSearchEngine::new(graph, vector, embedder, SearchOptions::default());
            let hits = engine
                .search(&query, Some(n_results), Some(max_hops))
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("query: {query}");
            for hit in hits {
                println!(
                    "[{:.4}] chunk={} document={} position={}",
                    hit.score, hit.chunk_id, hit.document_id, hit.position
                );
                println!(
                    "  vector_score={:.4} graph_bonus={:.4}",
                    hit.vector_score, hit.graph_bonus
                );
                if !hit.concept_path.is_empty() {
                    println!("  via concepts: {}", hit.concept_path.join(" > "));
                }
                println!("  text:\n{}", hit.text);
            }
        }
        Command::Serve => {
            let dispatcher = Arc::new(ActionDispatcher::new(
                IngestionPipeline::new(
                    graph.clone(),
                    vector.clone(),
                    embedder.clone(),
                    extractor,
                    IngestionOptions::default(),
                ),
                HybridSearchEngine::new(graph.clone(), vector, embedder, SearchOptions::default()),
                GraphNavigator::new(graph),
            ));

            serve(dispatcher).await?;
        }
    }

    Ok(())
}

/// Newline-delimited JSON action loop. Each request runs in its own
/// task; responses funnel through one writer so output lines never
/// interleave. Responses may arrive out of request order.
async fn serve<G, V>(dispatcher: Arc<ActionDispatcher<G, V>>) -> anyhow::Result<()>
where
    G: GraphStore + Send + Sync + 'static,
    V: VectorStore + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = Arc::clone(&dispatcher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = dispatcher.dispatch_line(&line).await;
            let _ = tx.send(response.to_string()).await;
        });
    }

    drop(tx);
    let _ = writer.await;
    info!("stdin closed, shutting down");
    Ok(())
}

use crate::chunking::{chunk_text, make_chunk_id, normalize_whitespace, ChunkingConfig};
use crate::embeddings::embed_with_retry;
use crate::error::EngineError;
use crate::extract::ConceptExtractor;
use crate::models::{Chunk, ChunkPayload, Document, IngestOutcome, IngestionOptions, VectorPoint};
use crate::resolver::ConceptResolver;
use crate::traits::{Embedder, GraphStore, VectorStore};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Stable document identity: the digest of the raw text, so re-ingesting
/// identical text converges on the same document.
pub fn digest_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug)]
pub struct FolderIngestReport {
    pub outcomes: Vec<IngestOutcome>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Chunks documents, extracts and resolves concepts, embeds chunk text,
/// and writes to both stores. Ingestion is chunk-granular: one failed
/// chunk is recorded and skipped, everything already committed stays.
pub struct IngestionPipeline<G, V> {
    graph: Arc<G>,
    vector: Arc<V>,
    embedder: Arc<dyn Embedder + Send + Sync>,
    extractor: Arc<dyn ConceptExtractor>,
    resolver: ConceptResolver<G>,
    options: IngestionOptions,
}

impl<G, V> IngestionPipeline<G, V>
where
    G: GraphStore + Send + Sync,
    V: VectorStore + Send + Sync,
{
    pub fn new(
        graph: Arc<G>,
        vector: Arc<V>,
        embedder: Arc<dyn Embedder + Send + Sync>,
        extractor: Arc<dyn ConceptExtractor>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            resolver: ConceptResolver::new(graph.clone()),
            graph,
            vector,
            embedder,
            extractor,
            options,
        }
    }

    pub async fn ingest(
        &self,
        text: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<IngestOutcome, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::Validation("document text is empty".to_string()));
        }

        let document_id = digest_text(text);
        let title = metadata
            .get("title")
            .cloned()
            .unwrap_or_else(|| format!("document-{}", &document_id[..12]));
        let document = Document {
            document_id,
            title,
            metadata: metadata.clone(),
            ingested_at: Utc::now(),
        };
        self.graph.upsert_document(&document).await?;

        let mut document_concepts = BTreeSet::new();

        // Metadata-supplied concept hints go through the same resolver as
        // extracted mentions and count as one document-level mention each.
        if let Some(hints) = metadata.get("concepts") {
            for raw in hints.split(',').map(str::trim).filter(|hint| !hint.is_empty()) {
                let concept = self.resolver.resolve(raw).await?;
                self.graph
                    .record_document_mention(&document.document_id, &concept.canonical_name, 1)
                    .await?;
                document_concepts.insert(concept.canonical_name);
            }
        }

        let pieces = chunk_text(text, ChunkingConfig::from(&self.options));
        let mut failed_chunks = Vec::new();
        let mut stored = 0usize;

        for (position, piece) in pieces.iter().enumerate() {
            match self.ingest_chunk(&document, position as u64, piece).await {
                Ok(concepts) => {
                    stored += 1;
                    document_concepts.extend(concepts);
                }
                Err(error) => {
                    warn!(
                        document_id = %document.document_id,
                        chunk = position,
                        %error,
                        "chunk ingestion failed"
                    );
                    failed_chunks.push(position);
                }
            }
        }

        info!(
            document_id = %document.document_id,
            chunks = stored,
            failed = failed_chunks.len(),
            concepts = document_concepts.len(),
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id: document.document_id,
            chunk_count: stored,
            concept_count: document_concepts.len(),
            failed_chunks,
        })
    }

    async fn ingest_chunk(
        &self,
        document: &Document,
        position: u64,
        text: &str,
    ) -> Result<Vec<String>, EngineError> {
        let embedding = embed_with_retry(
            self.embedder.as_ref(),
            &normalize_whitespace(text),
            self.options.max_embed_retries,
        )
        .await?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(EngineError::DimensionMismatch(format!(
                "embedder produced {} dimensions, expected {}",
                embedding.len(),
                self.embedder.dimensions()
            )));
        }

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for raw in self.extractor.extract(text) {
            match self.resolver.resolve(&raw).await {
                Ok(concept) => *counts.entry(concept.canonical_name).or_insert(0) += 1,
                Err(EngineError::Validation(_)) => continue,
                Err(other) => return Err(other),
            }
        }

        let chunk = Chunk {
            chunk_id: make_chunk_id(&document.document_id, position, text),
            document_id: document.document_id.clone(),
            position,
            text: text.to_string(),
            concepts: counts.keys().cloned().collect(),
        };
        self.graph.upsert_chunk(&chunk).await?;

        for (canonical, count) in &counts {
            self.graph
                .record_chunk_mention(&chunk.chunk_id, canonical, *count)
                .await?;
            self.graph
                .record_document_mention(&chunk.document_id, canonical, *count)
                .await?;
        }

        let names: Vec<&String> = counts.keys().collect();
        for (index, first) in names.iter().enumerate() {
            for second in &names[index + 1..] {
                self.graph.relate_concepts(first, second, 1.0).await?;
            }
        }

        self.vector
            .upsert_points(&[VectorPoint {
                chunk_id: chunk.chunk_id.clone(),
                vector: embedding,
                payload: ChunkPayload {
                    document_id: chunk.document_id.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                    position,
                    text: chunk.text.clone(),
                    concepts: chunk.concepts.clone(),
                },
            }])
            .await?;

        Ok(chunk.concepts)
    }

    /// Ingests every `.txt`/`.md` file under `folder`, best-effort: an
    /// unreadable file is reported and skipped, the rest proceed.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderIngestReport, EngineError> {
        let files = discover_text_files(folder);
        if files.is_empty() {
            return Err(EngineError::Validation(format!(
                "no .txt or .md files found in {}",
                folder.display()
            )));
        }

        let mut outcomes = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            let attempt = async {
                let text = std::fs::read_to_string(&path)?;
                let mut metadata = BTreeMap::new();
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    metadata.insert("title".to_string(), name.to_string());
                }
                metadata.insert("source".to_string(), path.to_string_lossy().to_string());
                self.ingest(&text, metadata).await
            };

            match attempt.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(FolderIngestReport {
            outcomes,
            skipped_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::extract::KeywordConceptExtractor;
    use crate::stores::{MemoryGraphStore, MemoryVectorStore};
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    const DIMENSIONS: usize = 32;

    fn pipeline(
        graph: Arc<MemoryGraphStore>,
        vector: Arc<MemoryVectorStore>,
        options: IngestionOptions,
    ) -> IngestionPipeline<MemoryGraphStore, MemoryVectorStore> {
        IngestionPipeline::new(
            graph,
            vector,
            Arc::new(HashingEmbedder {
                dimensions: DIMENSIONS,
            }),
            Arc::new(KeywordConceptExtractor::new().unwrap()),
            options,
        )
    }

    fn stores() -> (Arc<MemoryGraphStore>, Arc<MemoryVectorStore>) {
        (
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryVectorStore::new(DIMENSIONS)),
        )
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let (graph, vector) = stores();
        let pipeline = pipeline(graph, vector, IngestionOptions::default());

        let error = pipeline.ingest("   ", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(error, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn concepts_are_extracted_resolved_and_linked() {
        let (graph, vector) = stores();
        let pipeline = pipeline(graph.clone(), vector.clone(), IngestionOptions::default());

        let outcome = pipeline
            .ingest(
                "GraphRAG extends RAG with a knowledge graph. RAG alone ranks by similarity.",
                BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.chunk_count, 1);
        assert!(outcome.failed_chunks.is_empty());
        assert_eq!(outcome.concept_count, 2);

        let rag = graph.get_concept("rag").await.unwrap().unwrap();
        assert_eq!(rag.mention_count, 2);
        let chunks = graph.concept_chunks("graphrag").await.unwrap();
        assert_eq!(chunks.len(), 1);

        let neighbors = graph.concept_neighbors("rag").await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].concept.canonical_name, "graphrag");
    }

    #[tokio::test]
    async fn metadata_hints_union_with_extracted_concepts() {
        let (graph, vector) = stores();
        let pipeline = pipeline(graph.clone(), vector, IngestionOptions::default());

        let mut metadata = BTreeMap::new();
        metadata.insert("concepts".to_string(), "Hybrid Search, RAG".to_string());

        let outcome = pipeline
            .ingest("Plain text without any capitalized terms.", metadata)
            .await
            .unwrap();

        assert_eq!(outcome.concept_count, 2);
        let documents = graph.concept_documents("hybrid search").await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].mention_count, 1);
    }

    struct FailsOnMarker {
        dimensions: usize,
    }

    #[async_trait]
    impl Embedder for FailsOnMarker {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            if text.contains("FAILME") {
                return Err(EngineError::EmbeddingUnavailable(
                    "provider timeout".to_string(),
                ));
            }
            HashingEmbedder {
                dimensions: self.dimensions,
            }
            .embed(text)
            .await
        }
    }

    #[tokio::test]
    async fn failed_chunk_is_reported_and_the_rest_stay_committed() {
        let (graph, vector) = stores();
        let options = IngestionOptions {
            chunk_max_chars: 40,
            chunk_overlap_chars: 5,
            min_chunk_chars: 5,
            max_embed_retries: 0,
        };
        let pipeline = IngestionPipeline::new(
            graph.clone(),
            vector.clone(),
            Arc::new(FailsOnMarker {
                dimensions: DIMENSIONS,
            }),
            Arc::new(KeywordConceptExtractor::new().unwrap()),
            options,
        );

        let text = "Alpha paragraph about RAG systems.\n\nFAILME GraphRAG.\n\nThird paragraph about RAG again.";
        let outcome = pipeline.ingest(text, BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.failed_chunks, vec![1]);
        assert_eq!(outcome.chunk_count, 2);

        // the committed chunks are durably in both stores
        let chunks = graph.concept_chunks("rag").await.unwrap();
        assert_eq!(chunks.len(), 2);
        let probe = HashingEmbedder {
            dimensions: DIMENSIONS,
        }
        .embed("RAG systems")
        .await
        .unwrap();
        assert_eq!(vector.query(&probe, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reingesting_identical_text_is_idempotent_on_documents() {
        let (graph, vector) = stores();
        let pipeline = pipeline(graph.clone(), vector, IngestionOptions::default());

        let first = pipeline.ingest("Stable RAG text.", BTreeMap::new()).await.unwrap();
        let second = pipeline.ingest("Stable RAG text.", BTreeMap::new()).await.unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert_eq!(graph.document_count().await.unwrap(), 1);
    }

    #[test]
    fn discover_text_files_is_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(nested.join("a.md"), "a").unwrap();
        fs::write(dir.path().join("ignored.bin"), "x").unwrap();

        let files = discover_text_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.txt") || files[1].ends_with("b.txt"));
    }

    #[tokio::test]
    async fn folder_ingestion_is_best_effort() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "GraphRAG notes about RAG.").unwrap();
        File::create(dir.path().join("broken.txt"))
            .and_then(|mut file| file.write_all(&[0xff, 0xfe, 0xfd]))
            .unwrap();

        let (graph, vector) = stores();
        let pipeline = pipeline(graph, vector, IngestionOptions::default());

        let report = pipeline.ingest_folder(dir.path()).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.skipped_files[0].path.ends_with("broken.txt"));
    }

    #[tokio::test]
    async fn folder_without_text_files_is_rejected() {
        let dir = tempdir().unwrap();
        let (graph, vector) = stores();
        let pipeline = pipeline(graph, vector, IngestionOptions::default());

        let error = pipeline.ingest_folder(dir.path()).await.unwrap_err();
        assert!(matches!(error, EngineError::Validation(_)));
    }
}

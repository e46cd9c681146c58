pub mod chunking;
pub mod dispatch;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod navigator;
pub mod resolver;
pub mod search;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, make_chunk_id, normalize_whitespace, ChunkingConfig};
pub use dispatch::{ActionDispatcher, RECOGNIZED_ACTIONS};
pub use embeddings::{
    embed_with_retry, HashingEmbedder, RemoteEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::EngineError;
pub use extract::{ConceptExtractor, KeywordConceptExtractor};
pub use ingest::{
    digest_text, discover_text_files, FolderIngestReport, IngestionPipeline, SkippedFile,
};
pub use models::{
    Chunk, ChunkPayload, Concept, ConceptOverview, Document, DocumentMention, DocumentSummary,
    IngestOutcome, IngestionOptions, NeighborConcept, Passage, RelatedConcept, ScoredPoint,
    SearchHit, SearchOptions, VectorPoint,
};
pub use navigator::GraphNavigator;
pub use resolver::{canonical_name, ConceptResolver};
pub use search::HybridSearchEngine;
pub use stores::{MemoryGraphStore, MemoryVectorStore, Neo4jGraphStore, QdrantVectorStore};
pub use traits::{Embedder, GraphStore, VectorStore};

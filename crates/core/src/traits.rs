use crate::error::EngineError;
use crate::models::{
    Chunk, Concept, Document, DocumentMention, DocumentSummary, NeighborConcept, ScoredPoint,
    VectorPoint,
};
use async_trait::async_trait;

/// Minimal property-graph interface the engine requires. Node and edge
/// upserts are idempotent; edges are keyed by (source, kind, target) and
/// repeated observation adds weight instead of duplicating the edge.
#[async_trait]
pub trait GraphStore {
    async fn upsert_document(&self, document: &Document) -> Result<(), EngineError>;

    /// Upserts the chunk node and links it to its document.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), EngineError>;

    /// Atomic lookup-or-create keyed by canonical name. An existing
    /// concept gains the alias (if new) and a mention-count increment; a
    /// missing one is created with the alias and a count of one. The
    /// create path must be a store-side conditional write so concurrent
    /// resolution of the same name cannot produce duplicates.
    async fn resolve_concept(
        &self,
        canonical: &str,
        display: &str,
        raw_alias: &str,
    ) -> Result<Concept, EngineError>;

    /// Lookup only. Never creates.
    async fn get_concept(&self, canonical: &str) -> Result<Option<Concept>, EngineError>;

    async fn record_chunk_mention(
        &self,
        chunk_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError>;

    async fn record_document_mention(
        &self,
        document_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError>;

    /// Adds co-occurrence weight between two concepts. The pair is
    /// unordered: (a, b) and (b, a) address the same edge.
    async fn relate_concepts(
        &self,
        first: &str,
        second: &str,
        weight_delta: f64,
    ) -> Result<(), EngineError>;

    /// Concepts one edge away, with edge weights. Unordered.
    async fn concept_neighbors(&self, canonical: &str)
        -> Result<Vec<NeighborConcept>, EngineError>;

    /// Documents mentioning the concept, with per-document mention counts.
    async fn concept_documents(&self, canonical: &str)
        -> Result<Vec<DocumentMention>, EngineError>;

    /// Chunks mentioning the concept. Unordered.
    async fn concept_chunks(&self, canonical: &str) -> Result<Vec<Chunk>, EngineError>;

    /// All documents with their chunk and concept counts, newest first.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, EngineError>;

    async fn document_count(&self) -> Result<usize, EngineError>;
}

/// Minimal vector-index interface: payload-carrying upsert plus
/// similarity query.
#[async_trait]
pub trait VectorStore {
    async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), EngineError>;

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, EngineError>;
}

/// Embedding provider seam. Calls may be slow and may fail with
/// `EmbeddingUnavailable`; retry policy belongs to the caller.
#[async_trait]
pub trait Embedder {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

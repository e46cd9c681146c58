use crate::error::EngineError;
use crate::models::{
    Chunk, ChunkPayload, Concept, Document, DocumentMention, DocumentSummary, NeighborConcept,
    ScoredPoint, VectorPoint,
};
use crate::stores::ordered_pair;
use crate::traits::{GraphStore, VectorStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

fn poisoned(backend: &str) -> EngineError {
    EngineError::StoreUnavailable {
        backend: backend.to_string(),
        details: "lock poisoned".to_string(),
    }
}

#[derive(Default)]
struct GraphInner {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    document_chunks: HashMap<String, Vec<String>>,
    concepts: HashMap<String, Concept>,
    chunk_mentions: HashMap<(String, String), f64>,
    document_mentions: HashMap<(String, String), f64>,
    relations: HashMap<(String, String), f64>,
}

/// In-process graph store. Edge maps are keyed by (source, target) per
/// relation kind, so upserts are idempotent and repeated observation
/// adds weight. The concept create path holds the write lock across the
/// whole lookup-or-create, which is this store's conditional write.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_document(&self, document: &Document) -> Result<(), EngineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        inner
            .documents
            .insert(document.document_id.clone(), document.clone());
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), EngineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        let ids = inner
            .document_chunks
            .entry(chunk.document_id.clone())
            .or_default();
        if !ids.contains(&chunk.chunk_id) {
            ids.push(chunk.chunk_id.clone());
        }
        inner.chunks.insert(chunk.chunk_id.clone(), chunk.clone());
        Ok(())
    }

    async fn resolve_concept(
        &self,
        canonical: &str,
        display: &str,
        raw_alias: &str,
    ) -> Result<Concept, EngineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        let concept = inner
            .concepts
            .entry(canonical.to_string())
            .and_modify(|existing| {
                existing.mention_count += 1;
                if !existing.aliases.iter().any(|alias| alias == raw_alias) {
                    existing.aliases.push(raw_alias.to_string());
                }
            })
            .or_insert_with(|| Concept {
                canonical_name: canonical.to_string(),
                display_name: display.to_string(),
                aliases: vec![raw_alias.to_string()],
                mention_count: 1,
            });
        Ok(concept.clone())
    }

    async fn get_concept(&self, canonical: &str) -> Result<Option<Concept>, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        Ok(inner.concepts.get(canonical).cloned())
    }

    async fn record_chunk_mention(
        &self,
        chunk_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        *inner
            .chunk_mentions
            .entry((chunk_id.to_string(), canonical.to_string()))
            .or_insert(0.0) += count as f64;
        Ok(())
    }

    async fn record_document_mention(
        &self,
        document_id: &str,
        canonical: &str,
        count: u64,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        *inner
            .document_mentions
            .entry((document_id.to_string(), canonical.to_string()))
            .or_insert(0.0) += count as f64;
        Ok(())
    }

    async fn relate_concepts(
        &self,
        first: &str,
        second: &str,
        weight_delta: f64,
    ) -> Result<(), EngineError> {
        if first == second {
            return Ok(());
        }
        let mut inner = self.inner.write().map_err(|_| poisoned("memory-graph"))?;
        *inner
            .relations
            .entry(ordered_pair(first, second))
            .or_insert(0.0) += weight_delta;
        Ok(())
    }

    async fn concept_neighbors(
        &self,
        canonical: &str,
    ) -> Result<Vec<NeighborConcept>, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        let mut neighbors = Vec::new();
        for ((left, right), weight) in &inner.relations {
            let other = if left == canonical {
                right
            } else if right == canonical {
                left
            } else {
                continue;
            };
            if let Some(concept) = inner.concepts.get(other) {
                neighbors.push(NeighborConcept {
                    concept: concept.clone(),
                    weight: *weight,
                });
            }
        }
        Ok(neighbors)
    }

    async fn concept_documents(
        &self,
        canonical: &str,
    ) -> Result<Vec<DocumentMention>, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        let mut mentions = Vec::new();
        for ((document_id, concept), weight) in &inner.document_mentions {
            if concept != canonical {
                continue;
            }
            let title = inner
                .documents
                .get(document_id)
                .map(|document| document.title.clone())
                .unwrap_or_default();
            mentions.push(DocumentMention {
                document_id: document_id.clone(),
                title,
                mention_count: *weight as u64,
            });
        }
        Ok(mentions)
    }

    async fn concept_chunks(&self, canonical: &str) -> Result<Vec<Chunk>, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        let mut chunks = Vec::new();
        for ((chunk_id, concept), _) in &inner.chunk_mentions {
            if concept != canonical {
                continue;
            }
            if let Some(chunk) = inner.chunks.get(chunk_id) {
                chunks.push(chunk.clone());
            }
        }
        Ok(chunks)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        let mut summaries = Vec::new();
        for document in inner.documents.values() {
            let chunk_count = inner
                .document_chunks
                .get(&document.document_id)
                .map(Vec::len)
                .unwrap_or(0);
            let concept_count = inner
                .document_mentions
                .keys()
                .filter(|(document_id, _)| document_id == &document.document_id)
                .map(|(_, concept)| concept)
                .collect::<HashSet<_>>()
                .len();
            summaries.push(DocumentSummary {
                document: document.clone(),
                chunk_count,
                concept_count,
            });
        }
        summaries.sort_by(|left, right| {
            right
                .document
                .ingested_at
                .cmp(&left.document.ingested_at)
                .then_with(|| left.document.document_id.cmp(&right.document.document_id))
        });
        Ok(summaries)
    }

    async fn document_count(&self) -> Result<usize, EngineError> {
        let inner = self.inner.read().map_err(|_| poisoned("memory-graph"))?;
        Ok(inner.documents.len())
    }
}

/// In-process vector index: brute-force cosine scan. Correct and
/// adequate at moderate sizes; swaps out for Qdrant in deployment.
pub struct MemoryVectorStore {
    dimensions: usize,
    entries: RwLock<HashMap<String, (Vec<f32>, ChunkPayload)>>,
}

impl MemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| (*a as f64) * (*b as f64))
        .sum();
    let left_norm: f64 = left.iter().map(|a| (*a as f64).powi(2)).sum::<f64>().sqrt();
    let right_norm: f64 = right.iter().map(|b| (*b as f64).powi(2)).sum::<f64>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), EngineError> {
        let mut entries = self.entries.write().map_err(|_| poisoned("memory-vector"))?;
        for point in points {
            if point.vector.len() != self.dimensions {
                return Err(EngineError::DimensionMismatch(format!(
                    "vector for chunk {} has {} dimensions, index expects {}",
                    point.chunk_id,
                    point.vector.len(),
                    self.dimensions
                )));
            }
            entries.insert(
                point.chunk_id.clone(),
                (point.vector.clone(), point.payload.clone()),
            );
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, EngineError> {
        if vector.len() != self.dimensions {
            return Err(EngineError::DimensionMismatch(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }

        let entries = self.entries.read().map_err(|_| poisoned("memory-vector"))?;
        let mut scored: Vec<ScoredPoint> = entries
            .values()
            .map(|(stored, payload)| ScoredPoint {
                score: cosine_similarity(vector, stored),
                payload: payload.clone(),
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.payload.chunk_id.cmp(&right.payload.chunk_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

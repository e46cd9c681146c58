use crate::embeddings::embed_with_retry;
use crate::error::EngineError;
use crate::models::{Chunk, ChunkPayload, SearchHit, SearchOptions};
use crate::traits::{Embedder, GraphStore, VectorStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

/// Executes `search`: vector similarity over the chunk index, widened by
/// graph expansion across concept edges, fused into one ranking.
pub struct HybridSearchEngine<G, V> {
    graph: Arc<G>,
    vector: Arc<V>,
    embedder: Arc<dyn Embedder + Send + Sync>,
    options: SearchOptions,
}

struct Candidate {
    payload: ChunkPayload,
    vector_score: f64,
    graph_bonus: f64,
    best_contribution: f64,
    concept_path: Vec<String>,
}

/// One graph-derived score contribution: `chunk` was reached through the
/// concept chain `path`, whose last element mentions it.
struct Contribution {
    chunk: Chunk,
    bonus: f64,
    path: Vec<String>,
}

impl<G, V> HybridSearchEngine<G, V>
where
    G: GraphStore + Send + Sync + 'static,
    V: VectorStore + Send + Sync,
{
    pub fn new(
        graph: Arc<G>,
        vector: Arc<V>,
        embedder: Arc<dyn Embedder + Send + Sync>,
        options: SearchOptions,
    ) -> Self {
        Self {
            graph,
            vector,
            embedder,
            options,
        }
    }

    pub async fn search(
        &self,
        query_text: &str,
        n_results: Option<usize>,
        max_hops: Option<u32>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query_text.trim().is_empty() {
            return Err(EngineError::Validation("query is empty".to_string()));
        }

        let n_results = n_results.unwrap_or(self.options.default_n_results);
        if n_results == 0 {
            return Ok(Vec::new());
        }
        let max_hops = max_hops.unwrap_or(self.options.default_max_hops);

        let query_vector = embed_with_retry(
            self.embedder.as_ref(),
            query_text,
            self.options.max_embed_retries,
        )
        .await?;

        let overfetch = n_results.saturating_mul(self.options.overfetch_factor.max(1));
        let points = self.vector.query(&query_vector, overfetch).await?;

        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for point in points {
            candidates.insert(
                point.payload.chunk_id.clone(),
                Candidate {
                    payload: point.payload,
                    vector_score: point.score,
                    graph_bonus: 0.0,
                    best_contribution: 0.0,
                    concept_path: Vec::new(),
                },
            );
        }

        if max_hops > 0 && !candidates.is_empty() {
            self.expand(&mut candidates, max_hops).await?;
        }

        let mut hits: Vec<SearchHit> = candidates
            .into_values()
            .map(|candidate| SearchHit {
                score: self.options.vector_weight * candidate.vector_score
                    + self.options.graph_weight * candidate.graph_bonus,
                chunk_id: candidate.payload.chunk_id,
                document_id: candidate.payload.document_id,
                position: candidate.payload.position,
                text: candidate.payload.text,
                vector_score: candidate.vector_score,
                graph_bonus: candidate.graph_bonus,
                concept_path: candidate.concept_path,
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.position.cmp(&right.position))
                .then_with(|| left.document_id.cmp(&right.document_id))
        });
        hits.truncate(n_results);

        debug!(query = query_text, hits = hits.len(), max_hops, "search complete");
        Ok(hits)
    }

    /// Expands every candidate outward through concept edges. Expansions
    /// for independent candidates run in parallel; their contributions
    /// are merged (and capped) on the way back in.
    async fn expand(
        &self,
        candidates: &mut HashMap<String, Candidate>,
        max_hops: u32,
    ) -> Result<(), EngineError> {
        let mut join_set = JoinSet::new();

        for candidate in candidates.values() {
            if candidate.payload.concepts.is_empty() {
                continue;
            }
            join_set.spawn(expand_candidate(
                Arc::clone(&self.graph),
                candidate.payload.chunk_id.clone(),
                candidate.payload.concepts.clone(),
                max_hops,
                self.options.graph_bonus_base,
            ));
        }

        while let Some(joined) = join_set.join_next().await {
            let contributions = joined.map_err(|error| EngineError::StoreUnavailable {
                backend: "engine".to_string(),
                details: format!("expansion task failed: {error}"),
            })??;

            for contribution in contributions {
                let entry = candidates
                    .entry(contribution.chunk.chunk_id.clone())
                    .or_insert_with(|| Candidate {
                        payload: ChunkPayload {
                            document_id: contribution.chunk.document_id.clone(),
                            chunk_id: contribution.chunk.chunk_id.clone(),
                            position: contribution.chunk.position,
                            text: contribution.chunk.text.clone(),
                            concepts: contribution.chunk.concepts.clone(),
                        },
                        vector_score: 0.0,
                        graph_bonus: 0.0,
                        best_contribution: 0.0,
                        concept_path: Vec::new(),
                    });

                entry.graph_bonus =
                    (entry.graph_bonus + contribution.bonus).min(self.options.max_graph_bonus);
                if contribution.bonus > entry.best_contribution {
                    entry.best_contribution = contribution.bonus;
                    entry.concept_path = contribution.path;
                }
            }
        }

        Ok(())
    }
}

/// Breadth-first walk from one candidate's concepts. Chunks reached
/// through a concept at hop `h` earn `bonus_base / (1 + h)`; the walk
/// never re-visits a concept, so every discovery is at its shortest hop
/// distance.
async fn expand_candidate<G>(
    graph: Arc<G>,
    origin_chunk_id: String,
    seed_concepts: Vec<String>,
    max_hops: u32,
    bonus_base: f64,
) -> Result<Vec<Contribution>, EngineError>
where
    G: GraphStore + Send + Sync,
{
    let mut contributions = Vec::new();
    let mut visited: HashSet<String> = seed_concepts.iter().cloned().collect();
    let mut frontier: Vec<(String, Vec<String>)> = seed_concepts
        .into_iter()
        .map(|concept| (concept.clone(), vec![concept]))
        .collect();

    for hop in 0..=max_hops {
        for (concept, path) in &frontier {
            for chunk in graph.concept_chunks(concept).await? {
                if chunk.chunk_id == origin_chunk_id {
                    continue;
                }
                contributions.push(Contribution {
                    chunk,
                    bonus: bonus_base / (1.0 + hop as f64),
                    path: path.clone(),
                });
            }
        }

        if hop == max_hops {
            break;
        }

        let mut next = Vec::new();
        for (concept, path) in &frontier {
            for neighbor in graph.concept_neighbors(concept).await? {
                let canonical = neighbor.concept.canonical_name;
                if visited.insert(canonical.clone()) {
                    let mut next_path = path.clone();
                    next_path.push(canonical.clone());
                    next.push((canonical, next_path));
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    Ok(contributions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Concept, Document, VectorPoint};
    use crate::stores::{MemoryGraphStore, MemoryVectorStore};
    use crate::traits::GraphStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
            Ok(self.0.clone())
        }
    }

    fn payload(chunk_id: &str, document_id: &str, position: u64, concepts: &[&str]) -> ChunkPayload {
        ChunkPayload {
            document_id: document_id.to_string(),
            chunk_id: chunk_id.to_string(),
            position,
            text: format!("text of {chunk_id}"),
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn seed_concept(graph: &MemoryGraphStore, canonical: &str) -> Concept {
        graph
            .resolve_concept(canonical, canonical, canonical)
            .await
            .unwrap()
    }

    async fn seed_chunk(
        graph: &MemoryGraphStore,
        chunk_id: &str,
        document_id: &str,
        position: u64,
        concepts: &[&str],
    ) {
        let chunk = Chunk {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            position,
            text: format!("text of {chunk_id}"),
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
        };
        graph
            .upsert_document(&Document {
                document_id: document_id.to_string(),
                title: document_id.to_string(),
                metadata: BTreeMap::new(),
                ingested_at: Utc::now(),
            })
            .await
            .unwrap();
        graph.upsert_chunk(&chunk).await.unwrap();
        for concept in concepts {
            graph
                .record_chunk_mention(chunk_id, concept, 1)
                .await
                .unwrap();
        }
    }

    fn engine(
        graph: Arc<MemoryGraphStore>,
        vector: Arc<MemoryVectorStore>,
    ) -> HybridSearchEngine<MemoryGraphStore, MemoryVectorStore> {
        HybridSearchEngine::new(
            graph,
            vector,
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            SearchOptions::default(),
        )
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));
        let error = engine(graph, vector)
            .search("  ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn zero_hops_is_pure_vector_ranking() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        vector
            .upsert_points(&[
                VectorPoint {
                    chunk_id: "near".to_string(),
                    vector: vec![1.0, 0.0],
                    payload: payload("near", "doc-a", 0, &["alpha"]),
                },
                VectorPoint {
                    chunk_id: "far".to_string(),
                    vector: vec![0.2, 1.0],
                    payload: payload("far", "doc-b", 0, &["beta"]),
                },
            ])
            .await
            .unwrap();

        let hits = engine(graph, vector)
            .search("query", Some(5), Some(0))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "near");
        assert!(hits.iter().all(|hit| hit.graph_bonus == 0.0));
        assert!(hits.iter().all(|hit| hit.concept_path.is_empty()));
    }

    #[tokio::test]
    async fn shared_concepts_pull_in_graph_only_chunks() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        seed_concept(&graph, "alpha").await;
        seed_chunk(&graph, "seen", "doc-a", 0, &["alpha"]).await;
        seed_chunk(&graph, "cousin", "doc-b", 0, &["alpha"]).await;

        vector
            .upsert_points(&[VectorPoint {
                chunk_id: "seen".to_string(),
                vector: vec![1.0, 0.0],
                payload: payload("seen", "doc-a", 0, &["alpha"]),
            }])
            .await
            .unwrap();

        let hits = engine(graph, vector)
            .search("query", Some(5), Some(1))
            .await
            .unwrap();

        let cousin = hits.iter().find(|hit| hit.chunk_id == "cousin").unwrap();
        assert_eq!(cousin.concept_path, vec!["alpha"]);
        assert!(cousin.graph_bonus > 0.0);
        assert_eq!(cousin.vector_score, 0.0);
    }

    #[tokio::test]
    async fn related_concepts_contribute_with_hop_decay() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        seed_concept(&graph, "alpha").await;
        seed_concept(&graph, "beta").await;
        graph.relate_concepts("alpha", "beta", 1.0).await.unwrap();

        seed_chunk(&graph, "seen", "doc-a", 0, &["alpha"]).await;
        seed_chunk(&graph, "distant", "doc-b", 0, &["beta"]).await;

        vector
            .upsert_points(&[VectorPoint {
                chunk_id: "seen".to_string(),
                vector: vec![1.0, 0.0],
                payload: payload("seen", "doc-a", 0, &["alpha"]),
            }])
            .await
            .unwrap();

        let hits = engine(graph.clone(), vector.clone())
            .search("query", Some(5), Some(1))
            .await
            .unwrap();

        let distant = hits.iter().find(|hit| hit.chunk_id == "distant").unwrap();
        assert_eq!(distant.concept_path, vec!["alpha", "beta"]);
        // one hop out: bonus = base / (1 + 1)
        assert!((distant.graph_bonus - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn expansion_respects_the_hop_bound() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        seed_concept(&graph, "alpha").await;
        seed_concept(&graph, "beta").await;
        seed_concept(&graph, "gamma").await;
        graph.relate_concepts("alpha", "beta", 1.0).await.unwrap();
        graph.relate_concepts("beta", "gamma", 1.0).await.unwrap();

        seed_chunk(&graph, "seen", "doc-a", 0, &["alpha"]).await;
        seed_chunk(&graph, "two-out", "doc-b", 0, &["gamma"]).await;

        vector
            .upsert_points(&[VectorPoint {
                chunk_id: "seen".to_string(),
                vector: vec![1.0, 0.0],
                payload: payload("seen", "doc-a", 0, &["alpha"]),
            }])
            .await
            .unwrap();

        let one_hop = engine(graph.clone(), vector.clone())
            .search("query", Some(5), Some(1))
            .await
            .unwrap();
        assert!(one_hop.iter().all(|hit| hit.chunk_id != "two-out"));

        let two_hops = engine(graph, vector)
            .search("query", Some(5), Some(2))
            .await
            .unwrap();
        assert!(two_hops.iter().any(|hit| hit.chunk_id == "two-out"));
    }

    #[tokio::test]
    async fn equal_scores_break_by_position_then_document() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        vector
            .upsert_points(&[
                VectorPoint {
                    chunk_id: "late".to_string(),
                    vector: vec![1.0, 0.0],
                    payload: payload("late", "doc-a", 7, &[]),
                },
                VectorPoint {
                    chunk_id: "early".to_string(),
                    vector: vec![1.0, 0.0],
                    payload: payload("early", "doc-b", 2, &[]),
                },
            ])
            .await
            .unwrap();

        let hits = engine(graph, vector)
            .search("query", Some(5), Some(0))
            .await
            .unwrap();

        assert_eq!(hits[0].chunk_id, "early");
        assert_eq!(hits[1].chunk_id, "late");
    }

    #[tokio::test]
    async fn results_truncate_to_n_results() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));

        for index in 0..6 {
            vector
                .upsert_points(&[VectorPoint {
                    chunk_id: format!("chunk-{index}"),
                    vector: vec![1.0, index as f32 * 0.1],
                    payload: payload(&format!("chunk-{index}"), "doc", index, &[]),
                }])
                .await
                .unwrap();
        }

        let hits = engine(graph, vector)
            .search("query", Some(2), Some(0))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn zero_n_results_returns_nothing() {
        let graph = Arc::new(MemoryGraphStore::new());
        let vector = Arc::new(MemoryVectorStore::new(2));
        let hits = engine(graph, vector)
            .search("query", Some(0), None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}

use crate::error::EngineError;
use crate::models::{ChunkPayload, ScoredPoint, VectorPoint};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Vector store over the Qdrant REST API. Payloads carry everything the
/// search path needs, so ranking never goes back to the graph for
/// candidate hydration.
pub struct QdrantVectorStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantVectorStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn unavailable(error: reqwest::Error) -> EngineError {
        EngineError::StoreUnavailable {
            backend: "qdrant".to_string(),
            details: error.to_string(),
        }
    }

    fn bad_response(details: impl Into<String>) -> EngineError {
        EngineError::BackendResponse {
            backend: "qdrant".to_string(),
            details: details.into(),
        }
    }

    /// Creates the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), EngineError> {
        let collection_url = format!("{}/collections/{}", self.endpoint, self.collection);

        let response = self
            .client
            .get(&collection_url)
            .send()
            .await
            .map_err(Self::unavailable)?;

        if response.status().is_success() {
            return Ok(());
        }
        if !response.status().is_client_error() {
            return Err(Self::bad_response(response.status().to_string()));
        }

        let response = self
            .client
            .put(&collection_url)
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::bad_response(format!(
                "collection setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Qdrant point ids must be UUIDs or integers; chunk ids are hex
/// digests. Derive a stable UUID from the chunk id, keeping the real
/// chunk id in the payload.
fn point_id(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert_points(&self, points: &[VectorPoint]) -> Result<(), EngineError> {
        let body_points = points
            .iter()
            .map(|point| {
                if point.vector.len() != self.vector_size {
                    return Err(EngineError::DimensionMismatch(format!(
                        "vector for chunk {} has {} dimensions, collection expects {}",
                        point.chunk_id,
                        point.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&point.chunk_id),
                    "vector": point.vector,
                    "payload": serde_json::to_value(&point.payload)?,
                }))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        if body_points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": body_points }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::bad_response(response.status().to_string()));
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, EngineError> {
        if vector.len() != self.vector_size {
            return Err(EngineError::DimensionMismatch(format!(
                "query vector has {} dimensions, collection expects {}",
                vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::bad_response(response.status().to_string()));
        }

        let parsed: Value = response.json().await.map_err(Self::unavailable)?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload_value = hit
                .pointer("/payload")
                .cloned()
                .ok_or_else(|| Self::bad_response("search hit has no payload"))?;
            let payload: ChunkPayload = serde_json::from_value(payload_value)
                .map_err(|error| Self::bad_response(format!("bad payload: {error}")))?;
            result.push(ScoredPoint { score, payload });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("abc123");
        let second = point_id("abc123");
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, point_id("abc124"));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimensions_before_any_network_call() {
        let store = QdrantVectorStore::new("http://localhost:6333", "chunks", 8);
        let error = store
            .upsert_points(&[VectorPoint {
                chunk_id: "a".to_string(),
                vector: vec![0.1; 4],
                payload: ChunkPayload {
                    document_id: "doc".to_string(),
                    chunk_id: "a".to_string(),
                    position: 0,
                    text: String::new(),
                    concepts: Vec::new(),
                },
            }])
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::DimensionMismatch(_)));
    }
}

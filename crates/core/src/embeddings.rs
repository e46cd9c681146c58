use crate::error::EngineError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Retries `embed` with bounded exponential backoff. Only provider
/// outages are retried; every other failure surfaces immediately.
pub async fn embed_with_retry<E>(
    embedder: &E,
    text: &str,
    max_retries: usize,
) -> Result<Vec<f32>, EngineError>
where
    E: Embedder + ?Sized + Sync,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(200u64 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match embedder.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(error @ EngineError::EmbeddingUnavailable(_)) => {
                debug!(attempt, %error, "embedding attempt failed");
                last_error = Some(error);
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        EngineError::EmbeddingUnavailable("embedding retries exhausted".to_string())
    }))
}

/// Deterministic character-trigram hashing embedder. No provider, no
/// network; the offline and test default.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

/// Client for a remote embedding provider: one JSON POST per text,
/// optional bearer auth. Accepts `{"embedding": [...]}` and the
/// OpenAI-style `{"data": [{"embedding": [...]}]}` response shapes.
pub struct RemoteEmbedder {
    endpoint: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, EngineError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;

        Ok(Self {
            endpoint,
            api_key,
            dimensions,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({ "input": text }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| EngineError::EmbeddingUnavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "provider returned {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| EngineError::EmbeddingUnavailable(error.to_string()))?;

        parse_embedding(&payload, self.dimensions)
    }
}

fn parse_embedding(payload: &Value, dimensions: usize) -> Result<Vec<f32>, EngineError> {
    let raw = payload
        .pointer("/embedding")
        .and_then(Value::as_array)
        .or_else(|| payload.pointer("/data/0/embedding").and_then(Value::as_array))
        .ok_or_else(|| EngineError::BackendResponse {
            backend: "embedding".to_string(),
            details: "response has no embedding array".to_string(),
        })?;

    let vector: Vec<f32> = raw
        .iter()
        .map(|value| value.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vector.len() != dimensions {
        return Err(EngineError::DimensionMismatch(format!(
            "provider returned {} dimensions, expected {}",
            vector.len(),
            dimensions
        )));
    }

    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed("Hybrid graph retrieval").await.unwrap();
        let second = embedder.embed("Hybrid graph retrieval").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hashing_embedder_outputs_expected_length() {
        let embedder = HashingEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn parse_accepts_flat_and_openai_shapes() {
        let flat = json!({ "embedding": [0.0, 1.0] });
        let nested = json!({ "data": [{ "embedding": [1.0, 0.0] }] });

        assert_eq!(parse_embedding(&flat, 2).unwrap(), vec![0.0, 1.0]);
        assert_eq!(parse_embedding(&nested, 2).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn parse_rejects_wrong_dimensions() {
        let payload = json!({ "embedding": [0.5, 0.5, 0.5] });
        let error = parse_embedding(&payload, 2).unwrap_err();
        assert!(matches!(error, EngineError::DimensionMismatch(_)));
    }

    #[test]
    fn parse_rejects_missing_embedding() {
        let payload = json!({ "unexpected": true });
        let error = parse_embedding(&payload, 2).unwrap_err();
        assert!(matches!(error, EngineError::BackendResponse { .. }));
    }

    #[tokio::test]
    async fn retry_surfaces_last_outage() {
        struct AlwaysDown;

        #[async_trait]
        impl Embedder for AlwaysDown {
            fn dimensions(&self) -> usize {
                4
            }

            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
                Err(EngineError::EmbeddingUnavailable("down".to_string()))
            }
        }

        let error = embed_with_retry(&AlwaysDown, "text", 1).await.unwrap_err();
        assert!(matches!(error, EngineError::EmbeddingUnavailable(_)));
    }
}

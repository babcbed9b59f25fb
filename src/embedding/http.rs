/// Remote embedding provider speaking the OpenAI-compatible `/embeddings` API
use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Create a provider for `endpoint` (base URL, e.g. `https://api.openai.com/v1`)
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
        }
    }

    /// Read the API key from an environment variable, if set
    pub fn with_api_key_env(mut self, env_var: &str) -> Self {
        if !env_var.is_empty() {
            self.api_key = std::env::var(env_var).ok().filter(|k| !k.is_empty());
            if self.api_key.is_none() {
                tracing::warn!("Embedding API key variable {} is not set", env_var);
            }
        }
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::GenerationError(format!("Malformed response: {}", e)))?;

        order_embeddings(body.data, texts.len())
    }
}

/// Put embeddings back into request order and check every input got one
fn order_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if data.len() != expected {
        return Err(EmbeddingError::GenerationError(format!(
            "Expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }

    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(EmbeddingError::GenerationError(
            "Embedding indices do not cover the request".to_string(),
        ));
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: usize, value: f32) -> EmbeddingData {
        EmbeddingData {
            index,
            embedding: vec![value],
        }
    }

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let ordered = order_embeddings(vec![data(1, 1.0), data(0, 0.0), data(2, 2.0)], 3).unwrap();
        assert_eq!(ordered, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_embeddings_rejects_short_response() {
        assert!(order_embeddings(vec![data(0, 0.0)], 2).is_err());
    }

    #[test]
    fn test_order_embeddings_rejects_duplicate_indices() {
        assert!(order_embeddings(vec![data(0, 0.0), data(0, 1.0)], 2).is_err());
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let provider = HttpEmbeddingProvider::new("http://localhost:8080/v1/", "nomic-embed-text");
        assert_eq!(provider.endpoint, "http://localhost:8080/v1");
        assert_eq!(provider.model_name(), "nomic-embed-text");
    }
}

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{Embedder, check_embeddings};
use crate::error::{CatalogError, Result};

/// 通过 Ollama `/api/embed` 接口计算文本嵌入
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("imcatalog/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::EmbeddingUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.to_owned(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let unavailable = |e: reqwest::Error| CatalogError::EmbeddingUnavailable(e.to_string());
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let response: EmbedResponse = response.json().await.map_err(|e| {
            CatalogError::EmbeddingUnavailable(format!("响应格式错误: {e}"))
        })?;

        check_embeddings(texts.len(), &response.embeddings)?;
        Ok(response.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        self.request(texts).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_service() {
        let embedder =
            OllamaEmbedder::new("http://127.0.0.1:9/", "all-minilm", Duration::from_secs(2))
                .unwrap();
        assert_eq!(embedder.endpoint, "http://127.0.0.1:9/api/embed");

        let err = embedder.embed(&["a cat".to_owned()]).await.unwrap_err();
        assert!(matches!(err, CatalogError::EmbeddingUnavailable(_)));
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}

//! Embedding provider implementations

use crate::config::{EmbedApi, EmbedConfig};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fnv::FnvHasher;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when
    /// there are none.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Whether texts are embedded for storage or for searching.
///
/// Asymmetric models (Cohere v3) embed the two sides differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Document,
    Query,
}

impl InputKind {
    fn cohere_input_type(&self) -> &'static str {
        match self {
            InputKind::Document => "search_document",
            InputKind::Query => "search_query",
        }
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed document texts for storage. The result has exactly one vector
    /// per input, in input order; an empty input gives an empty result.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Check a batch returned by a provider against the request that produced it.
pub fn validate_embeddings(expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
    if embeddings.len() != expected {
        return Err(EmbedError::invalid_response(format!(
            "expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }

    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    if first.is_empty() {
        return Err(EmbedError::invalid_response("received an empty embedding"));
    }
    if let Some((index, ragged)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.len() != first.len())
    {
        return Err(EmbedError::invalid_response(format!(
            "embedding {index} has dimension {}, expected {}",
            ragged.len(),
            first.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    embeddings: CohereEmbeddings,
}

/// v1 returns a bare list; requests with `embedding_types` return a map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CohereEmbeddings {
    Plain(Vec<Vec<f32>>),
    Typed { float: Vec<Vec<f32>> },
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

fn parse_response(api: EmbedApi, body: &str) -> Result<Vec<Vec<f32>>> {
    match api {
        EmbedApi::Cohere => {
            let response: CohereResponse = serde_json::from_str(body)
                .map_err(|e| EmbedError::invalid_response(format!("malformed Cohere reply: {e}")))?;
            Ok(match response.embeddings {
                CohereEmbeddings::Plain(embeddings) => embeddings,
                CohereEmbeddings::Typed { float } => float,
            })
        }
        EmbedApi::OpenAi => {
            let mut response: OpenAiResponse = serde_json::from_str(body)
                .map_err(|e| EmbedError::invalid_response(format!("malformed OpenAI reply: {e}")))?;
            response.data.sort_by_key(|item| item.index);
            Ok(response.data.into_iter().map(|item| item.embedding).collect())
        }
    }
}

/// Embedding provider backed by a remote HTTP API.
///
/// Texts are sent in batches of `batch_size`, one request at a time, and the
/// vectors are concatenated in input order.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    config: EmbedConfig,
    client: Client,
    api_key: String,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpEmbeddingProvider {
    /// Build a provider, reading the API key from `config.api_key_env`.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::with_api_key(config, api_key)
    }

    /// Build a provider with an explicit API key.
    pub fn with_api_key(config: EmbedConfig, api_key: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        tracing::info!(
            "Embedding provider ready: {:?} model {} at {}",
            config.api,
            config.model,
            config.endpoint()
        );
        Ok(Self {
            config,
            client,
            api_key: api_key.into(),
        })
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    fn request_body(&self, texts: &[String], kind: InputKind) -> serde_json::Value {
        match self.config.api {
            EmbedApi::Cohere => json!({
                "model": self.config.model,
                "texts": texts,
                "input_type": kind.cohere_input_type(),
            }),
            EmbedApi::OpenAi => json!({
                "model": self.config.model,
                "input": texts,
            }),
        }
    }

    async fn embed_batch(&self, texts: &[String], kind: InputKind) -> Result<Vec<Vec<f32>>> {
        tracing::debug!("Requesting embeddings for batch of {} texts", texts.len());

        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts, kind))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EmbedError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let embeddings = parse_response(self.config.api, &body)?;
        validate_embeddings(texts.len(), &embeddings)?;
        Ok(embeddings)
    }

    async fn embed_all(&self, texts: &[String], kind: InputKind) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            all_embeddings.extend(self.embed_batch(batch, kind).await?);
        }

        // batches are validated individually; dimensions must also agree across them
        validate_embeddings(texts.len(), &all_embeddings)?;
        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        self.embed_all(texts, InputKind::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        self.embed_all(&texts, InputKind::Query)
            .await?
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_response("No embedding generated for query"))
    }

    fn provider_name(&self) -> &str {
        match self.config.api {
            EmbedApi::Cohere => "cohere",
            EmbedApi::OpenAi => "openai",
        }
    }
}

/// Deterministic offline provider for tests and demos.
///
/// Each lowercase alphanumeric token is hashed with FNV into one of
/// `dimension` buckets, so texts sharing words get similar vectors. Text with
/// no tokens maps to the zero vector.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    failure_marker: Option<String>,
    texts_embedded: AtomicUsize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            failure_marker: None,
            texts_embedded: AtomicUsize::new(0),
        }
    }

    /// Fail any call whose input contains `marker`.
    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total number of texts embedded so far, queries included.
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }

    fn check_failure(&self, texts: &[String]) -> Result<()> {
        if let Some(marker) = &self.failure_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(EmbedError::External {
                    source: anyhow::anyhow!("mock provider refused input containing {marker:?}"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        self.check_failure(texts)?;
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(EmbeddingResult::new(
            texts.iter().map(|t| self.embed_one(t)).collect(),
        ))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.check_failure(&[text.to_string()])?;
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.embed_one(text))
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_embedding_result() {
        let result = EmbeddingResult::new(vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
        assert!(EmbeddingResult::new(vec![]).is_empty());
    }

    #[test]
    fn test_validate_embeddings() {
        assert!(validate_embeddings(0, &[]).is_ok());
        assert!(validate_embeddings(2, &[vec![1.0, 2.0], vec![3.0, 4.0]]).is_ok());
        assert!(validate_embeddings(3, &[vec![1.0], vec![2.0]]).is_err());
        assert!(validate_embeddings(2, &[vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(validate_embeddings(1, &[vec![]]).is_err());
    }

    #[test]
    fn test_parse_cohere_shapes() {
        let plain = r#"{"id": "x", "embeddings": [[0.5, 1.0], [2.0, 3.0]], "texts": ["a", "b"]}"#;
        assert_eq!(
            parse_response(EmbedApi::Cohere, plain).unwrap(),
            vec![vec![0.5, 1.0], vec![2.0, 3.0]]
        );

        let typed = r#"{"embeddings": {"float": [[1.0]]}}"#;
        assert_eq!(parse_response(EmbedApi::Cohere, typed).unwrap(), vec![vec![1.0]]);

        assert!(matches!(
            parse_response(EmbedApi::Cohere, "not json"),
            Err(EmbedError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_parse_openai_sorts_by_index() {
        let body = r#"{"object": "list", "data": [
            {"object": "embedding", "index": 1, "embedding": [2.0]},
            {"object": "embedding", "index": 0, "embedding": [1.0]}
        ]}"#;
        assert_eq!(
            parse_response(EmbedApi::OpenAi, body).unwrap(),
            vec![vec![1.0], vec![2.0]]
        );
    }

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new(32);
        let texts = vec!["The meeting was moved".to_string(), "".to_string()];

        let first = provider.embed_texts(&texts).await.unwrap();
        let second = provider.embed_texts(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.dimension, 32);
        assert!(first.embeddings[1].iter().all(|v| *v == 0.0));
        assert_eq!(provider.texts_embedded(), 4);

        let query = provider.embed_query("the MEETING was moved").await.unwrap();
        assert_eq!(query, first.embeddings[0]);
    }

    #[tokio::test]
    async fn test_mock_provider_failure_marker() {
        let provider = MockEmbeddingProvider::new(8).with_failure_marker("POISON");
        let texts = vec!["fine".to_string(), "contains POISON".to_string()];
        assert!(provider.embed_texts(&texts).await.is_err());
        assert_eq!(provider.texts_embedded(), 0);
    }

    /// Accept `connections` requests, answering each Cohere-style call with
    /// one `[len, 1.0]` vector per text. Returns the captured request bodies.
    async fn fake_cohere(listener: TcpListener, connections: usize, status: &str) -> Vec<serde_json::Value> {
        let mut requests = Vec::new();
        for _ in 0..connections {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            let body_start = loop {
                let n = socket.read(&mut tmp).await.unwrap();
                assert!(n > 0, "client closed before sending a request");
                buf.extend_from_slice(&tmp[..n]);
                let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + length {
                    break pos + 4;
                }
            };

            let request: serde_json::Value = serde_json::from_slice(&buf[body_start..]).unwrap();
            let embeddings: Vec<Vec<f32>> = request["texts"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| vec![t.as_str().unwrap().len() as f32, 1.0])
                .collect();
            let body = json!({ "embeddings": embeddings }).to_string();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            requests.push(request);
        }
        requests
    }

    #[tokio::test]
    async fn test_http_provider_batches_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_cohere(listener, 2, "200 OK"));

        let config = EmbedConfig::cohere()
            .with_api_base(format!("http://{addr}/v1"))
            .with_batch_size(2);
        let provider = HttpEmbeddingProvider::with_api_key(config, "test-key").unwrap();

        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let result = provider.embed_texts(&texts).await.unwrap();

        assert_eq!(
            result.embeddings,
            vec![vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]]
        );
        assert_eq!(result.dimension, 2);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["input_type"], "search_document");
        assert_eq!(requests[0]["model"], "embed-english-v3.0");
        assert_eq!(requests[1]["texts"], json!(["ccc"]));
    }

    #[tokio::test]
    async fn test_http_provider_reports_api_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_cohere(listener, 1, "500 Internal Server Error"));

        let config = EmbedConfig::cohere().with_api_base(format!("http://{addr}/v1"));
        let provider = HttpEmbeddingProvider::with_api_key(config, "test-key").unwrap();

        let err = provider.embed_query("anything").await.unwrap_err();
        assert!(matches!(err, EmbedError::Api { status: 500, .. }));

        let requests = server.await.unwrap();
        assert_eq!(requests[0]["input_type"], "search_query");
    }

    #[tokio::test]
    async fn test_http_provider_empty_input_makes_no_request() {
        let config = EmbedConfig::cohere().with_api_base("http://127.0.0.1:9/v1");
        let provider = HttpEmbeddingProvider::with_api_key(config, "unused").unwrap();
        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}

//! Embedding providers.

use hsclass_features::FeatureExtractor;
use hsclass_model::{EmbeddingProviderKind, FeatureValue, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider returned no embedding")]
    Empty,

    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("Embedding provider disabled")]
    Disabled,
}

/// Something that turns text into a fixed-length vector.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Length of the vectors produced.
    fn dimension(&self) -> usize;
}

/// Usage vocabulary folded into the hashed vector as one concept feature.
#[derive(Debug, Default)]
struct ConceptTable {
    /// Term to concept index
    by_term: HashMap<String, usize>,
    /// Concept feature names, in table order
    names: Vec<String>,
}

impl ConceptTable {
    fn from_usage_terms(terms: Vec<(String, Usage)>) -> Self {
        let mut table = Self::default();
        for (term, usage) in terms {
            let name = format!("usage:{}", FeatureValue::Usage(usage).as_str());
            let idx = match table.names.iter().position(|n| *n == name) {
                Some(i) => i,
                None => {
                    table.names.push(name);
                    table.names.len() - 1
                }
            };
            table.by_term.entry(term).or_insert(idx);
        }
        table
    }

    /// Concept with the most term hits. Ties go to the earlier concept.
    fn dominant<'t>(&self, tokens: impl Iterator<Item = &'t str>) -> Option<&str> {
        let mut counts = vec![0usize; self.names.len()];
        for token in tokens {
            if let Some(&i) = self.by_term.get(token) {
                counts[i] += 1;
            }
        }
        let mut best: Option<(usize, usize)> = None;
        for (i, &n) in counts.iter().enumerate() {
            if n > 0 && best.map_or(true, |(_, m)| n > m) {
                best = Some((i, n));
            }
        }
        best.map(|(i, _)| self.names[i].as_str())
    }
}

/// Offline embedder: signed feature hashing of word tokens, their character
/// trigrams and the dominant usage concept of the text, L2-normalized.
///
/// Expects normalized text. Whole words outweigh trigrams, and tokens with
/// digits (sizes, model numbers) count for little. The concept feature lets
/// "laptop computer intel ram" land near "data processing machine laptop"
/// even with few shared words. Deterministic across runs and machines, so
/// catalog vectors built once can be reused.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    concepts: Arc<ConceptTable>,
}

const WORD_WEIGHT: f32 = 1.0;
const DIGIT_TOKEN_WEIGHT: f32 = 0.3;
const TRIGRAM_WEIGHT: f32 = 0.2;
const CONCEPT_WEIGHT: f32 = 3.0;

impl HashingEmbedder {
    /// Embedder using the built-in usage vocabulary.
    pub fn new(dimension: usize) -> Self {
        Self::with_extractor(dimension, &FeatureExtractor::default())
    }

    /// Embedder using the usage vocabulary of `extractor`, so a loaded
    /// lexicon shapes the concepts the same way it shapes normalization.
    pub fn with_extractor(dimension: usize, extractor: &FeatureExtractor) -> Self {
        Self {
            dimension: dimension.max(1),
            concepts: Arc::new(ConceptTable::from_usage_terms(extractor.usage_terms())),
        }
    }

    /// Embedder with word and trigram features only.
    pub fn without_concepts(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            concepts: Arc::new(ConceptTable::default()),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            if token.chars().any(|c| c.is_ascii_digit()) {
                self.add(&mut vector, token, DIGIT_TOKEN_WEIGHT);
                continue;
            }
            self.add(&mut vector, token, WORD_WEIGHT);

            let chars: Vec<char> = format!("#{}#", token).chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                self.add(&mut vector, &gram, TRIGRAM_WEIGHT);
            }
        }

        if let Some(concept) = self.concepts.dominant(tokens.iter().copied()) {
            self.add(&mut vector, concept, CONCEPT_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(idx) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &'static str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Default vector length of `text-embedding-3-small`.
pub const OPENAI_DEFAULT_DIMENSION: usize = 1536;

/// OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimension: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request shortened vectors of this length.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Embedding request failed");
                EmbeddingError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, error = %body, "Embedding API error");
            return Err(EmbeddingError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::Empty)
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension.unwrap_or(OPENAI_DEFAULT_DIMENSION)
    }
}

/// Provider selected at runtime from `EmbeddingProviderKind`.
#[derive(Debug, Clone)]
pub enum AnyEmbeddingProvider {
    Hashing(HashingEmbedder),
    OpenAi(OpenAiEmbedder),
    /// Every call fails; retrieval runs degraded
    Disabled,
}

impl AnyEmbeddingProvider {
    /// Build the configured provider. `api_key` is only read for OpenAI.
    pub fn from_kind(kind: &EmbeddingProviderKind, api_key: Option<String>) -> Result<Self, EmbeddingError> {
        match kind {
            EmbeddingProviderKind::Hashing { dimension } => Ok(Self::Hashing(HashingEmbedder::new(*dimension))),
            EmbeddingProviderKind::OpenAi {
                model,
                base_url,
                dimension,
            } => {
                let key = api_key
                    .filter(|k| !k.trim().is_empty())
                    .ok_or(EmbeddingError::MissingApiKey("openai"))?;
                let mut embedder = OpenAiEmbedder::new(key, model.clone()).with_base_url(base_url.clone());
                if let Some(d) = dimension {
                    embedder = embedder.with_dimension(*d);
                }
                Ok(Self::OpenAi(embedder))
            }
            EmbeddingProviderKind::Disabled => Ok(Self::Disabled),
        }
    }
}

impl EmbeddingProvider for AnyEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Self::Hashing(p) => p.embed(text).await,
            Self::OpenAi(p) => p.embed(text).await,
            Self::Disabled => Err(EmbeddingError::Disabled),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Hashing(p) => p.name(),
            Self::OpenAi(p) => p.name(),
            Self::Disabled => "disabled",
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::Hashing(p) => p.dimension(),
            Self::OpenAi(p) => p.dimension(),
            Self::Disabled => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosine_similarity;

    #[test]
    fn test_hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(128);
        let a = e.embed_sync("Laptop computer 15 inch");
        let b = e.embed_sync("Laptop computer 15 inch");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hashing_similarity_tracks_overlap() {
        let e = HashingEmbedder::new(384);
        let query = e.embed_sync("portable laptop computer");
        let close = e.embed_sync("laptop computers, portable");
        let far = e.embed_sync("roasted coffee beans");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_shared_usage_concept_outweighs_unrelated_words() {
        let e = HashingEmbedder::new(384);
        let query = e.embed_sync("laptop computer 15 inch intel i7 16gb ram");
        let laptops = e.embed_sync("portable automatic data processing machine laptop notebook computer");
        let shirts = e.embed_sync("t shirt singlet vest knitted crocheted cotton");
        let with_concept = cosine_similarity(&query, &laptops);
        assert!(with_concept > 0.55, "similarity {}", with_concept);
        assert!(cosine_similarity(&query, &shirts) < 0.2);

        let plain = HashingEmbedder::without_concepts(384);
        let without = cosine_similarity(
            &plain.embed_sync("laptop computer 15 inch intel i7 16gb ram"),
            &plain.embed_sync("portable automatic data processing machine laptop notebook computer"),
        );
        assert!(with_concept > without);
    }

    #[test]
    fn test_digit_tokens_weigh_little() {
        let e = HashingEmbedder::without_concepts(384);
        let a = e.embed_sync("keyboard 104 keys");
        let b = e.embed_sync("keyboard 87 keys");
        assert!(cosine_similarity(&a, &b) > 0.9);
    }

    #[test]
    fn test_hashing_empty_text_is_zero() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_sync("  ,, ").iter().all(|v| *v == 0.0));
        assert_eq!(HashingEmbedder::new(0).dimension(), 1);
    }

    #[test]
    fn test_from_kind() {
        let p = AnyEmbeddingProvider::from_kind(&EmbeddingProviderKind::default(), None).unwrap();
        assert_eq!(p.name(), "hashing");
        assert_eq!(p.dimension(), 384);

        let openai = EmbeddingProviderKind::OpenAi {
            model: "text-embedding-3-small".into(),
            base_url: "https://api.openai.com/v1".into(),
            dimension: Some(256),
        };
        assert!(matches!(
            AnyEmbeddingProvider::from_kind(&openai, None),
            Err(EmbeddingError::MissingApiKey("openai"))
        ));
        let p = AnyEmbeddingProvider::from_kind(&openai, Some("sk-test".into())).unwrap();
        assert_eq!(p.dimension(), 256);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let p = AnyEmbeddingProvider::Disabled;
        assert!(matches!(p.embed("anything").await, Err(EmbeddingError::Disabled)));
    }

    #[test]
    fn test_openai_base_url_trimmed() {
        let e = OpenAiEmbedder::new("sk-test", "m").with_base_url("http://localhost:8080/v1/");
        assert_eq!(e.base_url, "http://localhost:8080/v1");
    }
}

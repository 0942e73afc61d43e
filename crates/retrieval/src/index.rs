//! Vector index abstraction and the in-memory implementation.

use crate::provider::{EmbeddingError, EmbeddingProvider};
use hsclass_features::FeatureExtractor;
use hsclass_model::{clamp_unit, Catalog, HsCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// How an index reports closeness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Metric {
    /// Non-negative distance; smaller is closer
    Distance(f32),
    /// Similarity; larger is closer
    Similarity(f32),
}

impl Metric {
    /// Map onto [0, 1]: `1 / (1 + d)` for distances, clamping for similarities.
    pub fn to_similarity(self) -> f32 {
        match self {
            Self::Distance(d) if d.is_nan() => 0.0,
            Self::Distance(d) => 1.0 / (1.0 + d.max(0.0)),
            Self::Similarity(s) => clamp_unit(s),
        }
    }
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub code: HsCode,
    pub title: Option<String>,
    pub metric: Metric,
}

/// Nearest-neighbour search over catalog vectors.
pub trait VectorIndex: Send + Sync {
    fn search(
        &self,
        vector: &[f32],
        k: usize,
    ) -> impl Future<Output = Result<Vec<IndexHit>, IndexError>> + Send;

    /// Index name for logging.
    fn name(&self) -> &'static str;
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone)]
struct StoredVector {
    code: HsCode,
    title: String,
    vector: Vec<f32>,
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    points: Vec<StoredVector>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: HsCode, title: impl Into<String>, vector: Vec<f32>) {
        let title = title.into();
        match self.points.iter_mut().find(|p| p.code == code) {
            Some(p) => {
                p.title = title;
                p.vector = vector;
            }
            None => self.points.push(StoredVector { code, title, vector }),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index the catalog entries that carry a stored embedding.
    pub fn from_catalog(catalog: &dyn Catalog) -> Self {
        let mut index = Self::new();
        for entry in catalog.entries() {
            if let Some(vector) = &entry.embedding {
                index.insert(entry.code.clone(), entry.title.clone(), vector.clone());
            }
        }
        index
    }

    /// Index every catalog entry where no stored vector exists, embedding
    /// title and keywords normalized by `extractor`, the same way request
    /// text is normalized before it is embedded.
    pub async fn build<P: EmbeddingProvider>(
        catalog: &dyn Catalog,
        provider: &P,
        extractor: &FeatureExtractor,
    ) -> Result<Self, EmbeddingError> {
        let entries: Vec<_> = catalog.entries().collect();
        let mut index = Self::new();
        for entry in entries {
            let vector = match &entry.embedding {
                Some(v) if v.len() == provider.dimension() => v.clone(),
                _ => provider.embed(&extractor.normalize(&entry.match_text())).await?,
            };
            index.insert(entry.code.clone(), entry.title.clone(), vector);
        }
        Ok(index)
    }

    fn search_sync(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if let Some(first) = self.points.first() {
            if first.vector.len() != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: first.vector.len(),
                    got: vector.len(),
                });
            }
        }

        let mut hits: Vec<IndexHit> = self
            .points
            .iter()
            .map(|p| IndexHit {
                code: p.code.clone(),
                title: Some(p.title.clone()),
                metric: Metric::Similarity(cosine_similarity(vector, &p.vector)),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.metric
                .to_similarity()
                .total_cmp(&a.metric.to_similarity())
                .then_with(|| a.code.cmp(&b.code))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.search_sync(vector, k)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashingEmbedder;
    use hsclass_model::{CatalogEntry, InMemoryCatalog};

    fn code(s: &str) -> HsCode {
        HsCode::parse(s).unwrap()
    }

    #[test]
    fn test_metric_mapping() {
        assert_eq!(Metric::Distance(0.0).to_similarity(), 1.0);
        assert_eq!(Metric::Distance(1.0).to_similarity(), 0.5);
        assert_eq!(Metric::Distance(-3.0).to_similarity(), 1.0);
        assert_eq!(Metric::Distance(f32::NAN).to_similarity(), 0.0);
        assert_eq!(Metric::Similarity(1.4).to_similarity(), 1.0);
        assert_eq!(Metric::Similarity(-0.2).to_similarity(), 0.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_sorted_and_truncated() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(code("847130"), "Laptops", vec![1.0, 0.0, 0.0]);
        index.insert(code("090111"), "Coffee", vec![0.0, 1.0, 0.0]);
        index.insert(code("847160"), "Input units", vec![0.8, 0.2, 0.0]);

        let hits = index.search(&[1.0, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].code, code("847130"));
        assert_eq!(hits[1].code, code("847160"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(code("847130"), "Laptops", vec![1.0, 0.0]);
        assert!(matches!(
            index.search(&[1.0], 1).await,
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[tokio::test]
    async fn test_build_from_catalog() {
        let mut stored = CatalogEntry::new(code("0901"), "Coffee", "coffee");
        stored.embedding = Some(vec![0.0; 8]);
        let catalog = InMemoryCatalog::new(vec![
            stored,
            CatalogEntry::new(code("847130"), "Portable computers", "laptop notebook"),
        ]);

        assert_eq!(InMemoryVectorIndex::from_catalog(&catalog).len(), 1);

        let provider = HashingEmbedder::new(64);
        let index = InMemoryVectorIndex::build(&catalog, &provider, &FeatureExtractor::default())
            .await
            .unwrap();
        assert_eq!(index.len(), 2);
        let hits = index.search(&provider.embed_sync("laptop"), 1).await.unwrap();
        assert_eq!(hits[0].code, code("847130"));
    }

    /// Provider that remembers every text it was asked to embed.
    #[derive(Default)]
    struct RecordingProvider {
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl EmbeddingProvider for RecordingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(text.to_string());
            }
            Ok(vec![1.0, 0.0])
        }

        fn name(&self) -> &'static str {
            "recording"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_build_embeds_normalized_catalog_text() {
        let catalog = InMemoryCatalog::new(vec![CatalogEntry::new(
            code("847130"),
            "Portable Computers, of the Laptop type",
            "Portátiles",
        )]);
        let provider = RecordingProvider::default();
        InMemoryVectorIndex::build(&catalog, &provider, &FeatureExtractor::default())
            .await
            .unwrap();
        let seen = provider.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["portable computer laptop type portatil".to_string()]);
    }
}

//! Embedding-based candidate retrieval.
//!
//! An `EmbeddingProvider` turns text into a vector, a `VectorIndex` returns
//! the nearest catalog codes, and `EmbeddingRetriever` wraps both in a
//! timeout. Any failure degrades to "no embedding candidates" with a reason;
//! nothing here retries.

pub mod index;
pub mod provider;

pub use index::{cosine_similarity, IndexError, IndexHit, InMemoryVectorIndex, Metric, VectorIndex};
pub use provider::{
    AnyEmbeddingProvider, EmbeddingError, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder,
    OPENAI_DEFAULT_DIMENSION,
};

use hsclass_model::{DegradedReason, EmbeddingCandidate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

impl<T: EmbeddingProvider> EmbeddingProvider for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

impl<T: VectorIndex> VectorIndex for Arc<T> {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        (**self).search(vector, k).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Provider plus index behind a timeout.
#[derive(Debug, Clone)]
pub struct EmbeddingRetriever<P, I> {
    provider: P,
    index: I,
    timeout: Duration,
}

impl<P: EmbeddingProvider, I: VectorIndex> EmbeddingRetriever<P, I> {
    pub fn new(provider: P, index: I, timeout: Duration) -> Self {
        Self {
            provider,
            index,
            timeout,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Up to `k` candidates, best first. `k = 0` is treated as 1.
    pub async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<EmbeddingCandidate>, DegradedReason> {
        self.retrieve_within(text, k, self.timeout).await
    }

    /// Like `retrieve`, bounded by `limit` when it is tighter than the
    /// configured timeout.
    pub async fn retrieve_within(
        &self,
        text: &str,
        k: usize,
        limit: Duration,
    ) -> Result<Vec<EmbeddingCandidate>, DegradedReason> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let k = k.max(1);
        let budget = limit.min(self.timeout);

        let search = async {
            let vector = self.provider.embed(text).await.map_err(|e| {
                DegradedReason::EmbeddingProviderUnavailable(format!("{}: {}", self.provider.name(), e))
            })?;
            self.index
                .search(&vector, k)
                .await
                .map_err(|e| DegradedReason::VectorIndexUnavailable(format!("{}: {}", self.index.name(), e)))
        };

        let hits = match tokio::time::timeout(budget, search).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(reason)) => {
                warn!(%reason, "Embedding retrieval degraded");
                return Err(reason);
            }
            Err(_) => {
                let reason = DegradedReason::RetrievalTimeout {
                    after_ms: budget.as_millis() as u64,
                };
                warn!(%reason, "Embedding retrieval degraded");
                return Err(reason);
            }
        };

        let candidates = to_candidates(hits, k);
        debug!(
            provider = self.provider.name(),
            index = self.index.name(),
            candidates = candidates.len(),
            "Embedding retrieval finished"
        );
        Ok(candidates)
    }
}

/// Best similarity per code, sorted descending, at most `k`.
fn to_candidates(hits: Vec<IndexHit>, k: usize) -> Vec<EmbeddingCandidate> {
    let mut candidates: Vec<EmbeddingCandidate> = Vec::with_capacity(hits.len());
    for hit in hits {
        let similarity = hit.metric.to_similarity();
        match candidates.iter_mut().find(|c| c.code == hit.code) {
            Some(existing) if existing.similarity >= similarity => {}
            Some(existing) => existing.similarity = similarity,
            None => candidates.push(EmbeddingCandidate {
                code: hit.code,
                similarity,
                title: hit.title.unwrap_or_default(),
            }),
        }
    }
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then_with(|| a.code.cmp(&b.code)));
    candidates.truncate(k);
    candidates
}

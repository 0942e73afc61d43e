//! Classifier configuration snapshot.
//!
//! A `ClassifierConfig` is loaded once, validated, wrapped in an `Arc` and
//! handed to every pipeline invocation. Changing weights means building a new
//! snapshot with a new `version`.

use crate::code::HsCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("score weights must sum to 1.0, got {0:.4}")]
    WeightsSum(f32),

    #[error("score weight {name} out of range: {value}")]
    WeightRange { name: &'static str, value: f32 },

    #[error("threshold {name} must be within [0, 1], got {value}")]
    ThresholdRange { name: &'static str, value: f32 },

    #[error("kpi.max_response_time_secs must be positive, got {0}")]
    ResponseTime(f64),

    #[error("{name} must be at least 1")]
    ZeroLimit { name: &'static str },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which backend turns text into vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder
    Hashing { dimension: usize },
    /// OpenAI-compatible embeddings endpoint
    OpenAi {
        model: String,
        #[serde(default = "default_openai_url")]
        base_url: String,
        #[serde(default)]
        dimension: Option<usize>,
    },
    /// No provider; retrieval always runs degraded
    Disabled,
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for EmbeddingProviderKind {
    fn default() -> Self {
        Self::Hashing { dimension: 384 }
    }
}

/// Weights of the three score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub contextual: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            lexical: 0.3,
            contextual: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f32 {
        self.semantic + self.lexical + self.contextual
    }
}

/// Confidence thresholds for review, feedback and self-certification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    /// Below this confidence a feedback record is created
    pub feedback_trigger: f32,

    /// Minimum `score_total` for automatic coverage
    pub auto_coverage: f32,

    /// Confidence floor applied by automatic coverage
    #[serde(default = "default_auto_coverage_floor")]
    pub auto_coverage_floor: f32,

    /// Subtracted from confidence on a chapter coherence failure
    #[serde(default = "default_coherence_penalty")]
    pub coherence_penalty: f32,
}

fn default_auto_coverage_floor() -> f32 {
    0.75
}

fn default_coherence_penalty() -> f32 {
    0.15
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            feedback_trigger: 0.6,
            auto_coverage: 0.65,
            auto_coverage_floor: default_auto_coverage_floor(),
            coherence_penalty: default_coherence_penalty(),
        }
    }
}

/// Retrieval limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Semantic candidates requested from the index
    pub top_k: usize,

    /// Timeout for provider + index, in milliseconds
    pub timeout_ms: u64,

    /// Ceiling for the whole pipeline, in milliseconds
    pub total_budget_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            timeout_ms: 5_000,
            total_budget_ms: 10_000,
        }
    }
}

/// Alert thresholds and batching for the KPI monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiThresholds {
    /// Classifications below this confidence raise an alert
    pub min_confidence: f32,

    /// Slowest acceptable classification, in seconds
    pub max_response_time_secs: f64,

    /// Minimum share of validations that did not fail
    pub min_validation_score: f32,

    /// Batch validation failure rate above which the system is critical
    pub max_error_rate: f32,

    /// Classifications per KPI batch
    pub batch_size: usize,
}

impl Default for KpiThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_response_time_secs: 10.0,
            min_validation_score: 0.7,
            max_error_rate: 0.2,
            batch_size: 10,
        }
    }
}

/// Immutable configuration injected into each classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub embedding_provider: EmbeddingProviderKind,

    #[serde(default)]
    pub score_weights: ScoreWeights,

    /// Codes (or code prefixes) that always require review
    #[serde(default)]
    pub suspect_codes: Vec<HsCode>,

    #[serde(default)]
    pub confidence_thresholds: ConfidenceThresholds,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Length of the `topK` list in results
    #[serde(default = "default_top_k_output")]
    pub top_k_output: usize,

    #[serde(default)]
    pub kpi: KpiThresholds,
}

fn default_version() -> u32 {
    1
}

fn default_top_k_output() -> usize {
    5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            embedding_provider: EmbeddingProviderKind::default(),
            score_weights: ScoreWeights::default(),
            suspect_codes: Vec::new(),
            confidence_thresholds: ConfidenceThresholds::default(),
            retrieval: RetrievalSettings::default(),
            top_k_output: default_top_k_output(),
            kpi: KpiThresholds::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn with_suspect_codes(mut self, codes: Vec<HsCode>) -> Self {
        self.suspect_codes = codes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.score_weights;
        for (name, value) in [
            ("semantic", w.semantic),
            ("lexical", w.lexical),
            ("contextual", w.contextual),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightRange { name, value });
            }
        }
        if (w.sum() - 1.0).abs() > 1e-3 {
            return Err(ConfigError::WeightsSum(w.sum()));
        }

        let t = &self.confidence_thresholds;
        for (name, value) in [
            ("feedback_trigger", t.feedback_trigger),
            ("auto_coverage", t.auto_coverage),
            ("auto_coverage_floor", t.auto_coverage_floor),
            ("coherence_penalty", t.coherence_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }

        let k = &self.kpi;
        for (name, value) in [
            ("kpi.min_confidence", k.min_confidence),
            ("kpi.min_validation_score", k.min_validation_score),
            ("kpi.max_error_rate", k.max_error_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }
        if k.max_response_time_secs.is_nan() || k.max_response_time_secs <= 0.0 {
            return Err(ConfigError::ResponseTime(k.max_response_time_secs));
        }
        if k.batch_size == 0 {
            return Err(ConfigError::ZeroLimit { name: "kpi.batch_size" });
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ZeroLimit { name: "retrieval.top_k" });
        }
        if self.top_k_output == 0 {
            return Err(ConfigError::ZeroLimit { name: "top_k_output" });
        }

        Ok(())
    }

    /// True when `code` is denylisted, directly or through an ancestor.
    pub fn is_suspect(&self, code: &HsCode) -> bool {
        self.suspect_codes.iter().any(|s| code.starts_with(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ClassifierConfig::default().validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = ClassifierConfig::default();
        config.score_weights.semantic = 0.7;
        assert!(matches!(config.validate(), Err(ConfigError::WeightsSum(_))));
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = ClassifierConfig::from_json(
            r#"{"version": 3, "suspect_codes": ["8517.62"], "embedding_provider": {"kind": "disabled"}}"#,
        )
        .unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.embedding_provider, EmbeddingProviderKind::Disabled);
        assert_eq!(config.confidence_thresholds.feedback_trigger, 0.6);
        assert!(config.is_suspect(&HsCode::parse("8517620000").unwrap()));
        assert!(!config.is_suspect(&HsCode::parse("8471300000").unwrap()));
    }

    #[test]
    fn test_kpi_thresholds_partial_json() {
        let config = ClassifierConfig::from_json(r#"{"kpi": {"min_confidence": 0.8, "batch_size": 5}}"#).unwrap();
        assert_eq!(config.kpi.min_confidence, 0.8);
        assert_eq!(config.kpi.batch_size, 5);
        assert_eq!(config.kpi.max_error_rate, 0.2);
        assert_eq!(config.kpi.max_response_time_secs, 10.0);
    }

    #[test]
    fn test_kpi_thresholds_validated() {
        let mut config = ClassifierConfig::default();
        config.kpi.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLimit { name: "kpi.batch_size" })
        ));

        let mut config = ClassifierConfig::default();
        config.kpi.max_response_time_secs = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::ResponseTime(_))));

        let mut config = ClassifierConfig::default();
        config.kpi.max_error_rate = 2.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdRange { name: "kpi.max_error_rate", .. })
        ));
    }

    #[test]
    fn test_threshold_range_checked() {
        let mut config = ClassifierConfig::default();
        config.confidence_thresholds.auto_coverage = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdRange { name: "auto_coverage", .. })
        ));
    }
}

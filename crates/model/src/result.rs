//! Requests, results and the degradation taxonomy.

use crate::candidate::RankedCandidate;
use crate::code::HsCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Shortest combined title + description accepted for classification.
pub const MIN_TEXT_CHARS: usize = 10;

/// Input rejected before the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("product text is empty")]
    Empty,
    #[error("product text too short: {len} characters, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("case id is empty")]
    MissingCaseId,
}

/// Structured attributes supplied alongside the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurements: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl RequestAttributes {
    /// All present values, in field order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [
            &self.material,
            &self.origin,
            &self.brand,
            &self.measurements,
            &self.usage,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
    }
}

/// One classification call's input. Fields are private so a request can only
/// exist once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationRequest {
    case_id: String,
    title: String,
    description: String,
    attrs: RequestAttributes,
}

impl ClassificationRequest {
    pub fn new(
        case_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        attrs: RequestAttributes,
    ) -> Result<Self, InputError> {
        let case_id = case_id.into();
        let title = title.into();
        let description = description.into();

        if case_id.trim().is_empty() {
            return Err(InputError::MissingCaseId);
        }

        let len = title.trim().chars().count() + description.trim().chars().count();
        if len == 0 {
            return Err(InputError::Empty);
        }
        if len < MIN_TEXT_CHARS {
            return Err(InputError::TooShort {
                len,
                min: MIN_TEXT_CHARS,
            });
        }

        Ok(Self {
            case_id,
            title,
            description,
            attrs,
        })
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn attrs(&self) -> &RequestAttributes {
        &self.attrs
    }

    /// Title and description joined by a space.
    pub fn text(&self) -> String {
        let title = self.title.trim();
        let description = self.description.trim();
        match (title.is_empty(), description.is_empty()) {
            (false, false) => format!("{} {}", title, description),
            (false, true) => title.to_string(),
            _ => description.to_string(),
        }
    }
}

/// Why a signal source produced no or partial output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
    LemmatizerUnavailable,
    EmbeddingProviderUnavailable(String),
    VectorIndexUnavailable(String),
    RetrievalTimeout { after_ms: u64 },
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LemmatizerUnavailable => write!(f, "lemmatizer unavailable"),
            Self::EmbeddingProviderUnavailable(e) => write!(f, "embedding provider unavailable: {}", e),
            Self::VectorIndexUnavailable(e) => write!(f, "vector index unavailable: {}", e),
            Self::RetrievalTimeout { after_ms } => write!(f, "retrieval timed out after {}ms", after_ms),
        }
    }
}

/// A partial value produced under degradation.
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub reason: DegradedReason,
    pub partial: T,
}

/// Outcome of the chapter coherence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Coherence {
    Ok,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Warn,
    Fail,
}

/// One validation performed on the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub check: String,
    pub status: ValidationStatus,
    pub detail: String,
}

impl Validation {
    pub fn new(check: impl Into<String>, status: ValidationStatus, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// A factor that weighed on the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisiveFactor {
    /// Kind of signal (semantic, lexical, rule, attribute, ...)
    pub kind: String,

    /// The specific value or match
    pub value: String,

    /// Contribution to the total score, when the factor is a score component
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contribution: Option<f32>,
}

/// Structured explanation of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub decision: String,
    pub factores_clave: Vec<DecisiveFactor>,
    pub validations: Vec<Validation>,
    pub chapter_coherence: Coherence,
    pub suspect_code: bool,
    pub requires_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKEntry {
    pub code: String,
    pub score: f32,
}

/// The externally visible classification artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub case_id: String,

    /// Chosen code, empty when unclassifiable
    pub national_code: String,

    /// International subheading of the chosen code
    #[serde(default)]
    pub hs6: String,

    pub confidence: f32,

    pub title: String,

    pub rationale: Rationale,

    #[serde(rename = "topK")]
    pub top_k: Vec<TopKEntry>,

    /// Full breakdown of the ranked candidates
    #[serde(default)]
    pub candidates: Vec<RankedCandidate>,

    #[serde(default)]
    pub rules_applied: Vec<String>,

    /// Normalized keywords extracted from the product text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Seconds spent in the pipeline
    pub response_time: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedReason>,
}

impl ClassificationResult {
    pub fn code(&self) -> Option<HsCode> {
        HsCode::parse(&self.national_code).ok()
    }

    pub fn requires_review(&self) -> bool {
        self.rationale.requires_review
    }

    pub fn suspect_code(&self) -> bool {
        self.rationale.suspect_code
    }

    pub fn is_classified(&self) -> bool {
        !self.national_code.is_empty()
    }

    pub fn top(&self) -> Option<&RankedCandidate> {
        self.candidates.first()
    }
}

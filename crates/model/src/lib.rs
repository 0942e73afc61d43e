//! Core domain model for hsclass commodity classification.
//!
//! This crate defines the types shared by every pipeline stage:
//! - `HsCode`: a hierarchical classification code and its section
//! - `ExtractedFeatures`: normalized text, keywords and typed attributes
//! - `RuleCandidate` / `EmbeddingCandidate` / `RankedCandidate`: scoring stages
//! - `ClassificationResult`: the explained decision returned to callers
//! - `ClassifierConfig`: the immutable configuration snapshot

pub mod candidate;
pub mod catalog;
pub mod code;
pub mod config;
pub mod features;
pub mod result;

pub use candidate::{
    clamp_unit, EmbeddingCandidate, LegalRef, RankedCandidate, RuleCandidate, RuleClass,
};
pub use catalog::{Catalog, CatalogEntry, CatalogError, InMemoryCatalog};
pub use code::{CodeError, CodeLevel, HsCode, HsSection};
pub use config::{
    ClassifierConfig, ConfidenceThresholds, ConfigError, EmbeddingProviderKind, KpiThresholds,
    RetrievalSettings, ScoreWeights,
};
pub use features::{
    Attributes, ExtractedFeatures, FeatureKey, FeatureValue, Material, Origin, ProcessingLevel,
    Usage,
};
pub use result::{
    ClassificationRequest, ClassificationResult, Coherence, DecisiveFactor, Degraded,
    DegradedReason, InputError, Rationale, RequestAttributes, TopKEntry, Validation,
    ValidationStatus, MIN_TEXT_CHARS,
};

//! Candidates produced by the rule engine, the retriever and the re-ranker.

use crate::code::HsCode;
use crate::config::ScoreWeights;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six General Rules for the Interpretation of the nomenclature, in
/// evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleClass {
    /// Classification by the terms of the headings.
    #[serde(rename = "GRI1")]
    Gri1,
    /// Incomplete or unassembled articles; mixtures and composite goods.
    #[serde(rename = "GRI2")]
    Gri2,
    /// Most specific description, essential character, last in numerical order.
    #[serde(rename = "GRI3")]
    Gri3,
    /// Goods classified with those to which they are most akin.
    #[serde(rename = "GRI4")]
    Gri4,
    /// Cases, containers and packing materials.
    #[serde(rename = "GRI5")]
    Gri5,
    /// Subheadings compared only at the same level.
    #[serde(rename = "GRI6")]
    Gri6,
}

impl RuleClass {
    pub const ALL: [RuleClass; 6] = [
        Self::Gri1,
        Self::Gri2,
        Self::Gri3,
        Self::Gri4,
        Self::Gri5,
        Self::Gri6,
    ];

    /// Position in the evaluation order; lower runs first and wins ties.
    pub fn priority(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gri1 => "GRI1",
            Self::Gri2 => "GRI2",
            Self::Gri3 => "GRI3",
            Self::Gri4 => "GRI4",
            Self::Gri5 => "GRI5",
            Self::Gri6 => "GRI6",
        }
    }
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the legal text backing a rule decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LegalRef {
    /// A General Interpretation Rule
    Rule(RuleClass),
    /// A section, chapter or heading note, e.g. "84/5"
    Note(String),
    /// An external legal source, e.g. a decree
    Source(String),
}

/// A code proposed by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub code: HsCode,

    /// Identifiers of every rule that proposed or adjusted this code
    pub matched_rules: Vec<String>,

    /// Net bonus/penalty, already clamped to the allowed range
    pub delta: f32,

    /// Base lexical score plus `delta`, clamped to [0, 1]
    pub lexical_score: f32,

    /// Explicit priority recorded with the winning proposal
    pub priority_weight: f32,

    /// Position after the tie-break (0 = winning proposal)
    pub rule_rank: usize,

    #[serde(default)]
    pub legal_refs: Vec<LegalRef>,
}

/// A code retrieved by embedding similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCandidate {
    pub code: HsCode,

    /// Similarity in [0, 1]
    pub similarity: f32,

    /// Catalog title of the matched entry
    pub title: String,
}

/// A merged, scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub code: HsCode,

    #[serde(default)]
    pub title: String,

    pub score_semantic: f32,
    pub score_lexical: f32,
    pub score_contextual: f32,

    /// Weighted sum of the three components
    pub score_total: f32,

    #[serde(default)]
    pub matched_rules: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_rank: Option<usize>,
}

impl RankedCandidate {
    /// Build a candidate, clamping each component and computing the total.
    pub fn new(
        code: HsCode,
        title: impl Into<String>,
        semantic: f32,
        lexical: f32,
        contextual: f32,
        weights: &ScoreWeights,
    ) -> Self {
        let score_semantic = clamp_unit(semantic);
        let score_lexical = clamp_unit(lexical);
        let score_contextual = clamp_unit(contextual);
        let score_total = clamp_unit(
            weights.semantic * score_semantic
                + weights.lexical * score_lexical
                + weights.contextual * score_contextual,
        );

        Self {
            code,
            title: title.into(),
            score_semantic,
            score_lexical,
            score_contextual,
            score_total,
            matched_rules: Vec::new(),
            rule_rank: None,
        }
    }

    pub fn has_rule_evidence(&self) -> bool {
        !self.matched_rules.is_empty()
    }

    /// No rule and no lexical signal.
    pub fn is_purely_semantic(&self) -> bool {
        !self.has_rule_evidence() && self.score_lexical == 0.0
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_weighted_sum() {
        let code = HsCode::parse("847130").unwrap();
        let c = RankedCandidate::new(code, "Laptops", 0.9, 0.8, 1.0, &ScoreWeights::default());
        let expected = 0.6 * 0.9 + 0.3 * 0.8 + 0.1 * 1.0;
        assert!((c.score_total - expected).abs() < 1e-6);
    }

    #[test]
    fn test_components_clamped() {
        let code = HsCode::parse("847130").unwrap();
        let c = RankedCandidate::new(code, "", 1.7, -0.2, f32::NAN, &ScoreWeights::default());
        assert_eq!(c.score_semantic, 1.0);
        assert_eq!(c.score_lexical, 0.0);
        assert_eq!(c.score_contextual, 0.0);
        assert!((c.score_total - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_rule_class_order() {
        assert!(RuleClass::Gri1.priority() < RuleClass::Gri6.priority());
        assert_eq!(serde_json::to_string(&RuleClass::Gri3).unwrap(), "\"GRI3\"");
    }
}

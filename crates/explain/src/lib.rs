//! Rationale generation for classification decisions.
//!
//! Turns the winning candidate's score components, matched rules, extracted
//! attributes and governance validations into a `Rationale` suitable for
//! reviewers and for the JSON artifact returned to callers.

use hsclass_governance::GovernedResult;
use hsclass_model::{DecisiveFactor, ExtractedFeatures, Rationale, RankedCandidate, ScoreWeights};

/// Decision text for a request that produced no candidates.
pub const UNCLASSIFIABLE: &str = "unclassifiable";

/// Qualitative band for a score component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    VeryHigh,
    High,
    Moderate,
    Low,
}

impl Strength {
    pub fn of_semantic(score: f32) -> Self {
        if score > 0.7 {
            Self::High
        } else if score > 0.4 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn of_lexical(score: f32) -> Self {
        if score > 0.8 {
            Self::VeryHigh
        } else if score > 0.6 {
            Self::High
        } else if score > 0.4 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very high",
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Low => "low",
        }
    }
}

fn component(kind: &str, score: f32, weight: f32, strength: Strength) -> DecisiveFactor {
    DecisiveFactor {
        kind: kind.to_string(),
        value: format!("{:.2} ({})", score, strength.label()),
        contribution: Some(weight * score),
    }
}

/// Factors behind the top candidate, largest score contribution first,
/// followed by matched rules and extracted attributes.
pub fn decisive_factors(
    top: &RankedCandidate,
    features: &ExtractedFeatures,
    weights: &ScoreWeights,
) -> Vec<DecisiveFactor> {
    let mut factors: Vec<DecisiveFactor> = [
        (top.score_semantic > 0.0)
            .then(|| component("semantic", top.score_semantic, weights.semantic, Strength::of_semantic(top.score_semantic))),
        (top.score_lexical > 0.0)
            .then(|| component("lexical", top.score_lexical, weights.lexical, Strength::of_lexical(top.score_lexical))),
        (top.score_contextual > 0.0).then(|| DecisiveFactor {
            kind: "contextual".to_string(),
            value: format!("{:.2}", top.score_contextual),
            contribution: Some(weights.contextual * top.score_contextual),
        }),
    ]
    .into_iter()
    .flatten()
    .collect();

    factors.sort_by(|a, b| {
        b.contribution
            .unwrap_or(0.0)
            .total_cmp(&a.contribution.unwrap_or(0.0))
    });

    factors.extend(top.matched_rules.iter().map(|id| DecisiveFactor {
        kind: "rule".to_string(),
        value: id.clone(),
        contribution: None,
    }));

    factors.extend(features.attributes.iter().map(|(key, value)| DecisiveFactor {
        kind: "attribute".to_string(),
        value: format!("{}={}", key.as_str(), value.as_str()),
        contribution: None,
    }));

    factors
}

/// One-sentence decision statement.
pub fn decision_statement(top: &RankedCandidate, confidence: f32) -> String {
    let mut parts = vec![
        format!("{} semantic similarity", Strength::of_semantic(top.score_semantic).label()),
        format!("{} lexical match", Strength::of_lexical(top.score_lexical).label()),
    ];
    if top.has_rule_evidence() {
        parts.push(format!("rules {}", top.matched_rules.join(", ")));
    }

    let title = if top.title.is_empty() {
        String::new()
    } else {
        format!(" ({})", top.title)
    };
    format!(
        "Classified as {}{} with confidence {:.2}: {}.",
        top.code,
        title,
        confidence,
        parts.join("; ")
    )
}

pub fn build_rationale(
    top: &RankedCandidate,
    features: &ExtractedFeatures,
    governed: &GovernedResult,
    weights: &ScoreWeights,
) -> Rationale {
    Rationale {
        decision: decision_statement(top, governed.confidence),
        factores_clave: decisive_factors(top, features, weights),
        validations: governed.validations.clone(),
        chapter_coherence: governed.chapter_coherence,
        suspect_code: governed.suspect_code,
        requires_review: governed.requires_review,
    }
}

/// Rationale for a request with no candidates.
pub fn unclassifiable_rationale(features: &ExtractedFeatures) -> Rationale {
    let governed = GovernedResult::unclassifiable();
    Rationale {
        decision: UNCLASSIFIABLE.to_string(),
        factores_clave: features
            .attributes
            .iter()
            .map(|(key, value)| DecisiveFactor {
                kind: "attribute".to_string(),
                value: format!("{}={}", key.as_str(), value.as_str()),
                contribution: None,
            })
            .collect(),
        validations: governed.validations,
        chapter_coherence: governed.chapter_coherence,
        suspect_code: governed.suspect_code,
        requires_review: governed.requires_review,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{Attributes, Coherence, HsCode, Material, Usage};
    use pretty_assertions::assert_eq;

    fn laptop() -> RankedCandidate {
        let mut c = RankedCandidate::new(
            HsCode::parse("847130").unwrap(),
            "Portable computers",
            0.9,
            0.8,
            0.85,
            &ScoreWeights::default(),
        );
        c.matched_rules = vec!["gri1-laptop".to_string()];
        c
    }

    fn features() -> ExtractedFeatures {
        ExtractedFeatures {
            attributes: Attributes {
                usage_primary: Some(Usage::Computing),
                material_principal: Some(Material::Aluminium),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_strength_bands() {
        assert_eq!(Strength::of_semantic(0.71), Strength::High);
        assert_eq!(Strength::of_semantic(0.4), Strength::Low);
        assert_eq!(Strength::of_lexical(0.81), Strength::VeryHigh);
        assert_eq!(Strength::of_lexical(0.5), Strength::Moderate);
    }

    #[test]
    fn test_factors_ordered_by_contribution() {
        let factors = decisive_factors(&laptop(), &features(), &ScoreWeights::default());
        let kinds: Vec<_> = factors.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["semantic", "lexical", "contextual", "rule", "attribute", "attribute"]
        );
        assert_eq!(factors[3].value, "gri1-laptop");
        assert_eq!(factors[4].value, "usage_primary=computing");
        assert_eq!(factors[5].value, "material_principal=aluminium");
    }

    #[test]
    fn test_zero_components_omitted() {
        let c = RankedCandidate::new(HsCode::parse("847130").unwrap(), "", 0.0, 0.8, 0.0, &ScoreWeights::default());
        let factors = decisive_factors(&c, &ExtractedFeatures::default(), &ScoreWeights::default());
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].kind, "lexical");
    }

    #[test]
    fn test_decision_statement() {
        let text = decision_statement(&laptop(), 0.87);
        assert!(text.starts_with("Classified as 8471.30 (Portable computers) with confidence 0.87"));
        assert!(text.contains("high semantic similarity"));
        assert!(text.contains("rules gri1-laptop"));
    }

    #[test]
    fn test_unclassifiable() {
        let r = unclassifiable_rationale(&features());
        assert_eq!(r.decision, UNCLASSIFIABLE);
        assert!(r.requires_review);
        assert_eq!(r.chapter_coherence, Coherence::Ok);
        assert_eq!(r.factores_clave.len(), 2);
    }
}

//! Contextual governance of the top candidate.
//!
//! Checks that the candidate's section agrees with the extracted attributes,
//! flags denylisted codes, adjusts confidence and decides whether a human
//! must review the result. Automatic coverage runs last and is the only step
//! that can clear `requires_review`.

use hsclass_features::fold;
use hsclass_model::{
    clamp_unit, ClassifierConfig, Coherence, ExtractedFeatures, HsCode, HsSection, Material,
    RankedCandidate, Usage, Validation, ValidationStatus,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Share of the contextual score carried by usage agreement.
pub const USAGE_WEIGHT: f32 = 0.7;
/// Share of the contextual score carried by material agreement.
pub const MATERIAL_WEIGHT: f32 = 0.3;
/// Contextual score of an attribute that was not extracted.
pub const NEUTRAL: f32 = 0.5;

/// Sections where goods of a given use are normally classified.
pub fn usage_sections(usage: Usage) -> &'static [HsSection] {
    use HsSection::*;
    match usage {
        Usage::Computing | Usage::Telecom | Usage::Machinery | Usage::HouseholdAppliances => {
            &[MachineryAndElectrical]
        }
        Usage::Apparel => &[Textiles],
        Usage::Footwear => &[Footwear],
        Usage::Food => &[LiveAnimals, VegetableProducts, FatsAndOils, PreparedFoodstuffs],
        Usage::Beverage => &[PreparedFoodstuffs],
        Usage::LiveAnimals => &[LiveAnimals],
        Usage::Vehicles => &[Vehicles],
        Usage::Tools => &[BaseMetals, MachineryAndElectrical],
        Usage::Construction => &[MineralProducts, StoneAndGlass, BaseMetals, Wood],
        Usage::Toys | Usage::Furniture => &[MiscellaneousManufactured],
        Usage::Medical => &[Instruments, Chemicals, PlasticsAndRubber],
        Usage::Stationery => &[Paper, MiscellaneousManufactured],
        Usage::Jewelry => &[PreciousMetals, Instruments],
        Usage::Chemicals => &[Chemicals, MineralProducts],
        Usage::Agriculture => &[Chemicals, VegetableProducts],
    }
}

/// Sections where goods of a given principal material are normally classified.
pub fn material_sections(material: Material) -> &'static [HsSection] {
    use HsSection::*;
    match material {
        Material::Plastic | Material::Rubber => &[PlasticsAndRubber],
        Material::Steel | Material::Iron | Material::Aluminium | Material::Copper => &[BaseMetals],
        Material::Wood => &[Wood],
        Material::Paper => &[Paper],
        Material::Glass | Material::Ceramic => &[StoneAndGlass],
        Material::Cotton | Material::Wool | Material::Synthetic => &[Textiles],
        Material::Leather => &[HidesAndLeather],
        Material::Gold | Material::Silver => &[PreciousMetals],
        Material::Animal => &[LiveAnimals],
        Material::Vegetable => &[VegetableProducts],
    }
}

fn usage_agrees(code: &HsCode, features: &ExtractedFeatures) -> Option<bool> {
    features
        .attributes
        .usage_primary
        .map(|u| usage_sections(u).contains(&code.section()))
}

fn material_agrees(code: &HsCode, features: &ExtractedFeatures) -> Option<bool> {
    features
        .attributes
        .material_principal
        .map(|m| material_sections(m).contains(&code.section()))
}

/// Agreement between the code's section and the attributes, in [0, 1].
pub fn coherence_score(code: &HsCode, features: &ExtractedFeatures) -> f32 {
    let part = |agrees: Option<bool>| match agrees {
        Some(true) => 1.0,
        Some(false) => 0.0,
        None => NEUTRAL,
    };
    clamp_unit(
        USAGE_WEIGHT * part(usage_agrees(code, features))
            + MATERIAL_WEIGHT * part(material_agrees(code, features)),
    )
}

/// OK when usage agrees, else when material agrees, or when neither
/// attribute was extracted.
pub fn check_coherence(code: &HsCode, features: &ExtractedFeatures) -> Coherence {
    match (usage_agrees(code, features), material_agrees(code, features)) {
        (Some(true), _) | (_, Some(true)) | (None, None) => Coherence::Ok,
        _ => Coherence::Fail,
    }
}

const CONTRA_PHRASES: &[&str] = &[
    "excluding",
    "except",
    "not included",
    "not including",
    "excepto",
    "excluido",
    "no incluye",
    "no incluido",
    "salvo",
    "sin incluir",
    "no comprende",
];

/// Exclusion phrases found in the raw text, which often signal that the
/// described goods are carved out of the heading that matched.
pub fn contra_indicators(text: &str) -> Vec<String> {
    let padded = format!(" {} ", fold(text));
    CONTRA_PHRASES
        .iter()
        .filter(|p| padded.contains(&format!(" {} ", p)))
        .map(|p| p.to_string())
        .collect()
}

/// Governance verdict for the top candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernedResult {
    pub chapter_coherence: Coherence,
    pub suspect_code: bool,
    pub confidence: f32,
    pub requires_review: bool,
    /// Automatic coverage raised confidence and cleared review
    pub auto_covered: bool,
    pub contra_indicators: Vec<String>,
    pub validations: Vec<Validation>,
}

impl GovernedResult {
    /// Verdict when there is nothing to classify.
    pub fn unclassifiable() -> Self {
        Self {
            chapter_coherence: Coherence::Ok,
            suspect_code: false,
            confidence: 0.0,
            requires_review: true,
            auto_covered: false,
            contra_indicators: Vec::new(),
            validations: vec![Validation::new(
                "candidates",
                ValidationStatus::Fail,
                "no candidate codes were produced",
            )],
        }
    }
}

/// Apply coherence, denylist, review and auto-coverage rules to `top`.
pub fn govern(
    top: &RankedCandidate,
    features: &ExtractedFeatures,
    text: &str,
    config: &ClassifierConfig,
) -> GovernedResult {
    let thresholds = &config.confidence_thresholds;
    let section = top.code.section();
    let mut validations = Vec::new();

    let chapter_coherence = check_coherence(&top.code, features);
    let mut confidence = clamp_unit(top.score_total);
    match chapter_coherence {
        Coherence::Ok => validations.push(Validation::new(
            "chapter_coherence",
            ValidationStatus::Pass,
            format!("chapter {:02} ({}) fits the extracted attributes", top.code.chapter(), section.label()),
        )),
        Coherence::Fail => {
            confidence = (confidence - thresholds.coherence_penalty).max(0.0);
            validations.push(Validation::new(
                "chapter_coherence",
                ValidationStatus::Fail,
                format!(
                    "chapter {:02} ({}) does not fit the extracted attributes",
                    top.code.chapter(),
                    section.label()
                ),
            ));
        }
    }

    let suspect_code = config.is_suspect(&top.code);
    validations.push(if suspect_code {
        Validation::new("suspect_code", ValidationStatus::Warn, format!("{} is on the denylist", top.code))
    } else {
        Validation::new("suspect_code", ValidationStatus::Pass, "code is not denylisted")
    });

    let contra = contra_indicators(text);
    if !contra.is_empty() {
        validations.push(Validation::new(
            "contra_indicators",
            ValidationStatus::Warn,
            format!("text contains exclusion phrases: {}", contra.join(", ")),
        ));
    }

    let mut requires_review = suspect_code
        || chapter_coherence == Coherence::Fail
        || confidence < thresholds.feedback_trigger;

    let auto_covered = chapter_coherence == Coherence::Ok
        && !suspect_code
        && top.score_total >= thresholds.auto_coverage;
    if auto_covered {
        confidence = confidence.max(thresholds.auto_coverage_floor);
        requires_review = false;
        validations.push(Validation::new(
            "auto_coverage",
            ValidationStatus::Pass,
            format!("score {:.2} meets the automatic coverage threshold {:.2}", top.score_total, thresholds.auto_coverage),
        ));
    }

    validations.push(if confidence < thresholds.feedback_trigger {
        Validation::new(
            "confidence",
            ValidationStatus::Warn,
            format!("confidence {:.2} below {:.2}", confidence, thresholds.feedback_trigger),
        )
    } else {
        Validation::new("confidence", ValidationStatus::Pass, format!("confidence {:.2}", confidence))
    });

    debug!(
        code = %top.code,
        coherence = ?chapter_coherence,
        suspect_code,
        confidence,
        requires_review,
        auto_covered,
        "governance applied"
    );

    GovernedResult {
        chapter_coherence,
        suspect_code,
        confidence,
        requires_review,
        auto_covered,
        contra_indicators: contra,
        validations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{Attributes, ScoreWeights};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn code(s: &str) -> HsCode {
        HsCode::parse(s).unwrap()
    }

    fn features(usage: Option<Usage>, material: Option<Material>) -> ExtractedFeatures {
        ExtractedFeatures {
            attributes: Attributes {
                usage_primary: usage,
                material_principal: material,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn candidate(c: &str, total: f32) -> RankedCandidate {
        let mut cand = RankedCandidate::new(code(c), "", 0.0, 0.0, 0.0, &ScoreWeights::default());
        cand.score_total = total;
        cand
    }

    #[test]
    fn test_coherence_usage_then_material() {
        let laptop = code("847130");
        assert_eq!(check_coherence(&laptop, &features(Some(Usage::Computing), None)), Coherence::Ok);
        assert_eq!(
            check_coherence(&laptop, &features(Some(Usage::Apparel), Some(Material::Steel))),
            Coherence::Fail
        );
        // material rescues a usage mismatch
        let shelf = code("732393");
        assert_eq!(
            check_coherence(&shelf, &features(Some(Usage::Furniture), Some(Material::Steel))),
            Coherence::Ok
        );
        assert_eq!(check_coherence(&laptop, &features(None, None)), Coherence::Ok);
    }

    #[test]
    fn test_coherence_score() {
        let laptop = code("847130");
        assert!((coherence_score(&laptop, &features(None, None)) - NEUTRAL).abs() < 1e-6);
        assert_eq!(coherence_score(&laptop, &features(Some(Usage::Computing), Some(Material::Aluminium))), 0.7);
        assert!((coherence_score(&laptop, &features(Some(Usage::Computing), None)) - 0.85).abs() < 1e-6);
        assert_eq!(coherence_score(&laptop, &features(Some(Usage::Food), Some(Material::Cotton))), 0.0);
    }

    #[test]
    fn test_auto_coverage_raises_confidence() {
        let config = ClassifierConfig::default();
        let g = govern(&candidate("847130", 0.68), &features(Some(Usage::Computing), None), "", &config);
        assert_eq!(g.chapter_coherence, Coherence::Ok);
        assert!(g.auto_covered);
        assert_eq!(g.confidence, 0.75);
        assert!(!g.requires_review);
    }

    #[test]
    fn test_auto_coverage_never_lowers() {
        let config = ClassifierConfig::default();
        let g = govern(&candidate("847130", 0.92), &features(None, None), "", &config);
        assert_eq!(g.confidence, 0.92);
    }

    #[test]
    fn test_coherence_failure_penalizes() {
        let config = ClassifierConfig::default();
        let g = govern(&candidate("847130", 0.9), &features(Some(Usage::Food), None), "", &config);
        assert_eq!(g.chapter_coherence, Coherence::Fail);
        assert!((g.confidence - 0.75).abs() < 1e-6);
        assert!(g.requires_review);
        assert!(!g.auto_covered);
    }

    #[test]
    fn test_penalty_floors_at_zero() {
        let config = ClassifierConfig::default();
        let g = govern(&candidate("847130", 0.1), &features(Some(Usage::Food), None), "", &config);
        assert_eq!(g.confidence, 0.0);
    }

    #[test]
    fn test_suspect_code_requires_review() {
        let config = ClassifierConfig::default().with_suspect_codes(vec![code("8517")]);
        let g = govern(&candidate("851762", 0.95), &features(Some(Usage::Telecom), None), "", &config);
        assert!(g.suspect_code);
        assert!(g.requires_review);
        assert!(!g.auto_covered);
        assert!(g
            .validations
            .iter()
            .any(|v| v.check == "suspect_code" && v.status == ValidationStatus::Warn));
    }

    #[test]
    fn test_low_confidence_requires_review() {
        let config = ClassifierConfig::default();
        let g = govern(&candidate("847130", 0.5), &features(None, None), "", &config);
        assert!(g.requires_review);
        assert_eq!(g.confidence, 0.5);
    }

    #[test]
    fn test_contra_indicators() {
        assert_eq!(
            contra_indicators("Repuestos, excepto motores; no incluye baterías"),
            vec!["excepto".to_string(), "no incluye".to_string()]
        );
        assert!(contra_indicators("Exceptional laptop").is_empty());
    }

    #[test]
    fn test_unclassifiable() {
        let g = GovernedResult::unclassifiable();
        assert_eq!(g.confidence, 0.0);
        assert!(g.requires_review);
    }

    fn any_usage() -> impl Strategy<Value = Option<Usage>> {
        prop_oneof![
            Just(None),
            Just(Some(Usage::Computing)),
            Just(Some(Usage::Food)),
            Just(Some(Usage::Apparel)),
        ]
    }

    proptest! {
        #[test]
        fn test_governance_invariants(
            total in 0.0f32..=1.0,
            usage in any_usage(),
            suspect in any::<bool>(),
            c in prop::sample::select(vec!["847130", "090111", "610910"]),
        ) {
            let mut config = ClassifierConfig::default();
            if suspect {
                config.suspect_codes = vec![code(c)];
            }
            let g = govern(&candidate(c, total), &features(usage, None), "", &config);

            if g.suspect_code {
                prop_assert!(g.requires_review);
            }
            if g.auto_covered {
                prop_assert!(g.confidence >= 0.75);
                prop_assert!(g.confidence >= total);
            }
            prop_assert!((0.0..=1.0).contains(&g.confidence));
        }
    }
}

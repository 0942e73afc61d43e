//! Rule interpretation engine.
//!
//! Applies the six General Interpretation Rules as keyword rules read from a
//! `RuleBook`. Each matching rule proposes a code with a bounded bonus or
//! penalty; proposals are ordered by explicit priority weight, then by rule
//! class, and proposals for the same code are merged.

pub mod book;

pub use book::{ClassSpec, KeywordRule, RuleBook, RuleBookError, CATALOG_RULE_WEIGHT};

use hsclass_features::{compute_phonetics, fold, strip_plural, FeatureExtractor, PhoneticCodes, MIN_PHONETIC_LEN};
use hsclass_model::{
    clamp_unit, CodeLevel, ExtractedFeatures, HsCode, LegalRef, Material, ProcessingLevel,
    RuleCandidate, RuleClass,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Bonus per confirming keyword.
pub const CONFIRM_BONUS: f32 = 0.1;
/// Penalty per contra-indicator keyword.
pub const CONTRA_PENALTY: f32 = 0.15;
/// Bound on the net delta of one candidate.
pub const MAX_DELTA: f32 = 0.3;
/// Base lexical score of a rule proposal before its delta.
pub const BASE_LEXICAL: f32 = 0.5;

const COMPOSITE_BONUS: f32 = 0.1;
const SPECIFICITY_BONUS: f32 = 0.05;
const SUBHEADING_KEYWORD_BONUS: f32 = 0.05;

fn clamp_delta(delta: f32) -> f32 {
    if delta.is_nan() {
        0.0
    } else {
        delta.clamp(-MAX_DELTA, MAX_DELTA)
    }
}

/// What happened to one matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDecision {
    /// Proposed its code with no contra-indicators
    Proposed,
    /// Proposed its code but contra-indicators lowered the delta
    Penalized,
    /// Won the tie-break
    Selected,
}

/// Trace entry for one matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrace {
    pub rule_id: String,
    pub class: RuleClass,
    pub decision: TraceDecision,
    pub code: HsCode,
    pub trigger: String,
    pub confirming: Vec<String>,
    pub contra: Vec<String>,
    pub delta: f32,
    pub legal_refs: Vec<LegalRef>,
}

/// Candidates plus the per-rule trace that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEvaluation {
    pub candidates: Vec<RuleCandidate>,
    pub trace: Vec<RuleTrace>,
}

impl RuleEvaluation {
    /// Ids of every rule that matched, in evaluation order.
    pub fn rules_applied(&self) -> Vec<String> {
        self.trace.iter().map(|t| t.rule_id.clone()).collect()
    }

    pub fn winner(&self) -> Option<&RuleCandidate> {
        self.candidates.first()
    }
}

/// A keyword normalized the way product text is.
#[derive(Debug, Clone)]
struct Term {
    normalized: String,
    folded: String,
    phonetic: Option<PhoneticCodes>,
}

impl Term {
    fn new(raw: &str, extractor: &FeatureExtractor) -> Option<Self> {
        let normalized = extractor.normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        let folded = fold(raw);
        let phonetic = (!normalized.contains(' ') && normalized.chars().count() >= MIN_PHONETIC_LEN)
            .then(|| compute_phonetics(&normalized));
        Some(Self {
            normalized,
            folded,
            phonetic,
        })
    }

    fn compile(raws: &[String], extractor: &FeatureExtractor) -> Vec<Self> {
        raws.iter().filter_map(|r| Self::new(r, extractor)).collect()
    }
}

fn sounds_like(a: &PhoneticCodes, b: &PhoneticCodes) -> bool {
    matches!((&a.soundex, &b.soundex), (Some(x), Some(y)) if x == y)
        && matches!((&a.metaphone, &b.metaphone), (Some(x), Some(y)) if x == y)
}

/// The request text as seen by the matcher.
///
/// Combines the extractor's view with a plain folded view of the raw text so
/// that rules still match when extraction ran degraded.
struct MatchView {
    padded_normalized: String,
    padded_folded: String,
    tokens: BTreeSet<String>,
    phonetic: Vec<PhoneticCodes>,
}

impl MatchView {
    fn new(text: &str, features: &ExtractedFeatures) -> Self {
        let folded = fold(text);
        let mut tokens: BTreeSet<String> = features.keywords.clone();
        tokens.extend(folded.split(' ').filter(|t| !t.is_empty()).map(strip_plural));

        let phonetic = tokens
            .iter()
            .filter(|t| !t.contains(' ') && t.chars().count() >= MIN_PHONETIC_LEN)
            .map(|t| compute_phonetics(t))
            .collect();

        Self {
            padded_normalized: format!(" {} ", features.normalized_text),
            padded_folded: format!(" {} ", folded),
            tokens,
            phonetic,
        }
    }

    fn hit(&self, term: &Term) -> bool {
        if self.tokens.contains(&term.normalized) || self.tokens.contains(&term.folded) {
            return true;
        }
        if term.normalized.contains(' ')
            && (self.padded_normalized.contains(&format!(" {} ", term.normalized))
                || self.padded_folded.contains(&format!(" {} ", term.folded)))
        {
            return true;
        }
        match &term.phonetic {
            Some(codes) => self.phonetic.iter().any(|p| sounds_like(p, codes)),
            None => false,
        }
    }

    fn hits<'t>(&self, terms: impl Iterator<Item = &'t Term>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        terms
            .filter(|t| self.hit(t))
            .filter(|t| seen.insert(t.normalized.clone()))
            .map(|t| t.normalized.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct CompiledClass {
    confirming: Vec<Term>,
    contra: Vec<Term>,
    legal_refs: Vec<LegalRef>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    id: String,
    class: RuleClass,
    triggers: Vec<Term>,
    code: HsCode,
    priority_weight: f32,
    confirming: Vec<Term>,
    contra: Vec<Term>,
    material: Option<Material>,
    legal_refs: Vec<LegalRef>,
}

/// One matching rule's proposal, before tie-break and merge.
struct Proposal {
    rule_id: String,
    class: RuleClass,
    order: usize,
    code: HsCode,
    delta: f32,
    priority_weight: f32,
    legal_refs: Vec<LegalRef>,
}

/// Compiled rule book, ready to evaluate requests.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    classes: HashMap<RuleClass, CompiledClass>,
    /// Sorted by class priority, book order within a class
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compile `book`, normalizing every keyword with `extractor` so that both
    /// sides of a comparison share one normalization.
    pub fn new(book: &RuleBook, extractor: &FeatureExtractor) -> Self {
        let classes = book
            .classes
            .iter()
            .map(|spec| {
                let compiled = CompiledClass {
                    confirming: Term::compile(&spec.confirming, extractor),
                    contra: Term::compile(&spec.contra, extractor),
                    legal_refs: spec.legal_refs.clone(),
                };
                (spec.class, compiled)
            })
            .collect();

        let mut rules: Vec<CompiledRule> = book
            .rules
            .iter()
            .map(|r| CompiledRule {
                id: r.id.clone(),
                class: r.class,
                triggers: Term::compile(&r.keywords, extractor),
                code: r.code.clone(),
                priority_weight: r.priority_weight,
                confirming: Term::compile(&r.confirming, extractor),
                contra: Term::compile(&r.contra, extractor),
                material: r.material,
                legal_refs: r.legal_refs.clone(),
            })
            .filter(|r| !r.triggers.is_empty())
            .collect();
        rules.sort_by_key(|r| r.class.priority());

        debug!(rules = rules.len(), "rule engine compiled");
        Self { classes, rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Candidates only.
    pub fn apply_rules(&self, text: &str, features: &ExtractedFeatures) -> Vec<RuleCandidate> {
        self.evaluate(text, features).candidates
    }

    /// Evaluate every rule against the request.
    pub fn evaluate(&self, text: &str, features: &ExtractedFeatures) -> RuleEvaluation {
        if self.rules.is_empty() {
            return RuleEvaluation::default();
        }

        let view = MatchView::new(text, features);
        let empty = CompiledClass::default();
        let mut proposals = Vec::new();
        let mut trace = Vec::new();

        for (order, rule) in self.rules.iter().enumerate() {
            let Some(trigger) = rule.triggers.iter().find(|t| view.hit(t)) else {
                continue;
            };
            let class = self.classes.get(&rule.class).unwrap_or(&empty);

            let confirming = view.hits(
                rule.confirming
                    .iter()
                    .chain(class.confirming.iter())
                    .filter(|t| t.normalized != trigger.normalized),
            );
            let contra = view.hits(rule.contra.iter().chain(class.contra.iter()));

            let mut delta = CONFIRM_BONUS * confirming.len() as f32
                - CONTRA_PENALTY * contra.len() as f32;
            delta += class_bonus(rule, features, confirming.len());
            let delta = clamp_delta(delta);

            let mut legal_refs = vec![LegalRef::Rule(rule.class)];
            for r in class.legal_refs.iter().chain(rule.legal_refs.iter()) {
                if !legal_refs.contains(r) {
                    legal_refs.push(r.clone());
                }
            }

            trace.push(RuleTrace {
                rule_id: rule.id.clone(),
                class: rule.class,
                decision: if contra.is_empty() {
                    TraceDecision::Proposed
                } else {
                    TraceDecision::Penalized
                },
                code: rule.code.clone(),
                trigger: trigger.normalized.clone(),
                confirming,
                contra,
                delta,
                legal_refs: legal_refs.clone(),
            });

            proposals.push(Proposal {
                rule_id: rule.id.clone(),
                class: rule.class,
                order,
                code: rule.code.clone(),
                delta,
                priority_weight: rule.priority_weight,
                legal_refs,
            });
        }

        // Earliest class wins unless a later proposal has a strictly higher weight.
        proposals.sort_by(|a, b| {
            b.priority_weight
                .total_cmp(&a.priority_weight)
                .then(a.class.priority().cmp(&b.class.priority()))
                .then(a.order.cmp(&b.order))
        });

        if let Some(first) = proposals.first() {
            if let Some(t) = trace.iter_mut().find(|t| t.rule_id == first.rule_id) {
                t.decision = TraceDecision::Selected;
            }
        }

        let candidates = merge(proposals);
        debug!(
            matched = trace.len(),
            candidates = candidates.len(),
            winner = ?candidates.first().map(|c| c.code.to_string()),
            "rules evaluated"
        );

        RuleEvaluation { candidates, trace }
    }
}

/// Per-class adjustments on top of keyword bonuses.
fn class_bonus(rule: &CompiledRule, features: &ExtractedFeatures, confirming_hits: usize) -> f32 {
    match rule.class {
        RuleClass::Gri2 => {
            let composite = matches!(
                features.attributes.processing_level,
                Some(ProcessingLevel::Unassembled | ProcessingLevel::Mixture)
            );
            let material_agrees =
                rule.material.is_some() && rule.material == features.attributes.material_principal;
            if composite && material_agrees {
                COMPOSITE_BONUS
            } else {
                0.0
            }
        }
        RuleClass::Gri3 => match rule.code.level() {
            CodeLevel::Subheading | CodeLevel::National => SPECIFICITY_BONUS,
            _ => 0.0,
        },
        RuleClass::Gri6 => SUBHEADING_KEYWORD_BONUS * confirming_hits as f32,
        _ => 0.0,
    }
}

/// Merge sorted proposals by code, keeping the position of the first.
fn merge(proposals: Vec<Proposal>) -> Vec<RuleCandidate> {
    let mut candidates: Vec<RuleCandidate> = Vec::new();
    let mut raw_deltas: Vec<f32> = Vec::new();

    for p in proposals {
        match candidates.iter().position(|c| c.code == p.code) {
            Some(i) => {
                let c = &mut candidates[i];
                if !c.matched_rules.contains(&p.rule_id) {
                    c.matched_rules.push(p.rule_id);
                }
                for r in p.legal_refs {
                    if !c.legal_refs.contains(&r) {
                        c.legal_refs.push(r);
                    }
                }
                raw_deltas[i] += p.delta;
                c.priority_weight = c.priority_weight.max(p.priority_weight);
            }
            None => {
                raw_deltas.push(p.delta);
                candidates.push(RuleCandidate {
                    code: p.code,
                    matched_rules: vec![p.rule_id],
                    delta: 0.0,
                    lexical_score: 0.0,
                    priority_weight: p.priority_weight,
                    rule_rank: 0,
                    legal_refs: p.legal_refs,
                });
            }
        }
    }

    for (rank, (c, raw)) in candidates.iter_mut().zip(raw_deltas).enumerate() {
        c.delta = clamp_delta(raw);
        c.lexical_score = clamp_unit(BASE_LEXICAL + c.delta);
        c.rule_rank = rank;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{CatalogEntry, InMemoryCatalog};
    use pretty_assertions::assert_eq;

    fn code(s: &str) -> HsCode {
        HsCode::parse(s).unwrap()
    }

    fn keyword_rule(id: &str, class: RuleClass, keywords: &[&str], c: &str, weight: f32) -> KeywordRule {
        KeywordRule {
            id: id.to_string(),
            class,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            code: code(c),
            priority_weight: weight,
            confirming: Vec::new(),
            contra: Vec::new(),
            material: None,
            legal_refs: Vec::new(),
        }
    }

    fn run(engine: &RuleEngine, text: &str) -> RuleEvaluation {
        let features = FeatureExtractor::default().extract(text).unwrap();
        engine.evaluate(text, &features)
    }

    fn builtin_engine() -> RuleEngine {
        RuleEngine::new(&RuleBook::builtin(), &FeatureExtractor::default())
    }

    #[test]
    fn test_laptop_rule_caps_delta() {
        let eval = run(&builtin_engine(), "Laptop computer, 15 inch, Intel i7, 16GB RAM");
        let top = eval.winner().unwrap();
        assert_eq!(top.code, code("847130"));
        assert!(top.matched_rules.contains(&"gri1-laptop".to_string()));
        assert_eq!(top.delta, MAX_DELTA);
        assert!((top.lexical_score - 0.8).abs() < 1e-6);
        assert_eq!(top.rule_rank, 0);
        assert!(top.legal_refs.contains(&LegalRef::Rule(RuleClass::Gri1)));
        assert!(top.legal_refs.contains(&LegalRef::Note("84/5".into())));
    }

    #[test]
    fn test_contra_keywords_penalize() {
        let eval = run(&builtin_engine(), "Wireless mouse for live animal study");
        let mouse = eval.candidates.iter().find(|c| c.code == code("847160")).unwrap();
        assert!((mouse.delta - (-0.2)).abs() < 1e-6);
        assert!((mouse.lexical_score - 0.3).abs() < 1e-6);
        let t = eval.trace.iter().find(|t| t.rule_id == "gri1-mouse").unwrap();
        assert_eq!(t.contra, vec!["live".to_string(), "animal".to_string()]);
    }

    #[test]
    fn test_earliest_class_wins_ties() {
        let book = RuleBook {
            classes: Vec::new(),
            rules: vec![
                keyword_rule("late", RuleClass::Gri3, &["widget"], "392690", 1.0),
                keyword_rule("early", RuleClass::Gri1, &["widget"], "847990", 1.0),
            ],
        };
        let engine = RuleEngine::new(&book, &FeatureExtractor::default());
        let eval = run(&engine, "Plastic widget assembly");
        assert_eq!(eval.candidates[0].code, code("847990"));
        assert_eq!(eval.candidates[1].code, code("392690"));
        assert_eq!(eval.candidates[1].rule_rank, 1);
        let selected: Vec<_> = eval.trace.iter().filter(|t| t.decision == TraceDecision::Selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].rule_id, "early");
    }

    #[test]
    fn test_higher_weight_overrides_class_order() {
        let book = RuleBook {
            classes: Vec::new(),
            rules: vec![
                keyword_rule("general", RuleClass::Gri1, &["widget"], "847990", 1.0),
                keyword_rule("akin", RuleClass::Gri4, &["widget"], "392690", 1.5),
            ],
        };
        let engine = RuleEngine::new(&book, &FeatureExtractor::default());
        let eval = run(&engine, "Plastic widget assembly");
        assert_eq!(eval.candidates[0].code, code("392690"));
        assert_eq!(eval.candidates[0].priority_weight, 1.5);
    }

    #[test]
    fn test_same_code_proposals_merge() {
        let eval = run(&builtin_engine(), "Unassembled bicycle kit with steel frame");
        let bike = &eval.candidates[0];
        assert_eq!(bike.code, code("871200"));
        assert!(bike.matched_rules.contains(&"gri1-bicycle".to_string()));
        assert!(bike.matched_rules.contains(&"gri2-unassembled-bicycle".to_string()));
        assert_eq!(bike.delta, MAX_DELTA);
        assert!(bike.legal_refs.contains(&LegalRef::Rule(RuleClass::Gri2)));
        assert_eq!(eval.candidates.iter().filter(|c| c.code == code("871200")).count(), 1);
    }

    #[test]
    fn test_composite_bonus_needs_material_agreement() {
        let engine = builtin_engine();
        let steel = run(&engine, "Unassembled bicycle kit with steel frame");
        let t = steel.trace.iter().find(|t| t.rule_id == "gri2-unassembled-bicycle").unwrap();
        // frame + unassembled + composite bonus
        assert!((t.delta - 0.3).abs() < 1e-6);

        let carbon = run(&engine, "Unassembled bicycle kit with carbon frame");
        let t = carbon.trace.iter().find(|t| t.rule_id == "gri2-unassembled-bicycle").unwrap();
        assert!((t.delta - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_heavier_case_rule_beats_contents() {
        let eval = run(&builtin_engine(), "Padded laptop sleeve with zipper");
        assert_eq!(eval.candidates[0].code, code("420212"));
        assert!(eval.candidates.iter().any(|c| c.code == code("847130")));
    }

    #[test]
    fn test_phonetic_match_tolerates_misspelling() {
        let eval = run(&builtin_engine(), "Household refrigerater with two doors");
        assert_eq!(eval.candidates[0].code, code("841821"));
    }

    #[test]
    fn test_matches_degraded_features() {
        let engine = builtin_engine();
        let text = "Laptops and computers for office";
        let features = FeatureExtractor::without_lexicon().extract(text).unwrap_err().partial;
        let eval = engine.evaluate(text, &features);
        assert_eq!(eval.candidates[0].code, code("847130"));
    }

    #[test]
    fn test_empty_book_yields_nothing() {
        let engine = RuleEngine::new(&RuleBook::default(), &FeatureExtractor::default());
        assert!(engine.is_empty());
        assert!(run(&engine, "Laptop computer with charger").candidates.is_empty());
    }

    #[test]
    fn test_no_match_yields_nothing() {
        let eval = run(&builtin_engine(), "Quantum flux capacitor assembly");
        assert!(eval.candidates.is_empty());
        assert!(eval.rules_applied().is_empty());
    }

    #[test]
    fn test_catalog_rules_match() {
        let catalog = InMemoryCatalog::new(vec![CatalogEntry::new(
            code("8525"),
            "Transmission apparatus; television cameras",
            "camcorder, webcam",
        )]);
        let book = RuleBook::default().with_catalog_headings(&catalog);
        let engine = RuleEngine::new(&book, &FeatureExtractor::default());
        let eval = run(&engine, "USB webcam with microphone");
        assert_eq!(eval.candidates[0].code, code("8525"));
        assert!((eval.candidates[0].lexical_score - BASE_LEXICAL).abs() < 1e-6);
        assert_eq!(eval.rules_applied(), vec!["gri1-catalog-8525".to_string()]);
    }
}

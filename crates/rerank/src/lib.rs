//! Hybrid re-ranking of rule and embedding candidates.
//!
//! Candidates from both sources are merged per HS6 subheading and scored on
//! three components: semantic (embedding similarity), lexical (rule evidence
//! or fuzzy title match) and contextual (attribute coherence). The total is
//! the weighted sum from the configuration snapshot.

use hsclass_features::{fold, partial_similarity, FeatureExtractor};
use hsclass_governance::coherence_score;
use hsclass_model::{
    Catalog, EmbeddingCandidate, ExtractedFeatures, HsCode, RankedCandidate, RuleCandidate,
    ScoreWeights,
};
use std::cmp::Ordering;
use tracing::debug;

/// Fuzzy title similarity below this counts as no lexical evidence.
pub const FUZZY_CUTOFF: f32 = 0.5;

/// Inputs shared by every candidate of one request.
#[derive(Clone, Copy)]
pub struct RerankContext<'a> {
    pub weights: &'a ScoreWeights,
    pub catalog: Option<&'a dyn Catalog>,
    /// Normalizes catalog text like the request text; plain folding without it
    pub extractor: Option<&'a FeatureExtractor>,
}

impl<'a> RerankContext<'a> {
    pub fn new(weights: &'a ScoreWeights) -> Self {
        Self {
            weights,
            catalog: None,
            extractor: None,
        }
    }

    pub fn with_catalog(mut self, catalog: &'a dyn Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_extractor(mut self, extractor: &'a FeatureExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn normalize(&self, text: &str) -> String {
        match self.extractor {
            Some(extractor) => extractor.normalize(text),
            None => fold(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RerankOutcome {
    /// Best first
    Ranked(Vec<RankedCandidate>),
    NoCandidates,
}

impl RerankOutcome {
    pub fn candidates(&self) -> &[RankedCandidate] {
        match self {
            Self::Ranked(c) => c,
            Self::NoCandidates => &[],
        }
    }

    pub fn top(&self) -> Option<&RankedCandidate> {
        self.candidates().first()
    }

    pub fn into_candidates(self) -> Vec<RankedCandidate> {
        match self {
            Self::Ranked(c) => c,
            Self::NoCandidates => Vec::new(),
        }
    }
}

/// Rule and embedding evidence gathered under one merge key.
struct Slot<'r> {
    code: HsCode,
    title: String,
    semantic: f32,
    rule: Option<&'r RuleCandidate>,
    matched_rules: Vec<String>,
}

impl<'r> Slot<'r> {
    fn new(code: HsCode) -> Self {
        Self {
            code,
            title: String::new(),
            semantic: 0.0,
            rule: None,
            matched_rules: Vec::new(),
        }
    }

    /// Keep the longer of the two codes.
    fn absorb_code(&mut self, code: &HsCode) {
        if code.digits().len() > self.code.digits().len() {
            self.code = code.clone();
        }
    }

    fn absorb_rule(&mut self, candidate: &'r RuleCandidate) {
        self.absorb_code(&candidate.code);
        for id in &candidate.matched_rules {
            if !self.matched_rules.contains(id) {
                self.matched_rules.push(id.clone());
            }
        }
        match self.rule {
            Some(existing) if existing.rule_rank <= candidate.rule_rank => {}
            _ => self.rule = Some(candidate),
        }
    }

    fn absorb_embedding(&mut self, candidate: &EmbeddingCandidate) {
        self.absorb_code(&candidate.code);
        if candidate.similarity > self.semantic {
            self.semantic = candidate.similarity;
        }
        if self.title.is_empty() {
            self.title = candidate.title.clone();
        }
    }
}

fn slot_for<'s, 'r>(slots: &'s mut Vec<Slot<'r>>, code: &HsCode) -> &'s mut Slot<'r> {
    let key = code.merge_key();
    match slots.iter().position(|s| s.code.merge_key() == key) {
        Some(i) => &mut slots[i],
        None => {
            slots.push(Slot::new(code.clone()));
            let last = slots.len() - 1;
            &mut slots[last]
        }
    }
}

/// Fuzzy similarity between the request text and the catalog entry's title
/// or keywords, or 0 when it misses the cutoff.
fn fuzzy_lexical(code: &HsCode, features: &ExtractedFeatures, ctx: &RerankContext<'_>) -> f32 {
    let Some(entry) = ctx.catalog.and_then(|c| c.get(code)) else {
        return 0.0;
    };
    let best = [ctx.normalize(&entry.title), ctx.normalize(&entry.keywords)]
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| partial_similarity(t, &features.normalized_text))
        .fold(0.0, f32::max);
    if best >= FUZZY_CUTOFF {
        best
    } else {
        0.0
    }
}

/// Final ordering: total, then rule evidence, then lexical evidence, then
/// the rule engine's own preference, then code.
pub fn rank_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score_total
        .total_cmp(&a.score_total)
        .then_with(|| b.has_rule_evidence().cmp(&a.has_rule_evidence()))
        .then_with(|| (b.score_lexical > 0.0).cmp(&(a.score_lexical > 0.0)))
        .then_with(|| {
            let rank = |c: &RankedCandidate| c.rule_rank.unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b))
        })
        .then_with(|| a.code.cmp(&b.code))
}

/// Merge, score and sort candidates from both sources.
pub fn rerank(
    rule_candidates: &[RuleCandidate],
    embedding_candidates: &[EmbeddingCandidate],
    features: &ExtractedFeatures,
    ctx: RerankContext<'_>,
) -> RerankOutcome {
    let mut slots: Vec<Slot<'_>> = Vec::new();
    for candidate in rule_candidates {
        slot_for(&mut slots, &candidate.code).absorb_rule(candidate);
    }
    for candidate in embedding_candidates {
        slot_for(&mut slots, &candidate.code).absorb_embedding(candidate);
    }

    if slots.is_empty() {
        debug!("No candidates to rerank");
        return RerankOutcome::NoCandidates;
    }

    let mut ranked: Vec<RankedCandidate> = slots
        .into_iter()
        .map(|slot| {
            let lexical = match slot.rule {
                Some(rule) => rule.lexical_score,
                None => fuzzy_lexical(&slot.code, features, &ctx),
            };
            let contextual = coherence_score(&slot.code, features);
            let title = ctx
                .catalog
                .and_then(|c| c.get(&slot.code))
                .map(|e| e.title.clone())
                .unwrap_or(slot.title);

            let mut candidate =
                RankedCandidate::new(slot.code, title, slot.semantic, lexical, contextual, ctx.weights);
            candidate.matched_rules = slot.matched_rules;
            candidate.rule_rank = slot.rule.map(|r| r.rule_rank);
            candidate
        })
        .collect();

    ranked.sort_by(rank_order);

    debug!(
        candidates = ranked.len(),
        top = %ranked[0].code,
        top_score = ranked[0].score_total,
        "Reranked candidates"
    );
    RerankOutcome::Ranked(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{Attributes, CatalogEntry, InMemoryCatalog, Usage};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn code(s: &str) -> HsCode {
        HsCode::parse(s).unwrap()
    }

    fn rule(c: &str, lexical: f32, rank: usize) -> RuleCandidate {
        RuleCandidate {
            code: code(c),
            matched_rules: vec![format!("gri1-{}", c)],
            delta: lexical - 0.5,
            lexical_score: lexical,
            priority_weight: 1.0,
            rule_rank: rank,
            legal_refs: Vec::new(),
        }
    }

    fn emb(c: &str, similarity: f32) -> EmbeddingCandidate {
        EmbeddingCandidate {
            code: code(c),
            similarity,
            title: format!("title {}", c),
        }
    }

    fn laptop_features() -> ExtractedFeatures {
        ExtractedFeatures {
            normalized_text: "laptop computer intel core 16gb ram".to_string(),
            attributes: Attributes {
                usage_primary: Some(Usage::Computing),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_inputs() {
        let weights = ScoreWeights::default();
        let outcome = rerank(&[], &[], &laptop_features(), RerankContext::new(&weights));
        assert_eq!(outcome, RerankOutcome::NoCandidates);
        assert!(outcome.top().is_none());
    }

    #[test]
    fn test_merge_keeps_specific_code() {
        let weights = ScoreWeights::default();
        let outcome = rerank(
            &[rule("847130", 0.8, 0)],
            &[emb("8471300000", 0.9), emb("847130", 0.4)],
            &laptop_features(),
            RerankContext::new(&weights),
        );
        let ranked = outcome.candidates();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code, code("8471300000"));
        assert_eq!(ranked[0].score_semantic, 0.9);
        assert_eq!(ranked[0].score_lexical, 0.8);
        assert_eq!(ranked[0].matched_rules, vec!["gri1-847130".to_string()]);
        assert_eq!(ranked[0].rule_rank, Some(0));
        assert_eq!(ranked[0].title, "title 8471300000");
    }

    #[test]
    fn test_rule_only_total() {
        let weights = ScoreWeights::default();
        let features = laptop_features();
        let outcome = rerank(&[rule("847130", 0.8, 0)], &[], &features, RerankContext::new(&weights));
        let top = outcome.top().unwrap();
        assert_eq!(top.score_semantic, 0.0);
        let expected = 0.3 * 0.8 + 0.1 * top.score_contextual;
        assert!((top.score_total - expected).abs() < 1e-6);
        assert!((top.score_contextual - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_fuzzy_lexical_fallback() {
        let weights = ScoreWeights::default();
        let catalog = InMemoryCatalog::new(vec![
            CatalogEntry::new(code("847130"), "Laptop computer", "notebook"),
            CatalogEntry::new(code("090111"), "Coffee, not roasted", "coffee beans"),
        ]);
        let outcome = rerank(
            &[],
            &[emb("847130", 0.5), emb("090111", 0.5)],
            &laptop_features(),
            RerankContext::new(&weights).with_catalog(&catalog),
        );
        let ranked = outcome.candidates();
        assert_eq!(ranked[0].code, code("847130"));
        assert_eq!(ranked[0].title, "Laptop computer");
        assert!(ranked[0].score_lexical >= FUZZY_CUTOFF);
        assert_eq!(ranked[1].score_lexical, 0.0);
    }

    #[test]
    fn test_fuzzy_lexical_normalizes_catalog_text() {
        let weights = ScoreWeights::default();
        let extractor = FeatureExtractor::default();
        let catalog = InMemoryCatalog::new(vec![CatalogEntry::new(code("847130"), "Laptops, Computers", "")]);
        let candidates = [emb("847130", 0.5)];

        let folded = rerank(
            &[],
            &candidates,
            &laptop_features(),
            RerankContext::new(&weights).with_catalog(&catalog),
        );
        let normalized = rerank(
            &[],
            &candidates,
            &laptop_features(),
            RerankContext::new(&weights).with_catalog(&catalog).with_extractor(&extractor),
        );

        let folded = folded.top().unwrap().score_lexical;
        let normalized = normalized.top().unwrap().score_lexical;
        assert!((normalized - 1.0).abs() < 1e-6);
        assert!(folded < normalized);
        assert!(folded >= FUZZY_CUTOFF);
    }

    #[test]
    fn test_no_catalog_no_fuzzy() {
        let weights = ScoreWeights::default();
        let outcome = rerank(&[], &[emb("847130", 0.7)], &laptop_features(), RerankContext::new(&weights));
        assert!(outcome.top().unwrap().is_purely_semantic());
    }

    #[test]
    fn test_ties_prefer_rule_evidence() {
        let weights = ScoreWeights::default();
        let mut with_rule = RankedCandidate::new(code("851762"), "", 0.5, 0.5, 0.5, &weights);
        with_rule.matched_rules = vec!["gri1-router".into()];
        with_rule.rule_rank = Some(1);
        let lexical_only = RankedCandidate::new(code("847130"), "", 0.5, 0.5, 0.5, &weights);
        let mut better_rank = with_rule.clone();
        better_rank.code = code("852872");
        better_rank.rule_rank = Some(0);

        let mut all = vec![lexical_only.clone(), with_rule.clone(), better_rank.clone()];
        all.sort_by(rank_order);
        assert_eq!(all, vec![better_rank, with_rule, lexical_only]);
    }

    #[test]
    fn test_ties_then_code_ascending() {
        let weights = ScoreWeights::default();
        let a = RankedCandidate::new(code("847160"), "", 0.5, 0.0, 0.5, &weights);
        let b = RankedCandidate::new(code("847130"), "", 0.5, 0.0, 0.5, &weights);
        assert_eq!(rank_order(&a, &b), Ordering::Greater);
    }

    proptest! {
        #[test]
        fn test_scores_bounded_and_sorted(
            rules in prop::collection::vec((0usize..6, 0.0f32..=1.0), 0..4),
            embeddings in prop::collection::vec((0usize..6, -0.5f32..=1.5), 0..6),
        ) {
            const CODES: [&str; 6] = ["847130", "847160", "851762", "090111", "610910", "8471300000"];
            let rule_cands: Vec<_> = rules
                .iter()
                .enumerate()
                .map(|(rank, (i, lex))| rule(CODES[*i], *lex, rank))
                .collect();
            let emb_cands: Vec<_> = embeddings.iter().map(|(i, s)| emb(CODES[*i], *s)).collect();

            let weights = ScoreWeights::default();
            let outcome = rerank(&rule_cands, &emb_cands, &laptop_features(), RerankContext::new(&weights));
            let ranked = outcome.candidates();

            prop_assert_eq!(ranked.is_empty(), rule_cands.is_empty() && emb_cands.is_empty());
            for c in ranked {
                prop_assert!((0.0..=1.0).contains(&c.score_total));
                let sum = weights.semantic * c.score_semantic
                    + weights.lexical * c.score_lexical
                    + weights.contextual * c.score_contextual;
                prop_assert!((c.score_total - sum).abs() < 1e-5);
            }
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].score_total >= pair[1].score_total);
            }
        }
    }
}

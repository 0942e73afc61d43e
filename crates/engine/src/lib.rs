//! Classification pipeline.
//!
//! `Classifier::classify` runs feature extraction, rule evaluation alongside
//! embedding retrieval, hybrid re-ranking, national-code refinement,
//! governance and rationale generation, then hands the result to the
//! feedback loop without waiting for it.

pub mod national;

pub use national::{refine, Refinement, RefinementMethod, MIN_ATTRIBUTE_HITS};

use hsclass_explain::{build_rationale, unclassifiable_rationale};
use hsclass_features::FeatureExtractor;
use hsclass_feedback::{FeedbackLog, FeedbackLoop};
use hsclass_governance::govern;
use hsclass_model::{
    Catalog, ClassificationRequest, ClassificationResult, ClassifierConfig, Degraded, HsCode,
    InputError, Rationale, RequestAttributes, TopKEntry, Usage,
};
use hsclass_rerank::{rerank, RerankContext, RerankOutcome};
use hsclass_retrieval::{EmbeddingProvider, EmbeddingRetriever, VectorIndex};
use hsclass_rules::{RuleBook, RuleEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The hybrid classifier. Holds no per-request state.
pub struct Classifier<P, I> {
    config: Arc<ClassifierConfig>,
    extractor: FeatureExtractor,
    rules: RuleEngine,
    retriever: EmbeddingRetriever<P, I>,
    catalog: Arc<dyn Catalog>,
    feedback: Option<FeedbackLoop>,
}

impl<P: EmbeddingProvider, I: VectorIndex> Classifier<P, I> {
    pub fn new(
        config: Arc<ClassifierConfig>,
        extractor: FeatureExtractor,
        book: &RuleBook,
        provider: P,
        index: I,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let rules = RuleEngine::new(book, &extractor);
        let retriever = EmbeddingRetriever::new(
            provider,
            index,
            Duration::from_millis(config.retrieval.timeout_ms),
        );
        Self {
            config,
            extractor,
            rules,
            retriever,
            catalog,
            feedback: None,
        }
    }

    /// Attach a feedback loop started elsewhere. Prefer `with_feedback_log`,
    /// which takes the trigger and KPI thresholds from this classifier's
    /// configuration.
    pub fn with_feedback(mut self, feedback: FeedbackLoop) -> Self {
        let configured = self.config.confidence_thresholds.feedback_trigger;
        if (feedback.trigger() - configured).abs() > f32::EPSILON {
            warn!(
                loop_trigger = feedback.trigger(),
                configured, "Feedback loop trigger differs from the configured feedback_trigger"
            );
        }
        self.feedback = Some(feedback);
        self
    }

    /// Start a feedback loop over `log` configured from this classifier's
    /// configuration and attach it.
    pub fn with_feedback_log<L: FeedbackLog>(mut self, log: L) -> Self {
        self.feedback = Some(FeedbackLoop::spawn(log, &self.config));
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn retriever(&self) -> &EmbeddingRetriever<P, I> {
        &self.retriever
    }

    pub fn feedback(&self) -> Option<&FeedbackLoop> {
        self.feedback.as_ref()
    }

    /// Validate raw input and classify it.
    pub async fn classify_text(
        &self,
        case_id: &str,
        title: &str,
        description: &str,
        attrs: RequestAttributes,
    ) -> Result<ClassificationResult, InputError> {
        let request = ClassificationRequest::new(case_id, title, description, attrs)?;
        Ok(self.classify(&request).await)
    }

    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationResult {
        let started = Instant::now();
        let config = self.config.as_ref();
        let text = request.text();
        let mut degraded = Vec::new();

        let features = match self.extractor.extract_with_attrs(&text, request.attrs()) {
            Ok(features) => features,
            Err(Degraded { reason, partial }) => {
                warn!(case_id = request.case_id(), %reason, "Feature extraction degraded");
                degraded.push(reason);
                partial
            }
        };

        let budget = Duration::from_millis(config.retrieval.total_budget_ms).saturating_sub(started.elapsed());
        let (evaluation, retrieved) = tokio::join!(
            async { self.rules.evaluate(&text, &features) },
            self.retriever
                .retrieve_within(&features.normalized_text, config.retrieval.top_k, budget),
        );
        let embedding_candidates = match retrieved {
            Ok(candidates) => candidates,
            Err(reason) => {
                degraded.push(reason);
                Vec::new()
            }
        };
        debug!(
            case_id = request.case_id(),
            rule_candidates = evaluation.candidates.len(),
            embedding_candidates = embedding_candidates.len(),
            "Candidates gathered"
        );

        let ctx = RerankContext::new(&config.score_weights)
            .with_catalog(self.catalog.as_ref())
            .with_extractor(&self.extractor);
        let mut ranked = match rerank(&evaluation.candidates, &embedding_candidates, &features, ctx) {
            RerankOutcome::Ranked(ranked) => ranked,
            RerankOutcome::NoCandidates => {
                info!(case_id = request.case_id(), "No candidates; unclassifiable");
                let result = ClassificationResult {
                    case_id: request.case_id().to_string(),
                    national_code: String::new(),
                    hs6: String::new(),
                    confidence: 0.0,
                    title: String::new(),
                    rationale: unclassifiable_rationale(&features),
                    top_k: Vec::new(),
                    candidates: Vec::new(),
                    rules_applied: evaluation.rules_applied(),
                    keywords: features.keywords.iter().cloned().collect(),
                    response_time: started.elapsed().as_secs_f64(),
                    degraded,
                };
                self.notify(&result, features.attributes.usage_primary);
                return result;
            }
        };

        let refinement = refine(&ranked[0].code, request.attrs(), &embedding_candidates, self.catalog.as_ref());
        if refinement.method != RefinementMethod::Unchanged {
            // the refined code replaces the winner in topK and candidates too
            let top = &mut ranked[0];
            debug!(from = %top.code, to = %refinement.code, method = ?refinement.method, "National code refined");
            top.code = refinement.code;
            if let Some(title) = refinement.title {
                top.title = title;
            }
        }
        let chosen = ranked[0].clone();

        let governed = govern(&chosen, &features, &text, config);
        let rationale = build_rationale(&chosen, &features, &governed, &config.score_weights);

        let result = ClassificationResult {
            case_id: request.case_id().to_string(),
            national_code: chosen.code.digits().to_string(),
            hs6: chosen.code.merge_key().to_string(),
            confidence: governed.confidence,
            title: chosen.title.clone(),
            rationale,
            top_k: ranked
                .iter()
                .take(config.top_k_output)
                .map(|c| TopKEntry {
                    code: c.code.digits().to_string(),
                    score: c.score_total,
                })
                .collect(),
            candidates: ranked,
            rules_applied: evaluation.rules_applied(),
            keywords: features.keywords.iter().cloned().collect(),
            response_time: started.elapsed().as_secs_f64(),
            degraded,
        };

        info!(
            case_id = %result.case_id,
            code = %chosen.code,
            confidence = result.confidence,
            requires_review = result.requires_review(),
            suspect_code = result.suspect_code(),
            "Classified"
        );
        self.notify(&result, features.attributes.usage_primary);
        result
    }

    fn notify(&self, result: &ClassificationResult, usage: Option<Usage>) {
        if let Some(feedback) = &self.feedback {
            feedback.observe(result, usage);
        }
    }

    /// Record human feedback on an earlier result. Returns false when no
    /// feedback loop is attached.
    pub fn record_feedback(
        &self,
        case_id: &str,
        result: &ClassificationResult,
        comment: &str,
        corrected_code: Option<HsCode>,
    ) -> bool {
        let Some(feedback) = &self.feedback else {
            warn!(case_id, "Feedback received but no feedback loop is attached");
            return false;
        };
        let usage = usage_from_rationale(&result.rationale);
        if result.case_id == case_id {
            feedback.record_feedback(result, usage, comment, corrected_code);
        } else {
            let mut result = result.clone();
            result.case_id = case_id.to_string();
            feedback.record_feedback(&result, usage, comment, corrected_code);
        }
        true
    }
}

/// Primary usage recorded among the rationale's attribute factors.
pub fn usage_from_rationale(rationale: &Rationale) -> Option<Usage> {
    rationale
        .factores_clave
        .iter()
        .filter(|f| f.kind == "attribute")
        .find_map(|f| f.value.strip_prefix("usage_primary="))
        .and_then(|v| serde_json::from_value(serde_json::Value::String(v.to_string())).ok())
}

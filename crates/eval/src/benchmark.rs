//! Benchmark cases and accuracy scoring.

use hsclass_model::{ClassificationResult, HsCode, RequestAttributes};
use serde::{Deserialize, Serialize};

/// A labelled product description.
#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkCase {
    #[serde(default)]
    pub case_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attrs: RequestAttributes,
    /// Expected code; matched by digit prefix
    pub expected: HsCode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkFile {
    pub cases: Vec<BenchmarkCase>,
}

/// How one case came out.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Chosen code falls under the expected code
    pub exact: bool,
    pub hs6: bool,
    /// Expected code appears anywhere in the top-K list
    pub in_top_k: bool,
    pub confidence: f32,
    pub requires_review: bool,
    pub response_time: f64,
}

impl Outcome {
    pub fn score(result: &ClassificationResult, expected: &HsCode) -> Self {
        let chosen = result.code();
        let matches = |code: &HsCode| code.starts_with(expected) || expected.starts_with(code);
        Self {
            exact: chosen.as_ref().is_some_and(|c| c.starts_with(expected)),
            hs6: chosen
                .as_ref()
                .is_some_and(|c| c.hs6().is_some() && c.hs6() == expected.hs6()),
            in_top_k: result
                .top_k
                .iter()
                .filter_map(|e| HsCode::parse(&e.code).ok())
                .any(|c| matches(&c)),
            confidence: result.confidence,
            requires_review: result.requires_review(),
            response_time: result.response_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub cases: usize,
    pub rejected: usize,
    pub accuracy: f32,
    pub hs6_accuracy: f32,
    pub top_k_recall: f32,
    pub average_confidence: f32,
    pub review_rate: f32,
    pub average_response_time: f64,
}

impl BenchmarkReport {
    pub fn from_outcomes(outcomes: &[Outcome], rejected: usize) -> Self {
        let n = outcomes.len();
        if n == 0 {
            return Self {
                cases: rejected,
                rejected,
                ..Default::default()
            };
        }
        let rate = |f: fn(&Outcome) -> bool| outcomes.iter().filter(|o| f(o)).count() as f32 / n as f32;
        Self {
            cases: n + rejected,
            rejected,
            accuracy: rate(|o| o.exact),
            hs6_accuracy: rate(|o| o.hs6),
            top_k_recall: rate(|o| o.in_top_k),
            average_confidence: outcomes.iter().map(|o| o.confidence).sum::<f32>() / n as f32,
            review_rate: rate(|o| o.requires_review),
            average_response_time: outcomes.iter().map(|o| o.response_time).sum::<f64>() / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{Coherence, Rationale, TopKEntry};

    fn result(code: &str, top_k: &[&str], confidence: f32) -> ClassificationResult {
        ClassificationResult {
            case_id: "b".into(),
            national_code: code.into(),
            hs6: code.get(..6).unwrap_or_default().into(),
            confidence,
            title: String::new(),
            rationale: Rationale {
                decision: String::new(),
                factores_clave: Vec::new(),
                validations: Vec::new(),
                chapter_coherence: Coherence::Ok,
                suspect_code: false,
                requires_review: confidence < 0.6,
            },
            top_k: top_k
                .iter()
                .map(|c| TopKEntry {
                    code: c.to_string(),
                    score: 0.5,
                })
                .collect(),
            candidates: Vec::new(),
            rules_applied: Vec::new(),
            keywords: Vec::new(),
            response_time: 0.02,
            degraded: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_prefix_match() {
        let expected = HsCode::parse("847130").unwrap();
        let o = Outcome::score(&result("8471300000", &["8471300000"], 0.9), &expected);
        assert!(o.exact && o.hs6 && o.in_top_k);

        let o = Outcome::score(&result("847160", &["847160", "847130"], 0.5), &expected);
        assert!(!o.exact);
        assert!(o.in_top_k);
        assert!(o.requires_review);

        let o = Outcome::score(&result("", &[], 0.0), &expected);
        assert!(!o.exact && !o.hs6 && !o.in_top_k);
    }

    #[test]
    fn test_report() {
        let expected = HsCode::parse("847130").unwrap();
        let outcomes = vec![
            Outcome::score(&result("847130", &["847130"], 0.8), &expected),
            Outcome::score(&result("847160", &["847160"], 0.4), &expected),
        ];
        let report = BenchmarkReport::from_outcomes(&outcomes, 1);
        assert_eq!(report.cases, 3);
        assert_eq!(report.accuracy, 0.5);
        assert_eq!(report.review_rate, 0.5);
        assert!((report.average_confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_parse_file() {
        let file: BenchmarkFile = serde_json::from_str(
            r#"{"cases": [{"title": "Laptop computer 15 inch", "attrs": {"use": "computing"}, "expected": "8471.30"}]}"#,
        )
        .unwrap();
        assert_eq!(file.cases[0].expected, HsCode::parse("847130").unwrap());
        assert_eq!(file.cases[0].attrs.usage.as_deref(), Some("computing"));
    }
}

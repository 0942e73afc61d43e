//! Feedback records, log entries and rule suggestions.

use chrono::{DateTime, Utc};
use hsclass_model::{ClassificationResult, Coherence, HsCode, Usage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observed or reported classification needing attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub case_id: String,

    /// Predicted code digits, empty when unclassifiable
    pub predicted_code: String,

    /// Confidence at decision time
    pub confidence: f32,

    #[serde(default)]
    pub comment: String,

    pub timestamp: DateTime<Utc>,
    pub requires_review: bool,

    #[serde(default)]
    pub suspect_code: bool,

    pub chapter_coherence: Coherence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_primary: Option<Usage>,

    /// Code supplied by a human reviewer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_code: Option<HsCode>,

    /// Keywords of the classified text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl FeedbackRecord {
    pub fn from_result(
        result: &ClassificationResult,
        usage_primary: Option<Usage>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id: result.case_id.clone(),
            predicted_code: result.national_code.clone(),
            confidence: result.confidence,
            comment: comment.into(),
            timestamp: Utc::now(),
            requires_review: result.requires_review(),
            suspect_code: result.suspect_code(),
            chapter_coherence: result.rationale.chapter_coherence,
            usage_primary,
            corrected_code: None,
            keywords: result.keywords.clone(),
        }
    }

    pub fn with_correction(mut self, corrected: Option<HsCode>) -> Self {
        self.corrected_code = corrected;
        self
    }

    /// Chapter of the predicted code, if there is one.
    pub fn predicted_chapter(&self) -> Option<u8> {
        HsCode::parse(&self.predicted_code).ok().map(|c| c.chapter())
    }
}

/// Lifecycle of a record: created, then analyzed, then suggested or archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackState {
    Created,
    Analyzed,
    Suggested,
    Archived,
}

/// Recurring pattern behind a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    DenylistedCode,
    ChapterMismatch,
    RecurringCorrection,
    /// Keywords shared by cases corrected to the same code
    SynonymExpansion,
}

/// Advisory rule-book change. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSuggestion {
    pub id: Uuid,
    pub kind: PatternKind,

    /// Code the suggestion is about
    pub code: String,

    pub proposed_change: String,
    pub case_ids: Vec<String>,
    pub frequency: usize,

    /// Lowest and highest confidence among the supporting records
    pub confidence_range: (f32, f32),

    pub created_at: DateTime<Utc>,
}

/// A line of the append-only feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LogEntry {
    Created {
        record: FeedbackRecord,
    },
    Transition {
        record_id: Uuid,
        state: FeedbackState,
        at: DateTime<Utc>,
    },
    Suggestion {
        suggestion: RuleSuggestion,
    },
}

impl LogEntry {
    pub fn transition(record_id: Uuid, state: FeedbackState) -> Self {
        Self::Transition {
            record_id,
            state,
            at: Utc::now(),
        }
    }
}

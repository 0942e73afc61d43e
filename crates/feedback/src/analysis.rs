//! Pattern analysis over the replayed feedback log.

use crate::record::{FeedbackRecord, FeedbackState, LogEntry, PatternKind, RuleSuggestion};
use chrono::Utc;
use hsclass_model::{Coherence, FeatureValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Records in a group needed before a suggestion is emitted.
pub const MIN_GROUP_SIZE: usize = 2;

/// Current view of the log: every record with its latest state, plus the
/// suggestions emitted so far.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<(FeedbackRecord, FeedbackState)>,
    suggestions: Vec<RuleSuggestion>,
}

/// Aggregate counters for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub total_records: usize,
    pub by_state: BTreeMap<FeedbackState, usize>,
    pub average_confidence: f32,
    pub corrections: usize,
    /// Most frequently flagged predicted codes, most frequent first
    pub common_errors: Vec<(String, usize)>,
    pub suggestions: usize,
}

const COMMON_ERRORS_LIMIT: usize = 5;

/// Most shared keywords proposed per synonym suggestion.
const SYNONYM_LIMIT: usize = 5;

impl Ledger {
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let mut ledger = Self::default();
        for entry in entries {
            ledger.apply(entry);
        }
        ledger
    }

    pub fn apply(&mut self, entry: LogEntry) {
        match entry {
            LogEntry::Created { record } => self.records.push((record, FeedbackState::Created)),
            LogEntry::Transition { record_id, state, .. } => {
                if let Some((_, s)) = self.records.iter_mut().find(|(r, _)| r.id == record_id) {
                    *s = state;
                }
            }
            LogEntry::Suggestion { suggestion } => self.suggestions.push(suggestion),
        }
    }

    pub fn records(&self) -> &[(FeedbackRecord, FeedbackState)] {
        &self.records
    }

    pub fn suggestions(&self) -> &[RuleSuggestion] {
        &self.suggestions
    }

    pub fn state_of(&self, record_id: Uuid) -> Option<FeedbackState> {
        self.records.iter().find(|(r, _)| r.id == record_id).map(|(_, s)| *s)
    }

    /// Analyze records still in `Created` and return the entries to append:
    /// `Analyzed` for each, then new suggestions, then the final state.
    pub fn analyze(&self) -> Vec<LogEntry> {
        let pending: Vec<&FeedbackRecord> = self
            .records
            .iter()
            .filter(|(_, s)| *s == FeedbackState::Created)
            .map(|(r, _)| r)
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }

        let mut entries: Vec<LogEntry> = pending
            .iter()
            .map(|r| LogEntry::transition(r.id, FeedbackState::Analyzed))
            .collect();

        let mut suggested: Vec<Uuid> = Vec::new();
        for (kind, code, members) in groups(&pending) {
            if members.len() < MIN_GROUP_SIZE {
                continue;
            }
            let Some(suggestion) = suggestion_for(kind, code, &members) else {
                continue;
            };
            suggested.extend(members.iter().map(|r| r.id));
            entries.push(LogEntry::Suggestion { suggestion });
        }

        entries.extend(pending.iter().map(|r| {
            let state = if suggested.contains(&r.id) {
                FeedbackState::Suggested
            } else {
                FeedbackState::Archived
            };
            LogEntry::transition(r.id, state)
        }));
        entries
    }

    pub fn metrics(&self) -> LearningMetrics {
        let total_records = self.records.len();
        let mut by_state = BTreeMap::new();
        let mut errors: BTreeMap<&str, usize> = BTreeMap::new();
        let mut confidence_sum = 0.0f32;
        let mut corrections = 0;

        for (record, state) in &self.records {
            *by_state.entry(*state).or_insert(0) += 1;
            confidence_sum += record.confidence;
            if record.corrected_code.is_some() {
                corrections += 1;
            }
            if !record.predicted_code.is_empty() {
                *errors.entry(record.predicted_code.as_str()).or_insert(0) += 1;
            }
        }

        let mut common_errors: Vec<(String, usize)> =
            errors.into_iter().map(|(c, n)| (c.to_string(), n)).collect();
        common_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        common_errors.truncate(COMMON_ERRORS_LIMIT);

        LearningMetrics {
            total_records,
            by_state,
            average_confidence: if total_records == 0 {
                0.0
            } else {
                confidence_sum / total_records as f32
            },
            corrections,
            common_errors,
            suggestions: self.suggestions.len(),
        }
    }
}

/// Group key text, kept ordered so suggestions come out deterministically.
fn groups<'a>(pending: &[&'a FeedbackRecord]) -> Vec<(PatternKind, String, Vec<&'a FeedbackRecord>)> {
    let mut grouped: BTreeMap<(PatternKind, String), Vec<&'a FeedbackRecord>> = BTreeMap::new();

    for &record in pending {
        if record.suspect_code && !record.predicted_code.is_empty() {
            grouped
                .entry((PatternKind::DenylistedCode, record.predicted_code.clone()))
                .or_default()
                .push(record);
        }

        if record.chapter_coherence == Coherence::Fail {
            if let Some(chapter) = record.predicted_chapter() {
                let usage = record
                    .usage_primary
                    .map(|u| FeatureValue::Usage(u).as_str())
                    .unwrap_or_else(|| "unknown".to_string());
                grouped
                    .entry((PatternKind::ChapterMismatch, format!("{:02}|{}", chapter, usage)))
                    .or_default()
                    .push(record);
            }
        }

        if let Some(corrected) = &record.corrected_code {
            if corrected.digits() != record.predicted_code {
                grouped
                    .entry((
                        PatternKind::RecurringCorrection,
                        format!("{}>{}", record.predicted_code, corrected.digits()),
                    ))
                    .or_default()
                    .push(record);
                grouped
                    .entry((PatternKind::SynonymExpansion, corrected.digits().to_string()))
                    .or_default()
                    .push(record);
            }
        }
    }

    grouped.into_iter().map(|((kind, key), members)| (kind, key, members)).collect()
}

/// Keywords appearing in at least two member records, most frequent first.
fn shared_keywords(members: &[&FeedbackRecord]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in members {
        let mut seen: Vec<&str> = Vec::new();
        for keyword in &record.keywords {
            if !seen.contains(&keyword.as_str()) {
                seen.push(keyword);
                *counts.entry(keyword).or_insert(0) += 1;
            }
        }
    }
    let mut shared: Vec<(&str, usize)> = counts.into_iter().filter(|(_, n)| *n >= MIN_GROUP_SIZE).collect();
    shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    shared.into_iter().take(SYNONYM_LIMIT).map(|(k, _)| k.to_string()).collect()
}

fn suggestion_for(kind: PatternKind, key: String, members: &[&FeedbackRecord]) -> Option<RuleSuggestion> {
    let (code, proposed_change) = match kind {
        PatternKind::DenylistedCode => (
            key.clone(),
            format!("review keyword rules proposing {} and add contra keywords from the flagged cases", key),
        ),
        PatternKind::ChapterMismatch => {
            let (chapter, usage) = key.split_once('|').unwrap_or((key.as_str(), "unknown"));
            (
                chapter.to_string(),
                format!("add contra keywords for usage '{}' to rules proposing chapter {}", usage, chapter),
            )
        }
        PatternKind::RecurringCorrection => {
            let (predicted, corrected) = key.split_once('>').unwrap_or((key.as_str(), ""));
            (
                predicted.to_string(),
                format!(
                    "add keywords from the corrected cases to a rule for {} and contra keywords to rules for {}",
                    corrected, predicted
                ),
            )
        }
        PatternKind::SynonymExpansion => {
            let shared = shared_keywords(members);
            if shared.is_empty() {
                return None;
            }
            let change = format!("add synonyms [{}] to the keyword text of {}", shared.join(", "), key);
            (key, change)
        }
    };

    let low = members.iter().map(|r| r.confidence).fold(f32::INFINITY, f32::min);
    let high = members.iter().map(|r| r.confidence).fold(f32::NEG_INFINITY, f32::max);

    Some(RuleSuggestion {
        id: Uuid::new_v4(),
        kind,
        code,
        proposed_change,
        case_ids: members.iter().map(|r| r.case_id.clone()).collect(),
        frequency: members.len(),
        confidence_range: (low, high),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsclass_model::{HsCode, Usage};
    use pretty_assertions::assert_eq;

    fn record(case: &str, code: &str, confidence: f32) -> FeedbackRecord {
        FeedbackRecord {
            id: Uuid::new_v4(),
            case_id: case.to_string(),
            predicted_code: code.to_string(),
            confidence,
            comment: String::new(),
            timestamp: Utc::now(),
            requires_review: true,
            suspect_code: false,
            chapter_coherence: Coherence::Ok,
            usage_primary: None,
            corrected_code: None,
            keywords: Vec::new(),
        }
    }

    fn ledger(records: Vec<FeedbackRecord>) -> Ledger {
        Ledger::from_entries(records.into_iter().map(|record| LogEntry::Created { record }))
    }

    fn apply_all(ledger: &mut Ledger) -> Vec<RuleSuggestion> {
        let entries = ledger.analyze();
        let suggestions = entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Suggestion { suggestion } => Some(suggestion.clone()),
                _ => None,
            })
            .collect();
        for e in entries {
            ledger.apply(e);
        }
        suggestions
    }

    #[test]
    fn test_denylisted_group_suggests() {
        let mut a = record("c1", "8517620000", 0.9);
        let mut b = record("c2", "8517620000", 0.7);
        a.suspect_code = true;
        b.suspect_code = true;
        let lonely = record("c3", "090111", 0.4);
        let ids = (a.id, b.id, lonely.id);

        let mut l = ledger(vec![a, b, lonely]);
        let suggestions = apply_all(&mut l);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, PatternKind::DenylistedCode);
        assert_eq!(suggestions[0].code, "8517620000");
        assert_eq!(suggestions[0].case_ids, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(suggestions[0].confidence_range, (0.7, 0.9));
        assert_eq!(l.state_of(ids.0), Some(FeedbackState::Suggested));
        assert_eq!(l.state_of(ids.1), Some(FeedbackState::Suggested));
        assert_eq!(l.state_of(ids.2), Some(FeedbackState::Archived));
    }

    #[test]
    fn test_chapter_mismatch_grouped_by_usage_and_chapter() {
        let mut records = Vec::new();
        for (case, code, usage) in [
            ("c1", "420212", Usage::Computing),
            ("c2", "420292", Usage::Computing),
            ("c3", "420212", Usage::Apparel),
        ] {
            let mut r = record(case, code, 0.5);
            r.chapter_coherence = Coherence::Fail;
            r.usage_primary = Some(usage);
            records.push(r);
        }
        let mut l = ledger(records);
        let suggestions = apply_all(&mut l);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, PatternKind::ChapterMismatch);
        assert_eq!(suggestions[0].code, "42");
        assert!(suggestions[0].proposed_change.contains("computing"));
    }

    #[test]
    fn test_recurring_correction() {
        let fix = HsCode::parse("847130").ok();
        let a = record("c1", "847160", 0.7).with_correction(fix.clone());
        let b = record("c2", "847160", 0.8).with_correction(fix);
        let mut l = ledger(vec![a, b]);
        let suggestions = apply_all(&mut l);
        // no keywords recorded, so no synonym suggestion
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, PatternKind::RecurringCorrection);
        assert!(suggestions[0].proposed_change.contains("847130"));
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_synonym_expansion_from_shared_keywords() {
        let fix = HsCode::parse("847130").ok();
        let mut a = record("c1", "847160", 0.5).with_correction(fix.clone());
        a.keywords = keywords(&["ultrabook", "portatil", "intel", "intel"]);
        let mut b = record("c2", "851712", 0.4).with_correction(fix.clone());
        b.keywords = keywords(&["ultrabook", "portatil", "touchscreen"]);
        let mut c = record("c3", "847160", 0.3).with_correction(fix);
        c.keywords = keywords(&["ultrabook", "intel"]);
        let ids = [a.id, b.id, c.id];

        let mut l = ledger(vec![a, b, c]);
        let suggestions = apply_all(&mut l);
        let synonyms: Vec<_> = suggestions
            .iter()
            .filter(|s| s.kind == PatternKind::SynonymExpansion)
            .collect();

        assert_eq!(synonyms.len(), 1);
        assert_eq!(synonyms[0].code, "847130");
        assert_eq!(synonyms[0].frequency, 3);
        assert_eq!(
            synonyms[0].proposed_change,
            "add synonyms [ultrabook, intel, portatil] to the keyword text of 847130"
        );
        for id in ids {
            assert_eq!(l.state_of(id), Some(FeedbackState::Suggested));
        }
    }

    #[test]
    fn test_synonym_expansion_needs_shared_keywords() {
        let fix = HsCode::parse("847130").ok();
        let mut a = record("c1", "847160", 0.5).with_correction(fix.clone());
        a.keywords = keywords(&["ultrabook"]);
        let mut b = record("c2", "851712", 0.4).with_correction(fix);
        b.keywords = keywords(&["touchscreen"]);
        let ids = [a.id, b.id];

        let mut l = ledger(vec![a, b]);
        assert!(apply_all(&mut l).is_empty());
        for id in ids {
            assert_eq!(l.state_of(id), Some(FeedbackState::Archived));
        }
    }

    #[test]
    fn test_analysis_only_touches_new_records() {
        let mut l = ledger(vec![record("c1", "847130", 0.5)]);
        apply_all(&mut l);
        assert!(l.analyze().is_empty());
    }

    #[test]
    fn test_metrics() {
        let mut l = ledger(vec![
            record("c1", "847130", 0.4),
            record("c2", "847130", 0.6),
            record("c3", "", 0.0).with_correction(HsCode::parse("0901").ok()),
        ]);
        apply_all(&mut l);
        let m = l.metrics();
        assert_eq!(m.total_records, 3);
        assert_eq!(m.by_state.get(&FeedbackState::Archived), Some(&3));
        assert!((m.average_confidence - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(m.corrections, 1);
        assert_eq!(m.common_errors, vec![("847130".to_string(), 2)]);
    }
}

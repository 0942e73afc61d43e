//! Rolling KPIs and threshold alerts over classification results.
//!
//! Every observed classification is checked against the configured
//! thresholds on arrival. Observations are also buffered; each full buffer
//! becomes one `BatchKpis` entry in a bounded history that performance
//! summaries are computed from.

use chrono::{DateTime, Duration, Utc};
use hsclass_model::{ClassificationResult, KpiThresholds, ValidationStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};

/// Batches kept for performance summaries.
pub const HISTORY_LIMIT: usize = 100;

/// Which signal sources produced the chosen candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Hybrid,
    RulesOnly,
    SemanticOnly,
    Unclassifiable,
}

impl ClassificationMethod {
    pub fn of(result: &ClassificationResult) -> Self {
        let Some(top) = result.top().filter(|_| result.is_classified()) else {
            return Self::Unclassifiable;
        };
        match (top.matched_rules.is_empty(), top.score_semantic > 0.0) {
            (false, true) => Self::Hybrid,
            (false, false) => Self::RulesOnly,
            (true, _) => Self::SemanticOnly,
        }
    }
}

/// The per-classification values the monitor tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub case_id: String,
    pub code: String,
    pub confidence: f32,
    pub response_time_secs: f64,

    /// Share of validations that did not fail; 1.0 when none ran
    pub validation_score: f32,

    pub method: ClassificationMethod,
    pub at: DateTime<Utc>,
}

impl Observation {
    pub fn from_result(result: &ClassificationResult) -> Self {
        let validations = &result.rationale.validations;
        let validation_score = if validations.is_empty() {
            1.0
        } else {
            let passed = validations.iter().filter(|v| v.status != ValidationStatus::Fail).count();
            passed as f32 / validations.len() as f32
        };
        Self {
            case_id: result.case_id.clone(),
            code: result.national_code.clone(),
            confidence: result.confidence,
            response_time_secs: result.response_time,
            validation_score,
            method: ClassificationMethod::of(result),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowConfidence,
    SlowResponse,
    ValidationFailure,
}

/// A single classification that crossed a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub case_id: String,
    pub value: f64,
    pub threshold: f64,
}

/// Averages and rates over one batch of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchKpis {
    pub at: DateTime<Utc>,
    pub batch_size: usize,
    pub avg_confidence: f32,
    pub avg_response_time: f64,
    pub avg_validation_score: f32,
    pub low_confidence_rate: f32,
    pub slow_response_rate: f32,
    pub validation_failure_rate: f32,
    /// Share of the batch per method
    pub method_distribution: BTreeMap<ClassificationMethod, f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    NoData,
    Healthy,
    Warning,
    Critical,
}

/// Batch averages over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub window_secs: i64,
    pub total_batches: usize,
    pub avg_confidence: f32,
    pub avg_response_time: f64,
    pub avg_validation_score: f32,
    pub avg_low_confidence_rate: f32,
    pub avg_slow_response_rate: f32,
    pub avg_validation_failure_rate: f32,
    pub status: SystemStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub thresholds: KpiThresholds,
}

#[derive(Debug, Clone)]
pub struct KpiMonitor {
    thresholds: KpiThresholds,
    buffer: Vec<Observation>,
    history: VecDeque<BatchKpis>,
    last_update: Option<DateTime<Utc>>,
}

impl KpiMonitor {
    pub fn new(thresholds: KpiThresholds) -> Self {
        Self {
            thresholds,
            buffer: Vec::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            last_update: None,
        }
    }

    pub fn thresholds(&self) -> &KpiThresholds {
        &self.thresholds
    }

    /// Observations waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Completed batches, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &BatchKpis> {
        self.history.iter()
    }

    /// Buffer `observation`, closing a batch when the buffer is full, and
    /// return the alerts it raised.
    pub fn record(&mut self, observation: Observation) -> Vec<Alert> {
        let alerts = self.check_alerts(&observation);
        for alert in &alerts {
            warn!(
                kind = ?alert.kind,
                case_id = %alert.case_id,
                value = alert.value,
                threshold = alert.threshold,
                "KPI alert"
            );
        }
        self.buffer.push(observation);
        if self.buffer.len() >= self.thresholds.batch_size {
            self.flush_batch();
        }
        alerts
    }

    fn check_alerts(&self, o: &Observation) -> Vec<Alert> {
        let t = &self.thresholds;
        let mut alerts = Vec::new();
        let mut raise = |kind, value: f64, threshold: f64| {
            alerts.push(Alert {
                kind,
                case_id: o.case_id.clone(),
                value,
                threshold,
            })
        };
        if o.confidence < t.min_confidence {
            raise(AlertKind::LowConfidence, o.confidence.into(), t.min_confidence.into());
        }
        if o.response_time_secs > t.max_response_time_secs {
            raise(AlertKind::SlowResponse, o.response_time_secs, t.max_response_time_secs);
        }
        if o.validation_score < t.min_validation_score {
            raise(
                AlertKind::ValidationFailure,
                o.validation_score.into(),
                t.min_validation_score.into(),
            );
        }
        alerts
    }

    /// Close the current batch even if it is not full. `None` when nothing
    /// is buffered.
    pub fn flush_batch(&mut self) -> Option<BatchKpis> {
        if self.buffer.is_empty() {
            return None;
        }
        let t = &self.thresholds;
        let n = self.buffer.len();
        let share = |count: usize| count as f32 / n as f32;

        let mut method_counts: BTreeMap<ClassificationMethod, usize> = BTreeMap::new();
        for o in &self.buffer {
            *method_counts.entry(o.method).or_insert(0) += 1;
        }

        let kpis = BatchKpis {
            at: Utc::now(),
            batch_size: n,
            avg_confidence: self.buffer.iter().map(|o| o.confidence).sum::<f32>() / n as f32,
            avg_response_time: self.buffer.iter().map(|o| o.response_time_secs).sum::<f64>() / n as f64,
            avg_validation_score: self.buffer.iter().map(|o| o.validation_score).sum::<f32>() / n as f32,
            low_confidence_rate: share(self.buffer.iter().filter(|o| o.confidence < t.min_confidence).count()),
            slow_response_rate: share(
                self.buffer
                    .iter()
                    .filter(|o| o.response_time_secs > t.max_response_time_secs)
                    .count(),
            ),
            validation_failure_rate: share(
                self.buffer
                    .iter()
                    .filter(|o| o.validation_score < t.min_validation_score)
                    .count(),
            ),
            method_distribution: method_counts.into_iter().map(|(m, c)| (m, share(c))).collect(),
        };
        info!(
            batch_size = n,
            avg_confidence = kpis.avg_confidence,
            avg_response_time = kpis.avg_response_time,
            "KPI batch closed"
        );

        self.buffer.clear();
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(kpis.clone());
        self.last_update = Some(kpis.at);
        Some(kpis)
    }

    /// Summary of batches closed within `window` of now.
    pub fn summary(&self, window: Duration) -> PerformanceSummary {
        self.summary_at(Utc::now(), window)
    }

    pub fn summary_at(&self, now: DateTime<Utc>, window: Duration) -> PerformanceSummary {
        let cutoff = now - window;
        let recent: Vec<&BatchKpis> = self.history.iter().filter(|b| b.at >= cutoff).collect();
        let mut summary = PerformanceSummary {
            window_secs: window.num_seconds(),
            total_batches: recent.len(),
            avg_confidence: 0.0,
            avg_response_time: 0.0,
            avg_validation_score: 0.0,
            avg_low_confidence_rate: 0.0,
            avg_slow_response_rate: 0.0,
            avg_validation_failure_rate: 0.0,
            status: SystemStatus::NoData,
            last_update: self.last_update,
            thresholds: self.thresholds,
        };
        if recent.is_empty() {
            return summary;
        }

        let n = recent.len() as f32;
        let mean = |f: fn(&BatchKpis) -> f32| recent.iter().map(|b| f(b)).sum::<f32>() / n;
        summary.avg_confidence = mean(|b| b.avg_confidence);
        summary.avg_validation_score = mean(|b| b.avg_validation_score);
        summary.avg_low_confidence_rate = mean(|b| b.low_confidence_rate);
        summary.avg_slow_response_rate = mean(|b| b.slow_response_rate);
        summary.avg_validation_failure_rate = mean(|b| b.validation_failure_rate);
        summary.avg_response_time = recent.iter().map(|b| b.avg_response_time).sum::<f64>() / recent.len() as f64;

        let t = &self.thresholds;
        summary.status = if summary.avg_validation_failure_rate > t.max_error_rate {
            SystemStatus::Critical
        } else if summary.avg_confidence < t.min_confidence || summary.avg_response_time > t.max_response_time_secs {
            SystemStatus::Warning
        } else {
            SystemStatus::Healthy
        };
        summary
    }

    /// Replace the thresholds. Buffered observations keep their place; a
    /// smaller batch size closes the batch on the next record.
    pub fn update_thresholds(&mut self, thresholds: KpiThresholds) {
        info!(?thresholds, "KPI thresholds updated");
        self.thresholds = thresholds;
    }
}

//! Feedback and learning loop.
//!
//! Low-confidence or flagged classifications are recorded in an append-only
//! log owned by a single writer task. Pattern analysis groups the records and
//! emits advisory `RuleSuggestion`s; nothing here can change the rule book.
//!
//! The same task keeps a `KpiMonitor` fed with every observed result, so
//! threshold alerts and batch KPIs cover all traffic, not only the recorded
//! cases.
//!
//! Callers never wait on persistence: `observe` and `record_feedback` push
//! onto an unbounded channel and return. Log write failures are logged and
//! dropped.

pub mod analysis;
pub mod kpi;
pub mod log;
pub mod record;

pub use analysis::{LearningMetrics, Ledger, MIN_GROUP_SIZE};
pub use kpi::{
    Alert, AlertKind, BatchKpis, ClassificationMethod, KpiMonitor, Observation, PerformanceSummary, SystemStatus,
};
pub use log::{parse_jsonl, FeedbackError, FeedbackLog, JsonlFeedbackLog, MemoryFeedbackLog};
pub use record::{FeedbackRecord, FeedbackState, LogEntry, PatternKind, RuleSuggestion};

use hsclass_model::{ClassificationResult, ClassifierConfig, HsCode, KpiThresholds, Usage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// True when a result should be recorded for review.
pub fn should_record(result: &ClassificationResult, feedback_trigger: f32) -> bool {
    result.confidence < feedback_trigger || result.requires_review()
}

enum Command {
    Record(FeedbackRecord),
    Observe(Observation),
    Performance(chrono::Duration, oneshot::Sender<PerformanceSummary>),
    FlushKpis(oneshot::Sender<Option<BatchKpis>>),
    UpdateThresholds(KpiThresholds),
    Analyze(oneshot::Sender<Vec<RuleSuggestion>>),
    Metrics(oneshot::Sender<LearningMetrics>),
    Suggestions(oneshot::Sender<Vec<RuleSuggestion>>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. Clones share the same writer.
#[derive(Debug, Clone)]
pub struct FeedbackLoop {
    sender: mpsc::UnboundedSender<Command>,
    trigger: f32,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(r) => write!(f, "Record({})", r.case_id),
            Self::Observe(o) => write!(f, "Observe({})", o.case_id),
            Self::Performance(window, _) => write!(f, "Performance({}s)", window.num_seconds()),
            Self::FlushKpis(_) => f.write_str("FlushKpis"),
            Self::UpdateThresholds(_) => f.write_str("UpdateThresholds"),
            Self::Analyze(_) => f.write_str("Analyze"),
            Self::Metrics(_) => f.write_str("Metrics"),
            Self::Suggestions(_) => f.write_str("Suggestions"),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl FeedbackLoop {
    /// Start the writer task on the current Tokio runtime. Existing log
    /// entries are replayed first. The record trigger and KPI thresholds come
    /// from `config`.
    pub fn spawn<L: FeedbackLog>(log: L, config: &ClassifierConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(writer(log, KpiMonitor::new(config.kpi), receiver));
        Self {
            sender,
            trigger: config.confidence_thresholds.feedback_trigger,
        }
    }

    pub fn trigger(&self) -> f32 {
        self.trigger
    }

    fn send(&self, command: Command) -> Result<(), FeedbackError> {
        self.sender.send(command).map_err(|_| FeedbackError::Closed)
    }

    /// Feed `result` to the KPI monitor and record it if it is
    /// low-confidence or flagged. Returns whether a record was queued.
    pub fn observe(&self, result: &ClassificationResult, usage_primary: Option<Usage>) -> bool {
        if let Err(e) = self.send(Command::Observe(Observation::from_result(result))) {
            warn!(case_id = %result.case_id, error = %e, "KPI observation dropped");
        }
        if !should_record(result, self.trigger) {
            return false;
        }
        let comment = if result.requires_review() {
            format!("review required at confidence {:.2}", result.confidence)
        } else {
            format!("low confidence {:.2}", result.confidence)
        };
        let record = FeedbackRecord::from_result(result, usage_primary, comment);
        match self.send(Command::Record(record)) {
            Ok(()) => true,
            Err(e) => {
                warn!(case_id = %result.case_id, error = %e, "Feedback not recorded");
                false
            }
        }
    }

    /// Record explicit human feedback, optionally with the correct code.
    pub fn record_feedback(
        &self,
        result: &ClassificationResult,
        usage_primary: Option<Usage>,
        comment: impl Into<String>,
        corrected_code: Option<HsCode>,
    ) {
        let record = FeedbackRecord::from_result(result, usage_primary, comment).with_correction(corrected_code);
        if let Err(e) = self.send(Command::Record(record)) {
            warn!(case_id = %result.case_id, error = %e, "Feedback not recorded");
        }
    }

    /// Analyze records not yet analyzed and return the new suggestions.
    pub async fn analyze(&self) -> Result<Vec<RuleSuggestion>, FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Analyze(tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }

    pub async fn metrics(&self) -> Result<LearningMetrics, FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Metrics(tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }

    /// Every suggestion emitted so far.
    pub async fn suggestions(&self) -> Result<Vec<RuleSuggestion>, FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Suggestions(tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }

    /// KPI summary over batches closed within `window`.
    pub async fn performance(&self, window: chrono::Duration) -> Result<PerformanceSummary, FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Performance(window, tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }

    /// Close the current KPI batch even if it is not full.
    pub async fn flush_kpis(&self) -> Result<Option<BatchKpis>, FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::FlushKpis(tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }

    pub fn update_thresholds(&self, thresholds: KpiThresholds) -> Result<(), FeedbackError> {
        self.send(Command::UpdateThresholds(thresholds))
    }

    /// Wait until every command sent before this one has been handled.
    pub async fn flush(&self) -> Result<(), FeedbackError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.await.map_err(|_| FeedbackError::Closed)
    }
}

async fn persist<L: FeedbackLog>(log: &L, ledger: &mut Ledger, entry: LogEntry) {
    if let Err(e) = log.append(&entry).await {
        warn!(error = %e, "Feedback log append failed");
    }
    ledger.apply(entry);
}

async fn writer<L: FeedbackLog>(log: L, mut monitor: KpiMonitor, mut receiver: mpsc::UnboundedReceiver<Command>) {
    let mut ledger = match log.load().await {
        Ok(entries) => Ledger::from_entries(entries),
        Err(e) => {
            warn!(error = %e, "Feedback log could not be replayed; starting empty");
            Ledger::default()
        }
    };
    debug!(records = ledger.records().len(), "Feedback writer started");

    while let Some(command) = receiver.recv().await {
        match command {
            Command::Record(record) => {
                debug!(case_id = %record.case_id, confidence = record.confidence, "Feedback recorded");
                persist(&log, &mut ledger, LogEntry::Created { record }).await;
            }
            Command::Observe(observation) => {
                monitor.record(observation);
            }
            Command::Performance(window, reply) => {
                let _ = reply.send(monitor.summary(window));
            }
            Command::FlushKpis(reply) => {
                let _ = reply.send(monitor.flush_batch());
            }
            Command::UpdateThresholds(thresholds) => monitor.update_thresholds(thresholds),
            Command::Analyze(reply) => {
                let entries = ledger.analyze();
                let suggestions: Vec<RuleSuggestion> = entries
                    .iter()
                    .filter_map(|e| match e {
                        LogEntry::Suggestion { suggestion } => Some(suggestion.clone()),
                        _ => None,
                    })
                    .collect();
                for entry in entries {
                    persist(&log, &mut ledger, entry).await;
                }
                info!(suggestions = suggestions.len(), "Feedback analysis finished");
                let _ = reply.send(suggestions);
            }
            Command::Metrics(reply) => {
                let _ = reply.send(ledger.metrics());
            }
            Command::Suggestions(reply) => {
                let _ = reply.send(ledger.suggestions().to_vec());
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("Feedback writer stopped");
}

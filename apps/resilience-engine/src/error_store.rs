//! Append-only store of caught failures.
//!
//! Every failure observed by the retry engine (and by callers that report
//! directly) becomes an [`ErrorRecord`]. Records are never removed; the only
//! mutation is marking the latest matching record resolved once a recovery
//! strategy succeeds. When a log directory is configured each record is also
//! appended to `error_records_YYYYMMDD.jsonl`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ResilienceError};
use crate::journal::DailyJournal;
use crate::resilience::CircuitBreakerMetrics;

/// File prefix of the error journal.
pub const ERROR_JOURNAL_PREFIX: &str = "error_records";

/// One caught failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the failure was caught.
    pub timestamp: DateTime<Utc>,
    /// Failure kind.
    pub error_kind: ErrorKind,
    /// Failure message.
    pub message: String,
    /// Function or component that failed.
    pub origin: String,
    /// Attempt number that produced this failure (1-based).
    #[serde(default)]
    pub retry_count: u32,
    /// Whether a recovery strategy resolved the failure.
    #[serde(default)]
    pub resolved: bool,
    /// Name of the recovery action that resolved it.
    #[serde(default)]
    pub recovery_action: Option<String>,
    /// Free-form context.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Aggregate view over all records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Number of records.
    pub total_errors: usize,
    /// Number of resolved records.
    pub resolved_errors: usize,
    /// Resolved share in percent.
    pub resolution_rate: f64,
    /// Count per kind.
    pub error_types: BTreeMap<ErrorKind, usize>,
    /// Records in the last 24 hours.
    pub recent_24h_errors: usize,
    /// Most frequent kind (ties go to the kind declared first).
    pub most_common_error: Option<ErrorKind>,
}

/// Shared error record store.
#[derive(Debug, Default)]
pub struct ErrorStore {
    records: Mutex<Vec<ErrorRecord>>,
    journal: Option<DailyJournal>,
}

impl ErrorStore {
    /// In-memory store without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisting to `<dir>/error_records_YYYYMMDD.jsonl`.
    #[must_use]
    pub fn with_journal(dir: impl AsRef<Path>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            journal: Some(DailyJournal::new(dir.as_ref(), ERROR_JOURNAL_PREFIX)),
        }
    }

    /// Record a failure raised by `origin` on attempt `retry_count`.
    pub fn record_error(
        &self,
        error: &ResilienceError,
        origin: &str,
        retry_count: u32,
        context: BTreeMap<String, String>,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            error_kind: error.kind(),
            message: error.to_string(),
            origin: origin.to_string(),
            retry_count,
            resolved: false,
            recovery_action: None,
            context,
        };
        self.push(record.clone());
        record
    }

    /// Append an already built record.
    pub fn push(&self, record: ErrorRecord) {
        tracing::debug!(
            kind = %record.error_kind,
            origin = %record.origin,
            retry_count = record.retry_count,
            "Error recorded"
        );
        crate::observability::record_error(record.error_kind.as_str());

        // File I/O happens outside the records lock; the journal orders its
        // own writers
        if let Some(journal) = &self.journal
            && let Err(e) = journal.append(&record, record.timestamp)
        {
            tracing::warn!(error = %e, "Failed to persist error record");
        }
        self.records.lock().push(record);
    }

    /// Mark the latest unresolved record with this kind and origin as resolved.
    ///
    /// Returns `false` when no such record exists.
    pub fn mark_resolved(&self, kind: ErrorKind, origin: &str, action: &str) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| !r.resolved && r.error_kind == kind && r.origin == origin)
        else {
            return false;
        };
        record.resolved = true;
        record.recovery_action = Some(action.to_string());
        true
    }

    /// Snapshot of every record.
    #[must_use]
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Records newer than `window`.
    #[must_use]
    pub fn count_within(&self, window: Duration) -> usize {
        self.count_within_at(window, Utc::now())
    }

    fn count_within_at(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.records
            .lock()
            .iter()
            .filter(|r| now.signed_duration_since(r.timestamp) < window)
            .count()
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn statistics(&self) -> ErrorStatistics {
        self.statistics_at(Utc::now())
    }

    /// Aggregate statistics relative to `now`.
    #[must_use]
    pub fn statistics_at(&self, now: DateTime<Utc>) -> ErrorStatistics {
        let records = self.records.lock();

        let mut error_types: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        let mut resolved_errors = 0;
        let mut recent_24h_errors = 0;
        for record in records.iter() {
            *error_types.entry(record.error_kind).or_default() += 1;
            if record.resolved {
                resolved_errors += 1;
            }
            if now.signed_duration_since(record.timestamp) < chrono::Duration::hours(24) {
                recent_24h_errors += 1;
            }
        }
        let total_errors = records.len();
        drop(records);

        let resolution_rate = if total_errors == 0 {
            0.0
        } else {
            resolved_errors as f64 / total_errors as f64 * 100.0
        };

        // BTreeMap iterates in kind order; keep the first maximum
        let most_common_error = error_types
            .iter()
            .fold(None::<(ErrorKind, usize)>, |best, (kind, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((*kind, *count)),
            })
            .map(|(kind, _)| kind);

        ErrorStatistics {
            total_errors,
            resolved_errors,
            resolution_rate,
            error_types,
            recent_24h_errors,
            most_common_error,
        }
    }

    /// Load records persisted in `dir`.
    #[must_use]
    pub fn load_persisted(dir: impl AsRef<Path>) -> Vec<ErrorRecord> {
        DailyJournal::new(dir.as_ref(), ERROR_JOURNAL_PREFIX).load_all()
    }

    /// Render a plain-text report of the statistics and breaker states.
    #[must_use]
    pub fn generate_report(&self, breakers: &[CircuitBreakerMetrics]) -> String {
        let stats = self.statistics();
        let rule = "=".repeat(50);

        let mut report = String::new();
        let _ = writeln!(report, "Resilience error report");
        let _ = writeln!(report, "{rule}");
        let _ = writeln!(report);
        let _ = writeln!(report, "Error statistics:");
        let _ = writeln!(report, "   total: {}", stats.total_errors);
        let _ = writeln!(report, "   resolved: {}", stats.resolved_errors);
        let _ = writeln!(report, "   resolution rate: {:.1}%", stats.resolution_rate);
        let _ = writeln!(report, "   last 24h: {}", stats.recent_24h_errors);
        let _ = writeln!(report);
        let _ = writeln!(report, "By kind:");
        for (kind, count) in &stats.error_types {
            let _ = writeln!(report, "   {kind}: {count}");
        }
        if let Some(kind) = stats.most_common_error {
            let _ = writeln!(report);
            let _ = writeln!(report, "Most common: {kind}");
        }
        if !breakers.is_empty() {
            let _ = writeln!(report);
            let _ = writeln!(report, "Circuit breakers:");
            for breaker in breakers {
                let _ = writeln!(
                    report,
                    "   {}: {} (failures: {})",
                    breaker.name, breaker.state, breaker.failure_count
                );
            }
        }
        let _ = writeln!(report);
        let _ = writeln!(report, "{rule}");
        let _ = writeln!(
            report,
            "Generated at: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkFailure;

    fn net_err() -> ResilienceError {
        ResilienceError::network(NetworkFailure::Timeout, "timed out")
    }

    #[test]
    fn test_record_and_statistics() {
        let store = ErrorStore::new();
        store.record_error(&net_err(), "fetch_ticker", 1, BTreeMap::new());
        store.record_error(&net_err(), "fetch_ticker", 2, BTreeMap::new());
        store.record_error(&ResilienceError::api("bad"), "post_order", 1, BTreeMap::new());

        assert!(store.mark_resolved(ErrorKind::Network, "fetch_ticker", "connectivity_probe"));

        let stats = store.statistics();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.resolved_errors, 1);
        assert!((stats.resolution_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.error_types[&ErrorKind::Network], 2);
        assert_eq!(stats.recent_24h_errors, 3);
        assert_eq!(stats.most_common_error, Some(ErrorKind::Network));
    }

    #[test]
    fn test_mark_resolved_picks_latest_unresolved() {
        let store = ErrorStore::new();
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        store.record_error(&net_err(), "op", 2, BTreeMap::new());

        assert!(store.mark_resolved(ErrorKind::Network, "op", "probe"));
        let records = store.records();
        assert!(!records[0].resolved);
        assert!(records[1].resolved);
        assert_eq!(records[1].recovery_action.as_deref(), Some("probe"));

        assert!(store.mark_resolved(ErrorKind::Network, "op", "probe"));
        assert!(!store.mark_resolved(ErrorKind::Network, "op", "probe"));
        assert!(!store.mark_resolved(ErrorKind::Api, "op", "probe"));
    }

    #[test]
    fn test_statistics_are_repeatable() {
        let store = ErrorStore::new();
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        let now = Utc::now();
        assert_eq!(store.statistics_at(now), store.statistics_at(now));
    }

    #[test]
    fn test_most_common_tie_goes_to_first_kind() {
        let store = ErrorStore::new();
        store.record_error(&ResilienceError::api("x"), "op", 1, BTreeMap::new());
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        assert_eq!(store.statistics().most_common_error, Some(ErrorKind::Network));
    }

    #[test]
    fn test_recent_window_excludes_old_records() {
        let store = ErrorStore::new();
        let mut old = store.record_error(&net_err(), "op", 1, BTreeMap::new());
        old.timestamp -= chrono::Duration::hours(30);
        store.push(old);

        let stats = store.statistics();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.recent_24h_errors, 1);
        assert_eq!(store.count_within(Duration::from_secs(3600)), 1);
    }

    #[test]
    fn test_empty_statistics() {
        let stats = ErrorStore::new().statistics();
        assert_eq!(stats.total_errors, 0);
        assert!(stats.resolution_rate.abs() < f64::EPSILON);
        assert_eq!(stats.most_common_error, None);
    }

    #[test]
    fn test_journal_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = ErrorStore::with_journal(dir.path());
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        store.record_error(&ResilienceError::trading("insufficient balance"), "buy", 1, BTreeMap::new());

        let loaded = ErrorStore::load_persisted(dir.path());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].error_kind, ErrorKind::Trading);
        assert_eq!(loaded[1].origin, "buy");
    }

    #[test]
    fn test_unwritable_journal_keeps_record_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = ErrorStore::with_journal(&blocker);
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        assert_eq!(store.len(), 1);
        assert_eq!(store.statistics().total_errors, 1);
    }

    #[test]
    fn test_concurrent_writers_persist_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(ErrorStore::with_journal(dir.path()));

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.record_error(&net_err(), &format!("worker_{n}"), 1, BTreeMap::new());
                        let _ = store.len();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(store.len(), 100);
        assert_eq!(ErrorStore::load_persisted(dir.path()).len(), 100);
    }

    #[test]
    fn test_report_mentions_counts() {
        let store = ErrorStore::new();
        store.record_error(&net_err(), "op", 1, BTreeMap::new());
        let report = store.generate_report(&[]);
        assert!(report.contains("total: 1"));
        assert!(report.contains("network_error: 1"));
    }
}

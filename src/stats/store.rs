//! Session history storage
//!
//! Keeps a bounded history of finished session summaries with automatic
//! eviction of the oldest entries, and answers cross-session queries:
//! trend across recent sessions, exposure percentiles over the stored TWAs.
//! Persistence goes through the key-value storage contract and degrades to
//! "not persisted" on any backend failure.

use crate::exposure::aggregator::{trend_between, ExposureSummary, Trend};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Storage key for the serialized history document
pub const HISTORY_KEY: &str = "session_history";

/// Maximum number of session summaries to keep
const MAX_HISTORY_SESSIONS: usize = 500;

/// A finished session summary with its wall-clock completion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSummary {
    /// When the session finished
    pub recorded_at: DateTime<Utc>,
    /// The finalized summary
    pub summary: ExposureSummary,
}

/// Bounded history of finished sessions
#[derive(Debug)]
pub struct HistoryStore {
    sessions: VecDeque<StoredSummary>,
    max_size: usize,
}

impl HistoryStore {
    /// Create an empty history with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SESSIONS)
    }

    /// Create an empty history evicting beyond `max_size` sessions
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            sessions: VecDeque::with_capacity(max_size.min(MAX_HISTORY_SESSIONS)),
            max_size,
        }
    }

    /// Record a finished session, evicting the oldest entry when full
    pub fn record(&mut self, summary: ExposureSummary) {
        self.record_at(Utc::now(), summary);
    }

    /// Record with an explicit completion time
    pub fn record_at(&mut self, recorded_at: DateTime<Utc>, summary: ExposureSummary) {
        if self.sessions.len() >= self.max_size {
            self.sessions.pop_front();
        }
        self.sessions.push_back(StoredSummary {
            recorded_at,
            summary,
        });
    }

    /// Stored sessions, oldest first
    pub fn sessions(&self) -> &VecDeque<StoredSummary> {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Clear all stored sessions
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Representative level per stored session, oldest first
    ///
    /// Uses the TWA where defined, falling back to the simple average;
    /// sessions with neither are skipped.
    pub fn session_levels(&self) -> Vec<f64> {
        self.sessions
            .iter()
            .filter_map(|s| s.summary.twa_db.or(s.summary.average_db))
            .collect()
    }

    /// Trend across stored sessions: recent half against older half
    ///
    /// The same deadband rule as the in-session trend applies; too few
    /// stored sessions yields an insufficient-data verdict.
    pub fn trend(&self) -> Trend {
        let levels = self.session_levels();
        let mid = levels.len() / 2;
        trend_between(&levels[..mid], &levels[mid..])
    }

    /// Load history from storage, falling back to empty on any error
    pub fn load(storage: &dyn Storage) -> Self {
        let mut store = Self::new();
        let Some(contents) = storage.load(HISTORY_KEY) else {
            tracing::info!("no stored session history");
            return store;
        };
        match serde_json::from_str::<Vec<StoredSummary>>(&contents) {
            Ok(entries) => {
                for entry in entries {
                    store.record_at(entry.recorded_at, entry.summary);
                }
                tracing::info!(sessions = store.len(), "loaded session history");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse session history, starting empty");
            }
        }
        store
    }

    /// Save history to storage; failures degrade to "not persisted"
    pub fn save(&self, storage: &mut dyn Storage) {
        let entries: Vec<&StoredSummary> = self.sessions.iter().collect();
        match serde_json::to_string(&entries) {
            Ok(json) => storage.save(HISTORY_KEY, &json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize session history"),
        }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::aggregator::ExposureAggregator;
    use crate::audio::meter::Reading;
    use crate::storage::MemoryStorage;

    fn summary_with_twa(level_db: f64) -> ExposureSummary {
        ExposureAggregator::from_readings((0..10).map(|i| Reading {
            value_db: level_db,
            timestamp_ms: i * 1000,
        }))
        .finalize()
    }

    #[test]
    fn test_store_starts_empty() {
        let store = HistoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.trend(), Trend::InsufficientData);
    }

    #[test]
    fn test_record_and_levels() {
        let mut store = HistoryStore::new();
        store.record(summary_with_twa(60.0));
        store.record(summary_with_twa(70.0));

        let levels = store.session_levels();
        assert_eq!(levels.len(), 2);
        assert!((levels[0] - 60.0).abs() < 1e-9);
        assert!((levels[1] - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = HistoryStore::with_capacity(3);
        for level in [60.0, 65.0, 70.0, 75.0] {
            store.record(summary_with_twa(level));
        }
        assert_eq!(store.len(), 3);
        let levels = store.session_levels();
        assert!((levels[0] - 65.0).abs() < 1e-9, "oldest entry evicted");
    }

    #[test]
    fn test_cross_session_trend() {
        let mut store = HistoryStore::new();
        for _ in 0..5 {
            store.record(summary_with_twa(60.0));
        }
        for _ in 0..5 {
            store.record(summary_with_twa(75.0));
        }
        assert_eq!(store.trend(), Trend::Increasing);
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut storage = MemoryStorage::new();
        let mut store = HistoryStore::new();
        store.record(summary_with_twa(66.0));
        store.record(summary_with_twa(82.0));
        store.save(&mut storage);

        let loaded = HistoryStore::load(&storage);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.sessions(), store.sessions());
    }

    #[test]
    fn test_load_corrupt_history_starts_empty() {
        let mut storage = MemoryStorage::new();
        storage.save(HISTORY_KEY, "not valid json");
        let store = HistoryStore::load(&storage);
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut store = HistoryStore::new();
        store.record(summary_with_twa(60.0));
        store.clear();
        assert!(store.is_empty());
    }
}

//! Transition history for diagnostics.
//!
//! Immutable archival of every handled transition, following functional
//! programming principles: `record` returns a new history rather than
//! mutating in place. The driver keeps one of these and exposes it through
//! its inspection API so a host app can see how the machine got where it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of a single handled transition.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Name of the state transitioned from.
    pub from: String,
    /// Name of the state transitioned to.
    pub to: String,
    /// Name of the event that drove the transition.
    pub event: String,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
}

/// Ordered history of handled transitions.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct StateHistory {
    records: Vec<TransitionRecord>,
}

impl StateHistory {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition, returning a new history.
    pub fn record(&self, record: TransitionRecord) -> Self {
        let mut records = self.records.clone();
        records.push(record);
        Self { records }
    }

    /// Get the sequence of state names traversed: the first record's `from`
    /// followed by every record's `to`.
    pub fn get_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        if let Some(first) = self.records.first() {
            path.push(first.from.as_str());
        }
        for record in &self.records {
            path.push(record.to.as_str());
        }
        path
    }

    /// Total duration from first to last transition, if any were recorded.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.records.first()?, self.records.last()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    /// Get all recorded transitions in order.
    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(from: &str, to: &str, event: &str) -> TransitionRecord {
        TransitionRecord {
            from: from.into(),
            to: to.into(),
            event: event.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_history_is_empty() {
        let history = StateHistory::new();
        assert!(history.records().is_empty());
        assert!(history.get_path().is_empty());
        assert!(history.duration().is_none());
    }

    #[test]
    fn record_is_immutable() {
        let history = StateHistory::new();
        let new_history = history.record(record(
            "NotActivated",
            "WaitingForPushDeviceDetails",
            "CalledActivate",
        ));

        assert_eq!(history.records().len(), 0);
        assert_eq!(new_history.records().len(), 1);
    }

    #[test]
    fn get_path_returns_state_sequence() {
        let history = StateHistory::new()
            .record(record(
                "NotActivated",
                "WaitingForPushDeviceDetails",
                "CalledActivate",
            ))
            .record(record(
                "WaitingForPushDeviceDetails",
                "WaitingForDeviceRegistration",
                "GotPushDeviceDetails",
            ));

        assert_eq!(
            history.get_path(),
            vec![
                "NotActivated",
                "WaitingForPushDeviceDetails",
                "WaitingForDeviceRegistration"
            ]
        );
    }

    #[test]
    fn history_serializes_correctly() {
        let history = StateHistory::new().record(record(
            "NotActivated",
            "NotActivated",
            "GotPushDeviceDetails",
        ));
        let json = serde_json::to_string(&history).unwrap();
        let back: StateHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(history, back);
    }
}

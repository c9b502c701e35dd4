//! Alert history with incrementally maintained counts

use crate::types::{Alert, AlertCounts, BatchId, Severity};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Bounded alert history, most recent first.
///
/// Repeated identical conditions raise repeated alerts; there is no
/// deduplication window.
#[derive(Debug, Clone)]
pub struct AlertLog {
    // front = most recent
    entries: VecDeque<Alert>,
    retention: usize,
    counts: AlertCounts,
}

impl AlertLog {
    /// Create an empty log retaining at most `retention` alerts
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention: retention.max(1),
            counts: AlertCounts::default(),
        }
    }

    /// Rebuild from snapshot alerts (most recent first)
    pub fn from_alerts(retention: usize, alerts: Vec<Alert>) -> Self {
        let mut log = Self::new(retention);
        // oldest first so the newest end up at the front
        for alert in alerts.into_iter().rev() {
            log.push(alert);
        }
        log
    }

    /// Raise a new alert stamped with the current time
    pub fn raise(&mut self, severity: Severity, batch_id: &BatchId, message: impl Into<String>) -> Alert {
        self.raise_at(severity, batch_id, message, Utc::now())
    }

    /// Raise a new alert with an explicit timestamp
    pub fn raise_at(
        &mut self,
        severity: Severity,
        batch_id: &BatchId,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Alert {
        let alert = Alert {
            severity,
            batch_id: batch_id.clone(),
            message: message.into(),
            timestamp,
        };

        tracing::warn!(
            batch_id = %alert.batch_id,
            severity = alert.severity.label(),
            message = %alert.message,
            "Alert raised"
        );

        self.push(alert.clone());
        alert
    }

    fn push(&mut self, alert: Alert) {
        self.counts.total += 1;
        if alert.severity == Severity::Critical {
            self.counts.critical += 1;
        }
        self.entries.push_front(alert);

        while self.entries.len() > self.retention {
            if let Some(old) = self.entries.pop_back() {
                self.counts.total -= 1;
                if old.severity == Severity::Critical {
                    self.counts.critical -= 1;
                }
            }
        }
    }

    /// Totals over retained alerts
    pub fn counts(&self) -> AlertCounts {
        self.counts
    }

    /// Recount from scratch
    pub fn recount(&self) -> AlertCounts {
        AlertCounts {
            total: self.entries.len(),
            critical: self
                .entries
                .iter()
                .filter(|a| a.severity == Severity::Critical)
                .count(),
        }
    }

    /// Most recent `n` alerts
    pub fn recent(&self, n: usize) -> Vec<&Alert> {
        self.entries.iter().take(n).collect()
    }

    /// Retained critical alerts, most recent first
    pub fn critical(&self) -> Vec<&Alert> {
        self.entries
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .collect()
    }

    /// Iterate all retained alerts, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.entries.iter()
    }

    /// Number of retained alerts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of retained alerts, most recent first
    pub fn to_vec(&self) -> Vec<Alert> {
        self.entries.iter().cloned().collect()
    }
}

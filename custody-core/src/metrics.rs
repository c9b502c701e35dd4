//! Metrics collection for observability
//!
//! Each [`Metrics`] owns its own Prometheus registry, so several handles can
//! live in one process (tests, multi-tenant hosts) without name clashes.
//!
//! # Metrics
//!
//! - `custody_transactions_total` - Ledger entries written
//! - `custody_alerts_total{severity}` - Alerts raised, by severity
//! - `custody_tamper_events_total` - Suspicious box movements
//! - `custody_readings_total` - Telemetry readings accepted
//! - `custody_rejected_operations_total{kind}` - Operations refused, by error kind
//! - `custody_snapshot_flushes_total` - Snapshots persisted
//! - `custody_ledger_entries` - Retained ledger size

use crate::types::{Alert, Severity};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Ledger entries written
    pub transactions_total: IntCounter,

    /// Alerts raised, labelled by severity
    pub alerts_total: IntCounterVec,

    /// Tamper findings
    pub tamper_events_total: IntCounter,

    /// Readings accepted
    pub readings_total: IntCounter,

    /// Operations rejected, labelled by error kind
    pub rejected_total: IntCounterVec,

    /// Snapshots persisted
    pub snapshot_flushes_total: IntCounter,

    /// Retained ledger size
    pub ledger_entries: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_total", &self.transactions_total.get())
            .field("readings_total", &self.readings_total.get())
            .field("ledger_entries", &self.ledger_entries.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total =
            IntCounter::new("custody_transactions_total", "Ledger entries written")?;
        registry.register(Box::new(transactions_total.clone()))?;

        let alerts_total = IntCounterVec::new(
            Opts::new("custody_alerts_total", "Alerts raised"),
            &["severity"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let tamper_events_total =
            IntCounter::new("custody_tamper_events_total", "Suspicious box movements")?;
        registry.register(Box::new(tamper_events_total.clone()))?;

        let readings_total =
            IntCounter::new("custody_readings_total", "Telemetry readings accepted")?;
        registry.register(Box::new(readings_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("custody_rejected_operations_total", "Operations refused"),
            &["kind"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let snapshot_flushes_total =
            IntCounter::new("custody_snapshot_flushes_total", "Snapshots persisted")?;
        registry.register(Box::new(snapshot_flushes_total.clone()))?;

        let ledger_entries = IntGauge::new("custody_ledger_entries", "Retained ledger size")?;
        registry.register(Box::new(ledger_entries.clone()))?;

        Ok(Self {
            transactions_total,
            alerts_total,
            tamper_events_total,
            readings_total,
            rejected_total,
            snapshot_flushes_total,
            ledger_entries,
            registry,
        })
    }

    /// Record ledger writes
    pub fn record_transactions(&self, count: usize) {
        self.transactions_total.inc_by(count as u64);
    }

    /// Record raised alerts
    pub fn record_alerts<'a>(&self, alerts: impl IntoIterator<Item = &'a Alert>) {
        for alert in alerts {
            self.alerts_total
                .with_label_values(&[alert.severity.label()])
                .inc();
        }
    }

    /// Record tamper findings
    pub fn record_tamper(&self, count: usize) {
        self.tamper_events_total.inc_by(count as u64);
    }

    /// Record an accepted reading
    pub fn record_reading(&self) {
        self.readings_total.inc();
    }

    /// Record a refused operation
    pub fn record_rejected(&self, error: &crate::Error) {
        self.rejected_total.with_label_values(&[error.kind()]).inc();
    }

    /// Record a snapshot flush
    pub fn record_flush(&self) {
        self.snapshot_flushes_total.inc();
    }

    /// Update retained ledger size
    pub fn update_ledger_size(&self, len: usize) {
        self.ledger_entries.set(len as i64);
    }

    /// Alerts counted for one severity
    pub fn alerts_for(&self, severity: Severity) -> u64 {
        self.alerts_total.with_label_values(&[severity.label()]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

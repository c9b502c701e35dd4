//! Custody session
//!
//! [`CustodyEngine`] is the explicit session object that owns every batch,
//! box, ledger entry, alert and telemetry reading. There is no global state:
//! independent engines can coexist (one per test, one per tenant).
//!
//! Mutations live in [`crate::custody`] (state machine) and
//! [`crate::telemetry`] (ingestion). Both follow validate-then-commit: every
//! check runs before the first write, and nothing after the first write can
//! fail, so an error always leaves the session untouched.
//!
//! # Example
//!
//! ```
//! use custody_core::{CustodyEngine, Config, NewBatch, NewBox, Role, GeoPoint};
//!
//! # fn main() -> custody_core::Result<()> {
//! let mut engine = CustodyEngine::new(&Config::default());
//! engine.create_batch(
//!     NewBatch { id: "B1".into(), drug_name: "Aspirin".into(), ..Default::default() },
//!     Role::Manufacturer,
//! )?;
//! engine.register_box(NewBox {
//!     id: "BX1".into(),
//!     batch_id: Some("B1".into()),
//!     contents: "Aspirin 100mg".into(),
//!     coordinates: Some(GeoPoint::new(20.5937, 78.9629)?),
//! })?;
//! engine.approve_batch(&"B1".into(), Role::Fda)?;
//! engine.transfer_box(&"BX1".into(), Role::Distributor, Role::Manufacturer, GeoPoint::new(20.6, 78.9)?)?;
//! assert_eq!(engine.ledger_len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::{
    alerts::AlertLog,
    config::{Config, TelemetryConfig},
    ledger::Ledger,
    snapshot::{EngineSnapshot, SNAPSHOT_VERSION},
    tamper::{TamperDetector, Verdict},
    telemetry::classify_temperature,
    types::{
        Alert, AlertCounts, Batch, BatchId, BoxId, BoxStatus, GeoPoint, HistoryEntry, Role,
        Severity, ShipmentBox, TelemetryReading, Transaction, TxnId,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Time source. Defaults to the system clock; tests inject their own.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A suspicious movement detected on a box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperFinding {
    /// Box that moved
    pub box_id: BoxId,
    /// Its batch
    pub batch_id: BatchId,
    /// Straight-line distance covered (km)
    pub distance_km: f64,
    /// The critical alert raised for it
    pub alert: Alert,
}

/// Session-level summary for dashboards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    /// Registered batches
    pub total_batches: usize,
    /// FDA-approved batches
    pub approved_batches: usize,
    /// Batches awaiting approval
    pub pending_batches: usize,
    /// Approved batches whose latest reading is within temperature bounds
    pub batches_in_range: usize,
    /// Share of retained readings within temperature bounds (percent, 100
    /// when there are none)
    pub compliance_rate: f64,
    /// Registered boxes
    pub total_boxes: usize,
    /// Boxes currently in transit
    pub in_transit_boxes: usize,
    /// Boxes delivered
    pub delivered_boxes: usize,
    /// Boxes with the tamper flag set
    pub tampered_boxes: usize,
    /// Retained ledger entries
    pub ledger_entries: usize,
    /// Alert totals
    pub alerts: AlertCounts,
}

/// Custody session: batches, boxes, ledger, alerts and telemetry
pub struct CustodyEngine {
    pub(crate) batches: Vec<Batch>,
    pub(crate) batch_index: HashMap<BatchId, usize>,
    pub(crate) boxes: Vec<ShipmentBox>,
    pub(crate) box_index: HashMap<BoxId, usize>,
    pub(crate) ledger: Ledger,
    pub(crate) alerts: AlertLog,
    pub(crate) telemetry: HashMap<BatchId, VecDeque<TelemetryReading>>,
    pub(crate) detector: TamperDetector,
    pub(crate) thresholds: TelemetryConfig,
    clock: Clock,
}

impl fmt::Debug for CustodyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyEngine")
            .field("batches", &self.batches.len())
            .field("boxes", &self.boxes.len())
            .field("ledger", &self.ledger.len())
            .field("alerts", &self.alerts.counts())
            .finish_non_exhaustive()
    }
}

impl CustodyEngine {
    /// Create an empty session
    pub fn new(config: &Config) -> Self {
        Self {
            batches: Vec::new(),
            batch_index: HashMap::new(),
            boxes: Vec::new(),
            box_index: HashMap::new(),
            ledger: Ledger::new(config.ledger.capacity),
            alerts: AlertLog::new(config.alerts.retention),
            telemetry: HashMap::new(),
            detector: TamperDetector::new(&config.tamper),
            thresholds: config.telemetry.clone(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // Query API

    /// Batch by id
    pub fn batch(&self, batch_id: &BatchId) -> Option<&Batch> {
        self.batch_index.get(batch_id).map(|&i| &self.batches[i])
    }

    /// All batches, in registration order
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Box by id
    pub fn box_by_id(&self, box_id: &BoxId) -> Option<&ShipmentBox> {
        self.box_index.get(box_id).map(|&i| &self.boxes[i])
    }

    /// All boxes, in registration order
    pub fn boxes(&self) -> &[ShipmentBox] {
        &self.boxes
    }

    /// Boxes belonging to a batch
    pub fn boxes_for_batch(&self, batch_id: &BatchId) -> Vec<&ShipmentBox> {
        self.boxes.iter().filter(|b| b.belongs_to(batch_id)).collect()
    }

    /// Custody history of a box
    pub fn box_history(&self, box_id: &BoxId) -> Result<&[HistoryEntry]> {
        self.box_by_id(box_id)
            .map(|b| b.history.as_slice())
            .ok_or_else(|| Error::NotFound(format!("box {}", box_id)))
    }

    /// Ordered `{lat, lon}` points of a box's history, for route lookup.
    /// Empty if the box has no coordinate-bearing history.
    pub fn route_points(&self, box_id: &BoxId) -> Result<Vec<GeoPoint>> {
        self.box_by_id(box_id)
            .map(ShipmentBox::route_points)
            .ok_or_else(|| Error::NotFound(format!("box {}", box_id)))
    }

    /// Ledger entries for a batch, in insertion order
    pub fn ledger_for_batch(&self, batch_id: &BatchId) -> Vec<&Transaction> {
        self.ledger.query_by_batch(batch_id)
    }

    /// Ledger entries concerning a box, through its batch
    pub fn ledger_for_box(&self, box_id: &BoxId) -> Result<Vec<&Transaction>> {
        let shipment = self
            .box_by_id(box_id)
            .ok_or_else(|| Error::NotFound(format!("box {}", box_id)))?;
        Ok(match shipment.batch_id {
            Some(ref batch_id) => self.ledger.query_by_batch(batch_id),
            None => Vec::new(),
        })
    }

    /// All retained ledger entries, oldest first
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.ledger.iter()
    }

    /// Retained ledger size
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    /// The ledger itself
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Alert history, most recent first
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    /// Most recent `n` alerts
    pub fn recent_alerts(&self, n: usize) -> Vec<&Alert> {
        self.alerts.recent(n)
    }

    /// Alert totals
    pub fn alert_counts(&self) -> AlertCounts {
        self.alerts.counts()
    }

    /// The alert log itself
    pub fn alert_log(&self) -> &AlertLog {
        &self.alerts
    }

    /// Retained telemetry of a batch, oldest first
    pub fn telemetry_for_batch(&self, batch_id: &BatchId) -> Vec<&TelemetryReading> {
        self.telemetry
            .get(batch_id)
            .map(|readings| readings.iter().collect())
            .unwrap_or_default()
    }

    /// Session summary
    pub fn overview(&self) -> Overview {
        let in_range = |reading: &TelemetryReading| {
            classify_temperature(&self.thresholds, reading.temperature_c).is_none()
        };

        let approved_batches = self.batches.iter().filter(|b| b.approved).count();
        let batches_in_range = self
            .batches
            .iter()
            .filter(|b| b.approved)
            .filter_map(|b| self.telemetry.get(&b.id).and_then(|r| r.back()))
            .filter(|&reading| in_range(reading))
            .count();

        let (readings, compliant) = self
            .telemetry
            .values()
            .flatten()
            .fold((0usize, 0usize), |(total, ok), reading| {
                (total + 1, ok + usize::from(in_range(reading)))
            });
        let compliance_rate = if readings == 0 {
            100.0
        } else {
            compliant as f64 * 100.0 / readings as f64
        };

        Overview {
            total_batches: self.batches.len(),
            approved_batches,
            pending_batches: self.batches.len() - approved_batches,
            batches_in_range,
            compliance_rate,
            total_boxes: self.boxes.len(),
            in_transit_boxes: self
                .boxes
                .iter()
                .filter(|b| b.status == BoxStatus::InTransit)
                .count(),
            delivered_boxes: self
                .boxes
                .iter()
                .filter(|b| b.status == BoxStatus::Delivered)
                .count(),
            tampered_boxes: self.boxes.iter().filter(|b| b.tampered).count(),
            ledger_entries: self.ledger.len(),
            alerts: self.alerts.counts(),
        }
    }

    // Persistence boundary

    /// Export full state
    pub fn snapshot(&self) -> EngineSnapshot {
        let telemetry = self
            .batches
            .iter()
            .filter_map(|b| self.telemetry.get(&b.id))
            .flat_map(|readings| readings.iter().cloned())
            .collect();

        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            batches: self.batches.clone(),
            boxes: self.boxes.clone(),
            ledger: self.ledger.to_vec(),
            alerts: self.alerts.to_vec(),
            telemetry,
        }
    }

    /// Rebuild a session from a snapshot
    pub fn restore(config: &Config, snapshot: EngineSnapshot) -> Result<Self> {
        let mut engine = Self::new(config);

        for batch in snapshot.batches {
            if engine.batch_index.contains_key(&batch.id) {
                return Err(Error::Validation(format!(
                    "duplicate batch {} in snapshot",
                    batch.id
                )));
            }
            engine.batch_index.insert(batch.id.clone(), engine.batches.len());
            engine.batches.push(batch);
        }

        for shipment in snapshot.boxes {
            if engine.box_index.contains_key(&shipment.id) {
                return Err(Error::Validation(format!(
                    "duplicate box {} in snapshot",
                    shipment.id
                )));
            }
            if let Some(ref batch_id) = shipment.batch_id {
                if !engine.batch_index.contains_key(batch_id) {
                    return Err(Error::Validation(format!(
                        "box {} references unknown batch {}",
                        shipment.id, batch_id
                    )));
                }
            }
            engine.box_index.insert(shipment.id.clone(), engine.boxes.len());
            engine.boxes.push(shipment);
        }

        engine.ledger = Ledger::from_entries(config.ledger.capacity, snapshot.ledger)?;
        engine.alerts = AlertLog::from_alerts(config.alerts.retention, snapshot.alerts);

        for reading in snapshot.telemetry {
            engine.push_reading(reading);
        }

        tracing::info!(
            batches = engine.batches.len(),
            boxes = engine.boxes.len(),
            transactions = engine.ledger.len(),
            alerts = engine.alerts.len(),
            "Session restored from snapshot"
        );

        Ok(engine)
    }

    // Internal helpers shared by the state machine and telemetry ingestion

    pub(crate) fn batch_position(&self, batch_id: &BatchId) -> Result<usize> {
        self.batch_index
            .get(batch_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))
    }

    pub(crate) fn box_position(&self, box_id: &BoxId) -> Result<usize> {
        self.box_index
            .get(box_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("box {}", box_id)))
    }

    pub(crate) fn box_positions_for_batch(&self, batch_id: &BatchId) -> Vec<usize> {
        self.boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.belongs_to(batch_id))
            .map(|(i, _)| i)
            .collect()
    }

    /// Append a ledger entry and cross-reference it from every box of the batch
    pub(crate) fn write_transaction(
        &mut self,
        batch_id: &BatchId,
        from: Role,
        to: Role,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Transaction {
        let tx = self.ledger.record(batch_id, from, to, location, timestamp);
        let ref_capacity = self.ledger.capacity();

        for shipment in self.boxes.iter_mut().filter(|b| b.belongs_to(batch_id)) {
            shipment.ledger_refs.push_back(tx.txn_id.clone());
            while shipment.ledger_refs.len() > ref_capacity {
                shipment.ledger_refs.pop_front();
            }
        }

        tx
    }

    /// Move a box to `point`: tamper check against its last history entry,
    /// then coordinates and one history entry. The box must belong to a batch.
    pub(crate) fn relocate_box(
        &mut self,
        position: usize,
        point: GeoPoint,
        status: BoxStatus,
        role: Role,
        timestamp: DateTime<Utc>,
    ) -> Option<TamperFinding> {
        let verdict = match self.boxes[position].last_entry() {
            Some(last) => {
                self.detector
                    .evaluate_from_label(&last.location, last.timestamp, &point, timestamp)
            }
            None => Verdict::Normal,
        };

        let shipment = &mut self.boxes[position];
        shipment.status = status;
        shipment.coordinates = Some(point);
        shipment.updated_at = timestamp;
        shipment.history.push(HistoryEntry {
            status,
            role,
            timestamp,
            location: point.to_string(),
        });

        let distance_km = match verdict {
            Verdict::Suspicious { distance_km } => distance_km,
            Verdict::Normal => return None,
        };

        shipment.tampered = true;
        let box_id = shipment.id.clone();
        let batch_id = shipment.batch_id.clone()?;

        tracing::warn!(
            box_id = %box_id,
            batch_id = %batch_id,
            distance_km,
            "Tamper suspected"
        );

        let alert = self.alerts.raise_at(
            Severity::Critical,
            &batch_id,
            format!(
                "Tamper detected for box {}: sudden large location jump ({} km)",
                box_id,
                distance_km.round() as i64
            ),
            timestamp,
        );

        Some(TamperFinding {
            box_id,
            batch_id,
            distance_km,
            alert,
        })
    }

    pub(crate) fn push_reading(&mut self, reading: TelemetryReading) {
        let retention = self.thresholds.retention_per_batch.max(1);
        let readings = self.telemetry.entry(reading.batch_id.clone()).or_default();
        readings.push_back(reading);
        while readings.len() > retention {
            readings.pop_front();
        }
    }
}

//! Telemetry ingestion
//!
//! A reading is attached to a batch. Out-of-range temperature or pressure
//! raises alerts; a GPS fix moves every undelivered box of the batch and
//! writes one ledger transaction per moved box.

use crate::{
    config::TelemetryConfig,
    engine::{CustodyEngine, TamperFinding},
    types::{Alert, BatchId, BoxStatus, GeoPoint, Role, Severity, TelemetryReading, TxnId},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Outcome of an accepted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingReceipt {
    /// The stored reading
    pub reading: TelemetryReading,
    /// Alerts raised by this reading, in raise order
    pub alerts: Vec<Alert>,
    /// Ledger entries written (one per moved box)
    pub transactions: Vec<TxnId>,
    /// Boxes whose move looked implausible
    pub tamper: Vec<TamperFinding>,
}

/// Severity of a temperature sample, `None` when within bounds
pub fn classify_temperature(thresholds: &TelemetryConfig, temperature_c: f64) -> Option<Severity> {
    let min = thresholds.min_temperature_c;
    let max = thresholds.max_temperature_c;
    let margin = thresholds.critical_margin_c;

    if temperature_c >= min && temperature_c <= max {
        None
    } else if temperature_c < min - margin || temperature_c > max + margin {
        Some(Severity::Critical)
    } else {
        Some(Severity::Warning)
    }
}

/// Check if a pressure sample is outside bounds
pub fn pressure_abnormal(thresholds: &TelemetryConfig, pressure_atm: f64) -> bool {
    pressure_atm < thresholds.min_pressure_atm || pressure_atm > thresholds.max_pressure_atm
}

impl CustodyEngine {
    /// Ingest a reading using the configured default custody leg for GPS
    /// movements (Manufacturer → Distributor unless configured otherwise).
    pub fn record_reading(
        &mut self,
        batch_id: &BatchId,
        temperature_c: f64,
        pressure_atm: f64,
        gps: Option<GeoPoint>,
    ) -> Result<ReadingReceipt> {
        let from = self.thresholds.default_from;
        let to = self.thresholds.default_to;
        self.record_reading_as(batch_id, temperature_c, pressure_atm, gps, from, to)
    }

    /// Ingest a reading, recording GPS movements as a `from` → `to` leg
    pub fn record_reading_as(
        &mut self,
        batch_id: &BatchId,
        temperature_c: f64,
        pressure_atm: f64,
        gps: Option<GeoPoint>,
        from: Role,
        to: Role,
    ) -> Result<ReadingReceipt> {
        if !temperature_c.is_finite() || !pressure_atm.is_finite() {
            return Err(Error::Validation(format!(
                "non-finite reading: temperature={} pressure={}",
                temperature_c, pressure_atm
            )));
        }
        if let Some(ref point) = gps {
            point.validate()?;
        }

        let batch_position = self.batch_position(batch_id)?;
        if !self.batches[batch_position].approved {
            return Err(Error::NotApproved(batch_id.to_string()));
        }

        let now = self.now();
        let reading = TelemetryReading {
            batch_id: batch_id.clone(),
            temperature_c,
            pressure_atm,
            gps,
            recorded_at: now,
        };

        tracing::debug!(
            batch_id = %batch_id,
            temperature_c,
            pressure_atm,
            gps = ?gps.map(|p| p.to_string()),
            "Reading received"
        );

        self.push_reading(reading.clone());

        let mut alerts = Vec::new();
        if let Some(severity) = classify_temperature(&self.thresholds, temperature_c) {
            alerts.push(self.alerts.raise_at(
                severity,
                batch_id,
                format!("Temperature out of range: {}°C", temperature_c),
                now,
            ));
        }
        if pressure_abnormal(&self.thresholds, pressure_atm) {
            alerts.push(self.alerts.raise_at(
                Severity::Warning,
                batch_id,
                format!("Abnormal pressure: {} atm", pressure_atm),
                now,
            ));
        }

        let mut transactions = Vec::new();
        let mut tamper = Vec::new();
        if let Some(point) = gps {
            for position in self.box_positions_for_batch(batch_id) {
                let status = self.boxes[position].status;
                if status == BoxStatus::Delivered {
                    continue;
                }
                if let Some(finding) = self.relocate_box(position, point, status, to, now) {
                    tamper.push(finding);
                }
                let tx = self.write_transaction(batch_id, from, to, Some(point), now);
                transactions.push(tx.txn_id);
            }
        }

        Ok(ReadingReceipt {
            reading,
            alerts,
            transactions,
            tamper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{NewBatch, NewBox};

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn approved_engine(box_ids: &[&str]) -> CustodyEngine {
        let mut engine = CustodyEngine::new(&Config::default());
        engine
            .create_batch(
                NewBatch {
                    id: "B1".into(),
                    drug_name: "Insulin".into(),
                    ..Default::default()
                },
                Role::Manufacturer,
            )
            .unwrap();
        for id in box_ids {
            engine
                .register_box(NewBox {
                    id: (*id).into(),
                    batch_id: Some("B1".into()),
                    contents: "Insulin vials".into(),
                    coordinates: Some(point(20.0, 78.0)),
                })
                .unwrap();
        }
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        engine
    }

    #[test]
    fn test_classify_temperature() {
        let t = TelemetryConfig::default();
        assert_eq!(classify_temperature(&t, 2.0), None);
        assert_eq!(classify_temperature(&t, 8.0), None);
        assert_eq!(classify_temperature(&t, 8.5), Some(Severity::Warning));
        assert_eq!(classify_temperature(&t, 13.0), Some(Severity::Warning));
        assert_eq!(classify_temperature(&t, 13.5), Some(Severity::Critical));
        assert_eq!(classify_temperature(&t, -3.5), Some(Severity::Critical));
        assert_eq!(classify_temperature(&t, 1.0), Some(Severity::Warning));
    }

    #[test]
    fn test_in_range_reading_raises_nothing() {
        let mut engine = approved_engine(&["BX1"]);
        let receipt = engine.record_reading(&"B1".into(), 5.0, 1.0, None).unwrap();

        assert!(receipt.alerts.is_empty());
        assert!(receipt.transactions.is_empty());
        assert_eq!(engine.telemetry_for_batch(&"B1".into()).len(), 1);
        assert_eq!(engine.ledger_len(), 0);
    }

    #[test]
    fn test_out_of_range_messages_carry_values() {
        let mut engine = approved_engine(&["BX1"]);
        let receipt = engine.record_reading(&"B1".into(), 11.0, 1.3, None).unwrap();

        assert_eq!(receipt.alerts.len(), 2);
        assert_eq!(receipt.alerts[0].severity, Severity::Warning);
        assert_eq!(receipt.alerts[0].message, "Temperature out of range: 11°C");
        assert_eq!(receipt.alerts[1].message, "Abnormal pressure: 1.3 atm");
        assert_eq!(engine.alert_counts().total, 2);
    }

    #[test]
    fn test_gps_moves_undelivered_boxes_only() {
        let mut engine = approved_engine(&["BX1", "BX2", "BX3"]);
        engine
            .transfer_box(&"BX3".into(), Role::Patient, Role::Distributor, point(20.01, 78.01))
            .unwrap();
        assert_eq!(engine.ledger_len(), 1);

        let receipt = engine
            .record_reading(&"B1".into(), 5.0, 1.0, Some(point(20.05, 78.05)))
            .unwrap();
        assert_eq!(receipt.transactions.len(), 2);
        assert_eq!(engine.ledger_len(), 3);

        for id in ["BX1", "BX2"] {
            let shipment = engine.box_by_id(&id.into()).unwrap();
            assert_eq!(shipment.status, BoxStatus::Created);
            assert_eq!(shipment.coordinates, Some(point(20.05, 78.05)));
            let last = shipment.last_entry().unwrap();
            assert_eq!(last.role, Role::Distributor);
            assert_eq!(last.status, BoxStatus::Created);
        }
        let delivered = engine.box_by_id(&"BX3".into()).unwrap();
        assert_eq!(delivered.coordinates, Some(point(20.01, 78.01)));

        let tx = engine.ledger().latest().unwrap();
        assert_eq!(tx.from, Role::Manufacturer);
        assert_eq!(tx.to, Role::Distributor);
    }

    #[test]
    fn test_record_reading_as_uses_leg() {
        let mut engine = approved_engine(&["BX1"]);
        engine
            .record_reading_as(
                &"B1".into(),
                5.0,
                1.0,
                Some(point(20.02, 78.02)),
                Role::Distributor,
                Role::Patient,
            )
            .unwrap();

        let tx = engine.ledger().latest().unwrap();
        assert_eq!(tx.from, Role::Distributor);
        assert_eq!(tx.to, Role::Patient);
        let shipment = engine.box_by_id(&"BX1".into()).unwrap();
        assert_eq!(shipment.last_entry().unwrap().role, Role::Patient);
        assert_eq!(shipment.status, BoxStatus::Created);
    }

    #[test]
    fn test_gps_jump_is_flagged() {
        let mut engine = approved_engine(&["BX1"]);
        let receipt = engine
            .record_reading(&"B1".into(), 5.0, 1.0, Some(point(45.0, -100.0)))
            .unwrap();

        assert_eq!(receipt.tamper.len(), 1);
        assert!(engine.box_by_id(&"BX1".into()).unwrap().tampered);
        assert_eq!(engine.alert_counts().critical, 1);
        // the move is still recorded
        assert_eq!(receipt.transactions.len(), 1);
    }

    #[test]
    fn test_rejected_readings_leave_engine_untouched() {
        let mut engine = approved_engine(&["BX1"]);
        let before = engine.snapshot();

        assert!(matches!(
            engine.record_reading(&"B1".into(), f64::NAN, 1.0, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.record_reading(&"B1".into(), 5.0, f64::INFINITY, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.record_reading(&"B1".into(), 5.0, 1.0, Some(GeoPoint { lat: 91.0, lon: 0.0 })),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.record_reading(&"nope".into(), 5.0, 1.0, None),
            Err(Error::NotFound(_))
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_unapproved_batch_rejected() {
        let mut engine = CustodyEngine::new(&Config::default());
        engine
            .create_batch(
                NewBatch {
                    id: "B2".into(),
                    drug_name: "Ibuprofen".into(),
                    ..Default::default()
                },
                Role::Manufacturer,
            )
            .unwrap();
        assert!(matches!(
            engine.record_reading(&"B2".into(), 5.0, 1.0, None),
            Err(Error::NotApproved(_))
        ));
        assert!(engine.telemetry_for_batch(&"B2".into()).is_empty());
    }

    #[test]
    fn test_telemetry_retention() {
        let mut config = Config::default();
        config.telemetry.retention_per_batch = 3;
        let mut engine = CustodyEngine::new(&config);
        engine
            .create_batch(
                NewBatch {
                    id: "B1".into(),
                    drug_name: "Insulin".into(),
                    ..Default::default()
                },
                Role::Manufacturer,
            )
            .unwrap();
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();

        for i in 0..5 {
            engine
                .record_reading(&"B1".into(), 3.0 + i as f64, 1.0, None)
                .unwrap();
        }
        let readings = engine.telemetry_for_batch(&"B1".into());
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].temperature_c, 5.0);
    }
}

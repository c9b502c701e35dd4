//! Custody state machine
//!
//! Box lifecycle:
//!
//! ```text
//! Pending ──approve_batch──▶ Created ──Manufacturer→Distributor──▶ InTransit
//!                               │                                     │
//!                               └──────Distributor→Patient──────┬─────┘
//!                                                               ▼
//!                                                           Delivered
//! ```
//!
//! Batch approval is monotonic (false → true once, FDA only) and does not
//! write to the ledger. Every box or batch transfer writes exactly one ledger
//! transaction.

use crate::{
    engine::{CustodyEngine, TamperFinding},
    types::{
        Batch, BatchId, BatchStage, BoxId, BoxStatus, GeoPoint, HistoryEntry, NewBatch, NewBox,
        Role, ShipmentBox, Transaction,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Location label given to batches returned by a distributor
pub const MANUFACTURER_FACILITY: &str = "Manufacturer Facility";

/// Outcome of an approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    /// Approved batch
    pub batch_id: BatchId,
    /// Boxes moved from Pending to Created
    pub activated: Vec<BoxId>,
}

/// Outcome of a box transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Transferred box
    pub box_id: BoxId,
    /// Status after the transfer
    pub status: BoxStatus,
    /// Ledger entry written
    pub transaction: Transaction,
    /// Tamper finding, if the move was implausible
    pub tamper: Option<TamperFinding>,
}

/// Box transition table. Returns the new status, or `None` if the
/// combination is not allowed.
pub fn box_transition(current: BoxStatus, acting: Role, target: Role) -> Option<BoxStatus> {
    match (current, acting, target) {
        (BoxStatus::Created, Role::Manufacturer, Role::Distributor) => Some(BoxStatus::InTransit),
        (BoxStatus::Created | BoxStatus::InTransit, Role::Distributor, Role::Patient) => {
            Some(BoxStatus::Delivered)
        }
        _ => None,
    }
}

impl CustodyEngine {
    /// Register a new, unapproved batch. Manufacturer only.
    pub fn create_batch(&mut self, input: NewBatch, acting_role: Role) -> Result<&Batch> {
        if acting_role != Role::Manufacturer {
            return Err(Error::Unauthorized(format!(
                "{} cannot create batches",
                acting_role
            )));
        }

        let id = input.id.trim();
        let drug_name = input.drug_name.trim();
        if id.is_empty() || drug_name.is_empty() {
            return Err(Error::Validation(
                "batch id and drug name are required".to_string(),
            ));
        }
        if let Some(ref origin) = input.origin {
            origin.validate()?;
        }

        let batch_id = BatchId::new(id);
        if self.batch_index.contains_key(&batch_id) {
            return Err(Error::AlreadyExists(format!("batch {}", batch_id)));
        }

        let location = input
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let batch = Batch {
            id: batch_id.clone(),
            drug_name: drug_name.to_string(),
            stage: BatchStage::Created,
            location,
            approved: false,
            manufacture_date: input.manufacture_date,
            quantity: input.quantity,
            origin: input.origin,
            created_at: self.now(),
            approved_at: None,
        };

        tracing::info!(batch_id = %batch_id, drug = %batch.drug_name, "Batch created");

        let position = self.batches.len();
        self.batches.push(batch);
        self.batch_index.insert(batch_id, position);
        Ok(&self.batches[position])
    }

    /// Register a box, optionally associated with an existing batch. If that
    /// batch is already approved the box is activated immediately.
    pub fn register_box(&mut self, input: NewBox) -> Result<&ShipmentBox> {
        let id = input.id.trim();
        if id.is_empty() {
            return Err(Error::Validation("box id is required".to_string()));
        }
        let box_id = BoxId::new(id);
        if self.box_index.contains_key(&box_id) {
            return Err(Error::AlreadyExists(format!("box {}", box_id)));
        }
        if let Some(ref point) = input.coordinates {
            point.validate()?;
        }

        let batch_id = input
            .batch_id
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .map(BatchId::new);
        let batch_position = match batch_id {
            Some(ref batch_id) => Some(self.batch_position(batch_id)?),
            None => None,
        };

        let shipment = ShipmentBox {
            id: box_id.clone(),
            batch_id,
            contents: input.contents.trim().to_string(),
            status: BoxStatus::Pending,
            coordinates: input.coordinates,
            history: Vec::new(),
            tampered: false,
            ledger_refs: VecDeque::new(),
            updated_at: self.now(),
        };

        tracing::info!(box_id = %box_id, "Box registered");

        let position = self.boxes.len();
        self.boxes.push(shipment);
        self.box_index.insert(box_id, position);

        if let Some(batch_position) = batch_position {
            if self.batches[batch_position].approved {
                let now = self.now();
                self.activate_box(position, batch_position, now);
            }
        }

        Ok(&self.boxes[position])
    }

    /// Attach an unassociated Pending box to a batch
    pub fn associate_box(&mut self, box_id: &BoxId, batch_id: &BatchId) -> Result<&ShipmentBox> {
        let position = self.box_position(box_id)?;
        let batch_position = self.batch_position(batch_id)?;

        let shipment = &self.boxes[position];
        if let Some(ref current) = shipment.batch_id {
            return Err(Error::InvalidTransition(format!(
                "box {} already belongs to batch {}",
                box_id, current
            )));
        }
        if shipment.status != BoxStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "box {} is {}, only pending boxes can be associated",
                box_id, shipment.status
            )));
        }

        self.boxes[position].batch_id = Some(batch_id.clone());
        tracing::info!(box_id = %box_id, batch_id = %batch_id, "Box associated");

        if self.batches[batch_position].approved {
            let now = self.now();
            self.activate_box(position, batch_position, now);
        }

        Ok(&self.boxes[position])
    }

    /// Approve a batch (FDA only) and activate its Pending boxes.
    ///
    /// Approval is a regulatory event, not a custody transfer: no ledger
    /// entry is written.
    pub fn approve_batch(&mut self, batch_id: &BatchId, acting_role: Role) -> Result<ApprovalReceipt> {
        if acting_role != Role::Fda {
            return Err(Error::Unauthorized(format!(
                "{} cannot approve batches",
                acting_role
            )));
        }

        let batch_position = self.batch_position(batch_id)?;
        if self.batches[batch_position].approved {
            return Err(Error::AlreadyApproved(batch_id.to_string()));
        }

        let now = self.now();
        let batch = &mut self.batches[batch_position];
        batch.approved = true;
        batch.approved_at = Some(now);

        let mut activated = Vec::new();
        for position in self.box_positions_for_batch(batch_id) {
            if self.boxes[position].status == BoxStatus::Pending {
                self.activate_box(position, batch_position, now);
                activated.push(self.boxes[position].id.clone());
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            activated = activated.len(),
            "Batch approved"
        );

        Ok(ApprovalReceipt {
            batch_id: batch_id.clone(),
            activated,
        })
    }

    /// Hand a box from `acting_role` to `target_role` at `new_location`.
    ///
    /// Checks, in order: box exists (`NotFound`), its batch is approved
    /// (`NotApproved`), the transition table allows it (`InvalidTransition`).
    pub fn transfer_box(
        &mut self,
        box_id: &BoxId,
        target_role: Role,
        acting_role: Role,
        new_location: GeoPoint,
    ) -> Result<TransferReceipt> {
        let position = self.box_position(box_id)?;
        let shipment = &self.boxes[position];

        let batch_id = match shipment.batch_id {
            Some(ref batch_id)
                if self.batch(batch_id).map(|b| b.approved).unwrap_or(false) =>
            {
                batch_id.clone()
            }
            Some(ref batch_id) => {
                return Err(Error::NotApproved(format!(
                    "batch {} of box {}",
                    batch_id, box_id
                )))
            }
            None => {
                return Err(Error::NotApproved(format!(
                    "box {} has no batch",
                    box_id
                )))
            }
        };

        let current = shipment.status;
        let next = box_transition(current, acting_role, target_role).ok_or_else(|| {
            Error::InvalidTransition(format!(
                "box {} is {}: {} cannot hand it to {}",
                box_id, current, acting_role, target_role
            ))
        })?;
        new_location.validate()?;

        // Commit: nothing below can fail
        let now = self.now();
        let tamper = self.relocate_box(position, new_location, next, target_role, now);
        let transaction =
            self.write_transaction(&batch_id, acting_role, target_role, Some(new_location), now);

        tracing::info!(
            box_id = %box_id,
            batch_id = %batch_id,
            from = %acting_role,
            to = %target_role,
            status = %next,
            txn_id = %transaction.txn_id,
            "Box transferred"
        );

        Ok(TransferReceipt {
            box_id: box_id.clone(),
            status: next,
            transaction,
            tamper,
        })
    }

    /// Transfer a whole batch. The only legal path is Distributor →
    /// Manufacturer on an approved batch. Repeat returns each write an entry.
    pub fn transfer_batch(
        &mut self,
        batch_id: &BatchId,
        acting_role: Role,
        target_role: Role,
    ) -> Result<Transaction> {
        let batch_position = self.batch_position(batch_id)?;
        let batch = &self.batches[batch_position];

        if acting_role != Role::Distributor {
            return Err(Error::Unauthorized(format!(
                "{} cannot transfer batches",
                acting_role
            )));
        }
        if !batch.approved {
            return Err(Error::NotApproved(batch_id.to_string()));
        }
        if target_role != Role::Manufacturer {
            return Err(Error::InvalidTransition(format!(
                "batches can only be returned to Manufacturer, not {}",
                target_role
            )));
        }
        let now = self.now();
        let batch = &mut self.batches[batch_position];
        batch.stage = BatchStage::ReturnedToManufacturer;
        batch.location = MANUFACTURER_FACILITY.to_string();

        let transaction = self.write_transaction(batch_id, acting_role, target_role, None, now);

        tracing::info!(
            batch_id = %batch_id,
            txn_id = %transaction.txn_id,
            "Batch returned to Manufacturer"
        );

        Ok(transaction)
    }

    /// Pending → Created with an initial location: the box's own
    /// coordinates, else the batch origin, else the batch location label.
    fn activate_box(&mut self, position: usize, batch_position: usize, now: DateTime<Utc>) {
        let batch = &self.batches[batch_position];
        let origin = batch.origin;
        let label = batch.location.clone();

        let shipment = &mut self.boxes[position];
        let coordinates = shipment.coordinates.or(origin);
        let location = coordinates.map(|p| p.to_string()).unwrap_or(label);

        shipment.status = BoxStatus::Created;
        shipment.coordinates = coordinates;
        shipment.updated_at = now;
        shipment.history.push(HistoryEntry {
            status: BoxStatus::Created,
            role: Role::Manufacturer,
            timestamp: now,
            location,
        });

        tracing::debug!(box_id = %shipment.id, "Box activated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn new_batch(id: &str) -> NewBatch {
        NewBatch {
            id: id.into(),
            drug_name: "Paracetamol".into(),
            location: Some("Plant A".into()),
            ..Default::default()
        }
    }

    fn new_box(id: &str, batch: Option<&str>, at: Option<GeoPoint>) -> NewBox {
        NewBox {
            id: id.into(),
            batch_id: batch.map(Into::into),
            contents: "Paracetamol 500mg".into(),
            coordinates: at,
        }
    }

    fn engine_with_pending_boxes() -> CustodyEngine {
        let mut engine = CustodyEngine::new(&Config::default());
        engine.create_batch(new_batch("B1"), Role::Manufacturer).unwrap();
        engine
            .register_box(new_box("BX1", Some("B1"), Some(point(20.0, 78.0))))
            .unwrap();
        engine
            .register_box(new_box("BX2", Some("B1"), Some(point(20.1, 78.1))))
            .unwrap();
        engine
    }

    #[test]
    fn test_transition_table() {
        use BoxStatus::*;
        use Role::*;

        assert_eq!(box_transition(Created, Manufacturer, Distributor), Some(InTransit));
        assert_eq!(box_transition(Created, Distributor, Patient), Some(Delivered));
        assert_eq!(box_transition(InTransit, Distributor, Patient), Some(Delivered));

        assert_eq!(box_transition(Pending, Manufacturer, Distributor), None);
        assert_eq!(box_transition(InTransit, Manufacturer, Distributor), None);
        assert_eq!(box_transition(Delivered, Distributor, Patient), None);
        assert_eq!(box_transition(Created, Fda, Distributor), None);
        assert_eq!(box_transition(Created, Manufacturer, Patient), None);
    }

    #[test]
    fn test_create_batch_manufacturer_only() {
        let mut engine = CustodyEngine::new(&Config::default());
        assert!(matches!(
            engine.create_batch(new_batch("B1"), Role::Distributor),
            Err(Error::Unauthorized(_))
        ));

        let batch = engine.create_batch(new_batch("B1"), Role::Manufacturer).unwrap();
        assert!(!batch.approved);
        assert_eq!(batch.stage, BatchStage::Created);

        assert!(matches!(
            engine.create_batch(new_batch("B1"), Role::Manufacturer),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            engine.create_batch(new_batch("  "), Role::Manufacturer),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_register_box_unknown_batch() {
        let mut engine = CustodyEngine::new(&Config::default());
        assert!(matches!(
            engine.register_box(new_box("BX1", Some("missing"), None)),
            Err(Error::NotFound(_))
        ));
        assert!(engine.boxes().is_empty());
    }

    #[test]
    fn test_approve_activates_pending_boxes_without_ledger() {
        let mut engine = engine_with_pending_boxes();

        let receipt = engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        assert_eq!(receipt.activated.len(), 2);

        for id in ["BX1", "BX2"] {
            let shipment = engine.box_by_id(&id.into()).unwrap();
            assert_eq!(shipment.status, BoxStatus::Created);
            assert_eq!(shipment.history.len(), 1);
            assert_eq!(shipment.history[0].role, Role::Manufacturer);
        }
        assert_eq!(engine.ledger_len(), 0);
        assert!(engine.batch(&"B1".into()).unwrap().approved_at.is_some());
    }

    #[test]
    fn test_approve_errors() {
        let mut engine = engine_with_pending_boxes();

        assert!(matches!(
            engine.approve_batch(&"B1".into(), Role::Manufacturer),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            engine.approve_batch(&"nope".into(), Role::Fda),
            Err(Error::NotFound(_))
        ));

        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        assert!(matches!(
            engine.approve_batch(&"B1".into(), Role::Fda),
            Err(Error::AlreadyApproved(_))
        ));
        assert!(engine.batch(&"B1".into()).unwrap().approved);
    }

    #[test]
    fn test_activation_location_fallbacks() {
        let mut engine = CustodyEngine::new(&Config::default());
        let mut with_origin = new_batch("B1");
        with_origin.origin = Some(point(12.0, 77.0));
        engine.create_batch(with_origin, Role::Manufacturer).unwrap();
        engine.create_batch(new_batch("B2"), Role::Manufacturer).unwrap();
        engine.register_box(new_box("BX1", Some("B1"), None)).unwrap();
        engine.register_box(new_box("BX2", Some("B2"), None)).unwrap();

        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        engine.approve_batch(&"B2".into(), Role::Fda).unwrap();

        let bx1 = engine.box_by_id(&"BX1".into()).unwrap();
        assert_eq!(bx1.coordinates, Some(point(12.0, 77.0)));
        assert_eq!(bx1.history[0].location, "12.00000,77.00000");

        let bx2 = engine.box_by_id(&"BX2".into()).unwrap();
        assert_eq!(bx2.coordinates, None);
        assert_eq!(bx2.history[0].location, "Plant A");
    }

    #[test]
    fn test_register_into_approved_batch_activates() {
        let mut engine = engine_with_pending_boxes();
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();

        let late = engine
            .register_box(new_box("BX3", Some("B1"), Some(point(20.0, 78.0))))
            .unwrap();
        assert_eq!(late.status, BoxStatus::Created);
        assert_eq!(late.history.len(), 1);
    }

    #[test]
    fn test_associate_box() {
        let mut engine = engine_with_pending_boxes();
        engine.register_box(new_box("LOOSE", None, None)).unwrap();

        assert!(matches!(
            engine.associate_box(&"BX1".into(), &"B1".into()),
            Err(Error::InvalidTransition(_))
        ));

        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        let shipment = engine.associate_box(&"LOOSE".into(), &"B1".into()).unwrap();
        assert_eq!(shipment.status, BoxStatus::Created);
        assert_eq!(shipment.history[0].location, "Plant A");
    }

    #[test]
    fn test_transfer_box_happy_path() {
        let mut engine = engine_with_pending_boxes();
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();

        let receipt = engine
            .transfer_box(&"BX1".into(), Role::Distributor, Role::Manufacturer, point(20.05, 78.05))
            .unwrap();
        assert_eq!(receipt.status, BoxStatus::InTransit);
        assert_eq!(receipt.transaction.from, Role::Manufacturer);
        assert_eq!(receipt.transaction.to, Role::Distributor);
        assert_eq!(receipt.transaction.location, "20.05000,78.05000");
        assert!(receipt.tamper.is_none());
        assert_eq!(engine.ledger_len(), 1);

        let receipt = engine
            .transfer_box(&"BX1".into(), Role::Patient, Role::Distributor, point(20.1, 78.1))
            .unwrap();
        assert_eq!(receipt.status, BoxStatus::Delivered);
        assert_eq!(engine.ledger_len(), 2);

        let shipment = engine.box_by_id(&"BX1".into()).unwrap();
        assert_eq!(shipment.history.len(), 3);
        assert_eq!(shipment.history[2].role, Role::Patient);
        assert_eq!(shipment.coordinates, Some(point(20.1, 78.1)));

        // sibling box sees both batch transactions
        let sibling = engine.box_by_id(&"BX2".into()).unwrap();
        assert_eq!(sibling.ledger_refs.len(), 2);
        assert_eq!(sibling.history.len(), 1);
    }

    #[test]
    fn test_created_box_can_go_straight_to_patient() {
        let mut engine = engine_with_pending_boxes();
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();

        let receipt = engine
            .transfer_box(&"BX2".into(), Role::Patient, Role::Distributor, point(20.1, 78.1))
            .unwrap();
        assert_eq!(receipt.status, BoxStatus::Delivered);
    }

    #[test]
    fn test_transfer_box_error_order() {
        let mut engine = engine_with_pending_boxes();

        assert!(matches!(
            engine.transfer_box(&"nope".into(), Role::Distributor, Role::Manufacturer, point(0.0, 0.0)),
            Err(Error::NotFound(_))
        ));
        // not approved wins over an illegal role combination
        assert!(matches!(
            engine.transfer_box(&"BX1".into(), Role::Patient, Role::Fda, point(0.0, 0.0)),
            Err(Error::NotApproved(_))
        ));

        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        assert!(matches!(
            engine.transfer_box(&"BX1".into(), Role::Patient, Role::Fda, point(0.0, 0.0)),
            Err(Error::InvalidTransition(_))
        ));

        engine
            .transfer_box(&"BX1".into(), Role::Patient, Role::Distributor, point(20.0, 78.0))
            .unwrap();
        let before = engine.snapshot();
        assert!(matches!(
            engine.transfer_box(&"BX1".into(), Role::Distributor, Role::Manufacturer, point(20.0, 78.0)),
            Err(Error::InvalidTransition(_))
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_unassociated_box_cannot_transfer() {
        let mut engine = CustodyEngine::new(&Config::default());
        engine.register_box(new_box("LOOSE", None, None)).unwrap();
        assert!(matches!(
            engine.transfer_box(&"LOOSE".into(), Role::Distributor, Role::Manufacturer, point(0.0, 0.0)),
            Err(Error::NotApproved(_))
        ));
    }

    #[test]
    fn test_transfer_box_flags_tamper() {
        let mut engine = engine_with_pending_boxes();
        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();

        // 20,78 -> 30,78 is ~1112 km in no time at all
        let receipt = engine
            .transfer_box(&"BX1".into(), Role::Distributor, Role::Manufacturer, point(30.0, 78.0))
            .unwrap();
        let finding = receipt.tamper.expect("tamper finding");
        assert_eq!(finding.box_id, BoxId::new("BX1"));
        assert!(finding.alert.message.contains("BX1"));
        assert!(finding.alert.message.contains("1112 km"));

        assert!(engine.box_by_id(&"BX1".into()).unwrap().tampered);
        assert_eq!(engine.alert_counts().critical, 1);
        // still a successful transfer
        assert_eq!(engine.ledger_len(), 1);
    }

    #[test]
    fn test_transfer_batch() {
        let mut engine = engine_with_pending_boxes();

        assert!(matches!(
            engine.transfer_batch(&"nope".into(), Role::Distributor, Role::Manufacturer),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.transfer_batch(&"B1".into(), Role::Manufacturer, Role::Distributor),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            engine.transfer_batch(&"B1".into(), Role::Distributor, Role::Manufacturer),
            Err(Error::NotApproved(_))
        ));

        engine.approve_batch(&"B1".into(), Role::Fda).unwrap();
        assert!(matches!(
            engine.transfer_batch(&"B1".into(), Role::Distributor, Role::Patient),
            Err(Error::InvalidTransition(_))
        ));

        let tx = engine
            .transfer_batch(&"B1".into(), Role::Distributor, Role::Manufacturer)
            .unwrap();
        assert_eq!(tx.location, "unknown");
        assert_eq!(engine.ledger_len(), 1);

        let batch = engine.batch(&"B1".into()).unwrap();
        assert_eq!(batch.stage, BatchStage::ReturnedToManufacturer);
        assert_eq!(batch.location, MANUFACTURER_FACILITY);

        // a second return is legal and logged again
        let again = engine
            .transfer_batch(&"B1".into(), Role::Distributor, Role::Manufacturer)
            .unwrap();
        assert!(again.sequence > tx.sequence);
        assert_eq!(engine.ledger_len(), 2);
        assert_eq!(
            engine.batch(&"B1".into()).unwrap().stage,
            BatchStage::ReturnedToManufacturer
        );
    }
}

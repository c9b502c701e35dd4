//! Actor-based concurrency for the custody engine
//!
//! One task owns the [`CustodyEngine`]; everything else talks to it through a
//! cloneable [`CustodyHandle`]. Mutations are applied in mailbox order, so
//! the engine needs no locking and every caller observes a single total order
//! of custody events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Sensor feed / dashboard / simulator (any task)     │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              CustodyHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              CustodyActor (Single Task)               │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ CustodyEngine + dirty flag                     │  │
//! │  │ Timer: interval or N mutations → flush()       │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │            SnapshotStore::save()                      │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    config::ActorConfig,
    custody::{ApprovalReceipt, TransferReceipt},
    engine::{CustodyEngine, Overview},
    metrics::Metrics,
    snapshot::EngineSnapshot,
    storage::SnapshotStore,
    telemetry::ReadingReceipt,
    types::{
        Alert, AlertCounts, Batch, BatchId, BoxId, GeoPoint, HistoryEntry, NewBatch, NewBox, Role,
        ShipmentBox, TelemetryReading, Transaction,
    },
    Error, Result,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Message sent to the custody actor
#[derive(Debug)]
pub enum CustodyMessage {
    /// Register a batch
    CreateBatch {
        /// Batch details
        input: NewBatch,
        /// Acting role
        acting_role: Role,
        /// Reply channel
        response: Reply<Batch>,
    },

    /// Register a box
    RegisterBox {
        /// Box details
        input: NewBox,
        /// Reply channel
        response: Reply<ShipmentBox>,
    },

    /// Attach a box to a batch
    AssociateBox {
        /// Box
        box_id: BoxId,
        /// Batch
        batch_id: BatchId,
        /// Reply channel
        response: Reply<ShipmentBox>,
    },

    /// FDA approval
    ApproveBatch {
        /// Batch
        batch_id: BatchId,
        /// Acting role
        acting_role: Role,
        /// Reply channel
        response: Reply<ApprovalReceipt>,
    },

    /// Box custody transfer
    TransferBox {
        /// Box
        box_id: BoxId,
        /// Receiving role
        target_role: Role,
        /// Handing role
        acting_role: Role,
        /// Handoff location
        location: GeoPoint,
        /// Reply channel
        response: Reply<TransferReceipt>,
    },

    /// Batch return
    TransferBatch {
        /// Batch
        batch_id: BatchId,
        /// Handing role
        acting_role: Role,
        /// Receiving role
        target_role: Role,
        /// Reply channel
        response: Reply<Transaction>,
    },

    /// Telemetry reading
    RecordReading {
        /// Batch the sensor belongs to
        batch_id: BatchId,
        /// Temperature (°C)
        temperature_c: f64,
        /// Pressure (atm)
        pressure_atm: f64,
        /// GPS fix
        gps: Option<GeoPoint>,
        /// Custody leg for GPS moves; configured default if `None`
        leg: Option<(Role, Role)>,
        /// Reply channel
        response: Reply<ReadingReceipt>,
    },

    /// Batch by id
    GetBatch {
        /// Batch
        batch_id: BatchId,
        /// Reply channel
        response: Reply<Option<Batch>>,
    },

    /// All batches
    ListBatches {
        /// Reply channel
        response: Reply<Vec<Batch>>,
    },

    /// Box by id
    GetBox {
        /// Box
        box_id: BoxId,
        /// Reply channel
        response: Reply<Option<ShipmentBox>>,
    },

    /// Boxes of a batch
    BoxesForBatch {
        /// Batch
        batch_id: BatchId,
        /// Reply channel
        response: Reply<Vec<ShipmentBox>>,
    },

    /// Box history
    BoxHistory {
        /// Box
        box_id: BoxId,
        /// Reply channel
        response: Reply<Vec<HistoryEntry>>,
    },

    /// Route points of a box
    RoutePoints {
        /// Box
        box_id: BoxId,
        /// Reply channel
        response: Reply<Vec<GeoPoint>>,
    },

    /// Ledger entries of a batch
    LedgerForBatch {
        /// Batch
        batch_id: BatchId,
        /// Reply channel
        response: Reply<Vec<Transaction>>,
    },

    /// Telemetry of a batch
    TelemetryForBatch {
        /// Batch
        batch_id: BatchId,
        /// Reply channel
        response: Reply<Vec<TelemetryReading>>,
    },

    /// Most recent alerts
    RecentAlerts {
        /// Maximum number returned
        limit: usize,
        /// Reply channel
        response: Reply<Vec<Alert>>,
    },

    /// Alert totals
    AlertCounts {
        /// Reply channel
        response: Reply<AlertCounts>,
    },

    /// Session summary
    Overview {
        /// Reply channel
        response: Reply<Overview>,
    },

    /// Full state export
    Snapshot {
        /// Reply channel
        response: Reply<EngineSnapshot>,
    },

    /// Persist immediately if dirty
    Flush {
        /// Reply channel
        response: Reply<()>,
    },

    /// Flush and stop
    Shutdown {
        /// Reply channel, answered with the final flush result
        response: Reply<()>,
    },
}

/// Actor that owns the engine
pub struct CustodyActor {
    engine: CustodyEngine,
    store: Option<Arc<dyn SnapshotStore>>,
    mailbox: mpsc::Receiver<CustodyMessage>,
    metrics: Metrics,
    config: ActorConfig,
    dirty: bool,
    mutations_since_flush: usize,
}

impl fmt::Debug for CustodyActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyActor")
            .field("engine", &self.engine)
            .field("persistent", &self.store.is_some())
            .field("dirty", &self.dirty)
            .field("mutations_since_flush", &self.mutations_since_flush)
            .finish()
    }
}

impl CustodyActor {
    /// Create new actor
    pub fn new(
        engine: CustodyEngine,
        store: Option<Arc<dyn SnapshotStore>>,
        mailbox: mpsc::Receiver<CustodyMessage>,
        metrics: Metrics,
        config: ActorConfig,
    ) -> Self {
        metrics.update_ledger_size(engine.ledger_len());
        Self {
            engine,
            store,
            mailbox,
            metrics,
            config,
            dirty: false,
            mutations_since_flush: 0,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut flush_timer = interval(Duration::from_millis(self.config.flush_interval_ms.max(1)));
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => {
                    if let CustodyMessage::Shutdown { response } = msg {
                        let result = self.flush();
                        if let Err(ref e) = result {
                            tracing::error!(error = %e, "Final snapshot flush failed");
                        }
                        let _ = response.send(result);
                        break;
                    }

                    self.handle_message(msg);

                    if self.mutations_since_flush >= self.config.flush_after_mutations.max(1) {
                        if let Err(e) = self.flush() {
                            tracing::error!(error = %e, "Error flushing snapshot");
                        }
                    }
                }

                _ = flush_timer.tick(), if self.dirty => {
                    if let Err(e) = self.flush() {
                        tracing::error!(error = %e, "Error flushing snapshot on timer");
                    }
                }

                // Every handle dropped
                else => {
                    if let Err(e) = self.flush() {
                        tracing::error!(error = %e, "Final snapshot flush failed");
                    }
                    break;
                }
            }
        }

        tracing::info!("Custody actor stopped");
    }

    fn handle_message(&mut self, msg: CustodyMessage) {
        match msg {
            CustodyMessage::CreateBatch {
                input,
                acting_role,
                response,
            } => {
                let result = self.engine.create_batch(input, acting_role).cloned();
                let _ = response.send(self.track(result));
            }

            CustodyMessage::RegisterBox { input, response } => {
                let result = self.engine.register_box(input).cloned();
                let _ = response.send(self.track(result));
            }

            CustodyMessage::AssociateBox {
                box_id,
                batch_id,
                response,
            } => {
                let result = self.engine.associate_box(&box_id, &batch_id).cloned();
                let _ = response.send(self.track(result));
            }

            CustodyMessage::ApproveBatch {
                batch_id,
                acting_role,
                response,
            } => {
                let result = self.engine.approve_batch(&batch_id, acting_role);
                let _ = response.send(self.track(result));
            }

            CustodyMessage::TransferBox {
                box_id,
                target_role,
                acting_role,
                location,
                response,
            } => {
                let result = self
                    .engine
                    .transfer_box(&box_id, target_role, acting_role, location);
                if let Ok(ref receipt) = result {
                    self.metrics.record_transactions(1);
                    if let Some(ref finding) = receipt.tamper {
                        self.metrics.record_tamper(1);
                        self.metrics.record_alerts([&finding.alert]);
                    }
                }
                let _ = response.send(self.track(result));
            }

            CustodyMessage::TransferBatch {
                batch_id,
                acting_role,
                target_role,
                response,
            } => {
                let result = self
                    .engine
                    .transfer_batch(&batch_id, acting_role, target_role);
                if result.is_ok() {
                    self.metrics.record_transactions(1);
                }
                let _ = response.send(self.track(result));
            }

            CustodyMessage::RecordReading {
                batch_id,
                temperature_c,
                pressure_atm,
                gps,
                leg,
                response,
            } => {
                let result = match leg {
                    Some((from, to)) => self.engine.record_reading_as(
                        &batch_id,
                        temperature_c,
                        pressure_atm,
                        gps,
                        from,
                        to,
                    ),
                    None => self
                        .engine
                        .record_reading(&batch_id, temperature_c, pressure_atm, gps),
                };
                if let Ok(ref receipt) = result {
                    self.metrics.record_reading();
                    self.metrics.record_transactions(receipt.transactions.len());
                    self.metrics.record_tamper(receipt.tamper.len());
                    self.metrics.record_alerts(&receipt.alerts);
                    self.metrics
                        .record_alerts(receipt.tamper.iter().map(|f| &f.alert));
                }
                let _ = response.send(self.track(result));
            }

            CustodyMessage::GetBatch { batch_id, response } => {
                let _ = response.send(Ok(self.engine.batch(&batch_id).cloned()));
            }

            CustodyMessage::ListBatches { response } => {
                let _ = response.send(Ok(self.engine.batches().to_vec()));
            }

            CustodyMessage::GetBox { box_id, response } => {
                let _ = response.send(Ok(self.engine.box_by_id(&box_id).cloned()));
            }

            CustodyMessage::BoxesForBatch { batch_id, response } => {
                let boxes = self
                    .engine
                    .boxes_for_batch(&batch_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = response.send(Ok(boxes));
            }

            CustodyMessage::BoxHistory { box_id, response } => {
                let result = self.engine.box_history(&box_id).map(<[_]>::to_vec);
                let _ = response.send(result);
            }

            CustodyMessage::RoutePoints { box_id, response } => {
                let _ = response.send(self.engine.route_points(&box_id));
            }

            CustodyMessage::LedgerForBatch { batch_id, response } => {
                let entries = self
                    .engine
                    .ledger_for_batch(&batch_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = response.send(Ok(entries));
            }

            CustodyMessage::TelemetryForBatch { batch_id, response } => {
                let readings = self
                    .engine
                    .telemetry_for_batch(&batch_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = response.send(Ok(readings));
            }

            CustodyMessage::RecentAlerts { limit, response } => {
                let alerts = self
                    .engine
                    .recent_alerts(limit)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = response.send(Ok(alerts));
            }

            CustodyMessage::AlertCounts { response } => {
                let _ = response.send(Ok(self.engine.alert_counts()));
            }

            CustodyMessage::Overview { response } => {
                let _ = response.send(Ok(self.engine.overview()));
            }

            CustodyMessage::Snapshot { response } => {
                let _ = response.send(Ok(self.engine.snapshot()));
            }

            CustodyMessage::Flush { response } => {
                let _ = response.send(self.flush());
            }

            CustodyMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    /// Bookkeeping shared by every mutation
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(_) => {
                self.dirty = true;
                self.mutations_since_flush += 1;
                self.metrics.update_ledger_size(self.engine.ledger_len());
            }
            Err(ref e) => {
                tracing::debug!(kind = e.kind(), error = %e, "Operation rejected");
                self.metrics.record_rejected(e);
            }
        }
        result
    }

    /// Persist the session if it changed since the last flush
    fn flush(&mut self) -> Result<()> {
        if !self.dirty || !self.config.persistence_enabled {
            return Ok(());
        }
        let store = match self.store {
            Some(ref store) => store,
            None => return Ok(()),
        };

        let snapshot = self.engine.snapshot();
        store.save(&self.config.snapshot_key, &snapshot)?;

        tracing::info!(
            key = %self.config.snapshot_key,
            mutations = self.mutations_since_flush,
            transactions = snapshot.ledger.len(),
            "Snapshot flushed"
        );

        self.dirty = false;
        self.mutations_since_flush = 0;
        self.metrics.record_flush();
        Ok(())
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct CustodyHandle {
    sender: mpsc::Sender<CustodyMessage>,
    metrics: Metrics,
}

impl CustodyHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<CustodyMessage>, metrics: Metrics) -> Self {
        Self { sender, metrics }
    }

    /// Metrics recorded by the actor
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn call<T>(&self, message: impl FnOnce(Reply<T>) -> CustodyMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Register a batch
    pub async fn create_batch(&self, input: NewBatch, acting_role: Role) -> Result<Batch> {
        self.call(|response| CustodyMessage::CreateBatch {
            input,
            acting_role,
            response,
        })
        .await
    }

    /// Register a box
    pub async fn register_box(&self, input: NewBox) -> Result<ShipmentBox> {
        self.call(|response| CustodyMessage::RegisterBox { input, response })
            .await
    }

    /// Attach a box to a batch
    pub async fn associate_box(&self, box_id: BoxId, batch_id: BatchId) -> Result<ShipmentBox> {
        self.call(|response| CustodyMessage::AssociateBox {
            box_id,
            batch_id,
            response,
        })
        .await
    }

    /// FDA approval
    pub async fn approve_batch(&self, batch_id: BatchId, acting_role: Role) -> Result<ApprovalReceipt> {
        self.call(|response| CustodyMessage::ApproveBatch {
            batch_id,
            acting_role,
            response,
        })
        .await
    }

    /// Box custody transfer
    pub async fn transfer_box(
        &self,
        box_id: BoxId,
        target_role: Role,
        acting_role: Role,
        location: GeoPoint,
    ) -> Result<TransferReceipt> {
        self.call(|response| CustodyMessage::TransferBox {
            box_id,
            target_role,
            acting_role,
            location,
            response,
        })
        .await
    }

    /// Batch return
    pub async fn transfer_batch(
        &self,
        batch_id: BatchId,
        acting_role: Role,
        target_role: Role,
    ) -> Result<Transaction> {
        self.call(|response| CustodyMessage::TransferBatch {
            batch_id,
            acting_role,
            target_role,
            response,
        })
        .await
    }

    /// Telemetry reading on the default custody leg
    pub async fn record_reading(
        &self,
        batch_id: BatchId,
        temperature_c: f64,
        pressure_atm: f64,
        gps: Option<GeoPoint>,
    ) -> Result<ReadingReceipt> {
        self.call(|response| CustodyMessage::RecordReading {
            batch_id,
            temperature_c,
            pressure_atm,
            gps,
            leg: None,
            response,
        })
        .await
    }

    /// Telemetry reading on an explicit custody leg
    pub async fn record_reading_as(
        &self,
        batch_id: BatchId,
        temperature_c: f64,
        pressure_atm: f64,
        gps: Option<GeoPoint>,
        from: Role,
        to: Role,
    ) -> Result<ReadingReceipt> {
        self.call(|response| CustodyMessage::RecordReading {
            batch_id,
            temperature_c,
            pressure_atm,
            gps,
            leg: Some((from, to)),
            response,
        })
        .await
    }

    /// Batch by id
    pub async fn batch(&self, batch_id: BatchId) -> Result<Option<Batch>> {
        self.call(|response| CustodyMessage::GetBatch { batch_id, response })
            .await
    }

    /// All batches
    pub async fn batches(&self) -> Result<Vec<Batch>> {
        self.call(|response| CustodyMessage::ListBatches { response })
            .await
    }

    /// Box by id
    pub async fn box_by_id(&self, box_id: BoxId) -> Result<Option<ShipmentBox>> {
        self.call(|response| CustodyMessage::GetBox { box_id, response })
            .await
    }

    /// Boxes of a batch
    pub async fn boxes_for_batch(&self, batch_id: BatchId) -> Result<Vec<ShipmentBox>> {
        self.call(|response| CustodyMessage::BoxesForBatch { batch_id, response })
            .await
    }

    /// Box history
    pub async fn box_history(&self, box_id: BoxId) -> Result<Vec<HistoryEntry>> {
        self.call(|response| CustodyMessage::BoxHistory { box_id, response })
            .await
    }

    /// Route points of a box
    pub async fn route_points(&self, box_id: BoxId) -> Result<Vec<GeoPoint>> {
        self.call(|response| CustodyMessage::RoutePoints { box_id, response })
            .await
    }

    /// Ledger entries of a batch
    pub async fn ledger_for_batch(&self, batch_id: BatchId) -> Result<Vec<Transaction>> {
        self.call(|response| CustodyMessage::LedgerForBatch { batch_id, response })
            .await
    }

    /// Telemetry of a batch
    pub async fn telemetry_for_batch(&self, batch_id: BatchId) -> Result<Vec<TelemetryReading>> {
        self.call(|response| CustodyMessage::TelemetryForBatch { batch_id, response })
            .await
    }

    /// Most recent alerts
    pub async fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        self.call(|response| CustodyMessage::RecentAlerts { limit, response })
            .await
    }

    /// Alert totals
    pub async fn alert_counts(&self) -> Result<AlertCounts> {
        self.call(|response| CustodyMessage::AlertCounts { response })
            .await
    }

    /// Session summary
    pub async fn overview(&self) -> Result<Overview> {
        self.call(|response| CustodyMessage::Overview { response })
            .await
    }

    /// Full state export
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.call(|response| CustodyMessage::Snapshot { response })
            .await
    }

    /// Persist immediately if dirty
    pub async fn flush(&self) -> Result<()> {
        self.call(|response| CustodyMessage::Flush { response })
            .await
    }

    /// Flush and stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|response| CustodyMessage::Shutdown { response })
            .await
    }
}

/// Spawn the custody actor
pub fn spawn_custody_actor(
    engine: CustodyEngine,
    store: Option<Arc<dyn SnapshotStore>>,
    metrics: Metrics,
    config: &ActorConfig,
) -> CustodyHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = CustodyActor::new(engine, store, rx, metrics.clone(), config.clone());

    tokio::spawn(async move {
        actor.run().await;
    });

    CustodyHandle::new(tx, metrics)
}

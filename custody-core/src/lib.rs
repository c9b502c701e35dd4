//! Pharmaceutical Custody Core
//!
//! Chain-of-custody tracking for drug batches and the boxes that carry them.
//!
//! # Architecture
//!
//! - **Explicit Session**: All state lives in one [`CustodyEngine`] value
//! - **State Machine**: FDA approval gates every custody transfer
//! - **Append-only Ledger**: Bounded, totally ordered transaction log
//! - **Tamper Detection**: Implausible location jumps flag the box
//! - **Single Writer**: [`CustodyHandle`] serializes access from async hosts
//!
//! # Invariants
//!
//! - Box status never moves backwards: Pending → Created → InTransit → Delivered
//! - Approval is monotonic and only granted by the FDA role
//! - Every successful transfer writes exactly one ledger transaction
//! - Alert counts always equal a recount of the retained history

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod alerts;
pub mod config;
pub mod custody;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod shared;
pub mod snapshot;
pub mod storage;
pub mod tamper;
pub mod telemetry;
pub mod types;

// Re-exports
pub use actor::{spawn_custody_actor, CustodyHandle};
pub use alerts::AlertLog;
pub use config::Config;
pub use custody::{ApprovalReceipt, TransferReceipt};
pub use engine::{Clock, CustodyEngine, Overview, TamperFinding};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use shared::SharedEngine;
pub use snapshot::EngineSnapshot;
pub use storage::{MemorySnapshotStore, RocksSnapshotStore, SnapshotStore};
pub use tamper::{TamperDetector, Verdict};
pub use telemetry::ReadingReceipt;
pub use types::{
    Alert, AlertCounts, Batch, BatchId, BatchStage, BoxId, BoxStatus, GeoPoint, HistoryEntry,
    NewBatch, NewBox, Role, Severity, ShipmentBox, TelemetryReading, Transaction, TxnId,
};

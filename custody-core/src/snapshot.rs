//! Serializable engine state
//!
//! A snapshot is a structured JSON document of ordered arrays using the
//! entity shapes from [`crate::types`]: ISO-8601 timestamps and decimal-degree
//! coordinates. It is what the key-value store collaborator loads and saves.

use crate::types::{Alert, Batch, ShipmentBox, TelemetryReading, Transaction};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Format version
    pub version: u32,

    /// Batches, in registration order
    pub batches: Vec<Batch>,

    /// Boxes, in registration order
    pub boxes: Vec<ShipmentBox>,

    /// Retained ledger entries, oldest first
    pub ledger: Vec<Transaction>,

    /// Retained alerts, most recent first
    pub alerts: Vec<Alert>,

    /// Retained telemetry, grouped by batch, oldest first within a batch
    #[serde(default)]
    pub telemetry: Vec<TelemetryReading>,
}

impl EngineSnapshot {
    /// Encode as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Encode as compact JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: EngineSnapshot = serde_json::from_str(json)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Decode from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: EngineSnapshot = serde_json::from_slice(bytes)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    fn check_version(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::Validation(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(())
    }
}

//! Core types for the custody engine
//!
//! All types are designed for:
//! - Stable JSON snapshots (serde, ISO-8601 timestamps, decimal-degree floats)
//! - Structural equality, so a reloaded snapshot compares equal to the original
//! - A closed set of roles and statuses (no free-form strings in the core)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Batch identifier (manufacturing lot number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Create new batch ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Box identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(String);

impl BoxId {
    /// Create new box ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BoxId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Ledger transaction identifier (`TXN-…`), opaque
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(String);

impl TxnId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id
    pub fn generate() -> Self {
        Self(format!("TXN-{}", uuid::Uuid::now_v7().simple()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Custody chain participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Produces batches and boxes
    Manufacturer,
    /// Carries boxes to patients
    Distributor,
    /// Regulator; approves batches
    #[serde(rename = "FDA")]
    Fda,
    /// Final recipient
    Patient,
}

impl Role {
    /// Canonical role name
    pub fn code(&self) -> &'static str {
        match self {
            Role::Manufacturer => "Manufacturer",
            Role::Distributor => "Distributor",
            Role::Fda => "FDA",
            Role::Patient => "Patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim() {
            "Manufacturer" => Ok(Role::Manufacturer),
            "Distributor" => Ok(Role::Distributor),
            "FDA" => Ok(Role::Fda),
            "Patient" => Ok(Role::Patient),
            other => Err(crate::Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Physical stage label of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStage {
    /// Registered, not yet produced
    Created,
    /// In production
    Manufacturing,
    /// With a distributor
    Distribution,
    /// At a pharmacy outlet
    Pharmacy,
    /// Sent back by a distributor
    ReturnedToManufacturer,
}

impl BatchStage {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            BatchStage::Created => "Created",
            BatchStage::Manufacturing => "Manufacturing",
            BatchStage::Distribution => "Distribution",
            BatchStage::Pharmacy => "Pharmacy",
            BatchStage::ReturnedToManufacturer => "Returned to Manufacturer",
        }
    }
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Box status. Ordering follows the lifecycle; a box never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BoxStatus {
    /// Registered, batch not approved yet
    Pending = 1,
    /// Activated by batch approval
    Created = 2,
    /// Dispatched to a distributor
    InTransit = 3,
    /// Handed to a patient (terminal)
    Delivered = 4,
}

impl BoxStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, BoxStatus::Delivered)
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            BoxStatus::Pending => "pending",
            BoxStatus::Created => "created",
            BoxStatus::InTransit => "in-transit",
            BoxStatus::Delivered => "delivered",
        }
    }
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, -90..=90
    pub lat: f64,
    /// Longitude, -180..=180
    pub lon: f64,
}

impl GeoPoint {
    /// Create a validated point
    pub fn new(lat: f64, lon: f64) -> crate::Result<Self> {
        let point = Self { lat, lon };
        point.validate()?;
        Ok(point)
    }

    /// Reject non-finite or out-of-range coordinates
    pub fn validate(&self) -> crate::Result<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(crate::Error::Validation(
                "coordinates must be finite".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(crate::Error::Validation(format!(
                "coordinates out of range: {},{}",
                self.lat, self.lon
            )));
        }
        Ok(())
    }

    /// Parse a `"lat,lon"` location string. Returns `None` for labels
    /// such as `"unknown"` or a facility name.
    pub fn parse(s: &str) -> Option<Self> {
        let (lat, lon) = s.split_once(',')?;
        let lat: f64 = lat.trim().parse().ok()?;
        let lon: f64 = lon.trim().parse().ok()?;
        GeoPoint::new(lat, lon).ok()
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat, self.lon)
    }
}

/// Location string recorded on ledger entries without coordinates
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Manufacturing lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch ID
    pub id: BatchId,

    /// Drug name
    pub drug_name: String,

    /// Physical stage label
    pub stage: BatchStage,

    /// Free-text location label
    pub location: String,

    /// FDA approval flag (false -> true once)
    pub approved: bool,

    /// Manufacture date
    #[serde(default)]
    pub manufacture_date: Option<NaiveDate>,

    /// Unit count
    #[serde(default)]
    pub quantity: Option<u32>,

    /// Manufacturing site coordinates
    #[serde(default)]
    pub origin: Option<GeoPoint>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Approval timestamp
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Input for registering a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBatch {
    /// Batch ID
    pub id: String,
    /// Drug name
    pub drug_name: String,
    /// Location label (defaults to "Unknown")
    pub location: Option<String>,
    /// Manufacture date
    pub manufacture_date: Option<NaiveDate>,
    /// Unit count
    pub quantity: Option<u32>,
    /// Manufacturing site coordinates
    pub origin: Option<GeoPoint>,
}

/// One entry in a box's custody history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Status at the time of the entry
    pub status: BoxStatus,

    /// Role acting (or receiving) at that point
    pub role: Role,

    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,

    /// `"lat,lon"` or a location label
    pub location: String,
}

/// Physical shipping unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentBox {
    /// Box ID
    pub id: BoxId,

    /// Owning batch (by id, not by pointer)
    pub batch_id: Option<BatchId>,

    /// Contents description
    pub contents: String,

    /// Lifecycle status
    pub status: BoxStatus,

    /// Last known coordinates
    pub coordinates: Option<GeoPoint>,

    /// Time-ordered custody history
    pub history: Vec<HistoryEntry>,

    /// Set once a suspicious jump is detected; never cleared
    pub tampered: bool,

    /// Ledger entries concerning this box's batch, newest last
    pub ledger_refs: VecDeque<TxnId>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ShipmentBox {
    /// Most recent history entry
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// Ordered coordinates from history, for route lookup
    pub fn route_points(&self) -> Vec<GeoPoint> {
        self.history
            .iter()
            .filter_map(|entry| GeoPoint::parse(&entry.location))
            .collect()
    }

    /// Check if box belongs to batch
    pub fn belongs_to(&self, batch_id: &BatchId) -> bool {
        self.batch_id.as_ref() == Some(batch_id)
    }
}

/// Input for registering a box
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBox {
    /// Box ID
    pub id: String,
    /// Batch to associate with
    pub batch_id: Option<String>,
    /// Contents description
    pub contents: String,
    /// Initial coordinates
    pub coordinates: Option<GeoPoint>,
}

/// Immutable ledger record of a custody or location event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub txn_id: TxnId,

    /// Insertion sequence number (total order)
    pub sequence: u64,

    /// Batch the event concerns
    pub batch_id: BatchId,

    /// Handing-over role
    pub from: Role,

    /// Receiving role
    pub to: Role,

    /// Informational timestamp
    pub timestamp: DateTime<Utc>,

    /// `"lat,lon"` or `"unknown"`
    pub location: String,

    /// Opaque audit token, not a proof
    pub integrity_token: String,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Out-of-range but tolerable
    Warning,
    /// Requires intervention
    Critical,
}

impl Severity {
    /// Lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Derived, non-authoritative notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Severity
    pub severity: Severity,
    /// Batch concerned
    pub batch_id: BatchId,
    /// Message
    pub message: String,
    /// Raised at
    pub timestamp: DateTime<Utc>,
}

/// Alert totals over the retained history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    /// All retained alerts
    pub total: usize,
    /// Retained critical alerts
    pub critical: usize,
}

/// Accepted sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Batch the sensor is attached to
    pub batch_id: BatchId,
    /// Temperature (°C)
    pub temperature_c: f64,
    /// Pressure (atm)
    pub pressure_atm: f64,
    /// GPS fix, if any
    pub gps: Option<GeoPoint>,
    /// Recorded at
    pub recorded_at: DateTime<Utc>,
}

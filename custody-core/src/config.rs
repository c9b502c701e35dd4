//! Configuration for the custody engine

use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger retention
    pub ledger: LedgerConfig,

    /// Alert retention
    pub alerts: AlertConfig,

    /// Tamper detection thresholds
    pub tamper: TamperConfig,

    /// Telemetry thresholds
    pub telemetry: TelemetryConfig,

    /// Actor configuration
    pub actor: ActorConfig,

    /// Simulator configuration
    pub simulator: SimulatorConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/custody"),
            service_name: "custody-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: LedgerConfig::default(),
            alerts: AlertConfig::default(),
            tamper: TamperConfig::default(),
            telemetry: TelemetryConfig::default(),
            actor: ActorConfig::default(),
            simulator: SimulatorConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Hard cap on retained transactions (oldest evicted first)
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Retained alerts (oldest evicted first)
    pub retention: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { retention: 1000 }
    }
}

/// Tamper detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TamperConfig {
    /// Jumps longer than this are implausible within the window (km)
    pub max_jump_km: f64,

    /// Elapsed time below which a long jump is suspicious (seconds)
    pub min_plausible_elapsed_secs: i64,
}

impl TamperConfig {
    /// Largest window a `chrono::Duration` can represent (seconds)
    pub const MAX_ELAPSED_SECS: i64 = i64::MAX / 1000;
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            max_jump_km: 200.0,
            min_plausible_elapsed_secs: 30 * 60,
        }
    }
}

/// Telemetry thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Lowest acceptable temperature (°C)
    pub min_temperature_c: f64,

    /// Highest acceptable temperature (°C)
    pub max_temperature_c: f64,

    /// Degrees past either bound at which an excursion becomes critical
    pub critical_margin_c: f64,

    /// Lowest acceptable pressure (atm)
    pub min_pressure_atm: f64,

    /// Highest acceptable pressure (atm)
    pub max_pressure_atm: f64,

    /// Readings kept per batch
    pub retention_per_batch: usize,

    /// Custody leg recorded for GPS-bearing readings
    pub default_from: Role,

    /// Custody leg recorded for GPS-bearing readings
    pub default_to: Role,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            min_temperature_c: 2.0,
            max_temperature_c: 8.0,
            critical_margin_c: 5.0,
            min_pressure_atm: 0.8,
            max_pressure_atm: 1.2,
            retention_per_batch: 500,
            default_from: Role::Manufacturer,
            default_to: Role::Distributor,
        }
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Mailbox capacity (bounded for backpressure)
    pub mailbox_capacity: usize,

    /// Flush dirty snapshot every N milliseconds
    pub flush_interval_ms: u64,

    /// Flush after this many mutations regardless of the timer
    pub flush_after_mutations: usize,

    /// Enable snapshot persistence
    pub persistence_enabled: bool,

    /// Key under which the session snapshot is stored
    pub snapshot_key: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            flush_interval_ms: 1000,
            flush_after_mutations: 50,
            persistence_enabled: true,
            snapshot_key: "session".to_string(),
        }
    }
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Tick period (milliseconds)
    pub tick_ms: u64,

    /// Seed demo batches and boxes into an empty session
    pub seed_demo_data: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 4000,
            seed_demo_data: true,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CUSTODY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(capacity) = std::env::var("CUSTODY_LEDGER_CAPACITY") {
            config.ledger.capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("CUSTODY_LEDGER_CAPACITY: {}", e)))?;
        }

        if let Ok(tick) = std::env::var("CUSTODY_SIM_TICK_MS") {
            config.simulator.tick_ms = tick
                .parse()
                .map_err(|e| crate::Error::Config(format!("CUSTODY_SIM_TICK_MS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ledger.capacity == 0 {
            return Err(crate::Error::Config("ledger.capacity must be > 0".to_string()));
        }
        if self.alerts.retention == 0 {
            return Err(crate::Error::Config("alerts.retention must be > 0".to_string()));
        }
        let telemetry = &self.telemetry;
        let bounds = [
            ("telemetry.min_temperature_c", telemetry.min_temperature_c),
            ("telemetry.max_temperature_c", telemetry.max_temperature_c),
            ("telemetry.critical_margin_c", telemetry.critical_margin_c),
            ("telemetry.min_pressure_atm", telemetry.min_pressure_atm),
            ("telemetry.max_pressure_atm", telemetry.max_pressure_atm),
        ];
        for (name, value) in bounds {
            if !value.is_finite() {
                return Err(crate::Error::Config(format!("{} must be finite", name)));
            }
        }
        if telemetry.critical_margin_c < 0.0 {
            return Err(crate::Error::Config(
                "telemetry.critical_margin_c must be >= 0".to_string(),
            ));
        }
        if self.telemetry.min_temperature_c > self.telemetry.max_temperature_c {
            return Err(crate::Error::Config(
                "telemetry temperature bounds are inverted".to_string(),
            ));
        }
        if self.telemetry.min_pressure_atm > self.telemetry.max_pressure_atm {
            return Err(crate::Error::Config(
                "telemetry pressure bounds are inverted".to_string(),
            ));
        }
        if !(self.tamper.max_jump_km.is_finite() && self.tamper.max_jump_km >= 0.0) {
            return Err(crate::Error::Config(
                "tamper.max_jump_km must be a non-negative number".to_string(),
            ));
        }
        if !(0..=TamperConfig::MAX_ELAPSED_SECS).contains(&self.tamper.min_plausible_elapsed_secs) {
            return Err(crate::Error::Config(format!(
                "tamper.min_plausible_elapsed_secs must be within 0..={}",
                TamperConfig::MAX_ELAPSED_SECS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "custody-core");
        assert_eq!(config.ledger.capacity, 200);
        assert_eq!(config.tamper.max_jump_km, 200.0);
        assert_eq!(config.tamper.min_plausible_elapsed_secs, 1800);
        assert_eq!(config.telemetry.default_from, Role::Manufacturer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            service_name = "custody-test"

            [ledger]
            capacity = 50

            [telemetry]
            default_to = "Patient"
            "#,
        )
        .unwrap();

        assert_eq!(config.service_name, "custody-test");
        assert_eq!(config.ledger.capacity, 50);
        assert_eq!(config.telemetry.default_to, Role::Patient);
        assert_eq!(config.telemetry.max_temperature_c, 8.0);
        assert_eq!(config.alerts.retention, 1000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.ledger.capacity = 0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_elapsed_window_out_of_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.toml");
        std::fs::write(
            &path,
            "[tamper]\nmin_plausible_elapsed_secs = 9223372036854775807\n",
        )
        .unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));

        let mut config = Config::default();
        config.tamper.min_plausible_elapsed_secs = -1;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        config.tamper.min_plausible_elapsed_secs = TamperConfig::MAX_ELAPSED_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unvalidated_window_does_not_panic() {
        let mut config = Config::default();
        config.tamper.min_plausible_elapsed_secs = i64::MAX;
        let engine = crate::CustodyEngine::new(&config);
        assert_eq!(engine.overview().total_batches, 0);
    }

    #[test]
    fn test_non_finite_thresholds_rejected() {
        let mut config = Config::default();
        config.telemetry.max_temperature_c = f64::NAN;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.telemetry.min_pressure_atm = f64::NEG_INFINITY;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.telemetry.critical_margin_c = f64::NAN;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_negative_critical_margin_rejected() {
        let mut config = Config::default();
        config.telemetry.critical_margin_c = -1.0;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.toml");
        std::fs::write(&path, "[tamper]\nmax_jump_km = 150.0\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.tamper.max_jump_km, 150.0);
        assert_eq!(config.tamper.min_plausible_elapsed_secs, 1800);
    }
}

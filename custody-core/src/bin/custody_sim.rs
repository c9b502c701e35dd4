//! Custody simulator binary
//!
//! Restores the last session from RocksDB (or seeds demo data), then feeds
//! one random sensor reading per tick to a random approved batch until
//! Ctrl-C.

use anyhow::Context;
use custody_core::{
    spawn_custody_actor, Config, CustodyEngine, GeoPoint, Metrics, NewBatch, NewBox, Role,
    RocksSnapshotStore, SnapshotStore,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::var("CUSTODY_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        "Starting custody simulator"
    );

    let store = Arc::new(RocksSnapshotStore::open(&config)?);
    let engine = match store.load(&config.actor.snapshot_key)? {
        Some(snapshot) => CustodyEngine::restore(&config, snapshot)?,
        None => {
            let mut engine = CustodyEngine::new(&config);
            if config.simulator.seed_demo_data {
                seed_demo(&mut engine)?;
            }
            engine
        }
    };

    let metrics = Metrics::new()?;
    let handle = spawn_custody_actor(engine, Some(store), metrics, &config.actor);

    let mut ticker = interval(Duration::from_millis(config.simulator.tick_ms.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let approved: Vec<_> = handle
                    .batches()
                    .await?
                    .into_iter()
                    .filter(|b| b.approved)
                    .map(|b| b.id)
                    .collect();

                let batch_id = match pick(&approved) {
                    Some(batch_id) => batch_id,
                    None => continue,
                };

                let base = handle
                    .boxes_for_batch(batch_id.clone())
                    .await?
                    .into_iter()
                    .find_map(|b| b.coordinates);
                let (temperature_c, pressure_atm, gps) = sample_reading(base);

                match handle
                    .record_reading(batch_id.clone(), temperature_c, pressure_atm, gps)
                    .await
                {
                    Ok(receipt) => tracing::info!(
                        batch_id = %batch_id,
                        temperature_c,
                        pressure_atm,
                        alerts = receipt.alerts.len(),
                        transactions = receipt.transactions.len(),
                        "Reading recorded"
                    ),
                    Err(e) => tracing::warn!(batch_id = %batch_id, error = %e, "Reading rejected"),
                }
            }
        }
    }

    tracing::info!("Shutting down custody simulator");

    let overview = handle.overview().await?;
    handle.shutdown().await?;

    tracing::info!(
        batches = overview.total_batches,
        boxes = overview.total_boxes,
        tampered = overview.tampered_boxes,
        transactions = overview.ledger_entries,
        alerts = overview.alerts.total,
        critical = overview.alerts.critical,
        in_range = overview.batches_in_range,
        compliance_rate = overview.compliance_rate,
        "Final session state"
    );
    Ok(())
}

fn seed_demo(engine: &mut CustodyEngine) -> custody_core::Result<()> {
    let batches = [
        ("BATCH-2024-001", "Aspirin", "Plant A"),
        ("BATCH-2024-002", "Paracetamol", "Hub 3"),
        ("BATCH-2024-003", "Ibuprofen", "Outlet 7"),
    ];
    for (id, drug_name, location) in batches {
        engine.create_batch(
            NewBatch {
                id: id.to_string(),
                drug_name: drug_name.to_string(),
                location: Some(location.to_string()),
                ..Default::default()
            },
            Role::Manufacturer,
        )?;
    }

    let boxes = [
        ("BOX-2025-001", 20.5937, 78.9629),
        ("BOX-2025-002", 21.1458, 79.0882),
    ];
    for (id, lat, lon) in boxes {
        engine.register_box(NewBox {
            id: id.to_string(),
            batch_id: Some("BATCH-2024-001".to_string()),
            contents: "Aspirin 100mg".to_string(),
            coordinates: Some(GeoPoint::new(lat, lon)?),
        })?;
    }

    engine.approve_batch(&"BATCH-2024-001".into(), Role::Fda)?;

    tracing::info!(
        batches = engine.batches().len(),
        boxes = engine.boxes().len(),
        "Seeded demo data"
    );
    Ok(())
}

fn pick<T: Clone>(items: &[T]) -> Option<T> {
    items.choose(&mut rand::thread_rng()).cloned()
}

/// Temperature 2..9 °C, pressure 0.8..1.3 atm, GPS drifting a few km from
/// `base` (or anywhere in the demo bounding box without one)
fn sample_reading(base: Option<GeoPoint>) -> (f64, f64, Option<GeoPoint>) {
    let mut rng = rand::thread_rng();

    let temperature_c = (rng.gen_range(2.0..9.0_f64) * 10.0).round() / 10.0;
    let pressure_atm = (rng.gen_range(0.8..1.3_f64) * 100.0).round() / 100.0;

    let (lat, lon) = match base {
        Some(p) => (
            (p.lat + rng.gen_range(-0.05..0.05)).clamp(-90.0, 90.0),
            (p.lon + rng.gen_range(-0.05..0.05)).clamp(-180.0, 180.0),
        ),
        None => (rng.gen_range(10.0..50.0), rng.gen_range(-130.0..-60.0)),
    };

    (temperature_c, pressure_atm, GeoPoint::new(lat, lon).ok())
}

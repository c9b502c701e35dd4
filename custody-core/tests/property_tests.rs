//! Property-based tests for custody invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Monotonic status: a box never moves back along its lifecycle
//! - One entry per transfer: successful transfers append exactly one transaction
//! - Bounded ledger: retained entries never exceed capacity
//! - Consistent alert counts: incremental counts equal a recount
//! - Lossless snapshots: restore(snapshot) reproduces the session

use custody_core::{
    BoxStatus, Config, CustodyEngine, EngineSnapshot, GeoPoint, NewBatch, NewBox, Role,
};
use proptest::prelude::*;

const BATCHES: usize = 3;
const BOXES_PER_BATCH: usize = 2;

/// One ingestion call against the seeded session
#[derive(Debug, Clone)]
enum Op {
    Approve {
        batch: usize,
        acting: Role,
    },
    TransferBox {
        shipment: usize,
        target: Role,
        acting: Role,
        lat: f64,
        lon: f64,
    },
    TransferBatch {
        batch: usize,
        acting: Role,
        target: Role,
    },
    Reading {
        batch: usize,
        temperature_c: f64,
        pressure_atm: f64,
        gps: Option<(f64, f64)>,
    },
}

/// Strategy for generating roles
fn role_strategy() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Manufacturer),
        Just(Role::Distributor),
        Just(Role::Fda),
        Just(Role::Patient),
    ]
}

/// Strategy for generating coordinates near the seeded boxes, with the
/// occasional cross-continent jump
fn coordinate_strategy() -> impl Strategy<Value = (f64, f64)> {
    prop_oneof![
        4 => (19.5..21.5f64, 77.5..79.5f64),
        1 => (-60.0..60.0f64, -170.0..170.0f64),
    ]
}

/// Strategy for generating operations
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..BATCHES, role_strategy()).prop_map(|(batch, acting)| Op::Approve { batch, acting }),
        (
            0..BATCHES * BOXES_PER_BATCH,
            role_strategy(),
            role_strategy(),
            coordinate_strategy()
        )
            .prop_map(|(shipment, target, acting, (lat, lon))| Op::TransferBox {
                shipment,
                target,
                acting,
                lat,
                lon,
            }),
        (0..BATCHES, role_strategy(), role_strategy()).prop_map(|(batch, acting, target)| {
            Op::TransferBatch {
                batch,
                acting,
                target,
            }
        }),
        (
            0..BATCHES,
            -10.0..25.0f64,
            0.5..1.5f64,
            prop::option::of(coordinate_strategy())
        )
            .prop_map(|(batch, temperature_c, pressure_atm, gps)| Op::Reading {
                batch,
                temperature_c,
                pressure_atm,
                gps,
            }),
    ]
}

fn batch_id(i: usize) -> String {
    format!("BATCH-{}", i)
}

fn box_id(i: usize) -> String {
    format!("BOX-{}", i)
}

/// Session with three batches of two boxes each, none approved
fn seeded_engine(config: &Config) -> CustodyEngine {
    let mut engine = CustodyEngine::new(config);
    for b in 0..BATCHES {
        engine
            .create_batch(
                NewBatch {
                    id: batch_id(b),
                    drug_name: "Amoxicillin".into(),
                    location: Some("Plant A".into()),
                    ..Default::default()
                },
                Role::Manufacturer,
            )
            .unwrap();
        for k in 0..BOXES_PER_BATCH {
            engine
                .register_box(NewBox {
                    id: box_id(b * BOXES_PER_BATCH + k),
                    batch_id: Some(batch_id(b)),
                    contents: "Amoxicillin 250mg".into(),
                    coordinates: Some(GeoPoint::new(20.0 + k as f64 * 0.1, 78.0).unwrap()),
                })
                .unwrap();
        }
    }
    engine
}

/// Apply an operation; returns the number of ledger entries it reports
/// having written, or `None` if it was rejected
fn apply(engine: &mut CustodyEngine, op: &Op) -> Option<usize> {
    match *op {
        Op::Approve { batch, acting } => engine
            .approve_batch(&batch_id(batch).as_str().into(), acting)
            .ok()
            .map(|_| 0),
        Op::TransferBox {
            shipment,
            target,
            acting,
            lat,
            lon,
        } => engine
            .transfer_box(
                &box_id(shipment).as_str().into(),
                target,
                acting,
                GeoPoint::new(lat, lon).unwrap(),
            )
            .ok()
            .map(|_| 1),
        Op::TransferBatch {
            batch,
            acting,
            target,
        } => engine
            .transfer_batch(&batch_id(batch).as_str().into(), acting, target)
            .ok()
            .map(|_| 1),
        Op::Reading {
            batch,
            temperature_c,
            pressure_atm,
            gps,
        } => engine
            .record_reading(
                &batch_id(batch).as_str().into(),
                temperature_c,
                pressure_atm,
                gps.map(|(lat, lon)| GeoPoint::new(lat, lon).unwrap()),
            )
            .ok()
            .map(|receipt| receipt.transactions.len()),
    }
}

fn statuses(engine: &CustodyEngine) -> Vec<BoxStatus> {
    engine.boxes().iter().map(|b| b.status).collect()
}

/// Config whose ledger never evicts during a test run
fn roomy_config() -> Config {
    let mut config = Config::default();
    config.ledger.capacity = 10_000;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Box status is monotonically non-decreasing
    #[test]
    fn prop_status_monotonic(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut engine = seeded_engine(&roomy_config());
        // approval unlocks most of the interesting transitions
        engine.approve_batch(&"BATCH-0".into(), Role::Fda).unwrap();

        let mut before = statuses(&engine);
        for op in &ops {
            apply(&mut engine, op);
            let after = statuses(&engine);
            for (old, new) in before.iter().zip(&after) {
                prop_assert!(new >= old, "{:?} went back to {:?} after {:?}", old, new, op);
            }
            before = after;
        }
    }

    /// Property: Ledger grows by exactly what each operation reports, and
    /// rejected operations leave it untouched
    #[test]
    fn prop_ledger_delta_matches_operation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut engine = seeded_engine(&roomy_config());
        engine.approve_batch(&"BATCH-1".into(), Role::Fda).unwrap();

        for op in &ops {
            let len_before = engine.ledger_len();
            let written = apply(&mut engine, op);
            let delta = engine.ledger_len() - len_before;

            match (op, written) {
                (_, None) => prop_assert_eq!(delta, 0),
                (Op::TransferBox { .. }, Some(_)) | (Op::TransferBatch { .. }, Some(_)) => {
                    prop_assert_eq!(delta, 1)
                }
                (Op::Approve { .. }, Some(_)) => prop_assert_eq!(delta, 0),
                (Op::Reading { .. }, Some(n)) => prop_assert_eq!(delta, n),
            }
        }
    }

    /// Property: Rejected operations leave the whole session untouched
    #[test]
    fn prop_rejection_is_atomic(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut engine = seeded_engine(&roomy_config());
        engine.approve_batch(&"BATCH-2".into(), Role::Fda).unwrap();

        for op in &ops {
            let before = engine.snapshot();
            if apply(&mut engine, op).is_none() {
                prop_assert_eq!(engine.snapshot(), before);
            }
        }
    }

    /// Property: Ledger never exceeds its capacity
    #[test]
    fn prop_ledger_bounded(
        capacity in 1usize..10,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut config = Config::default();
        config.ledger.capacity = capacity;
        let mut engine = seeded_engine(&config);
        for b in 0..BATCHES {
            engine.approve_batch(&batch_id(b).as_str().into(), Role::Fda).unwrap();
        }

        for op in &ops {
            apply(&mut engine, op);
            prop_assert!(engine.ledger_len() <= capacity);
            for shipment in engine.boxes() {
                prop_assert!(shipment.ledger_refs.len() <= capacity);
            }
        }

        // sequences stay strictly increasing after eviction
        let sequences: Vec<u64> = engine.transactions().map(|tx| tx.sequence).collect();
        prop_assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    /// Property: Incremental alert counts equal a full recount
    #[test]
    fn prop_alert_counts_consistent(
        retention in 1usize..8,
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut config = roomy_config();
        config.alerts.retention = retention;
        let mut engine = seeded_engine(&config);
        for b in 0..BATCHES {
            engine.approve_batch(&batch_id(b).as_str().into(), Role::Fda).unwrap();
        }

        for op in &ops {
            apply(&mut engine, op);
            let log = engine.alert_log();
            prop_assert_eq!(log.counts(), log.recount());
            prop_assert_eq!(log.counts().total, log.len());
            prop_assert!(log.len() <= retention);
        }
    }

    /// Property: Snapshot round-trip reproduces identical state
    #[test]
    fn prop_snapshot_round_trip(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let config = Config::default();
        let mut engine = seeded_engine(&config);
        engine.approve_batch(&"BATCH-0".into(), Role::Fda).unwrap();
        engine.approve_batch(&"BATCH-2".into(), Role::Fda).unwrap();
        for op in &ops {
            apply(&mut engine, op);
        }

        let snapshot = engine.snapshot();
        let json = snapshot.to_json().unwrap();
        let restored = CustodyEngine::restore(&config, EngineSnapshot::from_json(&json).unwrap()).unwrap();

        prop_assert_eq!(restored.snapshot(), snapshot);
        prop_assert_eq!(restored.alert_counts(), engine.alert_counts());
        prop_assert_eq!(restored.overview(), engine.overview());
    }
}

//! Append-only custody ledger
//!
//! The ledger is a bounded, insertion-ordered sequence of [`Transaction`]s.
//! Entries are never mutated or reordered; once the hard cap is reached the
//! oldest entry is evicted in O(1).
//!
//! # Invariants
//!
//! - Append-only: entries are never modified after insertion
//! - Total order: `sequence` strictly increases in insertion order
//! - Bounded: `len() <= capacity()` after every append
//!
//! The `txn_id` and `integrity_token` fields are opaque audit identifiers.
//! The token is a BLAKE3 digest of the entry's fields so that a copy can be
//! compared against the original, but nothing signs or verifies it.

use crate::error::{Error, Result};
use crate::types::{BatchId, GeoPoint, Role, Transaction, TxnId, UNKNOWN_LOCATION};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Bounded append-only transaction log
#[derive(Debug, Clone)]
pub struct Ledger {
    entries: VecDeque<Transaction>,
    capacity: usize,
    next_sequence: u64,
    evicted: u64,
}

impl Ledger {
    /// Create an empty ledger. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 0,
            evicted: 0,
        }
    }

    /// Rebuild from snapshot entries (oldest first). Only the newest
    /// `capacity` entries are kept.
    ///
    /// Fails with [`Error::Validation`] if sequences do not strictly increase
    /// or leave no room for another entry.
    pub fn from_entries(capacity: usize, entries: Vec<Transaction>) -> Result<Self> {
        let mut ledger = Self::new(capacity);
        for tx in entries {
            ledger.append(tx)?;
        }
        Ok(ledger)
    }

    /// Build, seal and append a new transaction. Returns a copy of the entry.
    pub fn record(
        &mut self,
        batch_id: &BatchId,
        from: Role,
        to: Role,
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    ) -> Transaction {
        let txn_id = TxnId::generate();
        let sequence = self.next_sequence;
        // u64 sequences are not exhausted by in-process appends
        self.next_sequence = sequence.saturating_add(1);
        let location = location
            .map(|p| p.to_string())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        let integrity_token =
            integrity_token(&txn_id, sequence, batch_id, from, to, timestamp, &location);

        let tx = Transaction {
            txn_id,
            sequence,
            batch_id: batch_id.clone(),
            from,
            to,
            timestamp,
            location,
            integrity_token,
        };

        self.push(tx.clone());
        tx
    }

    /// Append an existing transaction, evicting the oldest entry if over
    /// capacity. Returns the evicted entry, if any.
    ///
    /// The entry's sequence must be at least the next free sequence and below
    /// `u64::MAX`; anything else is rejected with [`Error::Validation`].
    pub fn append(&mut self, tx: Transaction) -> Result<Option<Transaction>> {
        if tx.sequence < self.next_sequence {
            return Err(Error::Validation(format!(
                "transaction {} has sequence {} but the next free sequence is {}",
                tx.txn_id, tx.sequence, self.next_sequence
            )));
        }
        let next_sequence = tx.sequence.checked_add(1).ok_or_else(|| {
            Error::Validation(format!(
                "transaction {} has exhausted the sequence space",
                tx.txn_id
            ))
        })?;

        self.next_sequence = next_sequence;
        Ok(self.push(tx))
    }

    fn push(&mut self, tx: Transaction) -> Option<Transaction> {
        tracing::debug!(
            txn_id = %tx.txn_id,
            batch_id = %tx.batch_id,
            from = %tx.from,
            to = %tx.to,
            "Transaction appended"
        );

        self.entries.push_back(tx);

        if self.entries.len() > self.capacity {
            let evicted = self.entries.pop_front();
            self.evicted += 1;
            if let Some(ref old) = evicted {
                tracing::debug!(txn_id = %old.txn_id, "Evicted oldest transaction");
            }
            return evicted;
        }

        None
    }

    /// Entries for a batch, in insertion order
    pub fn query_by_batch(&self, batch_id: &BatchId) -> Vec<&Transaction> {
        self.entries
            .iter()
            .filter(|tx| &tx.batch_id == batch_id)
            .collect()
    }

    /// Iterate all retained entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&Transaction> {
        self.entries.back()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if ledger is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retention cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries ever appended (retained + evicted since this instance was built)
    pub fn total_appended(&self) -> u64 {
        self.next_sequence
    }

    /// Entries evicted by this instance
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Copy of retained entries, oldest first
    pub fn to_vec(&self) -> Vec<Transaction> {
        self.entries.iter().cloned().collect()
    }
}

fn integrity_token(
    txn_id: &TxnId,
    sequence: u64,
    batch_id: &BatchId,
    from: Role,
    to: Role,
    timestamp: DateTime<Utc>,
    location: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(txn_id.as_str().as_bytes());
    hasher.update(&sequence.to_be_bytes());
    hasher.update(batch_id.as_str().as_bytes());
    hasher.update(from.code().as_bytes());
    hasher.update(to.code().as_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update(location.as_bytes());
    format!("0x{}", hasher.finalize().to_hex())
}

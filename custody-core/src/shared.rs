//! Lock-based sharing for synchronous hosts
//!
//! [`SharedEngine`] wraps a [`CustodyEngine`] in a `parking_lot::RwLock`:
//! queries take the read lock and run concurrently, mutations take the write
//! lock. Use [`crate::actor`] instead when the host is async.

use crate::{engine::CustodyEngine, Config};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Cloneable, thread-safe engine handle
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<RwLock<CustodyEngine>>,
}

impl SharedEngine {
    /// Wrap an engine
    pub fn new(engine: CustodyEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Empty engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(CustodyEngine::new(config))
    }

    /// Run a query under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&CustodyEngine) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run a mutation under the write lock
    pub fn write<R>(&self, f: impl FnOnce(&mut CustodyEngine) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Hold the read lock directly
    pub fn read_guard(&self) -> RwLockReadGuard<'_, CustodyEngine> {
        self.inner.read()
    }

    /// Hold the write lock directly
    pub fn write_guard(&self) -> RwLockWriteGuard<'_, CustodyEngine> {
        self.inner.write()
    }
}

//! Mutex-guarded engine handle for multi-threaded hosts
//!
//! The engine itself has no locking. Hosts that touch it from more than one
//! task go through this handle so every operation runs to completion alone.

use super::TradingEngine;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<TradingEngine>>,
}

impl SharedEngine {
    pub fn new(engine: TradingEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TradingEngine> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut TradingEngine) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

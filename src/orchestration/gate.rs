//! Per-tenant exclusion between runner cycles and global toggles.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Runner cycles hold the shared side for their whole duration; a global
/// enable/disable (and its undo) takes the exclusive side, so every item
/// reflects the same toggle state before a cycle can observe it.
///
/// Per-item operations do not touch the gate; they rely on the
/// repository's versioned conditional writes.
#[derive(Debug, Default)]
pub struct CycleGate {
    lock: RwLock<()>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

//! Active-run registry.
//!
//! Tracks which run ids currently have a live execution context in this
//! process, enforcing at most one pipeline instance per run. The entry is
//! removed by a drop guard, so cleanup happens exactly once on every exit
//! path. Scope is one process lifetime: horizontal scaling needs an
//! external distributed lock, which is why the registry is injectable
//! rather than a process-wide static.

use qaflow_core::error::{QaflowError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `run_id`. Fails with `AlreadyRunning` when an instance is
    /// already tracked; the check and the insert share one lock window.
    pub fn begin(&self, run_id: &str) -> Result<RegistryGuard> {
        let mut active = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(run_id.to_string()) {
            return Err(QaflowError::AlreadyRunning(run_id.to_string()));
        }
        Ok(RegistryGuard {
            registry: self.clone(),
            run_id: run_id.to_string(),
        })
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, run_id: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(run_id);
    }
}

/// Releases the registry entry on drop.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: RunRegistry,
    run_id: String,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.release(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

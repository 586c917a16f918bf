//! Memory pressure checks used by [`SimpleCache`](super::SimpleCache) to decide
//! when to shed half of its entries.
//!
//! Requires the `memory-stats` feature flag for real measurements. Without it,
//! [`MemoryPressureProbe::system`] never reports pressure.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Available memory below this many MiB counts as pressure.
pub const DEFAULT_LOW_MEMORY_MB: u64 = 1024;

#[derive(Clone)]
pub struct MemoryPressureProbe {
    check: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Override for testing: 0=no override, 1=relaxed, 2=under pressure
    pressure_override: Arc<AtomicU8>,
}

impl fmt::Debug for MemoryPressureProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressureProbe")
            .field("override", &self.pressure_override.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryPressureProbe {
    fn default() -> Self {
        Self::system()
    }
}

impl MemoryPressureProbe {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        MemoryPressureProbe {
            check: Arc::new(check),
            pressure_override: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn never() -> Self {
        Self::new(|| false)
    }

    /// Reports pressure when available system memory drops below
    /// [`DEFAULT_LOW_MEMORY_MB`].
    pub fn system() -> Self {
        Self::new(|| match available_memory_mb() {
            Some(mb) => mb < DEFAULT_LOW_MEMORY_MB,
            None => false,
        })
    }

    pub fn under_pressure(&self) -> bool {
        match self.pressure_override.load(Ordering::Relaxed) {
            1 => false,
            2 => true,
            _ => (self.check)(),
        }
    }

    /// Force the probe's answer (for testing). Pass `None` to clear.
    pub fn set_override(&self, under_pressure: Option<bool>) {
        let val = match under_pressure {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        };
        self.pressure_override.store(val, Ordering::Relaxed);
    }
}

#[cfg(feature = "memory-stats")]
fn available_memory_mb() -> Option<u64> {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    if available == 0 {
        None
    } else {
        Some(available / 1024 / 1024)
    }
}

#[cfg(not(feature = "memory-stats"))]
fn available_memory_mb() -> Option<u64> {
    None
}

//! Thread-shareable handle to a [`System`].
//!
//! `System` itself is single-threaded. Hosts that poll run status from a
//! worker thread while another thread reconfigures wrap it here: one coarse
//! lock serializes every call, so no two operations ever interleave on the
//! hardware.
//!
//! ```rust,ignore
//! let shared = SharedSystem::new(system);
//! let poller = shared.clone();
//! std::thread::spawn(move || {
//!     let (det, status) = poller.with(|s| s.isrunning_any())?;
//!     // ...
//! });
//! ```

use crate::system::System;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// `Arc<Mutex<System>>` with convenience accessors.
#[derive(Clone)]
pub struct SharedSystem {
    inner: Arc<Mutex<System>>,
}

impl SharedSystem {
    /// Wrap a system for sharing.
    pub fn new(system: System) -> Self {
        Self {
            inner: Arc::new(Mutex::new(system)),
        }
    }

    /// Exclusive access until the guard drops.
    pub fn lock(&self) -> MutexGuard<'_, System> {
        self.inner.lock()
    }

    /// Run `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut System) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Take the system back if this is the last handle.
    pub fn try_unwrap(self) -> Result<System, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl From<System> for SharedSystem {
    fn from(system: System) -> Self {
        Self::new(system)
    }
}

impl std::fmt::Debug for SharedSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSystem")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}

//! Machine-dependent transport abstraction.
//!
//! A [`Transport`] is the thin layer between the board drivers and an
//! actual bus (CAMAC, EPP, USB, serial). The core never talks to a bus
//! directly; it opens modules and hands the resulting [`IoChan`] to the
//! board driver together with the transport.
//!
//! Transports are produced by [`TransportFactory`] implementations
//! registered in a [`TransportCatalog`] under their interface tag
//! (`"epp"`, `"usb"`, ...).

use crate::error::{DriverError, DriverErrorKind, DriverResult, Result, XerxesError};
use crate::types::IoChan;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Direction and addressing mode of a raw transport transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// Read data words starting at the current address.
    ReadData,
    /// Write data words starting at the current address.
    WriteData,
    /// Read back the address register.
    ReadAddress,
    /// Load the address register.
    WriteAddress,
}

/// Bus access for one interface.
pub trait Transport: Send + Sync {
    /// Interface tag this transport was created for.
    fn tag(&self) -> &str;

    /// Prepare the library for up to `max_modules` modules.
    fn initialize(&self, max_modules: usize, io_name: &str) -> DriverResult<()>;

    /// Open one module addressed by `iostring`.
    fn open(&self, iostring: &str) -> DriverResult<IoChan>;

    /// Release a channel returned by `open`.
    fn close(&self, io_chan: IoChan) -> DriverResult<()>;

    /// Raw block transfer.
    fn io(&self, io_chan: IoChan, op: IoOp, address: u32, data: &mut [u16]) -> DriverResult<()>;

    /// Blocking wait.
    fn wait(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Take or release an exclusive hardware lock for a module.
    fn lock_resource(&self, io_chan: IoChan, lock: bool) -> DriverResult<()> {
        let _ = (io_chan, lock);
        Err(DriverError::new(
            self.tag(),
            DriverErrorKind::Lock,
            "resource locking is not available",
        ))
    }
}

/// Builds transports for one interface tag.
pub trait TransportFactory: Send + Sync {
    /// Tags served by this factory, lower case.
    fn tags(&self) -> Vec<String>;

    /// Create the transport for `tag` bound to the device `io_name`.
    fn create(&self, tag: &str, io_name: &str) -> DriverResult<Arc<dyn Transport>>;
}

/// Runtime registry of the transports compiled into a binary.
#[derive(Default, Clone)]
pub struct TransportCatalog {
    factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl TransportCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every tag of `factory`, replacing earlier registrations.
    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        for tag in factory.tags() {
            self.factories.insert(tag.to_ascii_lowercase(), Arc::clone(&factory));
        }
    }

    /// True if `tag` is registered, ignoring case.
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(&tag.to_ascii_lowercase())
    }

    /// Registered tags, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Create a transport through the factory registered for `tag`.
    pub fn create(&self, tag: &str, io_name: &str) -> Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(&tag.to_ascii_lowercase())
            .ok_or_else(|| XerxesError::Initialize(format!("no transport for interface '{}'", tag)))?;
        factory
            .create(tag, io_name)
            .map_err(|e| XerxesError::Initialize(format!("unable to create '{}' transport: {}", tag, e)))
    }
}

impl std::fmt::Debug for TransportCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCatalog")
            .field("tags", &self.list())
            .finish()
    }
}

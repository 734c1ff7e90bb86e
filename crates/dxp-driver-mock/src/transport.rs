//! Simulated machine-dependent transport.

use crate::common::ErrorConfig;
use crate::hardware::MockHardware;
use dxp_core::{DriverError, DriverErrorKind, DriverResult, IoChan, IoOp, Transport, TransportFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Interface tags served by [`MockTransportFactory::new`].
pub const MOCK_TAGS: &[&str] = &["epp", "usb", "camac", "serial", "mock"];

/// [`Transport`] that opens modules in a [`MockHardware`].
pub struct MockTransport {
    tag: String,
    io_name: String,
    hardware: Arc<MockHardware>,
    errors: ErrorConfig,
}

impl MockTransport {
    /// Transport for `tag` on the device `io_name`.
    pub fn new(
        tag: impl Into<String>,
        io_name: impl Into<String>,
        hardware: Arc<MockHardware>,
        errors: ErrorConfig,
    ) -> Self {
        Self {
            tag: tag.into(),
            io_name: io_name.into(),
            hardware,
            errors,
        }
    }

    /// Device name given at creation.
    pub fn io_name(&self) -> &str {
        &self.io_name
    }

    fn check(&self, operation: &'static str) -> DriverResult<()> {
        self.errors.check_operation(&self.tag, operation)
    }

    fn unknown(&self, io_chan: IoChan) -> DriverError {
        DriverError::new(
            self.tag.as_str(),
            DriverErrorKind::Communication,
            format!("I/O channel {} is not open", io_chan),
        )
    }
}

impl Transport for MockTransport {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn initialize(&self, max_modules: usize, io_name: &str) -> DriverResult<()> {
        self.check("initialize")?;
        self.hardware.with_journal(|j| j.stats.transport_inits += 1);
        debug!(tag = %self.tag, io_name, max_modules, "transport initialized");
        Ok(())
    }

    fn open(&self, iostring: &str) -> DriverResult<IoChan> {
        self.check("open")?;
        if iostring.is_empty() {
            return Err(DriverError::new(
                self.tag.as_str(),
                DriverErrorKind::Open,
                "empty iostring",
            ));
        }
        self.hardware.open_module(iostring).ok_or_else(|| {
            DriverError::new(
                self.tag.as_str(),
                DriverErrorKind::Open,
                format!("{} is already open", iostring),
            )
        })
    }

    fn close(&self, io_chan: IoChan) -> DriverResult<()> {
        self.check("close")?;
        if self.hardware.close_module(io_chan) {
            Ok(())
        } else {
            Err(self.unknown(io_chan))
        }
    }

    fn io(&self, io_chan: IoChan, op: IoOp, address: u32, data: &mut [u16]) -> DriverResult<()> {
        self.check("io")?;
        let _ = address;
        self.hardware
            .with_module(io_chan, |_, _| {
                if matches!(op, IoOp::ReadData | IoOp::ReadAddress) {
                    data.iter_mut().for_each(|word| *word = 0);
                }
            })
            .ok_or_else(|| self.unknown(io_chan))
    }

    fn wait(&self, duration: Duration) {
        self.hardware.with_journal(|j| j.stats.waited += duration);
        if self.hardware.config().mode.sleeps() {
            std::thread::sleep(duration);
        }
    }

    fn lock_resource(&self, io_chan: IoChan, lock: bool) -> DriverResult<()> {
        self.check("lock_resource")?;
        self.hardware
            .with_module(io_chan, |module, _| {
                if lock && module.locked {
                    Err(DriverError::new(
                        self.tag.as_str(),
                        DriverErrorKind::Lock,
                        format!("I/O channel {} is already locked", io_chan),
                    ))
                } else {
                    module.locked = lock;
                    Ok(())
                }
            })
            .unwrap_or_else(|| Err(self.unknown(io_chan)))
    }
}

/// Creates [`MockTransport`]s for a set of interface tags.
pub struct MockTransportFactory {
    hardware: Arc<MockHardware>,
    errors: ErrorConfig,
    tags: Vec<String>,
}

impl MockTransportFactory {
    /// Serve every [`MOCK_TAGS`] entry.
    pub fn new(hardware: Arc<MockHardware>) -> Self {
        Self {
            hardware,
            errors: ErrorConfig::none(),
            tags: MOCK_TAGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Inject faults into every transport created here.
    #[must_use]
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }
}

impl TransportFactory for MockTransportFactory {
    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn create(&self, tag: &str, io_name: &str) -> DriverResult<Arc<dyn Transport>> {
        self.errors.check_operation(tag, "create_transport")?;
        Ok(Arc::new(MockTransport::new(
            tag,
            io_name,
            Arc::clone(&self.hardware),
            self.errors.clone(),
        )))
    }
}

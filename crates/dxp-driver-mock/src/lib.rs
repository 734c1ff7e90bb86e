//! Simulated DXP hardware for Xerxes.
//!
//! Provides a [`BoardDriver`](dxp_core::BoardDriver) and a
//! [`Transport`](dxp_core::Transport) backed by an in-memory model of a
//! crate of DXP modules, so the registry and acquisition layers can be
//! exercised without hardware.
//!
//! # Features
//!
//! - Firmware downloads are journaled ([`DownloadRecord`]) so broadcast vs.
//!   per-channel downloads can be asserted
//! - Image loads, interface initialisations and run starts are counted
//!   ([`MockStats`])
//! - DSP boot delay, spectrum synthesis and run flags follow [`MockMode`]
//! - Any operation can be made to fail through [`ErrorConfig`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use dxp_driver_mock::{catalogs, MockConfig, MockHardware};
//!
//! let hardware = MockHardware::new(MockConfig::default());
//! let (drivers, transports) = catalogs(&hardware);
//! let mut system = dxp_hardware::System::new(settings, drivers, transports);
//! ```

pub mod board;
pub mod common;
pub mod firmware;
pub mod hardware;
pub mod transport;

pub use board::{MockBoardDriver, MockDriverFactory};
pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng};
pub use hardware::{DownloadKind, DownloadRecord, MockConfig, MockHardware, MockStats};
pub use transport::{MockTransport, MockTransportFactory, MOCK_TAGS};

use dxp_core::{DriverCatalog, TransportCatalog};
use std::sync::Arc;

/// Catalogs with simulated drivers for every known board type and
/// simulated transports for every [`MOCK_TAGS`] entry.
pub fn catalogs(hardware: &Arc<MockHardware>) -> (DriverCatalog, TransportCatalog) {
    catalogs_with_errors(hardware, ErrorConfig::none())
}

/// Like [`catalogs`], with the same fault injection on drivers and
/// transports.
pub fn catalogs_with_errors(
    hardware: &Arc<MockHardware>,
    errors: ErrorConfig,
) -> (DriverCatalog, TransportCatalog) {
    let mut drivers = DriverCatalog::new();
    drivers.register(Arc::new(
        MockDriverFactory::new(Arc::clone(hardware)).with_errors(errors.clone()),
    ));
    let mut transports = TransportCatalog::new();
    transports.register(Arc::new(
        MockTransportFactory::new(Arc::clone(hardware)).with_errors(errors),
    ));
    (drivers, transports)
}

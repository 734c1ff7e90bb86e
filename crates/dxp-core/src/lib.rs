//! `dxp-core`
//!
//! Core types and capability traits for the Xerxes DXP control library.
//!
//! This crate holds everything the configuration registry and the
//! acquisition orchestrator in `dxp-hardware` share with the board drivers
//! and transports that plug into them.
//!
//! ## Key Types
//!
//! - [`BoardDriver`]: per board family operations (firmware download,
//!   parameter access, run control, calibration, passthrough)
//! - [`Transport`]: machine-dependent bus access (open/close/io/wait/lock)
//! - [`DriverCatalog`] / [`TransportCatalog`]: runtime registries of the
//!   implementations a binary was built with
//! - [`DspImage`], [`FippiImage`], [`ParamDefaults`]: decoded images shared
//!   between channels
//! - [`XerxesError`]: structured error type with legacy status codes

pub mod codes;
pub mod driver;
pub mod error;
pub mod firmware;
pub mod transport;
pub mod types;

pub use driver::{
    canonical_board_type, BoardDriver, BoardDriverFactory, ChannelData, DriverCatalog, FpgaSet,
    ModuleLink, KNOWN_BOARD_TYPES,
};
pub use error::{DriverError, DriverErrorKind, DriverResult, Result, XerxesError};
pub use firmware::{DspImage, FippiImage, ParamAccess, ParamDefaults, ParamSymbol};
pub use transport::{IoOp, Transport, TransportCatalog, TransportFactory};
pub use types::{
    ChannelMask, ChannelTarget, ControlTask, DetChan, DspState, FpgaKind, IoChan, MemoryRegion,
    PreampInfo, RunState, RunStats, RunStatus, MAX_MODULE_CHANNELS, MAX_SYMBOLS,
};

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

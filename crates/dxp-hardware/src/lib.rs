//! `dxp-hardware`
//!
//! Configuration registry and acquisition orchestrator for XIA DXP
//! spectrometer systems.
//!
//! A [`System`] is built from two legacy text files: the system file names
//! the board types in use plus the modules and preamp files, and the
//! modules file describes every module with its interface, detector ids
//! and firmware. Once built, each detector channel is addressed by its
//! detector id, and every hardware step is dispatched to the board
//! driver registered for the module's board type.
//!
//! ```text
//!   system file ──▶ read_config ──┐
//!                                 ├──▶ System { registries, boards }
//!  modules file ──▶ assign_channel┘            │
//!                                              ▼
//!                     user_setup: fipconfig → dspconfig → defaults → ASC
//!                                              │
//!                                              ▼
//!                    start_run / readout_detector_run / stop_run ...
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use dxp_hardware::{System, XerxesSettings};
//!
//! let (drivers, transports) = my_backends();
//! let mut system = System::new(XerxesSettings::default(), drivers, transports);
//! system.initialize("xia.cfg")?;
//! system.start_run(Some(1), false)?;
//! // ...
//! system.stop_run()?;
//! let readout = system.readout_detector_run(0)?;
//! ```

pub mod acquisition;
pub mod board;
pub mod builder;
pub mod config;
pub mod registry;
pub mod resolver;
pub mod shared;
pub mod system;

pub use acquisition::{ChannelParams, ConfigSnapshot, Readout, SymbolLimits};
pub use board::{Board, BoardSummary, ChannelSlot, ChannelSummary};
pub use builder::{ChannelFiles, SystemFiles};
pub use config::{load_settings, FileLocator, PreampSettings, XerxesSettings};
pub use registry::{Handle, Registry};
pub use shared::SharedSystem;
pub use system::{BoardTypeEntry, InterfaceEntry, System, SystemInfo, SystemSummary};

pub use dxp_core::{DetChan, IoChan, Result, RunStats, RunStatus, XerxesError};

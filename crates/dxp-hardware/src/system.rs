//! The configured system: registries, boards and counters.
//!
//! [`System`] owns every piece of configuration state:
//!
//! ```text
//! ┌────────────────────────────── System ──────────────────────────────┐
//! │  btypes   Registry<name, BoardTypeEntry>      (driver per family)  │
//! │  ifaces   Registry<(tag, iolib), InterfaceEntry> (transport)       │
//! │  dsps     Registry<filename, DspImage>                             │
//! │  fippis   Registry<filename, FippiImage>                           │
//! │  defaults Registry<filename, ParamDefaults>                        │
//! │                                                                    │
//! │  boards   Vec<Board> ── handles ──▶ the five registries above      │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Boards refer to registry entries by handle only, so teardown clears the
//! boards before any registry. Registry inserts are insert-or-find: a
//! second request for a known key returns the existing entry without
//! touching the file system or the driver.

use crate::board::{
    Board, BoardSummary, BoardTypeId, ChannelSummary, DefaultsId, DspId, FippiId, InterfaceId,
};
use crate::config::{FileLocator, XerxesSettings};
use crate::registry::{Handle, Registry};
use dxp_core::{
    BoardDriver, DetChan, DriverCatalog, DspImage, FippiImage, IoChan, ParamDefaults, Result,
    Transport, TransportCatalog, XerxesError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A board family known to the system.
pub struct BoardTypeEntry {
    /// Canonical board type name.
    pub name: String,
    /// Auxiliary library name from the system file, if any.
    pub pointer: Option<String>,
    /// Driver serving every module of this type.
    pub driver: Arc<dyn BoardDriver>,
}

impl std::fmt::Debug for BoardTypeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardTypeEntry")
            .field("name", &self.name)
            .field("pointer", &self.pointer)
            .finish_non_exhaustive()
    }
}

/// An initialized transport library.
pub struct InterfaceEntry {
    /// Transport tag, lower case.
    pub tag: String,
    /// I/O library or device name.
    pub iolib: String,
    /// Initialized transport.
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceEntry")
            .field("tag", &self.tag)
            .field("iolib", &self.iolib)
            .finish_non_exhaustive()
    }
}

/// Interfaces are keyed by transport tag and I/O library name.
pub type InterfaceKey = (String, String);

/// Files named by the system config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemInfo {
    /// Path the system file was read from.
    pub config: Option<PathBuf>,
    /// Module file named by the system file.
    pub modules: Option<String>,
    /// Preamp file named by the system file.
    pub preamp: Option<String>,
}

/// Serializable snapshot of the whole configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    /// Library version.
    pub version: &'static str,
    /// Configuration files.
    pub info: SystemInfo,
    /// Registered board types.
    pub board_types: Vec<String>,
    /// Registered interfaces as `tag:iolib`.
    pub interfaces: Vec<String>,
    /// Loaded DSP images.
    pub dsp_images: Vec<String>,
    /// Loaded FPGA images.
    pub fippi_images: Vec<String>,
    /// Loaded defaults files.
    pub defaults: Vec<String>,
    /// Number of modules.
    pub ndxp: usize,
    /// Number of used channels.
    pub ndxpchan: usize,
    /// Per-module summaries.
    pub boards: Vec<BoardSummary>,
}

/// Registries, boards and the collaborators needed to fill them.
pub struct System {
    pub(crate) settings: XerxesSettings,
    pub(crate) locator: FileLocator,
    drivers: DriverCatalog,
    transports: TransportCatalog,
    pub(crate) btypes: Registry<String, BoardTypeEntry>,
    pub(crate) ifaces: Registry<InterfaceKey, InterfaceEntry>,
    pub(crate) dsps: Registry<String, DspImage>,
    pub(crate) fippis: Registry<String, FippiImage>,
    pub(crate) defaults: Registry<String, ParamDefaults>,
    pub(crate) boards: Vec<Board>,
    pub(crate) info: SystemInfo,
}

impl System {
    /// Empty system using the given catalogs.
    pub fn new(settings: XerxesSettings, drivers: DriverCatalog, transports: TransportCatalog) -> Self {
        let locator = FileLocator::new(&settings);
        Self {
            settings,
            locator,
            drivers,
            transports,
            btypes: Registry::new("board type"),
            ifaces: Registry::new("interface"),
            dsps: Registry::new("DSP image"),
            fippis: Registry::new("FiPPI image"),
            defaults: Registry::new("parameter defaults"),
            boards: Vec::new(),
            info: SystemInfo::default(),
        }
    }

    /// Replace the file locator (custom environment lookups in tests).
    #[must_use]
    pub fn with_locator(mut self, locator: FileLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Effective settings.
    pub fn settings(&self) -> &XerxesSettings {
        &self.settings
    }

    /// File locator used for every image and config lookup.
    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    /// Files named by the system config.
    pub fn info(&self) -> &SystemInfo {
        &self.info
    }

    /// Every module, in order.
    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    /// Module at position `module`.
    pub fn board(&self, module: usize) -> Option<&Board> {
        self.boards.get(module)
    }

    /// Board type entry behind `id`.
    pub fn board_type(&self, id: BoardTypeId) -> Option<&BoardTypeEntry> {
        self.btypes.get(id)
    }

    /// Interface entry behind `id`.
    pub fn interface(&self, id: InterfaceId) -> Option<&InterfaceEntry> {
        self.ifaces.get(id)
    }

    /// DSP image behind `id`.
    pub fn dsp(&self, id: DspId) -> Option<&DspImage> {
        self.dsps.get(id)
    }

    /// FPGA image behind `id`.
    pub fn fippi(&self, id: FippiId) -> Option<&FippiImage> {
        self.fippis.get(id)
    }

    /// Defaults set behind `id`.
    pub fn param_defaults(&self, id: DefaultsId) -> Option<&ParamDefaults> {
        self.defaults.get(id)
    }

    /// Handle of a loaded DSP image.
    pub fn find_dsp(&self, filename: &str) -> Option<DspId> {
        self.dsps.find(filename)
    }

    /// Handle of a loaded FPGA image.
    pub fn find_fippi(&self, filename: &str) -> Option<FippiId> {
        self.fippis.find(filename)
    }

    /// Handle of a loaded defaults file.
    pub fn find_defaults(&self, filename: &str) -> Option<DefaultsId> {
        self.defaults.find(filename)
    }

    /// Handle of a board type, accepting aliases.
    pub fn find_btype(&self, name: &str) -> Option<BoardTypeId> {
        let canonical = dxp_core::canonical_board_type(name)?;
        self.btypes.find(canonical)
    }

    // =========================================================================
    // Registry inserts
    // =========================================================================

    /// Declare a board type, creating its driver on first use.
    pub fn add_btype(&mut self, name: &str, pointer: Option<&str>) -> Result<BoardTypeId> {
        let canonical = dxp_core::canonical_board_type(name).ok_or_else(|| {
            let err = XerxesError::UnknownBoardType {
                name: name.to_string(),
            };
            error!(board_type = name, "unknown board type");
            err
        })?;
        let drivers = &self.drivers;
        let (id, created) = self.btypes.insert_or_find(canonical.to_string(), |key| {
            drivers.create(key, pointer).map(|driver| BoardTypeEntry {
                name: key.clone(),
                pointer: pointer.map(str::to_string),
                driver,
            })
        })?;
        if created {
            debug!(board_type = canonical, pointer = pointer.unwrap_or("-"), "board type added");
        }
        Ok(id)
    }

    /// Find or create the interface for `(tag, iolib)`. A new transport is
    /// initialized exactly once.
    pub fn add_iface(&mut self, tag: &str, iolib: &str) -> Result<InterfaceId> {
        let key = (tag.to_ascii_lowercase(), iolib.to_string());
        let transports = &self.transports;
        let max_modules = self.settings.max_modules;
        let module = self.boards.len();
        let (id, created) = self.ifaces.insert_or_find(key, |(tag, iolib)| {
            let transport = transports.create(tag, iolib)?;
            transport
                .initialize(max_modules, iolib)
                .map_err(|source| XerxesError::driver("initialize_transport", module, source))?;
            Ok::<_, XerxesError>(InterfaceEntry {
                tag: tag.clone(),
                iolib: iolib.clone(),
                transport,
            })
        })
        .inspect_err(|e| error!(tag, iolib, error = %e, "unable to add interface"))?;
        if created {
            debug!(tag, iolib, "interface added");
        }
        Ok(id)
    }

    fn driver_of(&self, btype: BoardTypeId) -> Result<Arc<dyn BoardDriver>> {
        self.btypes
            .get(btype)
            .map(|entry| Arc::clone(&entry.driver))
            .ok_or_else(|| XerxesError::Initialize("board type was removed".to_string()))
    }

    /// Load (or reuse) a DSP image through the board type's driver.
    pub fn add_dsp(&mut self, btype: BoardTypeId, filename: &str) -> Result<DspId> {
        let driver = self.driver_of(btype)?;
        let locator = &self.locator;
        let module = self.boards.len();
        let (id, created) = self.dsps.insert_or_find(filename.to_string(), |name| {
            let path = locator.find(name)?;
            driver
                .load_dsp(name, &path)
                .map_err(|source| XerxesError::driver("load_dsp", module, source))
        })
        .inspect_err(|e| error!(file = filename, error = %e, "unable to load DSP image"))?;
        if created {
            debug!(file = filename, "DSP image loaded");
        }
        Ok(id)
    }

    /// Load (or reuse) an FPGA image through the board type's driver.
    pub fn add_fippi(&mut self, btype: BoardTypeId, filename: &str) -> Result<FippiId> {
        let driver = self.driver_of(btype)?;
        let locator = &self.locator;
        let module = self.boards.len();
        let (id, created) = self.fippis.insert_or_find(filename.to_string(), |name| {
            let path = locator.find(name)?;
            driver
                .load_fippi(name, &path)
                .map_err(|source| XerxesError::driver("load_fippi", module, source))
        })
        .inspect_err(|e| error!(file = filename, error = %e, "unable to load FPGA image"))?;
        if created {
            debug!(file = filename, "FPGA image loaded");
        }
        Ok(id)
    }

    /// Load (or reuse) a parameter defaults file. Names starting with
    /// `NULL` produce an empty set without touching the file system.
    pub fn add_defaults(&mut self, btype: BoardTypeId, filename: &str) -> Result<DefaultsId> {
        let driver = self.driver_of(btype)?;
        let locator = &self.locator;
        let module = self.boards.len();
        let (id, created) = self.defaults.insert_or_find(filename.to_string(), |name| {
            if ParamDefaults::is_null_name(name) {
                return Ok(ParamDefaults::new(name.as_str(), Vec::new()));
            }
            let path = locator.find(name)?;
            driver
                .load_defaults(name, &path)
                .map_err(|source| XerxesError::driver("load_defaults", module, source))
        })
        .inspect_err(|e| error!(file = filename, error = %e, "unable to load parameter defaults"))?;
        if created {
            debug!(file = filename, "parameter defaults loaded");
        }
        Ok(id)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Close the transport channel of a board. A failure is logged and
    /// does not stop the caller.
    fn close_board(&self, board: &Board) {
        let Some(entry) = self.ifaces.get(board.iface) else {
            warn!(module = board.module, io_chan = board.io_chan, "interface gone, channel not closed");
            return;
        };
        match entry.transport.close(board.io_chan) {
            Ok(()) => debug!(module = board.module, io_chan = board.io_chan, "module closed"),
            Err(e) => warn!(
                module = board.module,
                io_chan = board.io_chan,
                error = %e,
                "unable to close module"
            ),
        }
    }

    /// Remove a module and close its transport channel. Later modules move
    /// down by one.
    pub fn del_board(&mut self, module: usize) -> Result<Board> {
        if module >= self.boards.len() {
            return Err(XerxesError::NoMatch {
                kind: "module",
                key: module.to_string(),
            });
        }
        let board = self.boards.remove(module);
        self.close_board(&board);
        for (index, remaining) in self.boards.iter_mut().enumerate() {
            remaining.module = index;
        }
        debug!(module, iostring = %board.iostring, "module removed");
        Ok(board)
    }

    /// Remove the module opened on `iostring` through `(tag, iolib)`.
    pub fn del_board_by_address(&mut self, tag: &str, iolib: &str, iostring: &str) -> Result<Board> {
        let iface = self.ifaces.find(&(tag.to_ascii_lowercase(), iolib.to_string()));
        let module = self
            .boards
            .iter()
            .position(|board| Some(board.iface) == iface && board.iostring == iostring)
            .ok_or_else(|| XerxesError::NoMatch {
                kind: "module",
                key: iostring.to_string(),
            })?;
        self.del_board(module)
    }

    fn first_user(&self, uses: impl Fn(&Board) -> bool) -> Option<usize> {
        self.boards.iter().find(|board| uses(board)).map(|board| board.module)
    }

    /// Remove a board type no module uses.
    pub fn del_btype(&mut self, name: &str) -> Result<()> {
        let canonical = dxp_core::canonical_board_type(name).unwrap_or(name);
        let id = self.btypes.find(canonical).ok_or_else(|| XerxesError::NoMatch {
            kind: "board type",
            key: name.to_string(),
        })?;
        if let Some(module) = self.first_user(|board| board.btype == id) {
            return Err(XerxesError::InUse {
                kind: "board type",
                key: name.to_string(),
                module,
            });
        }
        self.btypes.remove(canonical);
        debug!(board_type = canonical, "board type removed");
        Ok(())
    }

    /// Remove a DSP image no channel uses.
    pub fn del_dsp(&mut self, filename: &str) -> Result<()> {
        let id = self.dsps.find(filename).ok_or_else(|| XerxesError::NoMatch {
            kind: "DSP image",
            key: filename.to_string(),
        })?;
        if let Some(module) = self.first_user(|board| board.uses_dsp(id)) {
            return Err(XerxesError::InUse {
                kind: "DSP image",
                key: filename.to_string(),
                module,
            });
        }
        self.dsps.remove(filename);
        debug!(file = filename, "DSP image removed");
        Ok(())
    }

    /// Remove an FPGA image no channel or MMU uses.
    pub fn del_fippi(&mut self, filename: &str) -> Result<()> {
        let id = self.fippis.find(filename).ok_or_else(|| XerxesError::NoMatch {
            kind: "FiPPI image",
            key: filename.to_string(),
        })?;
        if let Some(module) = self.first_user(|board| board.uses_fippi(id)) {
            return Err(XerxesError::InUse {
                kind: "FiPPI image",
                key: filename.to_string(),
                module,
            });
        }
        self.fippis.remove(filename);
        debug!(file = filename, "FiPPI image removed");
        Ok(())
    }

    /// Remove a defaults file no channel uses.
    pub fn del_defaults(&mut self, filename: &str) -> Result<()> {
        let id = self.defaults.find(filename).ok_or_else(|| XerxesError::NoMatch {
            kind: "parameter defaults",
            key: filename.to_string(),
        })?;
        if let Some(module) = self.first_user(|board| board.uses_defaults(id)) {
            return Err(XerxesError::InUse {
                kind: "parameter defaults",
                key: filename.to_string(),
                module,
            });
        }
        self.defaults.remove(filename);
        debug!(file = filename, "parameter defaults removed");
        Ok(())
    }

    /// Close every module, then drop every board and registry entry. Safe
    /// to call repeatedly.
    pub fn reset_all(&mut self) {
        let boards = self.boards.len();
        for board in &self.boards {
            self.close_board(board);
        }
        self.boards.clear();
        self.ifaces.clear();
        self.dsps.clear();
        self.fippis.clear();
        self.defaults.clear();
        self.btypes.clear();
        self.info = SystemInfo::default();
        info!(boards, "system reset");
    }

    // =========================================================================
    // Counting
    // =========================================================================

    /// Number of modules.
    pub fn ndxp(&self) -> usize {
        self.boards.len()
    }

    /// Number of used channels across all modules.
    pub fn ndxpchan(&self) -> usize {
        self.boards.iter().map(|board| board.used.count()).sum()
    }

    /// I/O channel and used-channel mask of every module.
    pub fn get_electronics(&self) -> Vec<(IoChan, u32)> {
        self.boards
            .iter()
            .map(|board| (board.io_chan, board.used.bits()))
            .collect()
    }

    /// Every used detector channel, in module order.
    pub fn get_detectors(&self) -> Result<Vec<DetChan>> {
        let detectors: Vec<DetChan> = self
            .boards
            .iter()
            .flat_map(|board| board.used_channels().filter_map(|chan| board.det_chan(chan)))
            .collect();
        if detectors.is_empty() {
            return Err(XerxesError::NoChannels);
        }
        Ok(detectors)
    }

    /// Board type name of the module carrying `det`.
    pub fn get_board_type(&self, det: DetChan) -> Result<&str> {
        let (module, _) = self.det_to_elec(det)?;
        let board = &self.boards[module];
        self.btypes
            .get(board.btype)
            .map(|entry| entry.name.as_str())
            .ok_or_else(|| XerxesError::UnknownBoardType {
                name: format!("of module {}", module),
            })
    }

    /// Library version string.
    pub fn version(&self) -> &'static str {
        dxp_core::VERSION
    }

    fn name_of<T>(registry: &Registry<String, T>, id: Option<Handle<T>>) -> Option<String> {
        id.and_then(|id| registry.key(id)).cloned()
    }

    /// Serializable view of the whole configuration.
    pub fn summary(&self) -> SystemSummary {
        let boards = self
            .boards
            .iter()
            .map(|board| BoardSummary {
                module: board.module,
                board_type: self
                    .btypes
                    .get(board.btype)
                    .map(|entry| entry.name.clone())
                    .unwrap_or_default(),
                interface: self
                    .ifaces
                    .get(board.iface)
                    .map(|entry| format!("{}:{}", entry.tag, entry.iolib))
                    .unwrap_or_default(),
                iostring: board.iostring.clone(),
                io_chan: board.io_chan,
                det_chans: board.det_chans.clone(),
                used: board.used.bits(),
                run: board.run,
                channels: board
                    .channels
                    .iter()
                    .enumerate()
                    .map(|(mod_chan, slot)| ChannelSummary {
                        mod_chan,
                        det_chan: board.det_chans[mod_chan],
                        dsp: Self::name_of(&self.dsps, slot.dsp),
                        fippi: Self::name_of(&self.fippis, slot.fippi),
                        user_fippi: Self::name_of(&self.fippis, slot.user_fippi),
                        defaults: Self::name_of(&self.defaults, slot.defaults),
                        nparams: slot.params().len(),
                        dsp_state: slot.dsp_state,
                    })
                    .collect(),
            })
            .collect();
        SystemSummary {
            version: self.version(),
            info: self.info.clone(),
            board_types: self.btypes.keys().cloned().collect(),
            interfaces: self
                .ifaces
                .keys()
                .map(|(tag, iolib)| format!("{}:{}", tag, iolib))
                .collect(),
            dsp_images: self.dsps.keys().cloned().collect(),
            fippi_images: self.fippis.keys().cloned().collect(),
            defaults: self.defaults.keys().cloned().collect(),
            ndxp: self.ndxp(),
            ndxpchan: self.ndxpchan(),
            boards,
        }
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("btypes", &self.btypes)
            .field("ifaces", &self.ifaces)
            .field("dsps", &self.dsps)
            .field("fippis", &self.fippis)
            .field("defaults", &self.defaults)
            .field("boards", &self.boards.len())
            .finish()
    }
}

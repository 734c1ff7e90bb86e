//! Registry builder.
//!
//! Turns the system file and the modules file into board types,
//! interfaces, images and boards. The modules file is applied directive by
//! directive with a [`ModulesBuilder`] holding the "working" board type,
//! interface, module and images; `end` clears them so one file may describe
//! several independent groups of modules.

use crate::acquisition::driver_call;
use crate::board::{BoardTypeId, DefaultsId, DspId, FippiId, InterfaceId};
use crate::config::locate::read_text;
use crate::config::{parse_modules, parse_system, ImageSlot, ModuleDirective, SystemDirective};
use crate::system::System;
use crate::Board;
use dxp_core::{DetChan, ParamDefaults, Result, XerxesError, MAX_MODULE_CHANNELS};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An image handle together with the slot it fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Assigned {
    Dsp(DspId),
    Fippi(FippiId),
    UserFippi(FippiId),
    Defaults(DefaultsId),
}

/// Resolved locations of the system-level files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemFiles {
    /// System file.
    pub config: Option<PathBuf>,
    /// Modules file.
    pub modules: Option<PathBuf>,
    /// Preamp file.
    pub preamp: Option<PathBuf>,
}

/// Resolved locations of the images assigned to one channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelFiles {
    /// DSP program.
    pub dsp: Option<PathBuf>,
    /// Filter FPGA.
    pub fippi: Option<PathBuf>,
    /// User filter FPGA.
    pub user_fippi: Option<PathBuf>,
    /// Module MMU.
    pub mmu: Option<PathBuf>,
    /// Parameter defaults.
    pub defaults: Option<PathBuf>,
}

/// Working state of one modules-file pass.
#[derive(Debug, Default)]
struct ModulesBuilder {
    btype: Option<BoardTypeId>,
    iolib: Option<String>,
    iface: Option<InterfaceId>,
    board: Option<usize>,
    dsp: Option<DspId>,
    fippi: Option<FippiId>,
    user_fippi: Option<FippiId>,
    mmu: Option<FippiId>,
    defaults: Option<DefaultsId>,
    added: usize,
}

impl ModulesBuilder {
    fn remember(&mut self, image: Assigned) {
        match image {
            Assigned::Dsp(id) => self.dsp = Some(id),
            Assigned::Fippi(id) => self.fippi = Some(id),
            Assigned::UserFippi(id) => self.user_fippi = Some(id),
            Assigned::Defaults(id) => self.defaults = Some(id),
        }
    }

    fn working_images(&self) -> Vec<Assigned> {
        let mut images = Vec::new();
        images.extend(self.dsp.map(Assigned::Dsp));
        images.extend(self.fippi.map(Assigned::Fippi));
        images.extend(self.user_fippi.map(Assigned::UserFippi));
        images.extend(self.defaults.map(Assigned::Defaults));
        images
    }

    fn require_btype(&self, line: usize, what: &str) -> Result<BoardTypeId> {
        self.btype.ok_or_else(|| XerxesError::MalformedLine {
            line,
            message: format!("{} before any board_type", what),
        })
    }

    fn apply(&mut self, system: &mut System, line: usize, directive: ModuleDirective) -> Result<()> {
        match directive {
            ModuleDirective::BoardType(name) => {
                let id = match system.find_btype(&name) {
                    Some(id) => id,
                    None => system.add_btype(&name, None)?,
                };
                self.btype = Some(id);
            }
            ModuleDirective::IoLibrary(iolib) => self.iolib = Some(iolib),
            ModuleDirective::Interface { tag, iolib } => {
                let iolib = iolib.or_else(|| self.iolib.clone()).ok_or_else(|| {
                    XerxesError::MalformedLine {
                        line,
                        message: format!("interface '{}' without an I/O library", tag),
                    }
                })?;
                self.iface = Some(system.add_iface(&tag, &iolib)?);
            }
            ModuleDirective::Module { iostring, det_chans } => {
                let btype = self.btype.ok_or_else(|| XerxesError::UnknownBoardType {
                    name: format!("(none declared before line {})", line),
                })?;
                let iface = self.iface.ok_or_else(|| {
                    XerxesError::Initialize(format!(
                        "line {}: module '{}' declared before any interface",
                        line, iostring
                    ))
                })?;
                if system.find_board(iface, &iostring).is_some() {
                    return Err(XerxesError::MalformedLine {
                        line,
                        message: format!("module '{}' is already defined", iostring),
                    });
                }
                let module = system.add_module(btype, iface, &iostring, det_chans)?;
                if let Some(board) = system.boards.get_mut(module) {
                    board.mmu = self.mmu;
                }
                for image in self.working_images() {
                    system.assign(module, None, image);
                }
                self.board = Some(module);
                self.added += 1;
            }
            ModuleDirective::Default { slot, file } => {
                let btype = self.require_btype(line, &format!("default_{}", slot.as_str()))?;
                let image = system.load_image(btype, slot, &file)?;
                self.remember(image);
                if let Some(module) = self.board {
                    system.assign(module, None, image);
                }
            }
            ModuleDirective::Channel {
                slot,
                channel,
                file,
            } => {
                let module = self.board.ok_or_else(|| XerxesError::MalformedLine {
                    line,
                    message: format!("{} before any module", slot.as_str()),
                })?;
                let (btype, nchan) = {
                    let board = &system.boards[module];
                    (board.btype, board.nchan())
                };
                let chan = usize::try_from(channel)
                    .ok()
                    .filter(|chan| *chan < nchan)
                    .ok_or(XerxesError::BadChannelIndex {
                        line,
                        channel,
                        nchan,
                    })?;
                let image = system.load_image(btype, slot, &file)?;
                system.assign(module, Some(chan), image);
            }
            ModuleDirective::Mmu(file) => {
                let btype = self.require_btype(line, "mmu")?;
                let id = system.add_fippi(btype, &file)?;
                self.mmu = Some(id);
                if let Some(board) = self.board.and_then(|module| system.boards.get_mut(module)) {
                    board.mmu = Some(id);
                }
            }
            ModuleDirective::End => {
                let added = self.added;
                *self = Self::default();
                self.added = added;
            }
        }
        Ok(())
    }
}

impl System {
    // =========================================================================
    // Boards
    // =========================================================================

    pub(crate) fn find_board(&self, iface: InterfaceId, iostring: &str) -> Option<usize> {
        self.boards
            .iter()
            .position(|board| board.iface == iface && board.iostring == iostring)
    }

    /// Open a module and append it. Images are assigned separately.
    pub(crate) fn add_module(
        &mut self,
        btype: BoardTypeId,
        iface: InterfaceId,
        iostring: &str,
        det_chans: Vec<DetChan>,
    ) -> Result<usize> {
        let module = self.boards.len();
        let max = self.settings.max_modules;
        if module >= max {
            error!(max, iostring, "too many modules");
            return Err(XerxesError::ArrayCapacityExceeded {
                what: "modules",
                max,
            });
        }
        if det_chans.is_empty() {
            return Err(XerxesError::BadParameter(format!(
                "module '{}' lists no detector channels",
                iostring
            )));
        }
        if det_chans.len() > MAX_MODULE_CHANNELS {
            return Err(XerxesError::ArrayCapacityExceeded {
                what: "channels per module",
                max: MAX_MODULE_CHANNELS,
            });
        }
        for (index, det) in det_chans.iter().enumerate() {
            if *det < 0 {
                continue;
            }
            let owner = if det_chans[..index].contains(det) {
                Some(module)
            } else {
                self.boards
                    .iter()
                    .find(|board| board.find_det(*det).is_some())
                    .map(|board| board.module)
            };
            if let Some(owner) = owner {
                error!(det_chan = *det, module = owner, "duplicate detector channel");
                return Err(XerxesError::DuplicateDetectorChannel {
                    det_chan: *det,
                    module: owner,
                });
            }
        }

        let transport = self
            .ifaces
            .get(iface)
            .map(|entry| Arc::clone(&entry.transport))
            .ok_or_else(|| XerxesError::Initialize("interface was removed".to_string()))?;
        let driver = self
            .btypes
            .get(btype)
            .map(|entry| Arc::clone(&entry.driver))
            .ok_or_else(|| XerxesError::Initialize("board type was removed".to_string()))?;

        let io_chan = driver_call("open", module, transport.open(iostring))?;
        if let Err(e) = driver_call("init_driver", module, driver.init_driver(transport.as_ref())) {
            if let Err(close) = transport.close(io_chan) {
                warn!(module, io_chan, error = %close, "unable to close module after failed init");
            }
            return Err(e);
        }

        let nchan = det_chans.len();
        self.boards
            .push(Board::new(module, io_chan, iostring, btype, iface, det_chans));
        info!(module, iostring, io_chan, nchan, board_type = driver.board_type(), "module added");
        Ok(module)
    }

    /// Add a module programmatically. A module already opened on the same
    /// interface and iostring is returned instead of a new one.
    pub fn add_board(
        &mut self,
        btype: &str,
        iolib: &str,
        tag: &str,
        iostring: &str,
        det_chans: &[DetChan],
    ) -> Result<usize> {
        let btype = match self.find_btype(btype) {
            Some(id) => id,
            None => self.add_btype(btype, None)?,
        };
        let iface = self.add_iface(tag, iolib)?;
        if let Some(module) = self.find_board(iface, iostring) {
            debug!(module, iostring, "module already present");
            return Ok(module);
        }
        self.add_module(btype, iface, iostring, det_chans.to_vec())
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub(crate) fn load_image(&mut self, btype: BoardTypeId, slot: ImageSlot, file: &str) -> Result<Assigned> {
        Ok(match slot {
            ImageSlot::Dsp => Assigned::Dsp(self.add_dsp(btype, file)?),
            ImageSlot::Fippi => Assigned::Fippi(self.add_fippi(btype, file)?),
            ImageSlot::UserFippi => Assigned::UserFippi(self.add_fippi(btype, file)?),
            ImageSlot::Defaults => Assigned::Defaults(self.add_defaults(btype, file)?),
        })
    }

    /// Point one channel (or every channel) of a module at an image.
    pub(crate) fn assign(&mut self, module: usize, chan: Option<usize>, image: Assigned) {
        let nsymbols = match image {
            Assigned::Dsp(id) => self.dsps.get(id).map_or(0, |dsp| dsp.nsymbols()),
            _ => 0,
        };
        let Some(board) = self.boards.get_mut(module) else {
            return;
        };
        let channels: Vec<usize> = match chan {
            Some(chan) => vec![chan],
            None => (0..board.nchan()).collect(),
        };
        for chan in channels {
            match image {
                Assigned::Dsp(id) => board.assign_dsp(chan, id, nsymbols),
                Assigned::Fippi(id) => board.channels[chan].fippi = Some(id),
                Assigned::UserFippi(id) => board.channels[chan].user_fippi = Some(id),
                Assigned::Defaults(id) => board.channels[chan].defaults = Some(id),
            }
        }
    }

    // =========================================================================
    // Config files
    // =========================================================================

    /// Locate and apply the system configuration file.
    pub fn read_config(&mut self, name: &str) -> Result<()> {
        let path = self.locator.find(name).map_err(|_| {
            error!(file = name, "unable to open system configuration");
            XerxesError::OpenFailed {
                path: name.to_string(),
                reason: "not found in any search location".to_string(),
            }
        })?;
        let text = read_text(&path)?;
        self.load_system_str(&text)?;
        info!(
            path = %path.display(),
            board_types = self.btypes.len(),
            modules = self.info.modules.as_deref().unwrap_or("-"),
            "system configuration read"
        );
        self.info.config = Some(path);
        Ok(())
    }

    /// Apply system file text.
    pub fn load_system_str(&mut self, text: &str) -> Result<()> {
        for (_, directive) in parse_system(text)? {
            match directive {
                SystemDirective::BoardType { name, pointer } => {
                    self.add_btype(&name, pointer.as_deref())?;
                }
                SystemDirective::Preamp(file) => self.info.preamp = Some(file),
                SystemDirective::Modules(file) => self.info.modules = Some(file),
            }
        }
        Ok(())
    }

    /// Build the boards described by the modules file named in the system
    /// configuration. A `NULL` name skips the step.
    pub fn assign_channel(&mut self) -> Result<()> {
        let name = self.info.modules.clone().ok_or_else(|| {
            XerxesError::Initialize("no modules file named in the system configuration".to_string())
        })?;
        if ParamDefaults::is_null_name(&name) {
            info!("modules file is NULL, no modules defined");
            return Ok(());
        }
        let (path, text) = self.locator.read_to_string(&name)?;
        let added = self.load_modules_str(&text)?;
        info!(path = %path.display(), added, channels = self.ndxpchan(), "modules file read");
        Ok(())
    }

    /// Apply modules file text, returning the number of modules added.
    pub fn load_modules_str(&mut self, text: &str) -> Result<usize> {
        let mut builder = ModulesBuilder::default();
        for (line, directive) in parse_modules(text)? {
            builder.apply(self, line, directive).inspect_err(|e| {
                error!(line, error = %e, "modules file rejected");
            })?;
        }
        Ok(builder.added)
    }

    fn locate_optional(&self, name: Option<&str>) -> Result<Option<PathBuf>> {
        match name {
            Some(name) if !ParamDefaults::is_null_name(name) => self.locator.find(name).map(Some),
            _ => Ok(None),
        }
    }

    /// Where the system, modules and preamp files were found.
    pub fn locate_system_files(&self) -> Result<SystemFiles> {
        Ok(SystemFiles {
            config: self.info.config.clone(),
            modules: self.locate_optional(self.info.modules.as_deref())?,
            preamp: self.locate_optional(self.info.preamp.as_deref())?,
        })
    }

    /// Where the images assigned to detector `det` were found.
    pub fn locate_channel_files(&self, det: DetChan) -> Result<ChannelFiles> {
        let (module, chan) = self.det_to_elec(det)?;
        let board = &self.boards[module];
        let slot = &board.channels[chan];
        let dsp = slot.dsp.and_then(|id| self.dsps.key(id));
        let fippi = slot.fippi.and_then(|id| self.fippis.key(id));
        let user_fippi = slot.user_fippi.and_then(|id| self.fippis.key(id));
        let mmu = board.mmu.and_then(|id| self.fippis.key(id));
        let defaults = slot.defaults.and_then(|id| self.defaults.key(id));
        Ok(ChannelFiles {
            dsp: self.locate_optional(dsp.map(String::as_str))?,
            fippi: self.locate_optional(fippi.map(String::as_str))?,
            user_fippi: self.locate_optional(user_fippi.map(String::as_str))?,
            mmu: self.locate_optional(mmu.map(String::as_str))?,
            defaults: self.locate_optional(defaults.map(String::as_str))?,
        })
    }
}

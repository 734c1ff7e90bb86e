//! Board driver capability interface and catalog.
//!
//! A board family (DXP4C2X, DXPX10P, microDXP, ...) is supported by one
//! [`BoardDriver`] implementation. The core never decodes firmware formats
//! or register maps itself; every hardware-facing step of the acquisition
//! protocol is a call through this trait, dispatched on the board type a
//! module was configured with.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                Composition root (binary / tests)             │
//! │  drivers.register(Arc::new(MyBoardFactory));                 │
//! │  transports.register(Arc::new(MyTransportFactory));          │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DriverCatalog                         │
//! │  factories: HashMap<board_type, Arc<dyn BoardDriverFactory>> │
//! └──────────────────────────────────────────────────────────────┘
//!                               │  `dxp4c2x` line in the system file
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │           BoardDriverFactory::create() -> BoardDriver        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capabilities that not every family has (control tasks, run statistics,
//! SCA and event memories, gain changes, raw memory and register access,
//! command passthrough, calibration) come with default implementations
//! that report [`DriverErrorKind::Unsupported`](crate::DriverErrorKind::Unsupported).

use crate::error::{DriverError, DriverResult, Result, XerxesError};
use crate::firmware::{DspImage, FippiImage, ParamDefaults, ParamSymbol};
use crate::transport::Transport;
use crate::types::{
    ChannelTarget, ControlTask, FpgaKind, IoChan, MemoryRegion, PreampInfo, RunStats,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Board type names the configuration language accepts.
pub const KNOWN_BOARD_TYPES: &[&str] = &[
    "dxp4c", "dxp4c2x", "dxpx10p", "dgfg200", "udxps", "udxp", "polaris",
];

/// Map a board type keyword to its canonical name (`dxp2x` is an alias of
/// `dxp4c2x`). Returns `None` for names outside [`KNOWN_BOARD_TYPES`].
pub fn canonical_board_type(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    if lower == "dxp2x" {
        return Some("dxp4c2x");
    }
    KNOWN_BOARD_TYPES.iter().copied().find(|known| *known == lower)
}

/// Addressing for one module: its transport and open I/O channel.
#[derive(Clone, Copy)]
pub struct ModuleLink<'a> {
    /// Transport of the module's interface.
    pub transport: &'a dyn Transport,
    /// Channel returned when the module was opened.
    pub io_chan: IoChan,
    /// Module index, for diagnostics.
    pub module: usize,
}

/// Mutable view of one channel handed to multi-channel driver operations.
pub struct ChannelData<'a> {
    /// Channel index within the module.
    pub mod_chan: usize,
    /// DSP image the channel runs.
    pub dsp: &'a DspImage,
    /// Live parameter buffer; drivers mirror any word they change.
    pub params: &'a mut [u16],
    /// Preamp settings from the preamp file.
    pub preamp: PreampInfo,
}

/// FPGA images of one channel, for `download_fpga`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FpgaSet<'a> {
    /// Filter FPGA of the channel.
    pub fippi: Option<&'a FippiImage>,
    /// User filter FPGA, if configured.
    pub user_fippi: Option<&'a FippiImage>,
    /// Module MMU, if configured.
    pub mmu: Option<&'a FippiImage>,
}

/// Operations one board family provides to the core.
pub trait BoardDriver: Send + Sync {
    /// Canonical board type name.
    fn board_type(&self) -> &str;

    /// Bring the driver up on an interface. Called once per added module, so
    /// repeat calls on the same transport must succeed.
    fn init_driver(&self, transport: &dyn Transport) -> DriverResult<()>;

    // ---- image loading ----------------------------------------------------

    /// Decode the DSP program at `path`, registered as `filename`.
    fn load_dsp(&self, filename: &str, path: &Path) -> DriverResult<DspImage>;
    /// Decode an FPGA configuration.
    fn load_fippi(&self, filename: &str, path: &Path) -> DriverResult<FippiImage>;
    /// Decode a parameter defaults file.
    fn load_defaults(&self, filename: &str, path: &Path) -> DriverResult<ParamDefaults>;

    // ---- firmware download ------------------------------------------------

    /// Clear any pending "look at me" request before a download.
    fn look_at_me(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        let _ = (link, target);
        Ok(())
    }

    /// Download the images of class `kind` from `images`. Broadcasts may
    /// fail with `Unsupported`; the core then repeats per channel.
    fn download_fpga(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        kind: FpgaKind,
        images: &FpgaSet<'_>,
    ) -> DriverResult<()>;

    /// Verify that the FPGAs addressed by a download came up.
    fn download_fpga_done(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        kind: FpgaKind,
    ) -> DriverResult<()>;

    /// Download a DSP program. Same broadcast rules as `download_fpga`.
    fn download_dsp(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        image: &DspImage,
    ) -> DriverResult<()>;

    /// Block until the DSP of `mod_chan` reports ready, at most `timeout`.
    fn download_dsp_done(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        timeout: Duration,
    ) -> DriverResult<()>;

    // ---- parameters -------------------------------------------------------

    /// Copy the channel's parameter memory into `params`.
    fn read_dspparams(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &mut [u16],
    ) -> DriverResult<()>;

    /// Write `params` to the channel's parameter memory.
    fn write_dspparams(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<()>;

    /// Read one parameter by name. Multi-word symbols are combined.
    fn read_dspsymbol(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        name: &str,
        image: &DspImage,
    ) -> DriverResult<f64>;

    /// Write one parameter by name, checking access and bounds.
    fn modify_dspsymbol(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        name: &str,
        value: u16,
        image: &DspImage,
    ) -> DriverResult<()>;

    /// Hardware self-test run after every DSP download.
    fn test_spectrum_memory(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
    ) -> DriverResult<()>;

    /// Write one parameter addressed through its table entry. Used for bulk
    /// downloads where names were resolved by the caller.
    fn write_dspparam(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        symbol: &ParamSymbol,
        value: u16,
    ) -> DriverResult<()> {
        let _ = (link, mod_chan, image, symbol, value);
        Err(DriverError::unsupported(self.board_type(), "write_dspparam"))
    }

    // ---- readout ----------------------------------------------------------

    /// Spectrum length under the given parameters.
    fn spectrum_length(&self, image: &DspImage, params: &[u16]) -> usize;
    /// Baseline history length under the given parameters.
    fn baseline_length(&self, image: &DspImage, params: &[u16]) -> usize;

    /// Event buffer length under the given parameters.
    fn event_length(&self, image: &DspImage, params: &[u16]) -> DriverResult<usize> {
        let _ = (image, params);
        Err(DriverError::unsupported(self.board_type(), "event_length"))
    }

    /// Number of single channel analyser regions.
    fn sca_length(&self, image: &DspImage, params: &[u16]) -> DriverResult<usize> {
        let _ = (image, params);
        Err(DriverError::unsupported(self.board_type(), "sca_length"))
    }

    /// Pause data taking so memories can be read.
    fn prep_for_readout(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        let _ = (link, target);
        Ok(())
    }

    /// Undo `prep_for_readout`.
    fn done_with_readout(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        let _ = (link, target);
        Ok(())
    }

    /// Read the MCA spectrum.
    fn read_spectrum(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u32>>;

    /// Read the baseline history.
    fn read_baseline(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u16>>;

    /// Decode `(runerror, errinfo)` from a parameter block.
    fn decode_error(&self, image: &DspImage, params: &[u16]) -> (u16, u16);

    /// Reset the DSP's run error word.
    fn clear_error(&self, link: ModuleLink<'_>, mod_chan: usize, image: &DspImage)
        -> DriverResult<()>;

    /// Decode livetime, rates and event counts from `params`, a parameter
    /// block read after the run.
    fn run_stats(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<RunStats> {
        let _ = (link, mod_chan, image, params);
        Err(DriverError::unsupported(self.board_type(), "run_stats"))
    }

    /// Read the single channel analyser counters.
    fn read_sca(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u64>> {
        let _ = (link, mod_chan, image, params);
        Err(DriverError::unsupported(self.board_type(), "read_sca"))
    }

    // ---- run control ------------------------------------------------------

    /// Start (or with `resume`, continue) a run.
    fn begin_run(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        gate: u16,
        resume: bool,
    ) -> DriverResult<()>;

    /// Stop a run.
    fn end_run(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()>;

    /// Hardware run flag of one channel.
    fn run_active(&self, link: ModuleLink<'_>, mod_chan: usize) -> DriverResult<bool>;

    /// Start a board-specific control task.
    fn begin_control_task(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        info: &[i32],
        image: &DspImage,
    ) -> DriverResult<()> {
        let _ = (link, mod_chan, task, info, image);
        Err(DriverError::unsupported(self.board_type(), "begin_control_task"))
    }

    /// Stop the control task of a channel.
    fn end_control_task(&self, link: ModuleLink<'_>, mod_chan: usize) -> DriverResult<()> {
        let _ = (link, mod_chan);
        Err(DriverError::unsupported(self.board_type(), "end_control_task"))
    }

    /// Information words describing a control task's output.
    fn control_task_info(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        image: &DspImage,
    ) -> DriverResult<Vec<i32>> {
        let _ = (link, mod_chan, task, image);
        Err(DriverError::unsupported(self.board_type(), "control_task_info"))
    }

    /// Data produced by a control task.
    fn control_task_data(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        image: &DspImage,
    ) -> DriverResult<Vec<u32>> {
        let _ = (link, mod_chan, task, image);
        Err(DriverError::unsupported(self.board_type(), "control_task_data"))
    }

    // ---- calibration ------------------------------------------------------

    /// Run calibration `task` on the given channels of one module.
    fn calibrate_channel(
        &self,
        link: ModuleLink<'_>,
        task: i32,
        channels: &mut [ChannelData<'_>],
    ) -> DriverResult<()> {
        let _ = (link, task, channels);
        Err(DriverError::unsupported(self.board_type(), "calibrate_channel"))
    }

    /// Program the analog signal conditioner from preamp settings.
    fn setup_asc(
        &self,
        link: ModuleLink<'_>,
        channel: &mut ChannelData<'_>,
        adc_rule: f32,
    ) -> DriverResult<()> {
        let _ = (link, channel, adc_rule);
        Ok(())
    }

    /// Calibrate the analog signal conditioners of a module.
    fn calibrate_asc(
        &self,
        link: ModuleLink<'_>,
        channels: &mut [ChannelData<'_>],
    ) -> DriverResult<()> {
        let _ = (link, channels);
        Ok(())
    }

    /// Multiply the channel gain by `gainchange`. The energy threshold is
    /// rescaled with it; any changed parameter word is mirrored in `params`.
    fn change_gains(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        gainchange: f32,
        image: &DspImage,
        params: &mut [u16],
    ) -> DriverResult<()> {
        let _ = (link, mod_chan, gainchange, image, params);
        Err(DriverError::unsupported(self.board_type(), "change_gains"))
    }

    // ---- passthrough ------------------------------------------------------

    /// Read a block of board memory.
    fn read_mem(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        region: &MemoryRegion,
    ) -> DriverResult<Vec<u32>> {
        let _ = (link, mod_chan, region);
        Err(DriverError::unsupported(self.board_type(), "read_mem"))
    }

    /// Write a block of board memory.
    fn write_mem(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        region: &MemoryRegion,
        data: &[u32],
    ) -> DriverResult<()> {
        let _ = (link, mod_chan, region, data);
        Err(DriverError::unsupported(self.board_type(), "write_mem"))
    }

    /// Read a named register.
    fn read_reg(&self, link: ModuleLink<'_>, mod_chan: usize, name: &str) -> DriverResult<u16> {
        let _ = (link, mod_chan, name);
        Err(DriverError::unsupported(self.board_type(), "read_reg"))
    }

    /// Write a named register.
    fn write_reg(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        name: &str,
        value: u16,
    ) -> DriverResult<()> {
        let _ = (link, mod_chan, name, value);
        Err(DriverError::unsupported(self.board_type(), "write_reg"))
    }

    /// Raw command exchange; returns `receive_len` bytes.
    fn command(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        cmd: u8,
        send: &[u8],
        receive_len: usize,
    ) -> DriverResult<Vec<u8>> {
        let _ = (link, mod_chan, cmd, send, receive_len);
        Err(DriverError::unsupported(self.board_type(), "command"))
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Creates drivers for one or more board families.
pub trait BoardDriverFactory: Send + Sync {
    /// Canonical board type names served by this factory.
    fn board_types(&self) -> Vec<String>;

    /// Build a driver. `pointer` is the optional auxiliary library name
    /// given next to the board type in the system file.
    fn create(&self, board_type: &str, pointer: Option<&str>) -> DriverResult<Arc<dyn BoardDriver>>;
}

/// Board driver implementations available at runtime.
#[derive(Default, Clone)]
pub struct DriverCatalog {
    factories: HashMap<String, Arc<dyn BoardDriverFactory>>,
}

impl DriverCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every board type of `factory`, replacing earlier registrations.
    pub fn register(&mut self, factory: Arc<dyn BoardDriverFactory>) {
        for name in factory.board_types() {
            self.factories.insert(name.to_ascii_lowercase(), Arc::clone(&factory));
        }
    }

    /// True if a driver is registered for `board_type` or its alias.
    pub fn contains(&self, board_type: &str) -> bool {
        canonical_board_type(board_type).is_some_and(|name| self.factories.contains_key(name))
    }

    /// Registered board types, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered board types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the driver for `board_type`.
    pub fn create(&self, board_type: &str, pointer: Option<&str>) -> Result<Arc<dyn BoardDriver>> {
        let unknown = || XerxesError::UnknownBoardType {
            name: board_type.to_string(),
        };
        let canonical = canonical_board_type(board_type).ok_or_else(unknown)?;
        let factory = self.factories.get(canonical).ok_or_else(unknown)?;
        factory
            .create(canonical, pointer)
            .map_err(|source| XerxesError::driver("create_driver", 0, source))
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCatalog")
            .field("board_types", &self.list())
            .finish()
    }
}

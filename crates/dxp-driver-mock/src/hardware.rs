//! Shared state of the simulated crate of modules.
//!
//! One [`MockHardware`] stands for everything on the bus. Transports open
//! modules in it, drivers read and write channel state through it, and
//! tests inspect the [`MockStats`] counters and the download journal to
//! observe what the core asked the hardware to do.

use crate::common::{MockMode, MockRng};
use dxp_core::{ChannelTarget, ControlTask, FpgaKind, IoChan, PreampInfo, RunStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Simulator settings.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Timing behaviour.
    pub mode: MockMode,
    /// Channels every opened module exposes.
    pub channels_per_module: usize,
    /// Ready polls a DSP needs after download; `None` uses the mode default.
    pub dsp_boot_polls: Option<u32>,
    /// Spectrum length when the image has no `MCALEN` symbol.
    pub spectrum_len: usize,
    /// Baseline length when the image has no `BASELEN` symbol.
    pub baseline_len: usize,
    /// RNG seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Instant,
            channels_per_module: 4,
            dsp_boot_polls: None,
            spectrum_len: 1024,
            baseline_len: 256,
            seed: Some(0),
        }
    }
}

/// What a download wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadKind {
    /// FPGA image of the given class.
    Fpga(FpgaKind),
    /// DSP program.
    Dsp,
}

/// One entry of the download journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    /// Module the download went to.
    pub io_chan: IoChan,
    /// Channels addressed.
    pub target: ChannelTarget,
    /// Image class.
    pub kind: DownloadKind,
    /// Image file name.
    pub filename: String,
}

/// Call counters.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    /// DSP image decodes per file name.
    pub dsp_loads: HashMap<String, usize>,
    /// FPGA image decodes per file name.
    pub fippi_loads: HashMap<String, usize>,
    /// Defaults file decodes per file name.
    pub defaults_loads: HashMap<String, usize>,
    /// `Transport::initialize` calls.
    pub transport_inits: usize,
    /// `BoardDriver::init_driver` calls.
    pub driver_inits: usize,
    /// Successful module opens.
    pub opens: usize,
    /// Successful module closes.
    pub closes: usize,
    /// `begin_run` calls.
    pub begin_runs: usize,
    /// `end_run` calls.
    pub end_runs: usize,
    /// Whole parameter block writes.
    pub param_writes: usize,
    /// Single parameter writes by table entry.
    pub param_word_writes: usize,
    /// `setup_asc` channel calls.
    pub asc_setups: usize,
    /// Channels passed to `calibrate_asc`.
    pub asc_calibrations: usize,
    /// Channels passed to `calibrate_channel`.
    pub channel_calibrations: usize,
    /// Successful `change_gains` calls.
    pub gain_changes: usize,
    /// Total time requested through `Transport::wait`.
    pub waited: Duration,
}

impl MockStats {
    /// Decodes of DSP image `filename`.
    pub fn dsp_load_count(&self, filename: &str) -> usize {
        self.dsp_loads.get(filename).copied().unwrap_or(0)
    }

    /// Decodes of FPGA image `filename`.
    pub fn fippi_load_count(&self, filename: &str) -> usize {
        self.fippi_loads.get(filename).copied().unwrap_or(0)
    }

    /// Decodes of defaults file `filename`.
    pub fn defaults_load_count(&self, filename: &str) -> usize {
        self.defaults_loads.get(filename).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub(crate) struct ChannelSim {
    pub fippi: Option<String>,
    pub user_fippi: Option<String>,
    pub mmu: Option<String>,
    pub dsp: Option<String>,
    pub boot_polls: u32,
    pub params: Vec<u16>,
    pub running: bool,
    pub control_task: Option<ControlTask>,
    pub spectrum: Vec<u32>,
    pub baseline: Vec<u16>,
    pub preamp: Option<PreampInfo>,
    /// Analog gain relative to the power-on setting.
    pub gain: f32,
    /// Statistics accumulated since the last fresh run start.
    pub stats: RunStats,
}

impl Default for ChannelSim {
    fn default() -> Self {
        Self {
            fippi: None,
            user_fippi: None,
            mmu: None,
            dsp: None,
            boot_polls: 0,
            params: Vec::new(),
            running: false,
            control_task: None,
            spectrum: Vec::new(),
            baseline: Vec::new(),
            preamp: None,
            gain: 1.0,
            stats: RunStats::default(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ModuleSim {
    pub iostring: String,
    pub channels: Vec<ChannelSim>,
    pub locked: bool,
    pub registers: HashMap<String, u16>,
    pub memory: HashMap<(String, u32), u32>,
}

impl ModuleSim {
    /// Channel indices addressed by `target`, `None` if out of range.
    pub fn targets(&self, target: ChannelTarget) -> Option<Vec<usize>> {
        match target {
            ChannelTarget::All => Some((0..self.channels.len()).collect()),
            ChannelTarget::Channel(chan) if chan < self.channels.len() => Some(vec![chan]),
            ChannelTarget::Channel(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub stats: MockStats,
    pub downloads: Vec<DownloadRecord>,
}

#[derive(Debug, Default)]
struct HardwareState {
    modules: HashMap<IoChan, ModuleSim>,
    next_io_chan: IoChan,
    journal: Journal,
}

/// The simulated bus with all modules on it.
#[derive(Debug)]
pub struct MockHardware {
    config: MockConfig,
    rng: MockRng,
    state: Mutex<HardwareState>,
}

impl MockHardware {
    /// Empty bus with the given settings.
    pub fn new(config: MockConfig) -> Arc<Self> {
        let rng = MockRng::new(config.seed);
        Arc::new(Self {
            config,
            rng,
            state: Mutex::new(HardwareState {
                next_io_chan: 1,
                ..HardwareState::default()
            }),
        })
    }

    /// Simulator settings.
    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub(crate) fn rng(&self) -> &MockRng {
        &self.rng
    }

    pub(crate) fn boot_polls(&self) -> u32 {
        self.config
            .dsp_boot_polls
            .unwrap_or_else(|| self.config.mode.dsp_boot_polls())
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockStats {
        self.state.lock().journal.stats.clone()
    }

    /// Every download since creation or the last [`clear_downloads`](Self::clear_downloads).
    pub fn downloads(&self) -> Vec<DownloadRecord> {
        self.state.lock().journal.downloads.clone()
    }

    /// Empty the download journal.
    pub fn clear_downloads(&self) {
        self.state.lock().journal.downloads.clear();
    }

    /// Number of modules currently open.
    pub fn module_count(&self) -> usize {
        self.state.lock().modules.len()
    }

    /// Force the hardware run flag of a channel, as if the board had been
    /// started or stopped behind the library's back.
    pub fn set_hardware_running(&self, io_chan: IoChan, mod_chan: usize, running: bool) -> bool {
        self.with_module(io_chan, |module, _| {
            module
                .channels
                .get_mut(mod_chan)
                .map(|channel| channel.running = running)
                .is_some()
        })
        .unwrap_or(false)
    }

    /// Overwrite one word of a channel's DSP parameter memory.
    pub fn poke_param(&self, io_chan: IoChan, mod_chan: usize, address: usize, value: u16) -> bool {
        self.with_module(io_chan, |module, _| {
            module
                .channels
                .get_mut(mod_chan)
                .and_then(|channel| channel.params.get_mut(address))
                .map(|word| *word = value)
                .is_some()
        })
        .unwrap_or(false)
    }

    /// Copy of a channel's DSP parameter memory.
    pub fn channel_params(&self, io_chan: IoChan, mod_chan: usize) -> Option<Vec<u16>> {
        self.with_module(io_chan, |module, _| {
            module.channels.get(mod_chan).map(|channel| channel.params.clone())
        })
        .flatten()
    }

    /// Name of the DSP image last downloaded to a channel.
    pub fn channel_dsp(&self, io_chan: IoChan, mod_chan: usize) -> Option<String> {
        self.with_module(io_chan, |module, _| {
            module.channels.get(mod_chan).and_then(|channel| channel.dsp.clone())
        })
        .flatten()
    }

    /// Preamp settings last applied by `setup_asc`.
    pub fn channel_preamp(&self, io_chan: IoChan, mod_chan: usize) -> Option<PreampInfo> {
        self.with_module(io_chan, |module, _| {
            module.channels.get(mod_chan).and_then(|channel| channel.preamp)
        })
        .flatten()
    }

    /// Relative analog gain of a channel.
    pub fn channel_gain(&self, io_chan: IoChan, mod_chan: usize) -> Option<f32> {
        self.with_module(io_chan, |module, _| module.channels.get(mod_chan).map(|channel| channel.gain))
            .flatten()
    }

    /// Open `iostring` on a fresh I/O channel. `None` if it is already open.
    pub(crate) fn open_module(&self, iostring: &str) -> Option<IoChan> {
        let mut state = self.state.lock();
        if state.modules.values().any(|module| module.iostring == iostring) {
            return None;
        }
        state.journal.stats.opens += 1;
        let io_chan = state.next_io_chan;
        state.next_io_chan += 1;
        let channels = (0..self.config.channels_per_module)
            .map(|_| ChannelSim::default())
            .collect();
        state.modules.insert(
            io_chan,
            ModuleSim {
                iostring: iostring.to_string(),
                channels,
                ..ModuleSim::default()
            },
        );
        Some(io_chan)
    }

    pub(crate) fn close_module(&self, io_chan: IoChan) -> bool {
        let mut state = self.state.lock();
        let closed = state.modules.remove(&io_chan).is_some();
        if closed {
            state.journal.stats.closes += 1;
        }
        closed
    }

    pub(crate) fn with_module<R>(
        &self,
        io_chan: IoChan,
        f: impl FnOnce(&mut ModuleSim, &mut Journal) -> R,
    ) -> Option<R> {
        let mut guard = self.state.lock();
        let HardwareState {
            modules, journal, ..
        } = &mut *guard;
        modules.get_mut(&io_chan).map(|module| f(module, journal))
    }

    pub(crate) fn with_journal<R>(&self, f: impl FnOnce(&mut Journal) -> R) -> R {
        f(&mut self.state.lock().journal)
    }
}

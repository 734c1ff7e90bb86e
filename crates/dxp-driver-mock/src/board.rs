//! Simulated board driver.

use crate::common::ErrorConfig;
use crate::firmware;
use crate::hardware::{ChannelSim, DownloadKind, DownloadRecord, MockHardware, ModuleSim};
use dxp_core::{
    BoardDriver, BoardDriverFactory, ChannelData, ChannelTarget, ControlTask, DriverError,
    DriverErrorKind, DriverResult, DspImage, FippiImage, FpgaKind, FpgaSet, MemoryRegion,
    ModuleLink, ParamAccess, ParamDefaults, ParamSymbol, RunStats, Transport, KNOWN_BOARD_TYPES,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Length of the data block returned by simulated control tasks.
const CONTROL_TASK_LEN: usize = 256;

/// Event buffer length when the image has no `EVTLEN` symbol.
const DEFAULT_EVENT_LEN: usize = 512;

/// Livetime credited to a channel for every simulated run, in seconds.
const RUN_LIVETIME: f64 = 1.0;

/// [`BoardDriver`] backed by [`MockHardware`].
pub struct MockBoardDriver {
    board_type: String,
    hardware: Arc<MockHardware>,
    errors: ErrorConfig,
    broadcast: bool,
}

impl MockBoardDriver {
    /// Driver for `board_type` on the shared simulated bus.
    pub fn new(board_type: impl Into<String>, hardware: Arc<MockHardware>, errors: ErrorConfig) -> Self {
        Self {
            board_type: board_type.into(),
            hardware,
            errors,
            broadcast: true,
        }
    }

    /// Reject downloads addressed to every channel at once, like board
    /// families without a broadcast path.
    #[must_use]
    pub fn without_broadcast(mut self) -> Self {
        self.broadcast = false;
        self
    }

    fn check_download(&self, operation: &'static str, target: ChannelTarget) -> DriverResult<()> {
        self.check(operation)?;
        if target == ChannelTarget::All && !self.broadcast {
            return Err(DriverError::unsupported(self.board_type.as_str(), "broadcast download"));
        }
        Ok(())
    }

    fn check(&self, operation: &'static str) -> DriverResult<()> {
        self.errors.check_operation(&self.board_type, operation)
    }

    fn error(&self, kind: DriverErrorKind, message: impl Into<String>) -> DriverError {
        DriverError::new(self.board_type.as_str(), kind, message)
    }

    fn module<R>(
        &self,
        link: ModuleLink<'_>,
        f: impl FnOnce(&mut ModuleSim, &mut crate::hardware::Journal) -> DriverResult<R>,
    ) -> DriverResult<R> {
        self.hardware
            .with_module(link.io_chan, f)
            .unwrap_or_else(|| {
                Err(self.error(
                    DriverErrorKind::Communication,
                    format!("no module open on I/O channel {}", link.io_chan),
                ))
            })
    }

    fn channel<R>(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        f: impl FnOnce(&mut ChannelSim) -> DriverResult<R>,
    ) -> DriverResult<R> {
        self.module(link, |module, _| match module.channels.get_mut(mod_chan) {
            Some(channel) => f(channel),
            None => Err(self.bad_channel(mod_chan)),
        })
    }

    fn each_channel(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        mut f: impl FnMut(usize, &mut ChannelSim) -> DriverResult<()>,
    ) -> DriverResult<()> {
        self.module(link, |module, _| {
            let targets = module
                .targets(target)
                .ok_or_else(|| self.error(DriverErrorKind::InvalidParameter, format!("bad channel {}", target)))?;
            for chan in targets {
                f(chan, &mut module.channels[chan])?;
            }
            Ok(())
        })
    }

    fn bad_channel(&self, mod_chan: usize) -> DriverError {
        self.error(
            DriverErrorKind::InvalidParameter,
            format!("module channel {} does not exist", mod_chan),
        )
    }

    fn loaded_params<'c>(&self, channel: &'c mut ChannelSim, image: &DspImage) -> DriverResult<&'c mut Vec<u16>> {
        match &channel.dsp {
            Some(name) if *name == image.filename => Ok(&mut channel.params),
            Some(name) => Err(self.error(
                DriverErrorKind::DspDownload,
                format!("channel runs {} not {}", name, image.filename),
            )),
            None => Err(self.error(DriverErrorKind::DspDownload, "no DSP program loaded")),
        }
    }

    fn symbol_value(image: &DspImage, params: &[u16], name: &str) -> Option<u16> {
        image
            .symbol(name)
            .and_then(|sym| params.get(sym.address as usize).copied())
    }
}

/// Fold one run's binned events into the accumulated statistics.
fn record_run(stats: &mut RunStats, events: u64, baseline_events: u64) {
    stats.events += events;
    stats.underflows += events / 50;
    stats.overflows += events / 100;
    // Pile-up: the fast channel sees about 10% more triggers than get binned.
    stats.fast_peaks += events + events / 10;
    stats.baseline_events += baseline_events;
    stats.livetime += RUN_LIVETIME;
    stats.icr = stats.fast_peaks as f64 / stats.livetime / 1000.0;
    stats.ocr = stats.nevents() as f64 / stats.livetime / 1000.0;
}

impl BoardDriver for MockBoardDriver {
    fn board_type(&self) -> &str {
        &self.board_type
    }

    fn init_driver(&self, transport: &dyn Transport) -> DriverResult<()> {
        self.check("init_driver")?;
        self.hardware.with_journal(|j| j.stats.driver_inits += 1);
        debug!(board_type = %self.board_type, transport = transport.tag(), "driver initialized");
        Ok(())
    }

    fn load_dsp(&self, filename: &str, path: &Path) -> DriverResult<DspImage> {
        self.check("load_dsp")?;
        self.hardware
            .with_journal(|j| *j.stats.dsp_loads.entry(filename.to_string()).or_insert(0) += 1);
        firmware::load_dsp(&self.board_type, filename, path)
    }

    fn load_fippi(&self, filename: &str, path: &Path) -> DriverResult<FippiImage> {
        self.check("load_fippi")?;
        self.hardware
            .with_journal(|j| *j.stats.fippi_loads.entry(filename.to_string()).or_insert(0) += 1);
        firmware::load_fippi(&self.board_type, filename, path)
    }

    fn load_defaults(&self, filename: &str, path: &Path) -> DriverResult<ParamDefaults> {
        self.check("load_defaults")?;
        self.hardware.with_journal(|j| {
            *j.stats.defaults_loads.entry(filename.to_string()).or_insert(0) += 1
        });
        firmware::load_defaults(&self.board_type, filename, path)
    }

    fn look_at_me(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        self.check("look_at_me")?;
        self.module(link, |module, _| {
            module
                .targets(target)
                .map(|_| ())
                .ok_or_else(|| self.error(DriverErrorKind::InvalidParameter, format!("bad channel {}", target)))
        })
    }

    fn download_fpga(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        kind: FpgaKind,
        images: &FpgaSet<'_>,
    ) -> DriverResult<()> {
        self.check_download("download_fpga", target)?;
        let primary = match kind {
            FpgaKind::All | FpgaKind::Fippi => images.fippi,
            FpgaKind::UserFippi => images.user_fippi,
            FpgaKind::Mmu => images.mmu,
        };
        let primary = primary.ok_or_else(|| {
            self.error(
                DriverErrorKind::FpgaDownload,
                format!("no {} image to download", kind.as_str()),
            )
        })?;
        self.module(link, |module, journal| {
            let targets = module
                .targets(target)
                .ok_or_else(|| self.error(DriverErrorKind::InvalidParameter, format!("bad channel {}", target)))?;
            for chan in targets {
                let channel = &mut module.channels[chan];
                match kind {
                    FpgaKind::All => {
                        channel.fippi = images.fippi.map(|i| i.filename.clone());
                        channel.user_fippi = images.user_fippi.map(|i| i.filename.clone());
                        channel.mmu = images.mmu.map(|i| i.filename.clone());
                    }
                    FpgaKind::Fippi => channel.fippi = Some(primary.filename.clone()),
                    FpgaKind::UserFippi => channel.user_fippi = Some(primary.filename.clone()),
                    FpgaKind::Mmu => channel.mmu = Some(primary.filename.clone()),
                }
            }
            journal.downloads.push(DownloadRecord {
                io_chan: link.io_chan,
                target,
                kind: DownloadKind::Fpga(kind),
                filename: primary.filename.clone(),
            });
            Ok(())
        })?;
        debug!(io_chan = link.io_chan, %target, kind = kind.as_str(), file = %primary.filename, "FPGA downloaded");
        Ok(())
    }

    fn download_fpga_done(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        kind: FpgaKind,
    ) -> DriverResult<()> {
        self.check("download_fpga_done")?;
        self.each_channel(link, target, |chan, channel| {
            let loaded = match kind {
                FpgaKind::All | FpgaKind::Fippi => channel.fippi.is_some(),
                FpgaKind::UserFippi => channel.user_fippi.is_some(),
                FpgaKind::Mmu => channel.mmu.is_some(),
            };
            // Broadcasts also reach channels without a configured image.
            if loaded || target == ChannelTarget::All {
                Ok(())
            } else {
                Err(self.error(
                    DriverErrorKind::FpgaDownload,
                    format!("channel {} has no {} loaded", chan, kind.as_str()),
                ))
            }
        })
    }

    fn download_dsp(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        image: &DspImage,
    ) -> DriverResult<()> {
        self.check_download("download_dsp", target)?;
        let boot_polls = self.hardware.boot_polls();
        self.module(link, |module, journal| {
            let targets = module
                .targets(target)
                .ok_or_else(|| self.error(DriverErrorKind::InvalidParameter, format!("bad channel {}", target)))?;
            for chan in targets {
                let channel = &mut module.channels[chan];
                channel.dsp = Some(image.filename.clone());
                channel.boot_polls = boot_polls;
                channel.params = image.symbols.iter().map(|sym| sym.lower).collect();
                channel.running = false;
            }
            journal.downloads.push(DownloadRecord {
                io_chan: link.io_chan,
                target,
                kind: DownloadKind::Dsp,
                filename: image.filename.clone(),
            });
            Ok(())
        })?;
        debug!(io_chan = link.io_chan, %target, file = %image.filename, "DSP downloaded");
        Ok(())
    }

    fn download_dsp_done(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        timeout: Duration,
    ) -> DriverResult<()> {
        self.check("download_dsp_done")?;
        let interval = self.hardware.config().mode.poll_interval();
        let mut waited = Duration::ZERO;
        loop {
            let ready = self.channel(link, mod_chan, |channel| {
                self.loaded_params(channel, image)?;
                if channel.boot_polls == 0 {
                    Ok(true)
                } else {
                    channel.boot_polls -= 1;
                    Ok(false)
                }
            })?;
            if ready {
                return Ok(());
            }
            if waited >= timeout {
                return Err(self.error(
                    DriverErrorKind::Timeout,
                    format!("DSP on channel {} not ready after {:?}", mod_chan, timeout),
                ));
            }
            link.transport.wait(interval);
            waited += interval;
        }
    }

    fn read_dspparams(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &mut [u16],
    ) -> DriverResult<()> {
        self.check("read_dspparams")?;
        self.channel(link, mod_chan, |channel| {
            let memory = self.loaded_params(channel, image)?;
            if memory.len() != params.len() {
                return Err(self.error(
                    DriverErrorKind::InvalidParameter,
                    format!("buffer holds {} words, DSP has {}", params.len(), memory.len()),
                ));
            }
            params.copy_from_slice(memory);
            Ok(())
        })
    }

    fn write_dspparams(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<()> {
        self.check("write_dspparams")?;
        self.module(link, |module, journal| {
            let channel = module
                .channels
                .get_mut(mod_chan)
                .ok_or_else(|| self.bad_channel(mod_chan))?;
            let memory = self.loaded_params(channel, image)?;
            if memory.len() != params.len() {
                return Err(self.error(
                    DriverErrorKind::InvalidParameter,
                    format!("buffer holds {} words, DSP has {}", params.len(), memory.len()),
                ));
            }
            memory.copy_from_slice(params);
            journal.stats.param_writes += 1;
            Ok(())
        })
    }

    fn read_dspsymbol(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        name: &str,
        image: &DspImage,
    ) -> DriverResult<f64> {
        self.check("read_dspsymbol")?;
        let symbol = image
            .symbol(name)
            .ok_or_else(|| self.error(DriverErrorKind::Symbol, format!("unknown symbol {}", name)))?;
        self.channel(link, mod_chan, |channel| {
            let memory = self.loaded_params(channel, image)?;
            Ok(f64::from(memory[symbol.address as usize]))
        })
    }

    fn modify_dspsymbol(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        name: &str,
        value: u16,
        image: &DspImage,
    ) -> DriverResult<()> {
        self.check("modify_dspsymbol")?;
        let symbol = image
            .symbol(name)
            .ok_or_else(|| self.error(DriverErrorKind::Symbol, format!("unknown symbol {}", name)))?;
        if !symbol.access.contains(ParamAccess::WRITE) {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!("symbol {} is read-only", name),
            ));
        }
        if value < symbol.lower || value > symbol.upper {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!(
                    "{} = {} outside [{}, {}]",
                    name, value, symbol.lower, symbol.upper
                ),
            ));
        }
        self.channel(link, mod_chan, |channel| {
            let memory = self.loaded_params(channel, image)?;
            memory[symbol.address as usize] = value;
            Ok(())
        })
    }

    fn write_dspparam(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        symbol: &ParamSymbol,
        value: u16,
    ) -> DriverResult<()> {
        self.check("write_dspparam")?;
        if !symbol.access.contains(ParamAccess::WRITE) {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!("symbol {} is read-only", symbol.name),
            ));
        }
        self.module(link, |module, journal| {
            let channel = module
                .channels
                .get_mut(mod_chan)
                .ok_or_else(|| self.bad_channel(mod_chan))?;
            let memory = self.loaded_params(channel, image)?;
            let word = memory.get_mut(symbol.address as usize).ok_or_else(|| {
                self.error(
                    DriverErrorKind::Symbol,
                    format!("address {} outside parameter memory", symbol.address),
                )
            })?;
            *word = value;
            journal.stats.param_word_writes += 1;
            Ok(())
        })
    }

    fn test_spectrum_memory(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
    ) -> DriverResult<()> {
        self.check("test_spectrum_memory")?;
        let len = self.hardware.config().spectrum_len;
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            if channel.boot_polls > 0 {
                return Err(self.error(DriverErrorKind::Memory, "DSP is not running"));
            }
            channel.spectrum = vec![0; len];
            Ok(())
        })
    }

    fn spectrum_length(&self, image: &DspImage, params: &[u16]) -> usize {
        match Self::symbol_value(image, params, "MCALEN") {
            Some(len) if len > 0 => len as usize,
            _ => self.hardware.config().spectrum_len,
        }
    }

    fn baseline_length(&self, image: &DspImage, params: &[u16]) -> usize {
        match Self::symbol_value(image, params, "BASELEN") {
            Some(len) if len > 0 => len as usize,
            _ => self.hardware.config().baseline_len,
        }
    }

    fn event_length(&self, image: &DspImage, params: &[u16]) -> DriverResult<usize> {
        Ok(match Self::symbol_value(image, params, "EVTLEN") {
            Some(len) if len > 0 => len as usize,
            _ => DEFAULT_EVENT_LEN,
        })
    }

    fn sca_length(&self, image: &DspImage, params: &[u16]) -> DriverResult<usize> {
        Ok(Self::symbol_value(image, params, "NUMSCA").map_or(0, usize::from))
    }

    fn prep_for_readout(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        self.check("prep_for_readout")?;
        self.each_channel(link, target, |_, _| Ok(()))
    }

    fn read_spectrum(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u32>> {
        self.check("read_spectrum")?;
        let len = self.spectrum_length(image, params);
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            let mut spectrum = channel.spectrum.clone();
            spectrum.resize(len, 0);
            Ok(spectrum)
        })
    }

    fn read_baseline(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u16>> {
        self.check("read_baseline")?;
        let len = self.baseline_length(image, params);
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            let mut baseline = channel.baseline.clone();
            baseline.resize(len, 0);
            Ok(baseline)
        })
    }

    fn decode_error(&self, image: &DspImage, params: &[u16]) -> (u16, u16) {
        (
            Self::symbol_value(image, params, "RUNERROR").unwrap_or(0),
            Self::symbol_value(image, params, "ERRINFO").unwrap_or(0),
        )
    }

    fn clear_error(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
    ) -> DriverResult<()> {
        self.check("clear_error")?;
        let Some(symbol) = image.symbol("RUNERROR") else {
            return Ok(());
        };
        self.channel(link, mod_chan, |channel| {
            let memory = self.loaded_params(channel, image)?;
            memory[symbol.address as usize] = 0;
            Ok(())
        })
    }

    fn run_stats(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        _params: &[u16],
    ) -> DriverResult<RunStats> {
        self.check("run_stats")?;
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            Ok(channel.stats)
        })
    }

    fn read_sca(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        image: &DspImage,
        params: &[u16],
    ) -> DriverResult<Vec<u64>> {
        self.check("read_sca")?;
        let nsca = self.sca_length(image, params)?;
        let len = self.spectrum_length(image, params);
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            if nsca == 0 {
                return Ok(Vec::new());
            }
            // Equal-width regions over the spectrum; the last takes the remainder.
            let width = (len / nsca).max(1);
            let mut sca = vec![0u64; nsca];
            for (bin, counts) in channel.spectrum.iter().take(len).enumerate() {
                sca[(bin / width).min(nsca - 1)] += u64::from(*counts);
            }
            Ok(sca)
        })
    }

    fn begin_run(
        &self,
        link: ModuleLink<'_>,
        target: ChannelTarget,
        gate: u16,
        resume: bool,
    ) -> DriverResult<()> {
        self.check("begin_run")?;
        self.each_channel(link, target, |_, channel| {
            channel.running = true;
            if !resume {
                channel.spectrum.iter_mut().for_each(|bin| *bin = 0);
                channel.stats = RunStats::default();
            }
            Ok(())
        })?;
        self.hardware.with_journal(|j| j.stats.begin_runs += 1);
        debug!(io_chan = link.io_chan, %target, gate, resume, "run started");
        Ok(())
    }

    fn end_run(&self, link: ModuleLink<'_>, target: ChannelTarget) -> DriverResult<()> {
        self.check("end_run")?;
        let spectrum_len = self.hardware.config().spectrum_len;
        let baseline_len = self.hardware.config().baseline_len;
        let rng = self.hardware.rng();
        self.each_channel(link, target, |chan, channel| {
            if !channel.running {
                return Ok(());
            }
            channel.running = false;
            let peak = ((spectrum_len / 3 + chan * 10) as f32 * channel.gain) as usize;
            let counts = rng.spectrum(spectrum_len, peak.min(spectrum_len.saturating_sub(1)));
            channel.spectrum.resize(spectrum_len, 0);
            let mut events = 0u64;
            for (bin, add) in channel.spectrum.iter_mut().zip(counts) {
                *bin = bin.saturating_add(add);
                events += u64::from(add);
            }
            channel.baseline = (0..baseline_len)
                .map(|_| rng.gen_range(95u16..105))
                .collect();
            record_run(&mut channel.stats, events, baseline_len as u64);
            Ok(())
        })?;
        self.hardware.with_journal(|j| j.stats.end_runs += 1);
        Ok(())
    }

    fn run_active(&self, link: ModuleLink<'_>, mod_chan: usize) -> DriverResult<bool> {
        self.check("run_active")?;
        self.channel(link, mod_chan, |channel| Ok(channel.running))
    }

    fn begin_control_task(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        _info: &[i32],
        image: &DspImage,
    ) -> DriverResult<()> {
        self.check("begin_control_task")?;
        self.channel(link, mod_chan, |channel| {
            self.loaded_params(channel, image)?;
            if let Some(active) = channel.control_task {
                return Err(self.error(
                    DriverErrorKind::Hardware,
                    format!("control task {} already running", active.0),
                ));
            }
            channel.control_task = Some(task);
            Ok(())
        })
    }

    fn end_control_task(&self, link: ModuleLink<'_>, mod_chan: usize) -> DriverResult<()> {
        self.check("end_control_task")?;
        self.channel(link, mod_chan, |channel| {
            channel.control_task = None;
            Ok(())
        })
    }

    fn control_task_info(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        _image: &DspImage,
    ) -> DriverResult<Vec<i32>> {
        self.check("control_task_info")?;
        self.channel(link, mod_chan, |_| Ok(vec![CONTROL_TASK_LEN as i32, 1, i32::from(task.0)]))
    }

    fn control_task_data(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        task: ControlTask,
        _image: &DspImage,
    ) -> DriverResult<Vec<u32>> {
        self.check("control_task_data")?;
        self.channel(link, mod_chan, |channel| match channel.control_task {
            Some(active) if active == task => Ok((0..CONTROL_TASK_LEN as u32).collect()),
            _ => Err(self.error(
                DriverErrorKind::Hardware,
                format!("control task {} is not running", task.0),
            )),
        })
    }

    fn calibrate_channel(
        &self,
        link: ModuleLink<'_>,
        task: i32,
        channels: &mut [ChannelData<'_>],
    ) -> DriverResult<()> {
        self.check("calibrate_channel")?;
        self.module(link, |module, journal| {
            for data in channels.iter_mut() {
                let channel = module
                    .channels
                    .get_mut(data.mod_chan)
                    .ok_or_else(|| self.bad_channel(data.mod_chan))?;
                let memory = self.loaded_params(channel, data.dsp)?;
                if let Some(symbol) = data.dsp.symbol("CALTASK") {
                    let address = symbol.address as usize;
                    let value = u16::try_from(task).unwrap_or(0);
                    memory[address] = value;
                    data.params[address] = value;
                }
                journal.stats.channel_calibrations += 1;
            }
            Ok(())
        })
    }

    fn setup_asc(
        &self,
        link: ModuleLink<'_>,
        channel: &mut ChannelData<'_>,
        _adc_rule: f32,
    ) -> DriverResult<()> {
        self.check("setup_asc")?;
        let polarity = channel
            .dsp
            .symbol("POLARITY")
            .map(|sym| (sym.address as usize, u16::from(channel.preamp.polarity > 0)));
        self.module(link, |module, journal| {
            let sim = module
                .channels
                .get_mut(channel.mod_chan)
                .ok_or_else(|| self.bad_channel(channel.mod_chan))?;
            sim.preamp = Some(channel.preamp);
            if let Some((address, value)) = polarity {
                if let Some(word) = sim.params.get_mut(address) {
                    *word = value;
                }
                channel.params[address] = value;
            }
            journal.stats.asc_setups += 1;
            Ok(())
        })
    }

    fn calibrate_asc(
        &self,
        link: ModuleLink<'_>,
        channels: &mut [ChannelData<'_>],
    ) -> DriverResult<()> {
        self.check("calibrate_asc")?;
        self.module(link, |_, journal| {
            journal.stats.asc_calibrations += channels.len();
            Ok(())
        })
    }

    fn change_gains(
        &self,
        link: ModuleLink<'_>,
        mod_chan: usize,
        gainchange: f32,
        image: &DspImage,
        params: &mut [u16],
    ) -> DriverResult<()> {
        self.check("change_gains")?;
        if !gainchange.is_finite() || gainchange <= 0.0 {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!("gain change {} must be positive", gainchange),
            ));
        }
        let threshold = image.symbol("THRESHOLD");
        self.module(link, |module, journal| {
            let channel = module
                .channels
                .get_mut(mod_chan)
                .ok_or_else(|| self.bad_channel(mod_chan))?;
            let memory = self.loaded_params(channel, image)?;
            // The threshold is in ADC units, so it scales with the gain.
            if let Some(symbol) = threshold {
                let address = symbol.address as usize;
                if let Some(word) = memory.get_mut(address) {
                    let scaled = (f32::from(*word) * gainchange)
                        .round()
                        .clamp(f32::from(symbol.lower), f32::from(symbol.upper)) as u16;
                    *word = scaled;
                    if let Some(live) = params.get_mut(address) {
                        *live = scaled;
                    }
                }
            }
            channel.gain *= gainchange;
            journal.stats.gain_changes += 1;
            Ok(())
        })
    }

    fn read_mem(
        &self,
        link: ModuleLink<'_>,
        _mod_chan: usize,
        region: &MemoryRegion,
    ) -> DriverResult<Vec<u32>> {
        self.check("read_mem")?;
        self.module(link, |module, _| {
            Ok((0..region.length as u32)
                .map(|offset| {
                    module
                        .memory
                        .get(&(region.kind.clone(), region.base + offset))
                        .copied()
                        .unwrap_or(0)
                })
                .collect())
        })
    }

    fn write_mem(
        &self,
        link: ModuleLink<'_>,
        _mod_chan: usize,
        region: &MemoryRegion,
        data: &[u32],
    ) -> DriverResult<()> {
        self.check("write_mem")?;
        self.module(link, |module, _| {
            for (offset, value) in data.iter().take(region.length).enumerate() {
                module
                    .memory
                    .insert((region.kind.clone(), region.base + offset as u32), *value);
            }
            Ok(())
        })
    }

    fn read_reg(&self, link: ModuleLink<'_>, _mod_chan: usize, name: &str) -> DriverResult<u16> {
        self.check("read_reg")?;
        self.module(link, |module, _| {
            Ok(module.registers.get(name).copied().unwrap_or(0))
        })
    }

    fn write_reg(
        &self,
        link: ModuleLink<'_>,
        _mod_chan: usize,
        name: &str,
        value: u16,
    ) -> DriverResult<()> {
        self.check("write_reg")?;
        self.module(link, |module, _| {
            module.registers.insert(name.to_string(), value);
            Ok(())
        })
    }

    fn command(
        &self,
        link: ModuleLink<'_>,
        _mod_chan: usize,
        cmd: u8,
        send: &[u8],
        receive_len: usize,
    ) -> DriverResult<Vec<u8>> {
        self.check("command")?;
        self.module(link, |_, _| {
            let mut reply: Vec<u8> = std::iter::once(cmd).chain(send.iter().copied()).collect();
            reply.resize(receive_len, 0);
            Ok(reply)
        })
    }
}

/// Creates [`MockBoardDriver`]s for a set of board type names.
pub struct MockDriverFactory {
    hardware: Arc<MockHardware>,
    errors: ErrorConfig,
    board_types: Vec<String>,
    broadcast: bool,
}

impl MockDriverFactory {
    /// Simulate every known board family.
    pub fn new(hardware: Arc<MockHardware>) -> Self {
        Self {
            hardware,
            errors: ErrorConfig::none(),
            board_types: KNOWN_BOARD_TYPES.iter().map(|s| s.to_string()).collect(),
            broadcast: true,
        }
    }

    /// Serve only the named board types.
    #[must_use]
    pub fn with_board_types(mut self, names: &[&str]) -> Self {
        self.board_types = names.iter().map(|s| s.to_ascii_lowercase()).collect();
        self
    }

    /// Inject faults into every driver created here.
    #[must_use]
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Drivers created from here reject broadcast downloads.
    #[must_use]
    pub fn without_broadcast(mut self) -> Self {
        self.broadcast = false;
        self
    }
}

impl BoardDriverFactory for MockDriverFactory {
    fn board_types(&self) -> Vec<String> {
        self.board_types.clone()
    }

    fn create(&self, board_type: &str, pointer: Option<&str>) -> DriverResult<Arc<dyn BoardDriver>> {
        self.errors.check_operation(board_type, "create_driver")?;
        debug!(board_type, pointer = pointer.unwrap_or("-"), "creating simulated driver");
        let driver = MockBoardDriver::new(board_type, Arc::clone(&self.hardware), self.errors.clone());
        Ok(Arc::new(if self.broadcast {
            driver
        } else {
            driver.without_broadcast()
        }))
    }
}

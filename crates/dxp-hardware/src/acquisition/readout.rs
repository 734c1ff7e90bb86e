//! Run readout and raw hardware passthrough.

use super::{driver_call, image};
use crate::system::System;
use dxp_core::{ChannelTarget, DetChan, MemoryRegion, Result, RunStats, XerxesError};
use serde::Serialize;
use tracing::{debug, error};

/// Everything read back from one detector channel after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readout {
    /// Parameter block read after the run.
    pub params: Vec<u16>,
    /// Baseline history.
    pub baseline: Vec<u16>,
    /// MCA spectrum.
    pub spectrum: Vec<u32>,
}

impl Readout {
    /// Sum of all spectrum bins.
    pub fn total_counts(&self) -> u64 {
        self.spectrum.iter().map(|&bin| u64::from(bin)).sum()
    }
}

impl System {
    /// Read parameters, baseline and spectrum of detector `det`.
    ///
    /// A run error decoded from the fresh parameter block is cleared on the
    /// hardware and reported as [`XerxesError::DspRunError`].
    pub fn readout_detector_run(&mut self, det: DetChan) -> Result<Readout> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;

        driver_call(
            "prep_for_readout",
            module,
            ctx.driver.prep_for_readout(link, ChannelTarget::All),
        )?;
        driver_call(
            "read_dspparams",
            module,
            ctx.driver.read_dspparams(link, chan, dsp, slot.params_mut()),
        )?;
        let (runerror, errinfo) = ctx.driver.decode_error(dsp, slot.params());
        if runerror != 0 {
            error!(det_chan = det, runerror, errinfo, "DSP reported a run error");
            driver_call("clear_error", module, ctx.driver.clear_error(link, chan, dsp))?;
            return Err(XerxesError::DspRunError {
                det_chan: det,
                runerror,
                errinfo,
            });
        }
        let spectrum = driver_call(
            "read_spectrum",
            module,
            ctx.driver.read_spectrum(link, chan, dsp, slot.params()),
        )?;
        let baseline = driver_call(
            "read_baseline",
            module,
            ctx.driver.read_baseline(link, chan, dsp, slot.params()),
        )?;
        driver_call(
            "done_with_readout",
            module,
            ctx.driver.done_with_readout(link, ChannelTarget::All),
        )?;
        debug!(det_chan = det, nspec = spectrum.len(), nbase = baseline.len(), "run read out");
        Ok(Readout {
            params: slot.params().to_vec(),
            baseline,
            spectrum,
        })
    }

    /// Spectrum length of detector `det` under its current parameters.
    pub fn nspec(&self, det: DetChan) -> Result<usize> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        Ok(ctx.driver.spectrum_length(dsp, slot.params()))
    }

    /// Baseline history length of detector `det`.
    pub fn nbase(&self, det: DetChan) -> Result<usize> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        Ok(ctx.driver.baseline_length(dsp, slot.params()))
    }

    /// Livetime, count rates and event totals of detector `det`'s runs
    /// since the last fresh start. The live parameter buffer is refreshed
    /// from the hardware on the way.
    pub fn get_statistics(&mut self, det: DetChan) -> Result<RunStats> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;

        driver_call(
            "prep_for_readout",
            module,
            ctx.driver.prep_for_readout(link, ChannelTarget::All),
        )?;
        driver_call(
            "read_dspparams",
            module,
            ctx.driver.read_dspparams(link, chan, dsp, slot.params_mut()),
        )?;
        let stats = driver_call(
            "run_stats",
            module,
            ctx.driver.run_stats(link, chan, dsp, slot.params()),
        )?;
        driver_call(
            "done_with_readout",
            module,
            ctx.driver.done_with_readout(link, ChannelTarget::All),
        )?;
        debug!(
            det_chan = det,
            livetime = stats.livetime,
            icr = stats.icr,
            ocr = stats.ocr,
            nevents = stats.nevents(),
            "statistics read"
        );
        Ok(stats)
    }

    /// Event buffer length of detector `det`.
    pub fn nevent(&self, det: DetChan) -> Result<usize> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        driver_call("event_length", module, ctx.driver.event_length(dsp, slot.params()))
    }

    /// Number of SCA regions of detector `det`.
    pub fn nsca(&self, det: DetChan) -> Result<usize> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        driver_call("sca_length", module, ctx.driver.sca_length(dsp, slot.params()))
    }

    /// Read the SCA counters of detector `det`, one per region.
    pub fn readout_sca(&self, det: DetChan) -> Result<Vec<u64>> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        driver_call(
            "prep_for_readout",
            module,
            ctx.driver.prep_for_readout(link, ChannelTarget::All),
        )?;
        let sca = driver_call("read_sca", module, ctx.driver.read_sca(link, chan, dsp, slot.params()))?;
        driver_call(
            "done_with_readout",
            module,
            ctx.driver.done_with_readout(link, ChannelTarget::All),
        )?;
        Ok(sca)
    }

    // =========================================================================
    // Passthrough
    // =========================================================================

    /// Take or release the transport lock of detector `det`'s module.
    pub fn lock_resource(&mut self, det: DetChan, lock: bool) -> Result<()> {
        let (module, _) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call(
            "lock_resource",
            module,
            ctx.transport.lock_resource(ctx.io_chan, lock),
        )?;
        self.boards[module].locked = lock;
        Ok(())
    }

    /// Read a block of board memory described as `"type:hexbase:length"`.
    pub fn read_memory(&self, det: DetChan, name: &str) -> Result<Vec<u32>> {
        let region: MemoryRegion = name.parse()?;
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call("read_mem", module, ctx.driver.read_mem(ctx.link(), chan, &region))
    }

    /// Write a block of board memory; `data` must cover the region.
    pub fn write_memory(&mut self, det: DetChan, name: &str, data: &[u32]) -> Result<()> {
        let region: MemoryRegion = name.parse()?;
        if data.len() < region.length {
            return Err(XerxesError::BadParameter(format!(
                "{} words supplied for {}",
                data.len(),
                name
            )));
        }
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call(
            "write_mem",
            module,
            ctx.driver.write_mem(ctx.link(), chan, &region, data),
        )
    }

    /// Read a named board register.
    pub fn read_register(&self, det: DetChan, name: &str) -> Result<u16> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call("read_reg", module, ctx.driver.read_reg(ctx.link(), chan, name))
    }

    /// Write a named board register.
    pub fn write_register(&mut self, det: DetChan, name: &str, value: u16) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call(
            "write_reg",
            module,
            ctx.driver.write_reg(ctx.link(), chan, name, value),
        )
    }

    /// Send a raw command to detector `det`'s module and return
    /// `receive_len` reply bytes.
    pub fn command(&mut self, det: DetChan, cmd: u8, send: &[u8], receive_len: usize) -> Result<Vec<u8>> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        driver_call(
            "command",
            module,
            ctx.driver.command(ctx.link(), chan, cmd, send, receive_len),
        )
    }
}

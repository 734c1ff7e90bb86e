//! FPGA and DSP download, defaults and parameter transfer.
//!
//! System-wide downloads broadcast the first used channel's image to the
//! whole module and then download individually only to used channels whose
//! assigned image is a different registry entry. Images are compared by
//! handle, never by content. A board type that rejects broadcasts as
//! unsupported gets one download per used channel instead.

use super::{driver_call, image, BoardCtx};
use crate::board::ChannelSlot;
use crate::builder::Assigned;
use crate::system::System;
use dxp_core::{
    ChannelTarget, DetChan, DriverErrorKind, DriverResult, DspImage, DspState, FpgaKind, FpgaSet,
    ParamAccess, Result, XerxesError,
};
use std::time::Duration;
use tracing::{debug, error, info};

/// `Ok(true)` if a broadcast went through, `Ok(false)` if the board type
/// does not support broadcasts.
fn broadcast(operation: &'static str, module: usize, result: DriverResult<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(source) if source.kind == DriverErrorKind::Unsupported => {
            debug!(operation, module, "broadcast unsupported, downloading per channel");
            Ok(false)
        }
        Err(source) => {
            error!(operation, module, error = %source, "broadcast download failed");
            Err(XerxesError::driver(operation, module, source))
        }
    }
}

/// Ready wait, parameter read-back and memory self-test after a DSP
/// download to `chan`.
fn confirm_dsp(
    ctx: &BoardCtx,
    chan: usize,
    dsp: &DspImage,
    slot: &mut ChannelSlot,
    timeout: Duration,
) -> Result<()> {
    let link = ctx.link();
    let module = ctx.module;
    driver_call(
        "download_dsp_done",
        module,
        ctx.driver.download_dsp_done(link, chan, dsp, timeout),
    )?;
    driver_call(
        "read_dspparams",
        module,
        ctx.driver.read_dspparams(link, chan, dsp, slot.params_mut()),
    )?;
    driver_call(
        "test_spectrum_memory",
        module,
        ctx.driver.test_spectrum_memory(link, chan, dsp),
    )
}

impl System {
    // =========================================================================
    // FPGA
    // =========================================================================

    /// Download FPGA firmware to every module.
    pub fn fipconfig(&mut self) -> Result<()> {
        for module in 0..self.boards.len() {
            self.fipconfig_board(module)?;
        }
        info!(modules = self.boards.len(), "FPGA configuration complete");
        Ok(())
    }

    fn fipconfig_board(&self, module: usize) -> Result<()> {
        let board = &self.boards[module];
        let used: Vec<usize> = board.used.iter().collect();
        let Some(&first) = used.first() else {
            debug!(module, "no used channels, FPGA download skipped");
            return Ok(());
        };
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let set_for = |chan: usize| {
            let set = self.fpga_set(module, chan);
            if set.fippi.is_none() {
                return Err(XerxesError::Initialize(format!(
                    "module {} channel {} has no FiPPI assigned",
                    module, chan
                )));
            }
            Ok(set)
        };

        driver_call("look_at_me", module, ctx.driver.look_at_me(link, ChannelTarget::All))?;
        let lead = &board.channels[first];
        let broadcasted = broadcast(
            "download_fpga",
            module,
            ctx.driver
                .download_fpga(link, ChannelTarget::All, FpgaKind::All, &set_for(first)?),
        )?;

        for &chan in &used {
            let slot = &board.channels[chan];
            let target = ChannelTarget::Channel(chan);
            if !broadcasted {
                driver_call(
                    "download_fpga",
                    module,
                    ctx.driver.download_fpga(link, target, FpgaKind::All, &set_for(chan)?),
                )?;
                continue;
            }
            if chan == first {
                continue;
            }
            if slot.fippi != lead.fippi {
                debug!(module, chan, "FiPPI differs from broadcast image");
                driver_call(
                    "download_fpga",
                    module,
                    ctx.driver.download_fpga(link, target, FpgaKind::Fippi, &set_for(chan)?),
                )?;
            }
            if slot.user_fippi.is_some() && slot.user_fippi != lead.user_fippi {
                driver_call(
                    "download_fpga",
                    module,
                    ctx.driver
                        .download_fpga(link, target, FpgaKind::UserFippi, &set_for(chan)?),
                )?;
            }
        }

        driver_call(
            "download_fpga_done",
            module,
            ctx.driver.download_fpga_done(link, ChannelTarget::All, FpgaKind::All),
        )?;
        debug!(module, broadcast = broadcasted, "FPGA download complete");
        Ok(())
    }

    /// Assign a new FPGA image of class `kind` to detector `det` and
    /// download it.
    pub fn replace_fpgaconfig(&mut self, det: DetChan, kind: FpgaKind, filename: &str) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        self.ensure_idle(module, det)?;
        let btype = self.boards[module].btype;
        let id = self.add_fippi(btype, filename)?;
        match kind {
            FpgaKind::Mmu => self.boards[module].mmu = Some(id),
            FpgaKind::UserFippi => self.assign(module, Some(chan), Assigned::UserFippi(id)),
            FpgaKind::All | FpgaKind::Fippi => self.assign(module, Some(chan), Assigned::Fippi(id)),
        }
        self.reset_fpgaconfig(det, kind)
    }

    /// FPGA images currently assigned to one channel of a module.
    fn fpga_set(&self, module: usize, chan: usize) -> FpgaSet<'_> {
        let board = &self.boards[module];
        let slot = &board.channels[chan];
        FpgaSet {
            fippi: slot.fippi.and_then(|id| self.fippis.get(id)),
            user_fippi: slot.user_fippi.and_then(|id| self.fippis.get(id)),
            mmu: board.mmu.and_then(|id| self.fippis.get(id)),
        }
    }

    /// Shorthand for `replace_fpgaconfig` with [`FpgaKind::Fippi`].
    pub fn replace_fipconfig(&mut self, det: DetChan, filename: &str) -> Result<()> {
        self.replace_fpgaconfig(det, FpgaKind::Fippi, filename)
    }

    /// Download the FPGA images already assigned to detector `det`.
    pub fn reset_fpgaconfig(&mut self, det: DetChan, kind: FpgaKind) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let set = self.fpga_set(module, chan);
        let target = ChannelTarget::Channel(chan);
        driver_call("look_at_me", module, ctx.driver.look_at_me(link, target))?;
        driver_call("download_fpga", module, ctx.driver.download_fpga(link, target, kind, &set))?;
        driver_call(
            "download_fpga_done",
            module,
            ctx.driver.download_fpga_done(link, target, kind),
        )?;
        info!(det_chan = det, kind = kind.as_str(), "FPGA reloaded");
        Ok(())
    }

    /// Shorthand for `reset_fpgaconfig` with [`FpgaKind::Fippi`].
    pub fn reset_fipconfig(&mut self, det: DetChan) -> Result<()> {
        self.reset_fpgaconfig(det, FpgaKind::Fippi)
    }

    // =========================================================================
    // DSP
    // =========================================================================

    /// Download DSP programs to every module.
    pub fn dspconfig(&mut self) -> Result<()> {
        for module in 0..self.boards.len() {
            self.dspconfig_board(module)?;
        }
        info!(modules = self.boards.len(), "DSP configuration complete");
        Ok(())
    }

    fn dspconfig_board(&mut self, module: usize) -> Result<()> {
        let ctx = self.ctx(module)?;
        let link = ctx.link();
        let settle = self.settings.dsp_settle();
        let timeout = self.settings.dsp_ready_timeout();
        let System { boards, dsps, .. } = self;
        let board = &mut boards[module];
        let used: Vec<usize> = board.used.iter().collect();
        let Some(&first) = used.first() else {
            debug!(module, "no used channels, DSP download skipped");
            return Ok(());
        };

        let lead_id = board.channels[first].dsp;
        let lead = image(dsps, lead_id, module, first)?;
        let broadcasted = broadcast(
            "download_dsp",
            module,
            ctx.driver.download_dsp(link, ChannelTarget::All, lead),
        )?;
        for &chan in &used {
            let id = board.channels[chan].dsp;
            if broadcasted && (chan == first || id == lead_id) {
                continue;
            }
            let dsp = image(dsps, id, module, chan)?;
            debug!(module, chan, file = %dsp.filename, "individual DSP download");
            driver_call(
                "download_dsp",
                module,
                ctx.driver.download_dsp(link, ChannelTarget::Channel(chan), dsp),
            )?;
        }
        for &chan in &used {
            board.channels[chan].dsp_state = DspState::Downloaded;
        }

        ctx.transport.wait(settle);
        for &chan in &used {
            let slot = &mut board.channels[chan];
            let dsp = image(dsps, slot.dsp, module, chan)?;
            confirm_dsp(&ctx, chan, dsp, slot, timeout)?;
        }
        debug!(module, broadcast = broadcasted, "DSP download complete");
        Ok(())
    }

    /// Assign a new DSP image to detector `det` and download it. The live
    /// parameter buffer is reallocated for the new symbol table.
    pub fn replace_dspconfig(&mut self, det: DetChan, filename: &str) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        self.ensure_idle(module, det)?;
        let btype = self.boards[module].btype;
        let id = self.add_dsp(btype, filename)?;
        self.assign(module, Some(chan), Assigned::Dsp(id));
        self.reset_dspconfig(det)
    }

    /// Download the DSP image already assigned to detector `det`.
    pub fn reset_dspconfig(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let settle = self.settings.dsp_settle();
        let timeout = self.settings.dsp_ready_timeout();
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        driver_call(
            "download_dsp",
            module,
            ctx.driver
                .download_dsp(ctx.link(), ChannelTarget::Channel(chan), dsp),
        )?;
        slot.dsp_state = DspState::Downloaded;
        ctx.transport.wait(settle);
        confirm_dsp(&ctx, chan, dsp, slot, timeout)?;
        info!(det_chan = det, file = %dsp.filename, "DSP reloaded");
        Ok(())
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Copy the channel's parameter defaults into its live buffer.
    pub fn dspdefaults(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let System {
            boards,
            dsps,
            defaults,
            ..
        } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        if dsp.program.is_empty() {
            return Err(XerxesError::Initialize(format!(
                "DSP image {} has no program",
                dsp.filename
            )));
        }
        let Some(set) = slot.defaults.and_then(|id| defaults.get(id)) else {
            return Ok(());
        };
        for (name, value) in &set.entries {
            let index = dsp.symbol_index(name).ok_or_else(|| {
                error!(det_chan = det, symbol = %name, file = %set.filename, "unknown parameter in defaults");
                XerxesError::NoSymbol {
                    name: name.clone(),
                    image: dsp.filename.clone(),
                }
            })?;
            if let Some(word) = slot.params_mut().get_mut(index) {
                *word = *value;
            }
        }
        debug!(det_chan = det, count = set.entries.len(), "defaults applied");
        Ok(())
    }

    /// Write the live buffers of every used channel to the hardware.
    pub fn put_dspparams(&mut self) -> Result<()> {
        for module in 0..self.boards.len() {
            let ctx = self.ctx(module)?;
            let board = &self.boards[module];
            for chan in board.used.iter() {
                let slot = &board.channels[chan];
                let dsp = image(&self.dsps, slot.dsp, module, chan)?;
                driver_call(
                    "write_dspparams",
                    module,
                    ctx.driver.write_dspparams(ctx.link(), chan, dsp, slot.params()),
                )?;
            }
        }
        Ok(())
    }

    /// Write detector `det`'s live buffer to the hardware.
    pub fn replace_dspparams(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let slot = &self.boards[module].channels[chan];
        let dsp = image(&self.dsps, slot.dsp, module, chan)?;
        driver_call(
            "write_dspparams",
            module,
            ctx.driver.write_dspparams(ctx.link(), chan, dsp, slot.params()),
        )
    }

    /// Read detector `det`'s parameters from the hardware into its live
    /// buffer.
    pub fn upload_dspparams(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        if slot.params().is_empty() {
            return Err(XerxesError::OutOfMemory {
                what: format!("parameters of detector channel {}", det),
            });
        }
        driver_call(
            "read_dspparams",
            module,
            ctx.driver.read_dspparams(ctx.link(), chan, dsp, slot.params_mut()),
        )
    }

    /// Write `(table index, value)` pairs to detector `det`'s parameter
    /// memory and mirror them into its live buffer. Read-only parameters
    /// are skipped. Every index is checked before anything is written.
    /// Returns the number of words written.
    pub fn download_one_params(&mut self, det: DetChan, values: &[(usize, u16)]) -> Result<usize> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        let len = dsp.nsymbols();
        if let Some(&(index, _)) = values.iter().find(|(index, _)| *index >= len) {
            return Err(XerxesError::IndexOutOfBounds { index, len });
        }
        let mut written = 0;
        for &(index, value) in values {
            let symbol = &dsp.symbols[index];
            if !symbol.access.contains(ParamAccess::WRITE) {
                debug!(det_chan = det, symbol = %symbol.name, "read-only parameter skipped");
                continue;
            }
            driver_call(
                "write_dspparam",
                module,
                ctx.driver.write_dspparam(ctx.link(), chan, dsp, symbol, value),
            )?;
            if let Some(word) = slot.params_mut().get_mut(index) {
                *word = value;
            }
            written += 1;
        }
        debug!(det_chan = det, written, skipped = values.len() - written, "parameters downloaded");
        Ok(written)
    }

    /// [`download_one_params`](Self::download_one_params) on every used
    /// channel. Indices refer to each channel's own symbol table.
    pub fn download_params(&mut self, values: &[(usize, u16)]) -> Result<()> {
        for det in self.used_detectors() {
            self.download_one_params(det, values)?;
        }
        Ok(())
    }
}

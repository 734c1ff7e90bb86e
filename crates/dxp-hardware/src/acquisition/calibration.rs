//! Bring-up sequence and analog front-end calibration.
//!
//! `initialize` is the one-call path from a system file to a running
//! system: parse, build, download and calibrate. `reset_channel` repeats
//! the download and calibration steps for one detector channel.

use super::{channel_data, driver_call, image};
use crate::config::parse_preamp;
use crate::system::System;
use dxp_core::{ChannelData, DetChan, FpgaKind, ParamDefaults, Result, XerxesError};
use tracing::{debug, info, warn};

impl System {
    /// Build the system from the system file `config` and bring every
    /// module up.
    pub fn initialize(&mut self, config: &str) -> Result<()> {
        self.reset_all();
        self.read_config(config)?;
        self.assign_channel()?;
        self.user_setup()
    }

    /// Download firmware, apply parameter defaults and set up the ASC on an
    /// already built system.
    pub fn user_setup(&mut self) -> Result<()> {
        self.fipconfig()?;
        self.dspconfig()?;
        for det in self.used_detectors() {
            self.upload_dspparams(det)?;
            self.dspdefaults(det)?;
            self.replace_dspparams(det)?;
        }
        let energy = self.initialize_asc(self.settings.adc_rule)?;
        info!(
            modules = self.boards.len(),
            channels = self.ndxpchan(),
            ?energy,
            "user setup complete"
        );
        Ok(())
    }

    /// Full reload of one detector channel: FPGA, DSP, parameters,
    /// defaults, then ASC setup and calibration of that channel alone.
    pub fn reset_channel(&mut self, det: DetChan) -> Result<()> {
        self.reset_fpgaconfig(det, FpgaKind::All)?;
        self.reset_dspconfig(det)?;
        self.upload_dspparams(det)?;
        self.dspdefaults(det)?;
        self.replace_dspparams(det)?;

        let (module, chan) = self.det_to_elec(det)?;
        if self.preamp_file().is_some() {
            let adc_rule = self.settings.adc_rule;
            let ctx = self.ctx(module)?;
            let System { boards, dsps, .. } = self;
            let slot = &mut boards[module].channels[chan];
            let dsp = image(dsps, slot.dsp, module, chan)?;
            let mut data = ChannelData {
                mod_chan: chan,
                dsp,
                preamp: slot.preamp,
                params: slot.params_mut(),
            };
            driver_call(
                "setup_asc",
                module,
                ctx.driver.setup_asc(ctx.link(), &mut data, adc_rule),
            )?;
        }
        self.calibrate_asc_board(module, Some(chan))?;
        info!(det_chan = det, "channel reset");
        Ok(())
    }

    fn preamp_file(&self) -> Option<String> {
        self.info
            .preamp
            .clone()
            .filter(|name| !ParamDefaults::is_null_name(name))
    }

    // =========================================================================
    // Calibration
    // =========================================================================

    /// Run calibration task `task` on every used channel of every module.
    pub fn calibrate(&mut self, task: i32) -> Result<()> {
        for module in 0..self.boards.len() {
            self.calibrate_board(module, None, task)?;
        }
        info!(task, "calibration complete");
        Ok(())
    }

    /// Run calibration task `task` on detector `det` only.
    pub fn calibrate_one_channel(&mut self, det: DetChan, task: i32) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        self.calibrate_board(module, Some(chan), task)
    }

    fn calibrate_board(&mut self, module: usize, only: Option<usize>, task: i32) -> Result<()> {
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let mut data = channel_data(dsps, &mut boards[module], only)?;
        if data.is_empty() {
            return Ok(());
        }
        driver_call(
            "calibrate_channel",
            module,
            ctx.driver.calibrate_channel(ctx.link(), task, &mut data),
        )
    }

    /// Multiply the gain of every used channel by `gainchange`, keeping
    /// each channel's energy threshold where it was.
    pub fn modify_gains(&mut self, gainchange: f32) -> Result<()> {
        check_gainchange(gainchange)?;
        for det in self.used_detectors() {
            self.modify_one_gains(det, gainchange)?;
        }
        info!(gainchange, "gains modified");
        Ok(())
    }

    /// Multiply detector `det`'s gain by `gainchange`.
    pub fn modify_one_gains(&mut self, det: DetChan, gainchange: f32) -> Result<()> {
        check_gainchange(gainchange)?;
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        driver_call(
            "change_gains",
            module,
            ctx.driver
                .change_gains(ctx.link(), chan, gainchange, dsp, slot.params_mut()),
        )?;
        debug!(det_chan = det, gainchange, "gain modified");
        Ok(())
    }

    fn calibrate_asc_board(&mut self, module: usize, only: Option<usize>) -> Result<()> {
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let mut data = channel_data(dsps, &mut boards[module], only)?;
        driver_call(
            "calibrate_asc",
            module,
            ctx.driver.calibrate_asc(ctx.link(), &mut data),
        )
    }

    /// Read the preamp file, program each listed channel's analog signal
    /// conditioner and calibrate every module. Returns the file's `ENERGY`
    /// value. No preamp file, or a `NULL` one, leaves the hardware alone.
    pub fn initialize_asc(&mut self, adc_rule: f32) -> Result<Option<f32>> {
        let Some(name) = self.preamp_file() else {
            debug!("no preamp file, ASC left unconfigured");
            return Ok(None);
        };
        let (path, text) = self.locator.read_to_string(&name).map_err(|e| match e {
            XerxesError::FileNotFound { name } => XerxesError::OpenFailed {
                path: name,
                reason: "preamp file not found".to_string(),
            },
            other => other,
        })?;
        let preamps = parse_preamp(&text)?;

        let mut configured = 0;
        for entry in &preamps.entries {
            let Ok((module, chan)) = self.det_to_elec(entry.det_chan) else {
                warn!(
                    line = entry.line,
                    det_chan = entry.det_chan,
                    "preamp entry for unknown detector channel skipped"
                );
                continue;
            };
            let ctx = self.ctx(module)?;
            let System { boards, dsps, .. } = self;
            let slot = &mut boards[module].channels[chan];
            slot.preamp = entry.info;
            let dsp = image(dsps, slot.dsp, module, chan)?;
            let mut data = ChannelData {
                mod_chan: chan,
                dsp,
                preamp: entry.info,
                params: slot.params_mut(),
            };
            driver_call(
                "setup_asc",
                module,
                ctx.driver.setup_asc(ctx.link(), &mut data, adc_rule),
            )?;
            configured += 1;
        }

        for module in 0..self.boards.len() {
            self.calibrate_asc_board(module, None)?;
        }
        info!(path = %path.display(), configured, energy = ?preamps.energy, "ASC initialized");
        Ok(preamps.energy)
    }
}

fn check_gainchange(gainchange: f32) -> Result<()> {
    if gainchange.is_finite() && gainchange > 0.0 {
        Ok(())
    } else {
        Err(XerxesError::BadParameter(format!(
            "gain change {} must be a positive number",
            gainchange
        )))
    }
}

//! DSP symbol access by name.

use super::{driver_call, image};
use crate::system::System;
use dxp_core::{ChannelTarget, DetChan, DspImage, ParamAccess, Result, XerxesError};
use serde::Serialize;
use tracing::debug;

/// Access mode and value range of one DSP parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymbolLimits {
    /// Read/write access.
    pub access: ParamAccess,
    /// Lowest accepted value.
    pub lower: u16,
    /// Highest accepted value.
    pub upper: u16,
}

impl System {
    fn dsp_of(&self, det: DetChan) -> Result<(usize, usize, &DspImage)> {
        let (module, chan) = self.det_to_elec(det)?;
        let dsp = image(&self.dsps, self.boards[module].channels[chan].dsp, module, chan)?;
        Ok((module, chan, dsp))
    }

    /// Position of `name` in the parameter table of detector `det`.
    pub fn get_symbol_index(&self, det: DetChan, name: &str) -> Result<usize> {
        let (_, _, dsp) = self.dsp_of(det)?;
        dsp.symbol_index(name).ok_or_else(|| XerxesError::NoSymbol {
            name: name.to_string(),
            image: dsp.filename.clone(),
        })
    }

    /// Read one parameter from the hardware.
    pub fn get_dspsymbol(&self, det: DetChan, name: &str) -> Result<f64> {
        let (module, chan, dsp) = self.dsp_of(det)?;
        let ctx = self.ctx(module)?;
        let target = ChannelTarget::Channel(chan);
        driver_call("prep_for_readout", module, ctx.driver.prep_for_readout(ctx.link(), target))?;
        let value = driver_call(
            "read_dspsymbol",
            module,
            ctx.driver.read_dspsymbol(ctx.link(), chan, name, dsp),
        )?;
        driver_call("done_with_readout", module, ctx.driver.done_with_readout(ctx.link(), target))?;
        Ok(value)
    }

    /// Read one single-word parameter from the hardware.
    pub fn get_one_dspsymbol(&self, det: DetChan, name: &str) -> Result<u16> {
        let value = self.get_dspsymbol(det, name)?;
        if !(0.0..=f64::from(u16::MAX)).contains(&value) {
            return Err(XerxesError::BadParameter(format!(
                "{} = {} does not fit in one word, use get_dspsymbol",
                name, value
            )));
        }
        Ok(value as u16)
    }

    /// Write one parameter of detector `det` and mirror it in the live
    /// buffer. Refused while the channel is running.
    pub fn set_one_dspsymbol(&mut self, det: DetChan, name: &str, value: u16) -> Result<()> {
        let index = self.get_symbol_index(det, name)?;
        let status = self.isrunning(det)?;
        if !status.is_empty() {
            return Err(XerxesError::RunActive { det_chan: det, status });
        }
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let System { boards, dsps, .. } = self;
        let slot = &mut boards[module].channels[chan];
        let dsp = image(dsps, slot.dsp, module, chan)?;
        driver_call(
            "modify_dspsymbol",
            module,
            ctx.driver.modify_dspsymbol(ctx.link(), chan, name, value, dsp),
        )?;
        if let Some(word) = slot.params_mut().get_mut(index) {
            *word = value;
        }
        debug!(det_chan = det, symbol = name, value, "parameter written");
        Ok(())
    }

    /// Write one parameter on every used channel of the system.
    pub fn set_dspsymbol(&mut self, name: &str, value: u16) -> Result<()> {
        for det in self.used_detectors() {
            self.set_one_dspsymbol(det, name, value)?;
        }
        Ok(())
    }

    /// Parameter names of detector `det`'s DSP image, in table order.
    pub fn symbolname_list(&self, det: DetChan) -> Result<Vec<String>> {
        let (_, _, dsp) = self.dsp_of(det)?;
        Ok(dsp.symbols.iter().map(|sym| sym.name.clone()).collect())
    }

    /// Name of the parameter at table position `index`.
    pub fn symbolname_by_index(&self, det: DetChan, index: usize) -> Result<&str> {
        let (_, _, dsp) = self.dsp_of(det)?;
        dsp.symbols
            .get(index)
            .map(|sym| sym.name.as_str())
            .ok_or(XerxesError::IndexOutOfBounds {
                index,
                len: dsp.nsymbols(),
            })
    }

    /// Access mode and bounds of every parameter, in table order.
    pub fn symbolname_limits(&self, det: DetChan) -> Result<Vec<SymbolLimits>> {
        let (_, _, dsp) = self.dsp_of(det)?;
        Ok(dsp
            .symbols
            .iter()
            .map(|sym| SymbolLimits {
                access: sym.access,
                lower: sym.lower,
                upper: sym.upper,
            })
            .collect())
    }

    /// Number of parameters in detector `det`'s DSP image.
    pub fn max_symbols(&self, det: DetChan) -> Result<usize> {
        let (_, _, dsp) = self.dsp_of(det)?;
        Ok(dsp.nsymbols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_limits_serialize() {
        let limits = SymbolLimits {
            access: ParamAccess::READ | ParamAccess::WRITE,
            lower: 0,
            upper: 1023,
        };
        let json = serde_json::to_value(limits).unwrap();
        assert_eq!(json["upper"], 1023);
    }
}

//! Save and restore of DSP parameters.
//!
//! A [`ConfigSnapshot`] holds, for every used detector channel, the
//! parameter names of its DSP image and the values read back from the
//! hardware. Restoring maps the names onto the image the channel runs now,
//! so a snapshot survives a DSP build that reorders the symbol table.
//! Firmware is not reloaded; a restore only writes parameters.

use super::image;
use crate::config::locate::read_text;
use crate::system::System;
use dxp_core::{DetChan, Result, XerxesError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Saved parameters of one detector channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// DSP image the values were read from.
    pub dsp: String,
    /// Parameter names in table order.
    pub symbols: Vec<String>,
    /// One value per name.
    pub values: Vec<u16>,
}

/// Saved parameters of the whole system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Preamp file in effect when the snapshot was taken.
    pub preamp: Option<String>,
    /// Parameters per detector channel.
    pub channels: BTreeMap<DetChan, ChannelParams>,
}

impl System {
    /// Read every used channel's parameters from the hardware and capture
    /// them by name.
    pub fn save_config(&mut self) -> Result<ConfigSnapshot> {
        let mut snapshot = ConfigSnapshot {
            preamp: self.info.preamp.clone(),
            channels: BTreeMap::new(),
        };
        for det in self.used_detectors() {
            self.upload_dspparams(det)?;
            let (module, chan) = self.det_to_elec(det)?;
            let slot = &self.boards[module].channels[chan];
            let dsp = image(&self.dsps, slot.dsp, module, chan)?;
            snapshot.channels.insert(
                det,
                ChannelParams {
                    dsp: dsp.filename.clone(),
                    symbols: dsp.symbols.iter().map(|sym| sym.name.clone()).collect(),
                    values: slot.params().to_vec(),
                },
            );
        }
        info!(channels = snapshot.channels.len(), "configuration saved");
        Ok(snapshot)
    }

    /// Write a snapshot back. Every channel and name is resolved before
    /// the first write, so an unknown detector or parameter changes
    /// nothing. Read-only parameters are skipped.
    pub fn restore_config(&mut self, snapshot: &ConfigSnapshot) -> Result<()> {
        let mut plan = Vec::with_capacity(snapshot.channels.len());
        for (&det, saved) in &snapshot.channels {
            if saved.symbols.len() != saved.values.len() {
                return Err(XerxesError::BadParameter(format!(
                    "detector channel {}: {} names but {} values",
                    det,
                    saved.symbols.len(),
                    saved.values.len()
                )));
            }
            let (module, chan) = self.det_to_elec(det)?;
            let slot = &self.boards[module].channels[chan];
            let dsp = image(&self.dsps, slot.dsp, module, chan)?;
            if saved.dsp != dsp.filename {
                warn!(
                    det_chan = det,
                    saved = %saved.dsp,
                    current = %dsp.filename,
                    "restoring parameters saved from another DSP image"
                );
            }
            let values = saved
                .symbols
                .iter()
                .zip(&saved.values)
                .map(|(name, value)| {
                    dsp.symbol_index(name)
                        .map(|index| (index, *value))
                        .ok_or_else(|| XerxesError::NoSymbol {
                            name: name.clone(),
                            image: dsp.filename.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            plan.push((det, values));
        }
        for (det, values) in &plan {
            self.download_one_params(*det, values)?;
            self.upload_dspparams(*det)?;
        }
        if snapshot.preamp.is_some() {
            self.info.preamp = snapshot.preamp.clone();
        }
        info!(channels = plan.len(), "configuration restored");
        Ok(())
    }

    /// [`save_config`](Self::save_config) to a JSON file.
    pub fn save_config_file(&mut self, path: &Path) -> Result<ConfigSnapshot> {
        let snapshot = self.save_config()?;
        let open_failed = |reason: String| XerxesError::OpenFailed {
            path: path.display().to_string(),
            reason,
        };
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| open_failed(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| open_failed(e.to_string()))?;
        Ok(snapshot)
    }

    /// [`restore_config`](Self::restore_config) from a JSON file.
    pub fn restore_config_file(&mut self, path: &Path) -> Result<ConfigSnapshot> {
        let text = read_text(path)?;
        let snapshot: ConfigSnapshot =
            serde_json::from_str(&text).map_err(|e| XerxesError::MalformedLine {
                line: e.line(),
                message: e.to_string(),
            })?;
        self.restore_config(&snapshot)?;
        Ok(snapshot)
    }
}

//! Preamplifier file parser.
//!
//! ```text
//! * comment
//! ENERGY 5.9
//! * detChan gainmod polarity vmin vmax vstep
//! 0 1.0 1 -1.5 1.5 0.001
//! ```
//!
//! The voltage columns are scaled by `gainmod` on the way in.

use super::tokenizer::config_lines;
use dxp_core::{DetChan, PreampInfo, Result, XerxesError};

/// Analog front-end settings of one detector channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreampEntry {
    /// Line the entry was read from.
    pub line: usize,
    /// Detector the entry applies to.
    pub det_chan: DetChan,
    /// Decoded settings.
    pub info: PreampInfo,
}

/// Parsed preamplifier file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreampSettings {
    /// Last `ENERGY` value in the file, in keV.
    pub energy: Option<f32>,
    /// Per-detector entries in file order.
    pub entries: Vec<PreampEntry>,
}

fn number<T: std::str::FromStr>(line: usize, what: &str, token: Option<&str>) -> Result<T> {
    let token = token.ok_or_else(|| XerxesError::MalformedLine {
        line,
        message: format!("missing {}", what),
    })?;
    token.parse().map_err(|_| XerxesError::MalformedLine {
        line,
        message: format!("{} '{}' is not a number", what, token),
    })
}

/// Parse a preamp file: `ENERGY` lines and one line per detector.
pub fn parse_preamp(text: &str) -> Result<PreampSettings> {
    let mut settings = PreampSettings::default();
    for line in config_lines(text) {
        let n = line.number;
        if line.directive == "energy" {
            settings.energy = Some(number(n, "energy", line.args().next())?);
            continue;
        }
        let det_chan: DetChan = number(n, "detector channel", Some(line.directive.as_str()))?;
        let mut args = line.args();
        let gain: f32 = number(n, "gainmod", args.next())?;
        let polarity: i16 = number(n, "polarity", args.next())?;
        let vmin: f32 = number(n, "vmin", args.next())?;
        let vmax: f32 = number(n, "vmax", args.next())?;
        let vstep: f32 = number(n, "vstep", args.next())?;
        settings.entries.push(PreampEntry {
            line: n,
            det_chan,
            info: PreampInfo {
                gain,
                vmin: gain * vmin,
                vmax: gain * vmax,
                vstep: gain * vstep,
                polarity,
            },
        });
    }
    Ok(settings)
}

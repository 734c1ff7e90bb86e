//! Modules file parser.
//!
//! ```text
//! board_type  dxpx10p
//! interface   epp  dxpepp
//! default_dsp x10p.dsp
//! default_fippi fxpf0.fip
//! default_param x10p.dat
//! module 0x378 0
//! dsp 0 x10p_slow.dsp
//! end
//! ```
//!
//! Parsing only produces directives; the
//! [`ModulesBuilder`](crate::builder::ModulesBuilder) applies them to a
//! [`System`](crate::System).

use super::tokenizer::{config_lines, ConfigLine};
use dxp_core::{DetChan, Result, XerxesError};

/// Per-board or per-channel image slot named by a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    /// DSP program.
    Dsp,
    /// Filter FPGA.
    Fippi,
    /// User filter FPGA.
    UserFippi,
    /// Parameter defaults.
    Defaults,
}

impl ImageSlot {
    /// Directive suffix naming the slot.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSlot::Dsp => "dsp",
            ImageSlot::Fippi => "fippi",
            ImageSlot::UserFippi => "user_fippi",
            ImageSlot::Defaults => "param",
        }
    }
}

/// One parsed modules file line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ModuleDirective {
    /// `board_type`: working board type for the following modules.
    BoardType(String),
    /// `iolib`: I/O library for the next interface.
    IoLibrary(String),
    /// Interface tag, with the I/O library if given on the same line.
    Interface { tag: String, iolib: Option<String> },
    /// `module`: address and detector id per channel.
    Module { iostring: String, det_chans: Vec<DetChan> },
    /// `default_dsp`, `default_fippi`, `default_user_fippi`, `default_param`.
    Default { slot: ImageSlot, file: String },
    /// `dsp`, `fippi`, `user_fippi`, `param` for a single channel.
    Channel { slot: ImageSlot, channel: i64, file: String },
    /// `mmu`: module MMU image.
    Mmu(String),
    /// `end`: forget the working state.
    End,
}

fn malformed(line: &ConfigLine<'_>, message: impl Into<String>) -> XerxesError {
    XerxesError::MalformedLine {
        line: line.number,
        message: message.into(),
    }
}

fn filename(line: &ConfigLine<'_>) -> Result<String> {
    line.filename()
        .map(str::to_string)
        .ok_or_else(|| malformed(line, format!("'{}' needs a filename", line.directive)))
}

fn channel_and_file(line: &ConfigLine<'_>, slot: ImageSlot) -> Result<ModuleDirective> {
    let (channel, file) = line.arg_and_filename().ok_or_else(|| {
        malformed(line, format!("'{}' needs a channel and a filename", line.directive))
    })?;
    let channel = channel
        .parse::<i64>()
        .map_err(|_| malformed(line, format!("bad channel index '{}'", channel)))?;
    Ok(ModuleDirective::Channel {
        slot,
        channel,
        file: file.to_string(),
    })
}

fn parse_line(line: &ConfigLine<'_>) -> Result<ModuleDirective> {
    let directive = match line.directive.as_str() {
        "board_type" => {
            let name = line
                .args()
                .next()
                .ok_or_else(|| malformed(line, "'board_type' needs a name"))?;
            ModuleDirective::BoardType(name.to_ascii_lowercase())
        }
        "iolibrary" => ModuleDirective::IoLibrary(filename(line)?),
        "interface" => {
            let mut args = line.args();
            let tag = args
                .next()
                .ok_or_else(|| malformed(line, "'interface' needs a tag"))?;
            ModuleDirective::Interface {
                tag: tag.to_ascii_lowercase(),
                iolib: args.next().map(str::to_string),
            }
        }
        "module" => {
            let mut args = line.args();
            let iostring = args
                .next()
                .ok_or_else(|| malformed(line, "'module' needs an iostring"))?;
            let det_chans = args
                .map(|id| {
                    id.parse::<DetChan>()
                        .map_err(|_| malformed(line, format!("bad detector channel '{}'", id)))
                })
                .collect::<Result<Vec<_>>>()?;
            if det_chans.is_empty() {
                return Err(malformed(line, "'module' needs at least one channel"));
            }
            ModuleDirective::Module {
                iostring: iostring.to_string(),
                det_chans,
            }
        }
        "default_dsp" => ModuleDirective::Default { slot: ImageSlot::Dsp, file: filename(line)? },
        "default_fippi" => ModuleDirective::Default { slot: ImageSlot::Fippi, file: filename(line)? },
        "default_user_fippi" => {
            ModuleDirective::Default { slot: ImageSlot::UserFippi, file: filename(line)? }
        }
        "default_param" => ModuleDirective::Default { slot: ImageSlot::Defaults, file: filename(line)? },
        "dsp" => channel_and_file(line, ImageSlot::Dsp)?,
        "fippi" => channel_and_file(line, ImageSlot::Fippi)?,
        "user_fippi" => channel_and_file(line, ImageSlot::UserFippi)?,
        "param" => channel_and_file(line, ImageSlot::Defaults)?,
        "mmu" => ModuleDirective::Mmu(filename(line)?),
        "end" => ModuleDirective::End,
        other => {
            return Err(XerxesError::UnrecognizedDirective {
                line: line.number,
                token: other.to_string(),
            })
        }
    };
    Ok(directive)
}

/// Parse a whole modules file into `(line number, directive)` pairs.
pub fn parse_modules(text: &str) -> Result<Vec<(usize, ModuleDirective)>> {
    config_lines(text)
        .map(|line| parse_line(&line).map(|directive| (line.number, directive)))
        .collect()
}

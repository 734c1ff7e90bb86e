//! Channel addressing and per-board state types.

use crate::error::XerxesError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transport handle returned by [`Transport::open`](crate::Transport::open).
pub type IoChan = i32;

/// User-facing detector channel number. Negative ids mark unused slots.
pub type DetChan = i32;

/// Maximum number of channels a single module can expose.
pub const MAX_MODULE_CHANNELS: usize = 32;

/// Maximum number of DSP symbols a driver may report for one image.
pub const MAX_SYMBOLS: usize = 150;

// =============================================================================
// Channel addressing
// =============================================================================

/// Bitmask of the channels of a module that carry a detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u32);

impl ChannelMask {
    /// No channel in use.
    pub const EMPTY: ChannelMask = ChannelMask(0);

    /// Mask from raw bits, bit `n` standing for module channel `n`.
    pub fn from_bits(bits: u32) -> Self {
        ChannelMask(bits)
    }

    /// Mask with only `chan` set.
    pub fn single(chan: usize) -> Self {
        let mut mask = ChannelMask::EMPTY;
        mask.insert(chan);
        mask
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Mark `chan` used. Channels past [`MAX_MODULE_CHANNELS`] are ignored.
    pub fn insert(&mut self, chan: usize) {
        if chan < MAX_MODULE_CHANNELS {
            self.0 |= 1 << chan;
        }
    }

    /// True if `chan` is used.
    pub fn contains(self, chan: usize) -> bool {
        chan < MAX_MODULE_CHANNELS && self.0 & (1 << chan) != 0
    }

    /// Number of used channels.
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True if no channel is used.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Lowest used channel.
    pub fn first(self) -> Option<usize> {
        (self.0 != 0).then(|| self.0.trailing_zeros() as usize)
    }

    /// Used channels in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_MODULE_CHANNELS).filter(move |&chan| self.contains(chan))
    }
}

/// Which channels of a module an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTarget {
    /// Broadcast to every channel of the module.
    All,
    /// A single module channel.
    Channel(usize),
}

impl std::fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelTarget::All => write!(f, "all"),
            ChannelTarget::Channel(chan) => write!(f, "{}", chan),
        }
    }
}

// =============================================================================
// Run control
// =============================================================================

bitflags! {
    /// Activity reported by `isrunning`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RunStatus: u8 {
        /// The hardware reports a run in progress.
        const HARDWARE = 0x1;
        /// Software state says a run was started.
        const RUN = 0x2;
        /// Software state says a control task was started.
        const CONTROL_TASK = 0x4;
    }
}

/// Board-specific control task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlTask(pub i16);

/// Per-board run state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Nothing started.
    #[default]
    Idle,
    /// A data run is in progress.
    RunActive {
        /// Gate mode the run was started with.
        gate: u16,
    },
    /// A control task is in progress.
    ControlTaskActive {
        /// Task that was started.
        task: ControlTask,
    },
}

impl RunState {
    /// True in [`RunState::Idle`].
    pub fn is_idle(&self) -> bool {
        matches!(self, RunState::Idle)
    }

    /// Software half of the `isrunning` status.
    pub fn status(&self) -> RunStatus {
        match self {
            RunState::Idle => RunStatus::empty(),
            RunState::RunActive { .. } => RunStatus::RUN,
            RunState::ControlTaskActive { .. } => RunStatus::CONTROL_TASK,
        }
    }
}

/// Run statistics decoded from a channel's parameter block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Events binned into the spectrum.
    pub events: u64,
    /// Events below the first spectrum bin.
    pub underflows: u64,
    /// Events above the last spectrum bin.
    pub overflows: u64,
    /// Fast-channel triggers, including piled-up events.
    pub fast_peaks: u64,
    /// Baseline samples taken during the run.
    pub baseline_events: u64,
    /// Livetime of the last run in seconds.
    pub livetime: f64,
    /// Input count rate in kcounts/s.
    pub icr: f64,
    /// Output count rate in kcounts/s.
    pub ocr: f64,
}

impl RunStats {
    /// Every event the energy filter processed.
    pub fn nevents(&self) -> u64 {
        self.events + self.underflows + self.overflows
    }
}

// =============================================================================
// Channel state
// =============================================================================

/// Download state of a channel's DSP program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DspState {
    /// No program was ever downloaded.
    #[default]
    NotLoaded,
    /// The assigned program is running.
    Downloaded,
    /// A new image was assigned and has not been downloaded yet.
    NeedsUpdate,
}

/// Preamplifier settings read from the preamp file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PreampInfo {
    /// Preamp gain in mV/keV.
    pub gain: f32,
    /// Lower end of the reset range in volts.
    pub vmin: f32,
    /// Upper end of the reset range in volts.
    pub vmax: f32,
    /// Typical step size in volts.
    pub vstep: f32,
    /// 1 for positive pulses, 0 for negative.
    pub polarity: i16,
}

/// FPGA image class addressed by a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FpgaKind {
    /// Every FPGA on the addressed channels.
    All,
    /// Filter FPGA.
    Fippi,
    /// Optional user-supplied filter FPGA.
    UserFippi,
    /// Memory manager FPGA, one per module.
    Mmu,
}

impl FpgaKind {
    /// Name used in logs and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            FpgaKind::All => "all",
            FpgaKind::Fippi => "fippi",
            FpgaKind::UserFippi => "user_fippi",
            FpgaKind::Mmu => "mmu",
        }
    }
}

impl FromStr for FpgaKind {
    type Err = XerxesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FpgaKind::All),
            "fippi" => Ok(FpgaKind::Fippi),
            "user_fippi" | "user" => Ok(FpgaKind::UserFippi),
            "mmu" => Ok(FpgaKind::Mmu),
            other => Err(XerxesError::BadParameter(format!(
                "unknown FPGA type '{}'",
                other
            ))),
        }
    }
}

/// Memory block addressed as `type:base:length`, base in hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Board-specific memory name (`data`, `program`, ...).
    pub kind: String,
    /// First word address.
    pub base: u32,
    /// Number of words.
    pub length: usize,
}

impl FromStr for MemoryRegion {
    type Err = XerxesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || XerxesError::BadParameter(format!("memory string '{}' is malformed", s));
        let mut parts = s.split(':').filter(|p| !p.is_empty());
        let kind = parts.next().ok_or_else(malformed)?;
        let base = parts.next().ok_or_else(malformed)?;
        let length = parts.next().ok_or_else(malformed)?;
        let base = base.trim_start_matches("0x").trim_start_matches("0X");
        Ok(MemoryRegion {
            kind: kind.to_string(),
            base: u32::from_str_radix(base, 16).map_err(|_| malformed())?,
            length: length.parse().map_err(|_| malformed())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mask_bits() {
        let mut mask = ChannelMask::EMPTY;
        mask.insert(0);
        mask.insert(1);
        assert_eq!(mask.bits(), 0b0011);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.first(), Some(0));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(!mask.contains(2));
        assert!(!mask.contains(64));
    }

    #[test]
    fn test_empty_mask_has_no_first() {
        assert_eq!(ChannelMask::EMPTY.first(), None);
        assert!(ChannelMask::EMPTY.is_empty());
    }

    #[test]
    fn test_run_state_status() {
        assert_eq!(RunState::Idle.status(), RunStatus::empty());
        assert_eq!(RunState::RunActive { gate: 1 }.status(), RunStatus::RUN);
        assert_eq!(
            RunState::ControlTaskActive { task: ControlTask(3) }.status(),
            RunStatus::CONTROL_TASK
        );
    }

    #[test]
    fn test_run_stats_nevents() {
        let stats = RunStats {
            events: 900,
            underflows: 40,
            overflows: 60,
            fast_peaks: 1200,
            ..RunStats::default()
        };
        assert_eq!(stats.nevents(), 1000);
    }

    #[test]
    fn test_memory_region_parse() {
        let region: MemoryRegion = "data:4000:256".parse().unwrap();
        assert_eq!(region.kind, "data");
        assert_eq!(region.base, 0x4000);
        assert_eq!(region.length, 256);
    }

    #[test]
    fn test_memory_region_rejects_missing_length() {
        let err = "data:4000".parse::<MemoryRegion>().unwrap_err();
        assert_eq!(err.code(), crate::codes::BAD_PARAM);
        assert!("data:zz:4".parse::<MemoryRegion>().is_err());
    }

    #[test]
    fn test_fpga_kind_parse() {
        assert_eq!("FIPPI".parse::<FpgaKind>().unwrap(), FpgaKind::Fippi);
        assert_eq!("all".parse::<FpgaKind>().unwrap().as_str(), "all");
        assert!("dsp".parse::<FpgaKind>().is_err());
    }
}

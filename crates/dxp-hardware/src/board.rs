//! Boards and their per-channel slots.
//!
//! A [`Board`] is one module opened on an interface. It owns the live
//! parameter buffers of its channels and holds non-owning [`Handle`]s into
//! the image registries of the [`System`](crate::System).

use crate::registry::Handle;
use crate::system::{BoardTypeEntry, InterfaceEntry};
use dxp_core::{
    ChannelMask, DetChan, DspImage, DspState, FippiImage, IoChan, ParamDefaults, PreampInfo,
    RunState,
};
use serde::Serialize;

/// Handle to a registered DSP image.
pub type DspId = Handle<DspImage>;
/// Handle to a registered FPGA image.
pub type FippiId = Handle<FippiImage>;
/// Handle to a registered defaults file.
pub type DefaultsId = Handle<ParamDefaults>;
/// Handle to a registered board type.
pub type BoardTypeId = Handle<BoardTypeEntry>;
/// Handle to a registered interface.
pub type InterfaceId = Handle<InterfaceEntry>;

/// Image assignments and live state of one module channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelSlot {
    /// Assigned DSP program.
    pub dsp: Option<DspId>,
    /// Assigned filter FPGA.
    pub fippi: Option<FippiId>,
    /// Assigned user filter FPGA.
    pub user_fippi: Option<FippiId>,
    /// Assigned parameter defaults.
    pub defaults: Option<DefaultsId>,
    params: Vec<u16>,
    /// Whether the DSP program is on the hardware.
    pub dsp_state: DspState,
    /// Preamp settings of the detector.
    pub preamp: PreampInfo,
}

impl ChannelSlot {
    /// Live parameter buffer, one word per DSP symbol.
    pub fn params(&self) -> &[u16] {
        &self.params
    }

    /// Mutable live parameter buffer.
    pub fn params_mut(&mut self) -> &mut [u16] {
        &mut self.params
    }
}

/// One module.
#[derive(Debug, Clone)]
pub struct Board {
    /// Position in the system, 0-based.
    pub module: usize,
    /// Transport channel the module was opened on.
    pub io_chan: IoChan,
    /// Address string the module was opened with.
    pub iostring: String,
    /// Board type.
    pub btype: BoardTypeId,
    /// Interface the module sits on.
    pub iface: InterfaceId,
    /// Detector id per module channel; negative ids mark unused channels.
    pub det_chans: Vec<DetChan>,
    /// Channels carrying a detector.
    pub used: ChannelMask,
    /// Module MMU image.
    pub mmu: Option<FippiId>,
    /// Per-channel slots, indexed by module channel.
    pub channels: Vec<ChannelSlot>,
    /// Run state machine.
    pub run: RunState,
    /// Gate of the most recent run, reused when none is given.
    pub last_gate: u16,
    /// True while this system holds the hardware lock.
    pub locked: bool,
}

impl Board {
    pub(crate) fn new(
        module: usize,
        io_chan: IoChan,
        iostring: impl Into<String>,
        btype: BoardTypeId,
        iface: InterfaceId,
        det_chans: Vec<DetChan>,
    ) -> Self {
        let mut used = ChannelMask::EMPTY;
        for (chan, det) in det_chans.iter().enumerate() {
            if *det >= 0 {
                used.insert(chan);
            }
        }
        let channels = vec![ChannelSlot::default(); det_chans.len()];
        Self {
            module,
            io_chan,
            iostring: iostring.into(),
            btype,
            iface,
            det_chans,
            used,
            mmu: None,
            channels,
            run: RunState::Idle,
            last_gate: 1,
            locked: false,
        }
    }

    /// Number of channels on the module.
    pub fn nchan(&self) -> usize {
        self.det_chans.len()
    }

    /// Channels with a non-negative detector id, in module order.
    pub fn used_channels(&self) -> impl Iterator<Item = usize> {
        self.used.iter()
    }

    /// Detector id of a used channel.
    pub fn det_chan(&self, mod_chan: usize) -> Option<DetChan> {
        self.det_chans.get(mod_chan).copied().filter(|det| *det >= 0)
    }

    /// Module channel carrying detector `det`, if any.
    pub fn find_det(&self, det: DetChan) -> Option<usize> {
        self.det_chans.iter().position(|id| *id == det)
    }

    /// Point `chan` at a DSP image: the live buffer is replaced by
    /// `nsymbols` zero words and the channel needs a download.
    pub(crate) fn assign_dsp(&mut self, chan: usize, dsp: DspId, nsymbols: usize) {
        if let Some(slot) = self.channels.get_mut(chan) {
            slot.dsp = Some(dsp);
            slot.params = vec![0; nsymbols];
            slot.dsp_state = DspState::NeedsUpdate;
        }
    }

    /// True if any channel or the MMU references `id`.
    pub(crate) fn uses_fippi(&self, id: FippiId) -> bool {
        self.mmu == Some(id)
            || self
                .channels
                .iter()
                .any(|slot| slot.fippi == Some(id) || slot.user_fippi == Some(id))
    }

    pub(crate) fn uses_dsp(&self, id: DspId) -> bool {
        self.channels.iter().any(|slot| slot.dsp == Some(id))
    }

    pub(crate) fn uses_defaults(&self, id: DefaultsId) -> bool {
        self.channels.iter().any(|slot| slot.defaults == Some(id))
    }
}

/// Serializable view of a board for summaries.
#[derive(Debug, Clone, Serialize)]
pub struct BoardSummary {
    /// Position in the system.
    pub module: usize,
    /// Board type name.
    pub board_type: String,
    /// Interface tag.
    pub interface: String,
    /// Module address string.
    pub iostring: String,
    /// Transport channel.
    pub io_chan: IoChan,
    /// Detector id per module channel.
    pub det_chans: Vec<DetChan>,
    /// Raw bits of the used-channel mask.
    pub used: u32,
    /// Run state.
    pub run: RunState,
    /// Per-channel summaries.
    pub channels: Vec<ChannelSummary>,
}

/// Serializable view of one channel slot; image fields hold file names.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    /// Channel index within the module.
    pub mod_chan: usize,
    /// Detector id, negative if unused.
    pub det_chan: DetChan,
    /// DSP program.
    pub dsp: Option<String>,
    /// Filter FPGA.
    pub fippi: Option<String>,
    /// User filter FPGA.
    pub user_fippi: Option<String>,
    /// Parameter defaults.
    pub defaults: Option<String>,
    /// Length of the live parameter buffer.
    pub nparams: usize,
    /// DSP download state.
    pub dsp_state: DspState,
}

//! Acquisition orchestrator.
//!
//! Walks the boards of a [`System`] and drives each through its board
//! type's [`BoardDriver`] in the fixed protocol order:
//!
//! 1. FPGA download ([`firmware`]), broadcast first, then per channel for
//!    channels whose image differs
//! 2. DSP download with settle and bounded ready wait, parameter read-back
//!    and spectrum memory self-test
//! 3. defaults and parameter write-back, ASC setup ([`calibration`])
//! 4. runs and control tasks ([`run`]), symbol access ([`symbols`]),
//!    readout and statistics ([`readout`])
//!
//! Parameter sets can be captured and written back by name ([`snapshot`]).
//!
//! Any failing driver call aborts the enclosing loop over boards and is
//! returned as [`XerxesError::Driver`]. Nothing is retried here.

pub mod calibration;
pub mod firmware;
pub mod readout;
pub mod run;
pub mod snapshot;
pub mod symbols;

use crate::board::Board;
use crate::registry::{Handle, Registry};
use crate::system::System;
use dxp_core::{
    BoardDriver, ChannelData, DetChan, DriverResult, DspImage, IoChan, ModuleLink, Result, Transport,
    XerxesError,
};
use std::sync::Arc;
use tracing::error;

pub use readout::Readout;
pub use snapshot::{ChannelParams, ConfigSnapshot};
pub use symbols::SymbolLimits;

/// Convert a driver result, logging the failure once.
pub(crate) fn driver_call<T>(operation: &'static str, module: usize, result: DriverResult<T>) -> Result<T> {
    result.map_err(|source| {
        error!(operation, module, code = source.code(), error = %source, "driver call failed");
        XerxesError::driver(operation, module, source)
    })
}

/// Driver and transport of one module, detached from the system borrow.
pub(crate) struct BoardCtx {
    pub driver: Arc<dyn BoardDriver>,
    pub transport: Arc<dyn Transport>,
    pub io_chan: IoChan,
    pub module: usize,
}

impl BoardCtx {
    pub fn link(&self) -> ModuleLink<'_> {
        ModuleLink {
            transport: self.transport.as_ref(),
            io_chan: self.io_chan,
            module: self.module,
        }
    }
}

/// Entry behind an optional handle, or an `Initialize` error naming what
/// is missing.
pub(crate) fn image<'a, T>(
    registry: &'a Registry<String, T>,
    id: Option<Handle<T>>,
    module: usize,
    chan: usize,
) -> Result<&'a T> {
    id.and_then(|id| registry.get(id)).ok_or_else(|| {
        XerxesError::Initialize(format!(
            "module {} channel {} has no {} assigned",
            module,
            chan,
            registry.kind()
        ))
    })
}

/// Driver views of the used channels of `board`, or of channel `only`
/// when given and used.
pub(crate) fn channel_data<'a>(
    dsps: &'a Registry<String, DspImage>,
    board: &'a mut Board,
    only: Option<usize>,
) -> Result<Vec<ChannelData<'a>>> {
    let module = board.module;
    let used = board.used;
    let mut data = Vec::with_capacity(used.count());
    for (chan, slot) in board.channels.iter_mut().enumerate() {
        if !used.contains(chan) || only.is_some_and(|only| only != chan) {
            continue;
        }
        let dsp = image(dsps, slot.dsp, module, chan)?;
        let preamp = slot.preamp;
        data.push(ChannelData {
            mod_chan: chan,
            dsp,
            params: slot.params_mut(),
            preamp,
        });
    }
    Ok(data)
}

impl System {
    /// Detector ids of every used channel, in module order.
    pub(crate) fn used_detectors(&self) -> Vec<DetChan> {
        self.boards
            .iter()
            .flat_map(|board| board.used.iter().map(|chan| board.det_chans[chan]))
            .collect()
    }

    pub(crate) fn ctx(&self, module: usize) -> Result<BoardCtx> {
        let board = self.boards.get(module).ok_or_else(|| XerxesError::NoMatch {
            kind: "module",
            key: module.to_string(),
        })?;
        let driver = self
            .btypes
            .get(board.btype)
            .map(|entry| Arc::clone(&entry.driver))
            .ok_or_else(|| XerxesError::Initialize(format!("module {} has no board type", module)))?;
        let transport = self
            .ifaces
            .get(board.iface)
            .map(|entry| Arc::clone(&entry.transport))
            .ok_or_else(|| XerxesError::Initialize(format!("module {} has no interface", module)))?;
        Ok(BoardCtx {
            driver,
            transport,
            io_chan: board.io_chan,
            module,
        })
    }
}

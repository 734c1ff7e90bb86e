//! Detector channel ↔ electronics channel translation.
//!
//! Every runtime operation addresses a channel by its detector id. The
//! resolver maps it to `(module index, module channel)` by scanning the
//! boards in order; the first match wins, and duplicate ids are rejected
//! when the system is built, so at most one match exists.

use crate::system::System;
use dxp_core::{DetChan, IoChan, Result, XerxesError};
use tracing::warn;

impl System {
    /// Module index and module channel carrying detector `det`.
    pub fn det_to_elec(&self, det: DetChan) -> Result<(usize, usize)> {
        if det >= 0 {
            for board in &self.boards {
                if let Some(chan) = board.find_det(det) {
                    return Ok((board.module, chan));
                }
            }
        }
        warn!(det_chan = det, "unknown detector channel");
        Err(XerxesError::UnknownDetectorChannel { det_chan: det })
    }

    /// Detector id of `mod_chan` on the module opened as `io_chan`.
    ///
    /// The channel index is checked against the matched module's own
    /// channel count.
    pub fn elec_to_det(&self, io_chan: IoChan, mod_chan: usize) -> Result<DetChan> {
        let board = self
            .boards
            .iter()
            .find(|board| board.io_chan == io_chan)
            .ok_or(XerxesError::UnknownIoChannel { io_chan })?;
        board
            .det_chans
            .get(mod_chan)
            .copied()
            .ok_or(XerxesError::NoModuleChannel {
                mod_chan,
                nchan: board.nchan(),
            })
    }
}

//! Run and control-task state machine.
//!
//! ```text
//!            start_run / start_one_run
//!   ┌──────┐ ─────────────────────────► ┌────────────────────┐
//!   │ Idle │                            │ RunActive { gate } │
//!   └──────┘ ◄───────────────────────── └────────────────────┘
//!     │  ▲         stop_run / stop_one_run
//!     │  │
//!     │  │ stop_control_task
//!     ▼  │
//!   ┌──────────────────────────────┐
//!   │ ControlTaskActive { task }   │
//!   └──────────────────────────────┘
//! ```
//!
//! The software state lives on the [`Board`](crate::Board); the driver is
//! asked for the hardware state on every status query. A start is refused
//! with [`XerxesError::RunActive`] whenever either reports activity.

use super::{driver_call, image};
use crate::system::System;
use dxp_core::{ChannelTarget, ControlTask, DetChan, Result, RunState, RunStatus, XerxesError};
use tracing::{debug, info, warn};

impl System {
    /// Fail with `RunActive` unless module `module` is idle in software.
    pub(crate) fn ensure_idle(&self, module: usize, det: DetChan) -> Result<()> {
        let run = self.boards[module].run;
        if run.is_idle() {
            Ok(())
        } else {
            Err(XerxesError::RunActive {
                det_chan: det,
                status: run.status(),
            })
        }
    }

    fn ensure_not_running(&self, det: DetChan) -> Result<()> {
        let status = self.isrunning(det)?;
        if status.is_empty() {
            Ok(())
        } else {
            warn!(det_chan = det, ?status, "channel is busy");
            Err(XerxesError::RunActive {
                det_chan: det,
                status,
            })
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Software run state of detector `det`'s module combined with the
    /// hardware run flag.
    pub fn isrunning(&self, det: DetChan) -> Result<RunStatus> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let mut status = self.boards[module].run.status();
        if driver_call("run_active", module, ctx.driver.run_active(ctx.link(), chan))? {
            status |= RunStatus::HARDWARE;
        }
        Ok(status)
    }

    /// Combined status of every used channel, and the first channel found
    /// active. Stops at the first channel whose hardware reports a run.
    pub fn isrunning_any(&self) -> Result<(Option<DetChan>, RunStatus)> {
        let mut status = RunStatus::empty();
        let mut first = None;
        for board in &self.boards {
            let ctx = self.ctx(board.module)?;
            for chan in board.used.iter() {
                let det = board.det_chans[chan];
                let mut channel = board.run.status();
                if driver_call("run_active", board.module, ctx.driver.run_active(ctx.link(), chan))? {
                    channel |= RunStatus::HARDWARE;
                }
                if channel.is_empty() {
                    continue;
                }
                status |= channel;
                first.get_or_insert(det);
                if channel.contains(RunStatus::HARDWARE) {
                    return Ok((Some(det), status));
                }
            }
        }
        Ok((first, status))
    }

    // =========================================================================
    // System-wide runs
    // =========================================================================

    /// Begin a run on every module. A gate of `None` reuses each module's
    /// last gate.
    pub fn start_run(&mut self, gate: Option<u16>, resume: bool) -> Result<()> {
        let (det, status) = self.isrunning_any()?;
        if !status.is_empty() {
            return Err(XerxesError::RunActive {
                det_chan: det.unwrap_or(-1),
                status,
            });
        }
        for module in 0..self.boards.len() {
            let ctx = self.ctx(module)?;
            let gate = gate.unwrap_or(self.boards[module].last_gate);
            driver_call(
                "begin_run",
                module,
                ctx.driver.begin_run(ctx.link(), ChannelTarget::All, gate, resume),
            )?;
            let board = &mut self.boards[module];
            board.run = RunState::RunActive { gate };
            board.last_gate = gate;
        }
        info!(?gate, resume, modules = self.boards.len(), "run started");
        Ok(())
    }

    /// Resume the run on every module without clearing memories.
    pub fn resume_run(&mut self) -> Result<()> {
        self.start_run(None, true)
    }

    /// End the run on every module that has one active.
    pub fn stop_run(&mut self) -> Result<()> {
        for module in 0..self.boards.len() {
            if !matches!(self.boards[module].run, RunState::RunActive { .. }) {
                continue;
            }
            let ctx = self.ctx(module)?;
            driver_call("end_run", module, ctx.driver.end_run(ctx.link(), ChannelTarget::All))?;
            self.boards[module].run = RunState::Idle;
        }
        info!("run stopped");
        Ok(())
    }

    // =========================================================================
    // Single-channel runs
    // =========================================================================

    /// Start a run on detector `det` only.
    pub fn start_one_run(&mut self, det: DetChan, gate: Option<u16>, resume: bool) -> Result<()> {
        self.ensure_not_running(det)?;
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let gate = gate.unwrap_or(self.boards[module].last_gate);
        driver_call(
            "begin_run",
            module,
            ctx.driver
                .begin_run(ctx.link(), ChannelTarget::Channel(chan), gate, resume),
        )?;
        let board = &mut self.boards[module];
        board.run = RunState::RunActive { gate };
        board.last_gate = gate;
        debug!(det_chan = det, gate, resume, "channel run started");
        Ok(())
    }

    /// Resume the run on detector `det`.
    pub fn resume_one_run(&mut self, det: DetChan) -> Result<()> {
        self.start_one_run(det, None, true)
    }

    /// End the run on detector `det`. Idle channels are left alone.
    pub fn stop_one_run(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        if !matches!(self.boards[module].run, RunState::RunActive { .. }) {
            return Ok(());
        }
        let ctx = self.ctx(module)?;
        driver_call(
            "end_run",
            module,
            ctx.driver.end_run(ctx.link(), ChannelTarget::Channel(chan)),
        )?;
        self.boards[module].run = RunState::Idle;
        debug!(det_chan = det, "channel run stopped");
        Ok(())
    }

    // =========================================================================
    // Control tasks
    // =========================================================================

    /// Start a board-specific control task on detector `det`.
    pub fn start_control_task(&mut self, det: DetChan, task: ControlTask, info: &[i32]) -> Result<()> {
        self.ensure_not_running(det)?;
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let dsp = image(&self.dsps, self.boards[module].channels[chan].dsp, module, chan)?;
        driver_call(
            "begin_control_task",
            module,
            ctx.driver.begin_control_task(ctx.link(), chan, task, info, dsp),
        )?;
        self.boards[module].run = RunState::ControlTaskActive { task };
        debug!(det_chan = det, task = task.0, "control task started");
        Ok(())
    }

    /// End the control task on detector `det`. A module without an active
    /// control task is left alone.
    pub fn stop_control_task(&mut self, det: DetChan) -> Result<()> {
        let (module, chan) = self.det_to_elec(det)?;
        if !matches!(self.boards[module].run, RunState::ControlTaskActive { .. }) {
            return Ok(());
        }
        let ctx = self.ctx(module)?;
        driver_call(
            "end_control_task",
            module,
            ctx.driver.end_control_task(ctx.link(), chan),
        )?;
        self.boards[module].run = RunState::Idle;
        debug!(det_chan = det, "control task stopped");
        Ok(())
    }

    /// Task-specific information words, e.g. the length of the data the
    /// task will produce.
    pub fn control_task_info(&self, det: DetChan, task: ControlTask) -> Result<Vec<i32>> {
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let dsp = image(&self.dsps, self.boards[module].channels[chan].dsp, module, chan)?;
        driver_call(
            "control_task_info",
            module,
            ctx.driver.control_task_info(ctx.link(), chan, task, dsp),
        )
    }

    /// Data produced by a control task. Refused while a run is active;
    /// an active control task alone does not block the read.
    pub fn get_control_task_data(&self, det: DetChan, task: ControlTask) -> Result<Vec<u32>> {
        let status = self.isrunning(det)?;
        if status.intersects(RunStatus::HARDWARE | RunStatus::RUN) {
            return Err(XerxesError::RunActive {
                det_chan: det,
                status,
            });
        }
        let (module, chan) = self.det_to_elec(det)?;
        let ctx = self.ctx(module)?;
        let dsp = image(&self.dsps, self.boards[module].channels[chan].dsp, module, chan)?;
        driver_call(
            "control_task_data",
            module,
            ctx.driver.control_task_data(ctx.link(), chan, task, dsp),
        )
    }
}

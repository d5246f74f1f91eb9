//! The chip programming collaborator.
//!
//! The device calls into [`ChipIo`] only after the pools have committed to a
//! set of slots, and before the caller sees a handle. An `Err` from any method
//! makes the device roll the reservation back as if an allocation had failed.
//! Register layouts are the implementor's business; this crate only passes
//! the decided indices.

use std::collections::VecDeque;

use ecres_core::channel::{ChannelConfig, Port};
use ecres_core::id::{ChannelIndex, LinkIndex, MixerEventIndex, TsiIndex, TsstIndex};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op}: {message}")]
pub struct ChipError {
    pub op: ChipOp,
    pub message: String,
}

impl From<ChipError> for ecres_core::Error {
    fn from(e: ChipError) -> Self {
        ecres_core::Error::Device(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipOp {
    ProgramChannel,
    ClearChannel,
    ProgramLink,
    ClearLink,
    Mute,
}

impl std::fmt::Display for ChipOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChipOp::ProgramChannel => "program channel",
            ChipOp::ClearChannel => "clear channel",
            ChipOp::ProgramLink => "program link",
            ChipOp::ClearLink => "clear link",
            ChipOp::Mute => "mute",
        })
    }
}

/// Everything the chip needs to run one echo channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelProgram {
    pub channel: ChannelIndex,
    pub config: ChannelConfig,
    /// Per direction pair, in `Direction::ALL` order.
    pub tsi: [Option<TsiIndex>; 2],
    /// Per port, in `Port::ALL` order.
    pub tsst: [Option<TsstIndex>; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkProgram {
    pub link: LinkIndex,
    pub members: [ChannelIndex; 2],
    pub copy_events: [MixerEventIndex; 2],
}

pub type ChipResult = Result<(), ChipError>;

pub trait ChipIo {
    fn program_channel(&mut self, program: &ChannelProgram) -> ChipResult;
    fn clear_channel(&mut self, channel: ChannelIndex) -> ChipResult;
    fn program_link(&mut self, program: &LinkProgram) -> ChipResult;
    fn clear_link(&mut self, link: LinkIndex) -> ChipResult;
    /// Apply the full mute state of a channel; `muted` lists every muted port.
    fn set_mute(&mut self, channel: ChannelIndex, muted: &[Port]) -> ChipResult;
}

/// Accepts everything. For devices driven without hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChip;

impl ChipIo for NullChip {
    fn program_channel(&mut self, _program: &ChannelProgram) -> ChipResult {
        Ok(())
    }
    fn clear_channel(&mut self, _channel: ChannelIndex) -> ChipResult {
        Ok(())
    }
    fn program_link(&mut self, _program: &LinkProgram) -> ChipResult {
        Ok(())
    }
    fn clear_link(&mut self, _link: LinkIndex) -> ChipResult {
        Ok(())
    }
    fn set_mute(&mut self, _channel: ChannelIndex, _muted: &[Port]) -> ChipResult {
        Ok(())
    }
}

/// Records every call and fails the ones queued with [`ScriptedChip::fail_next`].
#[derive(Debug, Default, Clone)]
pub struct ScriptedChip {
    calls: Vec<ChipOp>,
    failures: VecDeque<ChipOp>,
}

impl ScriptedChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail. Queued failures are consumed in order.
    pub fn fail_next(&mut self, op: ChipOp) {
        self.failures.push_back(op);
    }

    pub fn calls(&self) -> &[ChipOp] {
        &self.calls
    }

    pub fn count(&self, op: ChipOp) -> usize {
        self.calls.iter().filter(|c| **c == op).count()
    }

    fn call(&mut self, op: ChipOp) -> ChipResult {
        self.calls.push(op);
        if self.failures.front() == Some(&op) {
            self.failures.pop_front();
            return Err(ChipError {
                op,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

impl ChipIo for ScriptedChip {
    fn program_channel(&mut self, _program: &ChannelProgram) -> ChipResult {
        self.call(ChipOp::ProgramChannel)
    }
    fn clear_channel(&mut self, _channel: ChannelIndex) -> ChipResult {
        self.call(ChipOp::ClearChannel)
    }
    fn program_link(&mut self, _program: &LinkProgram) -> ChipResult {
        self.call(ChipOp::ProgramLink)
    }
    fn clear_link(&mut self, _link: LinkIndex) -> ChipResult {
        self.call(ChipOp::ClearLink)
    }
    fn set_mute(&mut self, _channel: ChannelIndex, _muted: &[Port]) -> ChipResult {
        self.call(ChipOp::Mute)
    }
}

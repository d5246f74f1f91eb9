use thiserror::Error;

use crate::channel::{PcmLaw, Port};
use crate::handle::ResourceKind;
use crate::id::Resource;

/// Canonical result for the resource manager.
pub type Result<T> = std::result::Result<T, Error>;

/// Public error taxonomy. Everything except [`Error::Fatal`] leaves the device
/// exactly as it was before the failing call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("no more {0} available")]
    Exhausted(Resource),

    #[error("invalid handle {handle:#010x}: {fault}")]
    InvalidHandle { handle: u32, fault: HandleFault },

    #[error("{resource} {index} has active dependencies ({reason})")]
    ActiveDependency {
        resource: Resource,
        index: u32,
        reason: &'static str,
    },

    // Raised by the chip collaborator; the reservation is rolled back.
    #[error("device programming failed: {0}")]
    Device(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("fatal internal error, device state is no longer trustworthy: {0}")]
    Fatal(#[from] FatalError),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// The resource a `Exhausted` error refers to.
    pub fn exhausted(&self) -> Option<Resource> {
        match self {
            Error::Exhausted(r) => Some(*r),
            _ => None,
        }
    }
}

/// Why a handle was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleFault {
    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),

    #[error("expected a {expected} handle, got a {found} handle")]
    WrongKind {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("index {index} out of range (capacity {capacity})")]
    OutOfRange { index: u32, capacity: u32 },

    #[error("slot {index} is not open")]
    NotReserved { index: u32 },

    #[error("slot {index} was reused (handle generation {handle}, current {current})")]
    StaleGeneration { index: u32, handle: u8, current: u8 },
}

/// Bookkeeping corruption. Never recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("{resource} slot {index} released twice")]
    DoubleFree { resource: Resource, index: u32 },

    #[error("{resource} slot {index} out of range (capacity {capacity})")]
    OutOfRange {
        resource: Resource,
        index: u32,
        capacity: u32,
    },

    #[error("{resource} slot {index} is already allocated")]
    SlotTaken { resource: Resource, index: u32 },

    #[error("{resource} slot {index} dependency count underflow")]
    DependencyUnderflow { resource: Resource, index: u32 },

    #[error("{resource} pool is not configured on this device")]
    PoolMissing { resource: Resource },

    #[error("{resource} entry {index} expected reserved={expected_reserved}")]
    EntryState {
        resource: Resource,
        index: u32,
        expected_reserved: bool,
    },

    #[error("rollback failed while undoing {step}: {cause}")]
    RollbackFailed {
        step: String,
        cause: Box<FatalError>,
    },

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

/// One variant per violated rule, so callers can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{port} timeslot {timeslot} exceeds maximum {max}")]
    TimeslotOutOfRange { port: Port, timeslot: u32, max: u32 },

    #[error("{port} stream {stream} exceeds maximum {max}")]
    StreamOutOfRange { port: Port, stream: u32, max: u32 },

    #[error("{port} timeslot {timeslot} on stream {stream} is already assigned")]
    TimeslotInUse {
        port: Port,
        timeslot: u32,
        stream: u32,
    },

    #[error("{first} and {second} are bound to the same timeslot")]
    DuplicateBinding { first: Port, second: Port },

    #[error("encoder must run on an output port, not {0}")]
    EncoderPort(Port),

    #[error("decoder must run on an input port, not {0}")]
    DecoderPort(Port),

    #[error("encoder on {encoder} and decoder on {decoder} share a direction")]
    CodecPortCombination { encoder: Port, decoder: Port },

    #[error("codec requested on unbound port {0}")]
    CodecPortUnbound(Port),

    #[error("{0} is not supported by the loaded firmware image")]
    FeatureUnsupported(&'static str),

    #[error("{0} requires NLP to be enabled")]
    RequiresNlp(&'static str),

    #[error("tail length {requested} ms exceeds maximum {max} ms")]
    TailLength { requested: u32, max: u32 },

    #[error("tail displacement {requested} ms exceeds maximum {max} ms")]
    TailDisplacement { requested: u32, max: u32 },

    #[error("phasing length {0} outside 2..=512")]
    PhasingLength(u32),

    #[error("phasing timeslot {timeslot} on stream {stream} is out of range")]
    PhasingOutOfRange { timeslot: u32, stream: u32 },

    #[error("phasing timeslot {timeslot} on stream {stream} is already used as an input")]
    PhasingInUse { timeslot: u32, stream: u32 },

    #[error("phasing timeslot already open with length {existing}, requested {requested}")]
    PhasingLengthMismatch { existing: u32, requested: u32 },

    #[error("a channel cannot be linked with itself")]
    SameChannel,

    #[error("channel {0} is already part of a bidirectional link")]
    AlreadyLinked(u32),

    #[error("channel {channel} port {port} must be unbound to join a link")]
    LinkPortBound { channel: u32, port: Port },

    #[error("linked channels use different laws ({first:?} vs {second:?})")]
    LawMismatch { first: PcmLaw, second: PcmLaw },

    #[error("channel {0} has an active codec and cannot be linked")]
    LinkCodecActive(u32),

    #[error("cannot mute unbound port {0}")]
    MuteUnboundPort(Port),
}

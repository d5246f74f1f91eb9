//! Convenient re-exports for downstream crates.

pub use crate::channel::{
    ChannelConfig, ChannelModify, CodecConfig, CodecModify, CoderConfig, ComfortNoise, Direction,
    EchoMode, Encoding, PcmLaw, PhasingConfig, Port, PortBinding, TdmConfig, TdmModify,
    VqeConfig, VqeModify,
};
pub use crate::config::{Capabilities, DeviceConfig, StreamFrequency};
pub use crate::error::{Error, FatalError, HandleFault, Result, ValidationError};
pub use crate::handle::{Handle, HandleCodec, ResourceKind};
pub use crate::hash::Hash256;
pub use crate::id::{
    ChannelIndex, ConversionIndex, LinkIndex, MixerEventIndex, PhasingIndex, Resource, SlotId,
    SlotRef, TsiIndex, TsstIndex,
};
pub use crate::pool::SlotPool;

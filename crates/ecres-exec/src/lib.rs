#![forbid(unsafe_code)]
//! ecres-exec: the device runtime.
//!
//! [`Device`] owns every pool and entry table and exposes the channel, link,
//! mute and stats operations. Each mutating call validates first, reserves
//! through one `ReservationGuard`, then programs the chip through [`ChipIo`];
//! any failure after validation rolls the whole call back.
//!
//! Not thread safe on its own: see [`device`] for the locking contract.

pub mod channel;
pub mod chip;
pub mod device;
pub mod link;
pub mod metrics;
pub mod stats;
pub mod validate;

pub use chip::{ChannelProgram, ChipError, ChipIo, ChipOp, LinkProgram, NullChip, ScriptedChip};
pub use device::Device;
pub use stats::{ChannelSnapshot, DeviceUsage, LinkSnapshot};

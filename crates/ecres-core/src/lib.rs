#![forbid(unsafe_code)]
//! ecres-core: shared vocabulary for the echo-canceller resource manager.
//!
//! Everything here is plain data: typed slot indices, the caller-facing
//! handle codec, channel/link configuration, device configuration and the
//! error taxonomy. The allocators and entry tables live in `ecres-mem`; the
//! transactional device runtime lives in `ecres-exec`.

pub mod channel;
pub mod config;
pub mod error;
pub mod handle;
pub mod hash;
pub mod id;
pub mod pool;
pub mod prelude;

/// Crate version, stamped into usage reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{Error, FatalError, HandleFault, Result, ValidationError};
pub use handle::{Handle, HandleCodec, ResourceKind};
pub use id::Resource;

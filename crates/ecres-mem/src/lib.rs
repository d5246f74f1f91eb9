#![forbid(unsafe_code)]
//! ecres-mem: slot allocators, entry tables, and reservation guards.
//!
//! This crate provides the concrete implementation of the `SlotPool` interface
//! defined in `ecres-core::pool`. Every slot the device hands out flows through
//! [`ResourcePools`], and every multi-slot reservation goes through a
//! [`ReservationGuard`] so a failure part-way can be undone in reverse order.
//!
//! Nothing here locks. All mutation requires `&mut`, and callers sharing a
//! device across threads must hold one external lock for a whole operation.

pub mod allocator;
pub mod error;
pub mod guard;
pub mod pool;
pub mod table;
pub mod tracking;

pub use allocator::SlotAllocator;
pub use error::{Error, Result};
pub use guard::ReservationGuard;
pub use pool::{PoolUsage, ResourcePools};
pub use table::EntryTable;
pub use tracking::UsageTracker;

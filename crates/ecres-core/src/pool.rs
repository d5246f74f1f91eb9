//! Abstract slot-pool interface.
//!
//! The concrete allocator lives in `ecres-mem`. We keep only the trait here so
//! any crate can depend on the API without pulling the bitmap logic.

use crate::error::{FatalError, Result};
use crate::id::{Resource, SlotId};

/// A fixed-capacity pool of slots of one resource class.
///
/// `alloc` failing is an ordinary, recoverable condition reported as
/// [`crate::Error::Exhausted`]. `dealloc` failing means bookkeeping is corrupted and
/// must be treated as fatal.
pub trait SlotPool {
    type Index: SlotId;

    /// Take a free slot.
    fn alloc(&mut self) -> Result<Self::Index>;

    /// Return a slot. Double free / out of range is fatal.
    fn dealloc(&mut self, index: Self::Index) -> std::result::Result<(), FatalError>;

    /// Total configured capacity.
    fn capacity(&self) -> u32;

    /// Slots currently handed out.
    fn in_use(&self) -> u32;

    fn available(&self) -> u32 {
        self.capacity() - self.in_use()
    }

    fn resource(&self) -> Resource {
        Self::Index::RESOURCE
    }
}

// NOTE: Do *not* add a default `dealloc` that ignores unknown indices.
// Silently accepting a bad release hides the bug that produced it.

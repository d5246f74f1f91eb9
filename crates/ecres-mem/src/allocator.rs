//! Fixed-capacity bitmap allocator over `[0, N)`.
//!
//! One instance per resource class. `alloc` hands out the lowest free index;
//! callers must not rely on the order beyond that.

use std::marker::PhantomData;

use ecres_core::error::FatalError;
use ecres_core::id::{Resource, SlotId};
use ecres_core::pool::SlotPool;

use crate::error::{Error, Result};
use crate::pool::PoolUsage;
use crate::tracking::UsageTracker;

const WORD_BITS: u32 = u64::BITS;

pub struct SlotAllocator<I: SlotId> {
    // Bit set = allocated. Bits past `capacity` in the last word are set at
    // construction so the scan never returns them.
    words: Vec<u64>,
    capacity: u32,
    in_use: u32,
    usage: UsageTracker,
    _index: PhantomData<I>,
}

impl<I: SlotId> SlotAllocator<I> {
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity {
                resource: I::RESOURCE,
            });
        }
        let n_words = capacity.div_ceil(WORD_BITS) as usize;
        let mut words = vec![0u64; n_words];
        let tail = capacity % WORD_BITS;
        if tail != 0 {
            words[n_words - 1] = !0u64 << tail;
        }
        Ok(Self {
            words,
            capacity,
            in_use: 0,
            usage: UsageTracker::new(),
            _index: PhantomData,
        })
    }

    pub fn resource(&self) -> Resource {
        I::RESOURCE
    }

    /// Take the lowest free index.
    pub fn alloc(&mut self) -> Result<I> {
        self.take_lowest().map(I::from_raw)
    }

    /// Return an index to the pool. Freeing a free or out-of-range index is a
    /// bookkeeping bug and reported as fatal.
    pub fn dealloc(&mut self, index: I) -> std::result::Result<(), FatalError> {
        self.clear_bit(index.raw())
    }

    /// Mark one specific free index allocated again. Used to undo a release.
    pub fn reclaim(&mut self, index: I) -> std::result::Result<(), FatalError> {
        self.set_bit(index.raw())
    }

    pub fn is_allocated(&self, index: I) -> bool {
        self.bit(index.raw()).unwrap_or(false)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    pub fn available(&self) -> u32 {
        self.capacity - self.in_use
    }

    pub fn peak(&self) -> u32 {
        self.usage.peak()
    }

    /// Allocated indices in ascending order.
    pub fn allocated(&self) -> Vec<u32> {
        (0..self.capacity)
            .filter(|i| self.bit(*i).unwrap_or(false))
            .collect()
    }

    pub fn usage(&self) -> PoolUsage {
        PoolUsage {
            resource: I::RESOURCE,
            capacity: self.capacity,
            in_use: self.in_use,
            peak: self.usage.peak(),
        }
    }

    fn bit(&self, index: u32) -> Option<bool> {
        if index >= self.capacity {
            return None;
        }
        let (w, b) = split(index);
        Some(self.words[w] & (1 << b) != 0)
    }

    fn take_lowest(&mut self) -> Result<u32> {
        let Some((w, word)) = self
            .words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != !0u64)
        else {
            #[cfg(feature = "tracing")]
            tracing::debug!(resource = %self.resource(), capacity = self.capacity, "pool exhausted");
            return Err(Error::OutOfSlots {
                resource: I::RESOURCE,
            });
        };
        let b = word.trailing_ones();
        self.words[w] |= 1 << b;
        self.in_use += 1;
        self.usage.record(self.in_use);
        Ok(w as u32 * WORD_BITS + b)
    }

    fn clear_bit(&mut self, index: u32) -> std::result::Result<(), FatalError> {
        match self.bit(index) {
            None => Err(self.out_of_range(index)),
            Some(false) => Err(FatalError::DoubleFree {
                resource: I::RESOURCE,
                index,
            }),
            Some(true) => {
                let (w, b) = split(index);
                self.words[w] &= !(1 << b);
                self.in_use -= 1;
                Ok(())
            }
        }
    }

    fn set_bit(&mut self, index: u32) -> std::result::Result<(), FatalError> {
        match self.bit(index) {
            None => Err(self.out_of_range(index)),
            Some(true) => Err(FatalError::SlotTaken {
                resource: I::RESOURCE,
                index,
            }),
            Some(false) => {
                let (w, b) = split(index);
                self.words[w] |= 1 << b;
                self.in_use += 1;
                self.usage.record(self.in_use);
                Ok(())
            }
        }
    }

    fn out_of_range(&self, index: u32) -> FatalError {
        FatalError::OutOfRange {
            resource: I::RESOURCE,
            index,
            capacity: self.capacity,
        }
    }
}

fn split(index: u32) -> (usize, u32) {
    ((index / WORD_BITS) as usize, index % WORD_BITS)
}

impl<I: SlotId> SlotPool for SlotAllocator<I> {
    type Index = I;

    fn alloc(&mut self) -> ecres_core::Result<I> {
        SlotAllocator::alloc(self).map_err(Into::into)
    }

    fn dealloc(&mut self, index: I) -> std::result::Result<(), FatalError> {
        SlotAllocator::dealloc(self, index)
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn in_use(&self) -> u32 {
        self.in_use
    }
}

/// Index-erased view used where pools of different classes are addressed by
/// [`ecres_core::id::SlotRef`].
pub(crate) trait RawPool {
    fn alloc_raw(&mut self) -> Result<u32>;
    fn dealloc_raw(&mut self, index: u32) -> std::result::Result<(), FatalError>;
    fn reclaim_raw(&mut self, index: u32) -> std::result::Result<(), FatalError>;
    fn available(&self) -> u32;
    fn usage(&self) -> PoolUsage;
    fn allocated(&self) -> Vec<u32>;
}

impl<I: SlotId> RawPool for SlotAllocator<I> {
    fn alloc_raw(&mut self) -> Result<u32> {
        self.take_lowest()
    }
    fn dealloc_raw(&mut self, index: u32) -> std::result::Result<(), FatalError> {
        self.clear_bit(index)
    }
    fn reclaim_raw(&mut self, index: u32) -> std::result::Result<(), FatalError> {
        self.set_bit(index)
    }
    fn available(&self) -> u32 {
        SlotAllocator::available(self)
    }
    fn usage(&self) -> PoolUsage {
        SlotAllocator::usage(self)
    }
    fn allocated(&self) -> Vec<u32> {
        SlotAllocator::allocated(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecres_core::id::{TsiIndex, TsstIndex};

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(
            SlotAllocator::<TsiIndex>::new(0).err(),
            Some(Error::ZeroCapacity {
                resource: Resource::TsiMemory
            })
        );
    }

    #[test]
    fn exhaustion_then_recovery() {
        let mut a = SlotAllocator::<TsiIndex>::new(3).unwrap();
        let got: Vec<_> = (0..3).map(|_| a.alloc().unwrap().get()).collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert_eq!(
            a.alloc(),
            Err(Error::OutOfSlots {
                resource: Resource::TsiMemory
            })
        );
        a.dealloc(TsiIndex::new(1)).unwrap();
        assert_eq!(a.alloc().unwrap(), TsiIndex::new(1));
        assert!(a.alloc().is_err());
    }

    #[test]
    fn double_free_is_fatal() {
        let mut a = SlotAllocator::<TsstIndex>::new(2).unwrap();
        let i = a.alloc().unwrap();
        a.dealloc(i).unwrap();
        assert_eq!(
            a.dealloc(i),
            Err(FatalError::DoubleFree {
                resource: Resource::Tsst,
                index: 0
            })
        );
    }

    #[test]
    fn out_of_range_is_fatal() {
        let mut a = SlotAllocator::<TsstIndex>::new(2).unwrap();
        assert_eq!(
            a.dealloc(TsstIndex::new(2)),
            Err(FatalError::OutOfRange {
                resource: Resource::Tsst,
                index: 2,
                capacity: 2
            })
        );
    }

    #[test]
    fn capacity_across_word_boundary() {
        let mut a = SlotAllocator::<TsstIndex>::new(65).unwrap();
        for i in 0..65 {
            assert_eq!(a.alloc().unwrap().get(), i);
        }
        assert!(a.alloc().is_err());
        assert_eq!(a.in_use(), 65);
        assert_eq!(a.peak(), 65);
    }

    #[test]
    fn reclaim_restores_exact_index() {
        let mut a = SlotAllocator::<TsiIndex>::new(4).unwrap();
        let x = a.alloc().unwrap();
        let y = a.alloc().unwrap();
        a.dealloc(x).unwrap();
        a.reclaim(x).unwrap();
        assert!(a.is_allocated(x));
        assert_eq!(
            a.reclaim(y),
            Err(FatalError::SlotTaken {
                resource: Resource::TsiMemory,
                index: 1
            })
        );
        assert_eq!(a.allocated(), vec![0, 1]);
    }
}

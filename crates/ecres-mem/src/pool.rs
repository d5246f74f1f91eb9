//! The device's full set of slot pools plus dependency counts for shared slots.
//!
//! Optional classes (conversion memory, bidirectional links, phasing) are not
//! constructed when their configured capacity is zero; asking them for a slot
//! is then a caller bug, reported as `FatalError::PoolMissing`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ecres_core::config::DeviceConfig;
use ecres_core::error::FatalError;
use ecres_core::hash::{Hash256, StateHasher};
use ecres_core::id::{
    ChannelIndex, ConversionIndex, LinkIndex, MixerEventIndex, PhasingIndex, Resource, SlotId,
    SlotRef, TsiIndex, TsstIndex,
};

use crate::allocator::{RawPool, SlotAllocator};
use crate::error::{Error, Result};

/// Usage of one pool, for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub resource: Resource,
    pub capacity: u32,
    pub in_use: u32,
    pub peak: u32,
}

pub struct ResourcePools {
    channels: SlotAllocator<ChannelIndex>,
    tsi: SlotAllocator<TsiIndex>,
    tsst: SlotAllocator<TsstIndex>,
    conversion: Option<SlotAllocator<ConversionIndex>>,
    mixer: SlotAllocator<MixerEventIndex>,
    links: Option<SlotAllocator<LinkIndex>>,
    phasing: Option<SlotAllocator<PhasingIndex>>,
    // Only shared slots appear here; a count of zero is never stored.
    dependents: BTreeMap<SlotRef, u32>,
}

fn optional<I: SlotId>(capacity: u32) -> Result<Option<SlotAllocator<I>>> {
    if capacity == 0 {
        Ok(None)
    } else {
        SlotAllocator::new(capacity).map(Some)
    }
}

impl ResourcePools {
    pub fn new(cfg: &DeviceConfig) -> Result<Self> {
        Ok(Self {
            channels: SlotAllocator::new(cfg.max_channels)?,
            tsi: SlotAllocator::new(cfg.max_tsi_memory)?,
            tsst: SlotAllocator::new(cfg.max_tsst)?,
            conversion: optional(cfg.max_conversion_memory)?,
            mixer: SlotAllocator::new(cfg.max_mixer_events)?,
            links: optional(cfg.max_bidir_channels)?,
            phasing: optional(cfg.max_phasing_tssts)?,
            dependents: BTreeMap::new(),
        })
    }

    pub fn has(&self, resource: Resource) -> bool {
        self.raw(resource).is_some()
    }

    pub fn available(&self, resource: Resource) -> u32 {
        self.raw(resource).map_or(0, |p| p.available())
    }

    pub fn is_allocated<I: SlotId>(&self, index: I) -> bool {
        self.raw(I::RESOURCE)
            .map_or(false, |p| p.allocated().contains(&index.raw()))
    }

    /// Take a slot from the pool `I` belongs to.
    pub fn alloc<I: SlotId>(&mut self) -> Result<I> {
        let pool = self.raw_mut(I::RESOURCE).ok_or(FatalError::PoolMissing {
            resource: I::RESOURCE,
        })?;
        pool.alloc_raw().map(I::from_raw)
    }

    pub fn dealloc(&mut self, slot: SlotRef) -> std::result::Result<(), FatalError> {
        self.raw_mut_or_fatal(slot.resource)?.dealloc_raw(slot.index)
    }

    pub fn reclaim(&mut self, slot: SlotRef) -> std::result::Result<(), FatalError> {
        self.raw_mut_or_fatal(slot.resource)?.reclaim_raw(slot.index)
    }

    /// Take a slot that will be shared; its dependency count starts at one.
    pub fn acquire_shared<I: SlotId>(&mut self) -> Result<I> {
        let id = self.alloc::<I>()?;
        self.dependents.insert(SlotRef::of(id), 1);
        Ok(id)
    }

    /// Add one dependent to a shared slot.
    pub fn retain(&mut self, slot: SlotRef) -> std::result::Result<u32, FatalError> {
        let n = self.dependents.get_mut(&slot).ok_or_else(|| {
            FatalError::Invariant(format!("retain on {slot}, which is not a shared slot"))
        })?;
        *n += 1;
        Ok(*n)
    }

    /// Drop one dependent. The slot is freed when the count reaches zero;
    /// returns whether that happened.
    pub fn release_shared(&mut self, slot: SlotRef) -> std::result::Result<bool, FatalError> {
        let n = self
            .dependents
            .get_mut(&slot)
            .ok_or(FatalError::DependencyUnderflow {
                resource: slot.resource,
                index: slot.index,
            })?;
        *n -= 1;
        if *n > 0 {
            return Ok(false);
        }
        self.dependents.remove(&slot);
        self.dealloc(slot)?;
        Ok(true)
    }

    /// Undo `retain`: drop a dependent that must not be the last one.
    pub fn unretain(&mut self, slot: SlotRef) -> std::result::Result<(), FatalError> {
        match self.dependents.get_mut(&slot) {
            Some(n) if *n > 1 => {
                *n -= 1;
                Ok(())
            }
            _ => Err(FatalError::DependencyUnderflow {
                resource: slot.resource,
                index: slot.index,
            }),
        }
    }

    /// Undo `acquire_shared`: the caller must be the only dependent.
    pub fn discard_shared(&mut self, slot: SlotRef) -> std::result::Result<(), FatalError> {
        match self.dependents.get(&slot) {
            Some(1) => {
                self.dependents.remove(&slot);
                self.dealloc(slot)
            }
            _ => Err(FatalError::Invariant(format!(
                "{slot} still has other dependents"
            ))),
        }
    }

    /// Undo a `release_shared` that freed the slot.
    pub fn restore_shared(&mut self, slot: SlotRef) -> std::result::Result<(), FatalError> {
        self.reclaim(slot)?;
        if self.dependents.insert(slot, 1).is_some() {
            return Err(FatalError::Invariant(format!(
                "{slot} was freed but still had a dependency count"
            )));
        }
        Ok(())
    }

    pub fn dependents(&self, slot: SlotRef) -> u32 {
        self.dependents.get(&slot).copied().unwrap_or(0)
    }

    /// Usage of every configured pool, in `Resource::ALL` order.
    pub fn usage(&self) -> Vec<PoolUsage> {
        Resource::ALL
            .iter()
            .filter_map(|r| self.raw(*r).map(|p| p.usage()))
            .collect()
    }

    pub fn usage_of(&self, resource: Resource) -> Option<PoolUsage> {
        self.raw(resource).map(|p| p.usage())
    }

    /// Digest of every allocated index and every dependency count. Two equal
    /// digests mean the pools are in the same state.
    pub fn digest(&self) -> Hash256 {
        let mut h = StateHasher::new();
        self.hash_into(&mut h);
        h.finish()
    }

    /// Feed the same state `digest` covers into a larger hasher.
    pub fn hash_into(&self, h: &mut StateHasher) {
        for r in Resource::ALL {
            if let Some(p) = self.raw(r) {
                h.section(r.name(), &p.allocated());
            }
        }
        let shared: Vec<u32> = self
            .dependents
            .iter()
            .flat_map(|(s, n)| [s.resource as u32, s.index, *n])
            .collect();
        h.section("dependents", &shared);
    }

    fn raw(&self, resource: Resource) -> Option<&dyn RawPool> {
        match resource {
            Resource::EchoChannel => Some(&self.channels as &dyn RawPool),
            Resource::TsiMemory => Some(&self.tsi as &dyn RawPool),
            Resource::Tsst => Some(&self.tsst as &dyn RawPool),
            Resource::ConversionMemory => self.conversion.as_ref().map(|p| p as &dyn RawPool),
            Resource::MixerEvent => Some(&self.mixer as &dyn RawPool),
            Resource::BiDirChannel => self.links.as_ref().map(|p| p as &dyn RawPool),
            Resource::PhasingTsst => self.phasing.as_ref().map(|p| p as &dyn RawPool),
        }
    }

    fn raw_mut(&mut self, resource: Resource) -> Option<&mut dyn RawPool> {
        match resource {
            Resource::EchoChannel => Some(&mut self.channels as &mut dyn RawPool),
            Resource::TsiMemory => Some(&mut self.tsi as &mut dyn RawPool),
            Resource::Tsst => Some(&mut self.tsst as &mut dyn RawPool),
            Resource::ConversionMemory => self.conversion.as_mut().map(|p| p as &mut dyn RawPool),
            Resource::MixerEvent => Some(&mut self.mixer as &mut dyn RawPool),
            Resource::BiDirChannel => self.links.as_mut().map(|p| p as &mut dyn RawPool),
            Resource::PhasingTsst => self.phasing.as_mut().map(|p| p as &mut dyn RawPool),
        }
    }

    fn raw_mut_or_fatal(
        &mut self,
        resource: Resource,
    ) -> std::result::Result<&mut dyn RawPool, FatalError> {
        self.raw_mut(resource)
            .ok_or(FatalError::PoolMissing { resource })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DeviceConfig {
        DeviceConfig {
            max_channels: 2,
            max_tsi_memory: 2,
            max_tsst: 4,
            max_conversion_memory: 0,
            max_mixer_events: 2,
            max_bidir_channels: 1,
            max_phasing_tssts: 0,
            ..Default::default()
        }
    }

    #[test]
    fn optional_pools_are_skipped() {
        let p = ResourcePools::new(&small()).unwrap();
        assert!(!p.has(Resource::ConversionMemory));
        assert!(!p.has(Resource::PhasingTsst));
        assert!(p.has(Resource::BiDirChannel));
        assert_eq!(p.usage().len(), 5);
    }

    #[test]
    fn missing_pool_is_fatal_not_exhaustion() {
        let mut p = ResourcePools::new(&small()).unwrap();
        assert_eq!(
            p.alloc::<ConversionIndex>(),
            Err(Error::Fatal(FatalError::PoolMissing {
                resource: Resource::ConversionMemory
            }))
        );
    }

    #[test]
    fn shared_slot_freed_at_zero() {
        let mut p = ResourcePools::new(&small()).unwrap();
        let tsi: TsiIndex = p.acquire_shared().unwrap();
        let slot = SlotRef::of(tsi);
        assert_eq!(p.retain(slot).unwrap(), 2);

        assert!(!p.release_shared(slot).unwrap());
        assert_eq!(p.available(Resource::TsiMemory), 1);

        assert!(p.release_shared(slot).unwrap());
        assert_eq!(p.available(Resource::TsiMemory), 2);
        assert_eq!(p.dependents(slot), 0);

        assert_eq!(
            p.release_shared(slot),
            Err(FatalError::DependencyUnderflow {
                resource: Resource::TsiMemory,
                index: tsi.get()
            })
        );
    }

    #[test]
    fn retain_requires_shared_slot() {
        let mut p = ResourcePools::new(&small()).unwrap();
        let tsi: TsiIndex = p.alloc().unwrap();
        assert!(p.retain(SlotRef::of(tsi)).is_err());
    }

    #[test]
    fn digest_tracks_state() {
        let mut p = ResourcePools::new(&small()).unwrap();
        let before = p.digest();
        let t: TsstIndex = p.alloc().unwrap();
        assert_ne!(p.digest(), before);
        p.dealloc(SlotRef::of(t)).unwrap();
        assert_eq!(p.digest(), before);
    }

    #[test]
    fn restore_after_free() {
        let mut p = ResourcePools::new(&small()).unwrap();
        let tsi: TsiIndex = p.acquire_shared().unwrap();
        let slot = SlotRef::of(tsi);
        let before = p.digest();
        assert!(p.release_shared(slot).unwrap());
        p.restore_shared(slot).unwrap();
        assert_eq!(p.digest(), before);
    }
}

//! Index-addressed entry tables with generation counters.
//!
//! The table does not allocate slots; the matching [`crate::SlotAllocator`]
//! decides which index is used, and the table records what lives there.
//! `commit` makes an entry live, `retire` ends it and bumps the generation so
//! outstanding handles to it go stale.

use ecres_core::error::FatalError;
use ecres_core::handle::{HandleTable, SlotState};
use ecres_core::id::Resource;

#[derive(Debug, Clone, Default)]
struct Entry<T> {
    reserved: bool,
    generation: u8,
    data: T,
}

#[derive(Debug, Clone)]
pub struct EntryTable<T> {
    resource: Resource,
    entries: Vec<Entry<T>>,
}

impl<T: Default> EntryTable<T> {
    pub fn new(resource: Resource, capacity: u32) -> Self {
        let mut entries = Vec::with_capacity(capacity as usize);
        entries.resize_with(capacity as usize, Entry::default);
        Self { resource, entries }
    }

    /// Make `index` live with `data`. The generation is left as is.
    pub fn commit(&mut self, index: u32, data: T) -> Result<(), FatalError> {
        let e = self.entry_mut(index, false)?;
        e.reserved = true;
        e.data = data;
        Ok(())
    }

    /// Undo a `commit` whose handle was never handed out. Keeps the generation.
    pub fn uncommit(&mut self, index: u32) -> Result<T, FatalError> {
        let e = self.entry_mut(index, true)?;
        e.reserved = false;
        Ok(std::mem::take(&mut e.data))
    }

    /// End the live object at `index` and bump its generation (wrapping).
    pub fn retire(&mut self, index: u32) -> Result<T, FatalError> {
        let e = self.entry_mut(index, true)?;
        e.reserved = false;
        e.generation = e.generation.wrapping_add(1);
        Ok(std::mem::take(&mut e.data))
    }
}

impl<T> EntryTable<T> {
    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Live entry at `index`, if any.
    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries
            .get(index as usize)
            .filter(|e| e.reserved)
            .map(|e| &e.data)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.entries
            .get_mut(index as usize)
            .filter(|e| e.reserved)
            .map(|e| &mut e.data)
    }

    /// Like `get`, but a missing entry is a bookkeeping error.
    pub fn live(&self, index: u32) -> Result<&T, FatalError> {
        self.get(index).ok_or(FatalError::EntryState {
            resource: self.resource,
            index,
            expected_reserved: true,
        })
    }

    pub fn live_mut(&mut self, index: u32) -> Result<&mut T, FatalError> {
        let resource = self.resource;
        self.get_mut(index).ok_or(FatalError::EntryState {
            resource,
            index,
            expected_reserved: true,
        })
    }

    pub fn generation(&self, index: u32) -> Option<u8> {
        self.entries.get(index as usize).map(|e| e.generation)
    }

    pub fn is_reserved(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    pub fn reserved_count(&self) -> u32 {
        self.entries.iter().filter(|e| e.reserved).count() as u32
    }

    /// One word per slot: reserved flag and generation. Feeds state digests.
    pub fn fingerprint(&self) -> Vec<u32> {
        self.entries
            .iter()
            .map(|e| ((e.reserved as u32) << 8) | e.generation as u32)
            .collect()
    }

    /// Live entries with their indices, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.reserved)
            .map(|(i, e)| (i as u32, &e.data))
    }

    fn entry_mut(&mut self, index: u32, expected_reserved: bool) -> Result<&mut Entry<T>, FatalError> {
        let resource = self.resource;
        let capacity = self.capacity();
        let e = self
            .entries
            .get_mut(index as usize)
            .ok_or(FatalError::OutOfRange {
                resource,
                index,
                capacity,
            })?;
        if e.reserved != expected_reserved {
            return Err(FatalError::EntryState {
                resource,
                index,
                expected_reserved,
            });
        }
        Ok(e)
    }
}

impl<T> HandleTable for EntryTable<T> {
    fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.entries.get(index as usize).map(|e| SlotState {
            reserved: e.reserved,
            generation: e.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecres_core::handle::{HandleCodec, ResourceKind};
    use ecres_core::{Error, HandleFault};

    fn table() -> EntryTable<u32> {
        EntryTable::new(Resource::EchoChannel, 4)
    }

    #[test]
    fn retire_bumps_generation_and_stales_handles() {
        let mut t = table();
        t.commit(2, 42).unwrap();
        let h = HandleCodec::encode(ResourceKind::Channel, t.generation(2).unwrap(), 2);
        assert_eq!(
            HandleCodec::decode_and_validate(h, ResourceKind::Channel, &t).unwrap(),
            2
        );

        assert_eq!(t.retire(2).unwrap(), 42);
        assert_eq!(t.generation(2), Some(1));

        // Reuse the slot; the old handle must still be refused.
        t.commit(2, 7).unwrap();
        let err = HandleCodec::decode_and_validate(h, ResourceKind::Channel, &t).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidHandle {
                handle: h.to_raw(),
                fault: HandleFault::StaleGeneration {
                    index: 2,
                    handle: 0,
                    current: 1
                }
            }
        );
    }

    #[test]
    fn uncommit_keeps_generation() {
        let mut t = table();
        t.commit(0, 1).unwrap();
        t.uncommit(0).unwrap();
        assert_eq!(t.generation(0), Some(0));
        assert!(!t.is_reserved(0));
    }

    #[test]
    fn generation_wraps() {
        let mut t = table();
        for _ in 0..256 {
            t.commit(1, 0).unwrap();
            t.retire(1).unwrap();
        }
        assert_eq!(t.generation(1), Some(0));
    }

    #[test]
    fn state_errors_are_fatal() {
        let mut t = table();
        assert_eq!(
            t.retire(0),
            Err(FatalError::EntryState {
                resource: Resource::EchoChannel,
                index: 0,
                expected_reserved: true
            })
        );
        t.commit(0, 1).unwrap();
        assert!(t.commit(0, 2).is_err());
        assert!(matches!(t.commit(9, 0), Err(FatalError::OutOfRange { .. })));
    }

    #[test]
    fn iter_skips_free_entries() {
        let mut t = table();
        t.commit(1, 10).unwrap();
        t.commit(3, 30).unwrap();
        let live: Vec<_> = t.iter().map(|(i, v)| (i, *v)).collect();
        assert_eq!(live, vec![(1, 10), (3, 30)]);
        assert_eq!(t.reserved_count(), 2);
    }
}

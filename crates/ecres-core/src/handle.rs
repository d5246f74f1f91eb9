//! Opaque caller-facing handles.
//!
//! A handle packs `(kind, generation, index)` as
//! `kind << 24 | generation << 16 | index`. The generation is the slot's close
//! counter at the time the handle was issued, so a handle from a previous
//! occupant of the same slot fails validation. The counter is 8 bits wide and
//! wraps; a handle becomes acceptable again after exactly 256 closes of its
//! slot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, HandleFault, Result};

const TAG_SHIFT: u32 = 24;
const GENERATION_SHIFT: u32 = 16;
const GENERATION_MASK: u32 = 0xFF;
const INDEX_MASK: u32 = 0xFFFF;

/// Object kinds a handle can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Channel,
    BiDirChannel,
}

impl ResourceKind {
    pub const fn tag(self) -> u8 {
        match self {
            ResourceKind::Channel => 0x01,
            ResourceKind::BiDirChannel => 0x02,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ResourceKind::Channel),
            0x02 => Some(ResourceKind::BiDirChannel),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Channel => "channel",
            ResourceKind::BiDirChannel => "bidirectional channel",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub kind: ResourceKind,
    pub generation: u8,
    pub index: u16,
}

impl Handle {
    pub const fn to_raw(self) -> u32 {
        ((self.kind.tag() as u32) << TAG_SHIFT)
            | ((self.generation as u32) << GENERATION_SHIFT)
            | self.index as u32
    }

    pub fn from_raw(raw: u32) -> Result<Self> {
        let tag = (raw >> TAG_SHIFT) as u8;
        let kind = ResourceKind::from_tag(tag).ok_or(Error::InvalidHandle {
            handle: raw,
            fault: HandleFault::UnknownTag(tag),
        })?;
        Ok(Self {
            kind,
            generation: ((raw >> GENERATION_SHIFT) & GENERATION_MASK) as u8,
            index: (raw & INDEX_MASK) as u16,
        })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.to_raw())
    }
}

impl TryFrom<u32> for Handle {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        Handle::from_raw(raw)
    }
}

impl From<Handle> for u32 {
    fn from(h: Handle) -> u32 {
        h.to_raw()
    }
}

/// Liveness of one table slot, as seen by handle validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    pub reserved: bool,
    pub generation: u8,
}

/// Implemented by the entry tables in `ecres-mem`.
pub trait HandleTable {
    fn capacity(&self) -> u32;
    fn slot_state(&self, index: u32) -> Option<SlotState>;
}

/// Encode/validate entry point.
pub struct HandleCodec;

impl HandleCodec {
    pub fn encode(kind: ResourceKind, generation: u8, index: u32) -> Handle {
        debug_assert!(index <= INDEX_MASK, "slot index {index} does not fit a handle");
        Handle {
            kind,
            generation,
            index: index as u16,
        }
    }

    /// Run the four handle checks and return the slot index. Never mutates.
    pub fn decode_and_validate<T: HandleTable + ?Sized>(
        handle: Handle,
        kind: ResourceKind,
        table: &T,
    ) -> Result<u32> {
        let fail = |fault| Error::InvalidHandle {
            handle: handle.to_raw(),
            fault,
        };

        if handle.kind != kind {
            return Err(fail(HandleFault::WrongKind {
                expected: kind,
                found: handle.kind,
            }));
        }

        let index = handle.index as u32;
        let capacity = table.capacity();
        let state = match table.slot_state(index) {
            Some(s) if index < capacity => s,
            _ => return Err(fail(HandleFault::OutOfRange { index, capacity })),
        };

        if !state.reserved {
            return Err(fail(HandleFault::NotReserved { index }));
        }
        if state.generation != handle.generation {
            return Err(fail(HandleFault::StaleGeneration {
                index,
                handle: handle.generation,
                current: state.generation,
            }));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<SlotState>);

    impl HandleTable for Fixed {
        fn capacity(&self) -> u32 {
            self.0.len() as u32
        }
        fn slot_state(&self, index: u32) -> Option<SlotState> {
            self.0.get(index as usize).copied()
        }
    }

    fn table() -> Fixed {
        Fixed(vec![
            SlotState {
                reserved: true,
                generation: 0,
            },
            SlotState {
                reserved: false,
                generation: 3,
            },
            SlotState {
                reserved: true,
                generation: 5,
            },
        ])
    }

    #[test]
    fn raw_layout() {
        let h = HandleCodec::encode(ResourceKind::Channel, 0x12, 0x0304);
        assert_eq!(h.to_raw(), 0x0112_0304);
        assert_eq!(Handle::from_raw(0x0112_0304).unwrap(), h);
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = Handle::from_raw(0x7F00_0001).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidHandle {
                handle: 0x7F00_0001,
                fault: HandleFault::UnknownTag(0x7F)
            }
        );
    }

    #[test]
    fn accepts_live_handle() {
        let h = HandleCodec::encode(ResourceKind::Channel, 5, 2);
        assert_eq!(
            HandleCodec::decode_and_validate(h, ResourceKind::Channel, &table()).unwrap(),
            2
        );
    }

    #[test]
    fn rejects_each_fault() {
        let t = table();
        let cases = [
            (
                HandleCodec::encode(ResourceKind::BiDirChannel, 0, 0),
                HandleFault::WrongKind {
                    expected: ResourceKind::Channel,
                    found: ResourceKind::BiDirChannel,
                },
            ),
            (
                HandleCodec::encode(ResourceKind::Channel, 0, 9),
                HandleFault::OutOfRange {
                    index: 9,
                    capacity: 3,
                },
            ),
            (
                HandleCodec::encode(ResourceKind::Channel, 3, 1),
                HandleFault::NotReserved { index: 1 },
            ),
            (
                HandleCodec::encode(ResourceKind::Channel, 4, 2),
                HandleFault::StaleGeneration {
                    index: 2,
                    handle: 4,
                    current: 5,
                },
            ),
        ];
        for (h, fault) in cases {
            let err = HandleCodec::decode_and_validate(h, ResourceKind::Channel, &t).unwrap_err();
            assert_eq!(
                err,
                Error::InvalidHandle {
                    handle: h.to_raw(),
                    fault
                }
            );
        }
    }
}

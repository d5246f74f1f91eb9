//! Strongly-typed slot indices, one per resource class.
//!
//! Downstream crates (mem, exec) should *not* pass raw integers between pools.
//! Every index type knows which [`Resource`] it addresses so allocators can
//! report "no more X available" without extra plumbing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource classes managed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    EchoChannel,
    TsiMemory,
    Tsst,
    ConversionMemory,
    MixerEvent,
    BiDirChannel,
    PhasingTsst,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::EchoChannel,
        Resource::TsiMemory,
        Resource::Tsst,
        Resource::ConversionMemory,
        Resource::MixerEvent,
        Resource::BiDirChannel,
        Resource::PhasingTsst,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Resource::EchoChannel => "echo channel",
            Resource::TsiMemory => "TSI memory",
            Resource::Tsst => "TSST",
            Resource::ConversionMemory => "conversion memory",
            Resource::MixerEvent => "mixer event",
            Resource::BiDirChannel => "bidirectional channel",
            Resource::PhasingTsst => "phasing TSST",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Implemented by every typed slot index.
pub trait SlotId: Copy + Eq + fmt::Debug {
    /// Pool this index belongs to.
    const RESOURCE: Resource;

    fn from_raw(v: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! new_id {
    ($name:ident, $resource:expr) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(v: u32) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl SlotId for $name {
            const RESOURCE: Resource = $resource;

            fn from_raw(v: u32) -> Self {
                Self(v)
            }
            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(ChannelIndex, Resource::EchoChannel);
new_id!(TsiIndex, Resource::TsiMemory);
new_id!(TsstIndex, Resource::Tsst);
new_id!(ConversionIndex, Resource::ConversionMemory);
new_id!(MixerEventIndex, Resource::MixerEvent);
new_id!(LinkIndex, Resource::BiDirChannel);
new_id!(PhasingIndex, Resource::PhasingTsst);

/// A resource-tagged index, used where slots of different classes are mixed
/// (rollback journals, usage reports).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub resource: Resource,
    pub index: u32,
}

impl SlotRef {
    pub fn of<I: SlotId>(id: I) -> Self {
        Self {
            resource: I::RESOURCE,
            index: id.raw(),
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ref_keeps_resource_tag() {
        let r = SlotRef::of(TsiIndex::new(7));
        assert_eq!(r.resource, Resource::TsiMemory);
        assert_eq!(r.index, 7);
        assert_eq!(r.to_string(), "TSI memory[7]");
    }

    #[test]
    fn ids_serialize_transparently() {
        let s = serde_json::to_string(&ChannelIndex::new(3)).unwrap();
        assert_eq!(s, "3");
    }
}

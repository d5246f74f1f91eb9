//! The device context: every pool, entry table and the chip collaborator.
//!
//! There are no globals. A `Device` is owned by the caller and every mutating
//! operation takes `&mut self`; that exclusive borrow is the whole critical
//! section. Callers sharing a device between threads must wrap it in one
//! external lock held for a full operation. Nothing in here locks.
//!
//! The operations themselves live in [`crate::channel`] and [`crate::link`].

use ecres_core::channel::{ChannelConfig, Direction, Port};
use ecres_core::config::DeviceConfig;
use ecres_core::error::{FatalError, Result};
use ecres_core::handle::{Handle, HandleCodec, ResourceKind};
use ecres_core::id::{
    ChannelIndex, ConversionIndex, LinkIndex, MixerEventIndex, PhasingIndex, Resource, TsiIndex,
    TsstIndex,
};
use ecres_mem::{EntryTable, ReservationGuard, ResourcePools};

use crate::chip::{ChannelProgram, ChipIo, NullChip};
use crate::validate::{Occupant, Occupied};

/// Slots taken for extended tone detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ToneSlots {
    /// Auxiliary detection channel, taken from the echo channel pool but never
    /// addressable through a handle.
    pub companion: ChannelIndex,
    pub event: MixerEventIndex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChannelEntry {
    pub config: ChannelConfig,
    pub tsi: [Option<TsiIndex>; 2],
    pub conversion: [Option<ConversionIndex>; 2],
    pub tsst: [Option<TsstIndex>; 4],
    pub tone: Option<ToneSlots>,
    // Shared between tone detection and link membership.
    pub extra_tsi: Option<TsiIndex>,
    pub phasing: Option<PhasingIndex>,
    pub mute: [Option<MixerEventIndex>; 4],
    pub link: Option<LinkIndex>,
}

impl ChannelEntry {
    pub fn program(&self, channel: ChannelIndex) -> ChannelProgram {
        ChannelProgram {
            channel,
            config: self.config,
            tsi: self.tsi,
            tsst: self.tsst,
        }
    }

    pub fn muted_ports(&self) -> Vec<Port> {
        Port::ALL
            .into_iter()
            .filter(|p| self.mute[p.slot()].is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LinkEntry {
    pub members: [ChannelIndex; 2],
    pub copy_events: [MixerEventIndex; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PhasingEntry {
    pub timeslot: u32,
    pub stream: u32,
    pub length: u32,
    pub tsst: TsstIndex,
}

pub struct Device<C: ChipIo = NullChip> {
    pub(crate) cfg: DeviceConfig,
    pub(crate) pools: ResourcePools,
    pub(crate) channels: EntryTable<ChannelEntry>,
    pub(crate) links: EntryTable<LinkEntry>,
    pub(crate) phasing: EntryTable<PhasingEntry>,
    pub(crate) chip: C,
}

impl Device<NullChip> {
    /// A device without chip programming.
    pub fn new(cfg: DeviceConfig) -> Result<Self> {
        Self::with_chip(cfg, NullChip)
    }
}

impl<C: ChipIo> Device<C> {
    pub fn with_chip(cfg: DeviceConfig, chip: C) -> Result<Self> {
        cfg.validate()?;
        let pools = ResourcePools::new(&cfg)?;
        let dev = Self {
            channels: EntryTable::new(Resource::EchoChannel, cfg.max_channels),
            links: EntryTable::new(Resource::BiDirChannel, cfg.max_bidir_channels),
            phasing: EntryTable::new(Resource::PhasingTsst, cfg.max_phasing_tssts),
            pools,
            cfg,
            chip,
        };
        #[cfg(feature = "tracing")]
        tracing::info!(
            channels = dev.cfg.max_channels,
            tsi = dev.cfg.max_tsi_memory,
            tsst = dev.cfg.max_tsst,
            "device initialised"
        );
        Ok(dev)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.cfg
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }

    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    /// Channels currently open through a handle.
    pub fn open_channels(&self) -> u32 {
        self.channels.reserved_count()
    }

    pub(crate) fn channel_index(&self, handle: Handle) -> Result<ChannelIndex> {
        HandleCodec::decode_and_validate(handle, ResourceKind::Channel, &self.channels)
            .map(ChannelIndex::new)
    }

    pub(crate) fn link_index(&self, handle: Handle) -> Result<LinkIndex> {
        HandleCodec::decode_and_validate(handle, ResourceKind::BiDirChannel, &self.links)
            .map(LinkIndex::new)
    }

    pub(crate) fn channel_handle(&self, index: ChannelIndex) -> Result<Handle> {
        handle_for(&self.channels, ResourceKind::Channel, index.get())
    }

    /// TDM positions held by every open channel except `except`, plus every
    /// phasing slot.
    pub(crate) fn occupancy(&self, except: Option<ChannelIndex>) -> Vec<Occupied> {
        let mut out = Vec::new();
        for (i, e) in self.channels.iter() {
            if Some(ChannelIndex::new(i)) == except {
                continue;
            }
            out.extend(e.config.tdm.bound_ports().map(|(p, b)| Occupied {
                occupant: if p.is_input() {
                    Occupant::Input
                } else {
                    Occupant::Output
                },
                timeslot: b.timeslot,
                stream: b.stream,
            }));
        }
        out.extend(self.phasing.iter().map(|(_, p)| Occupied {
            occupant: Occupant::Phasing { length: p.length },
            timeslot: p.timeslot,
            stream: p.stream,
        }));
        out
    }
}

pub(crate) fn handle_for<T>(table: &EntryTable<T>, kind: ResourceKind, index: u32) -> Result<Handle> {
    let generation = table.generation(index).ok_or(FatalError::OutOfRange {
        resource: table.resource(),
        index,
        capacity: table.capacity(),
    })?;
    Ok(HandleCodec::encode(kind, generation, index))
}

/// Reserve the slots extended tone detection needs.
pub(crate) fn reserve_tone(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    let companion = g.alloc::<ChannelIndex>()?;
    take_extra_tsi(g, e)?;
    let event = g.alloc::<MixerEventIndex>()?;
    e.tone = Some(ToneSlots { companion, event });
    Ok(())
}

pub(crate) fn release_tone(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    if let Some(t) = e.tone.take() {
        g.release(t.event)?;
        drop_extra_tsi(g, e)?;
        g.release(t.companion)?;
    }
    Ok(())
}

/// Add one dependent on the channel's extra TSI slot, reserving it if absent.
pub(crate) fn take_extra_tsi(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    match e.extra_tsi {
        Some(t) => {
            g.retain(t)?;
        }
        None => e.extra_tsi = Some(g.acquire_shared::<TsiIndex>()?),
    }
    Ok(())
}

/// Drop one dependent on the extra TSI slot; forget it once it is freed.
pub(crate) fn drop_extra_tsi(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    let Some(t) = e.extra_tsi else {
        return Err(FatalError::Invariant("extra TSI dependent without a slot".into()).into());
    };
    if g.release_shared(t)? {
        e.extra_tsi = None;
    }
    Ok(())
}

/// Slots for the direction pairs and conversions a configuration needs,
/// acquired in direction order.
pub(crate) fn reserve_paths(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    for dir in Direction::ALL {
        if e.config.tdm.uses_direction(dir) && e.tsi[dir.slot()].is_none() {
            e.tsi[dir.slot()] = Some(g.alloc()?);
        }
    }
    for dir in Direction::ALL {
        if e.config.codec.converts(dir) && e.conversion[dir.slot()].is_none() {
            e.conversion[dir.slot()] = Some(g.alloc()?);
        }
    }
    Ok(())
}

/// TSST slots for every bound port that has none yet, in `Port::ALL` order.
pub(crate) fn reserve_tssts(g: &mut ReservationGuard<'_>, e: &mut ChannelEntry) -> Result<()> {
    for port in Port::ALL {
        if e.config.tdm.is_bound(port) && e.tsst[port.slot()].is_none() {
            e.tsst[port.slot()] = Some(g.alloc()?);
        }
    }
    Ok(())
}

/// Mute events are taken later, but the pool must be able to cover every
/// bound input that is not muted yet.
pub(crate) fn check_mute_quota(g: &ReservationGuard<'_>, e: &ChannelEntry) -> Result<()> {
    let needed = Port::ALL
        .into_iter()
        .filter(|p| p.is_input() && e.config.tdm.is_bound(*p) && e.mute[p.slot()].is_none())
        .count() as u32;
    g.ensure_available(Resource::MixerEvent, needed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecres_core::channel::{PcmLaw, PortBinding, TdmConfig};
    use ecres_core::Error;

    fn small() -> DeviceConfig {
        DeviceConfig {
            max_channels: 4,
            max_tsi_memory: 8,
            max_tsst: 16,
            max_mixer_events: 8,
            ..Default::default()
        }
    }

    #[test]
    fn zero_capacity_config_is_rejected() {
        let cfg = DeviceConfig {
            max_channels: 0,
            ..small()
        };
        assert!(matches!(Device::new(cfg), Err(Error::Config(_))));
    }

    #[test]
    fn occupancy_skips_the_excluded_channel() {
        let mut dev = Device::new(small()).unwrap();
        let cfg = ChannelConfig {
            tdm: TdmConfig {
                sin: Some(PortBinding::new(3, 0, PcmLaw::ALaw)),
                sout: Some(PortBinding::new(3, 0, PcmLaw::ALaw)),
                ..Default::default()
            },
            ..Default::default()
        };
        let h = dev.open_channel(cfg).unwrap();
        let idx = dev.channel_index(h).unwrap();
        assert_eq!(dev.occupancy(None).len(), 2);
        assert!(dev.occupancy(Some(idx)).is_empty());
    }
}

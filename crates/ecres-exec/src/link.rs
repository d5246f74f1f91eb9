//! Bidirectional links between two open channels.
//!
//! A link owns no echo channel. It takes a link slot, two mixer copy events,
//! and one dependency on each member's extra TSI slot. The extra TSI slot is
//! shared with extended tone detection, so it is only freed when the last of
//! its dependents lets go.

use ecres_core::channel::{PcmLaw, Port};
use ecres_core::error::{Error, Result, ValidationError};
use ecres_core::handle::{Handle, ResourceKind};
use ecres_core::id::{ChannelIndex, LinkIndex, MixerEventIndex, Resource};
use ecres_mem::ReservationGuard;

use crate::chip::{ChipIo, LinkProgram};
use crate::device::{drop_extra_tsi, handle_for, take_extra_tsi, ChannelEntry, Device, LinkEntry};
use crate::metrics;

/// Ports a link drives; they must be free on both members.
const LINK_PORTS: [Port; 2] = [Port::Rin, Port::Sout];

/// The law a channel carries: Sin's if bound, otherwise Rout's.
fn effective_law(e: &ChannelEntry) -> Option<PcmLaw> {
    e.config
        .tdm
        .sin
        .or(e.config.tdm.rout)
        .map(|b| b.law)
}

fn check_member(index: ChannelIndex, e: &ChannelEntry) -> Result<()> {
    if e.link.is_some() {
        return Err(ValidationError::AlreadyLinked(index.get()).into());
    }
    if e.config.codec.is_active() {
        return Err(ValidationError::LinkCodecActive(index.get()).into());
    }
    if let Some(port) = LINK_PORTS.into_iter().find(|p| e.config.tdm.is_bound(*p)) {
        return Err(ValidationError::LinkPortBound {
            channel: index.get(),
            port,
        }
        .into());
    }
    Ok(())
}

impl<C: ChipIo> Device<C> {
    /// Pair two open channels and return the link handle.
    pub fn create_link(&mut self, first: Handle, second: Handle) -> Result<Handle> {
        self.create_link_inner(first, second)
            .map_err(|e| metrics::failed("create link", e))
    }

    /// Undo `create_link`. The link handle goes stale.
    pub fn destroy_link(&mut self, link: Handle) -> Result<()> {
        self.destroy_link_inner(link)
            .map_err(|e| metrics::failed("destroy link", e))
    }

    fn create_link_inner(&mut self, first: Handle, second: Handle) -> Result<Handle> {
        let a = self.channel_index(first)?;
        let b = self.channel_index(second)?;
        if a == b {
            return Err(ValidationError::SameChannel.into());
        }
        if !self.pools.has(Resource::BiDirChannel) {
            return Err(ValidationError::FeatureUnsupported("bidirectional channels").into());
        }
        let ea = *self.channels.live(a.get())?;
        let eb = *self.channels.live(b.get())?;
        check_member(a, &ea)?;
        check_member(b, &eb)?;
        if let (Some(first), Some(second)) = (effective_law(&ea), effective_law(&eb)) {
            if first != second {
                return Err(ValidationError::LawMismatch { first, second }.into());
            }
        }

        let Device {
            pools,
            channels,
            links,
            chip,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, "create link");
        let mut na = ea;
        let mut nb = eb;
        let (link, copy_events) = match reserve_link(&mut g, &mut na, &mut nb) {
            Ok(v) => v,
            Err(e) => return Err(g.abort(e)),
        };
        na.link = Some(link);
        nb.link = Some(link);

        let entry = LinkEntry {
            members: [a, b],
            copy_events,
        };
        if let Err(f) = links.commit(link.get(), entry) {
            return Err(g.abort(f.into()));
        }
        for (i, updated) in [(a, na), (b, nb)] {
            match channels.live_mut(i.get()) {
                Ok(slot) => *slot = updated,
                Err(f) => return Err(g.abort(f.into())),
            }
        }

        let program = LinkProgram {
            link,
            members: [a, b],
            copy_events,
        };
        if let Err(e) = chip.program_link(&program) {
            for (i, saved) in [(a, ea), (b, eb)] {
                if let Ok(slot) = channels.live_mut(i.get()) {
                    *slot = saved;
                }
            }
            let undo = links.uncommit(link.get());
            let err = g.abort(e.into());
            return Err(undo.map_or_else(Error::from, |_| err));
        }
        let steps = g.commit();

        let handle = handle_for(links, ResourceKind::BiDirChannel, link.get())?;
        metrics::committed("create link", handle, steps);
        Ok(handle)
    }

    fn destroy_link_inner(&mut self, handle: Handle) -> Result<()> {
        let link = self.link_index(handle)?;
        let entry = *self.links.live(link.get())?;
        let [a, b] = entry.members;
        let ea = *self.channels.live(a.get())?;
        let eb = *self.channels.live(b.get())?;
        self.chip.clear_link(link)?;

        let Device {
            pools,
            channels,
            links,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, "destroy link");
        let mut na = ea;
        let mut nb = eb;
        if let Err(e) = release_link(&mut g, link, &entry, &mut na, &mut nb) {
            return Err(g.abort(e));
        }
        na.link = None;
        nb.link = None;
        let steps = g.commit();

        *channels.live_mut(a.get())? = na;
        *channels.live_mut(b.get())? = nb;
        links.retire(link.get())?;
        metrics::committed("destroy link", handle, steps);
        Ok(())
    }
}

fn reserve_link(
    g: &mut ReservationGuard<'_>,
    a: &mut ChannelEntry,
    b: &mut ChannelEntry,
) -> Result<(LinkIndex, [MixerEventIndex; 2])> {
    let link = g.alloc::<LinkIndex>()?;
    let events = [g.alloc()?, g.alloc()?];
    take_extra_tsi(g, a)?;
    take_extra_tsi(g, b)?;
    Ok((link, events))
}

fn release_link(
    g: &mut ReservationGuard<'_>,
    link: LinkIndex,
    entry: &LinkEntry,
    a: &mut ChannelEntry,
    b: &mut ChannelEntry,
) -> Result<()> {
    drop_extra_tsi(g, b)?;
    drop_extra_tsi(g, a)?;
    for ev in entry.copy_events.into_iter().rev() {
        g.release(ev)?;
    }
    g.release(link)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{ChipOp, ScriptedChip};
    use ecres_core::channel::{
        ChannelConfig, ChannelModify, PortBinding, TdmConfig, TdmModify, VqeModify,
    };
    use ecres_core::config::DeviceConfig;
    use ecres_core::HandleFault;

    fn half(ts: u32, law: PcmLaw) -> ChannelConfig {
        ChannelConfig {
            tdm: TdmConfig {
                sin: Some(PortBinding::new(ts, 0, law)),
                rout: Some(PortBinding::new(ts, 0, law)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn device() -> Device<ScriptedChip> {
        Device::with_chip(DeviceConfig::default(), ScriptedChip::new()).unwrap()
    }

    fn in_use(dev: &Device<ScriptedChip>, r: Resource) -> u32 {
        dev.pools.usage_of(r).map_or(0, |u| u.in_use)
    }

    #[test]
    fn link_and_unlink() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        let before = dev.pools.digest();

        let l = dev.create_link(a, b).unwrap();
        assert_eq!(l.kind, ResourceKind::BiDirChannel);
        assert_eq!(in_use(&dev, Resource::BiDirChannel), 1);
        assert_eq!(in_use(&dev, Resource::MixerEvent), 2);
        assert_eq!(in_use(&dev, Resource::TsiMemory), 4 + 2);

        assert!(matches!(
            dev.close_channel(a),
            Err(Error::ActiveDependency { .. })
        ));
        assert!(matches!(
            dev.create_link(a, b),
            Err(Error::Validation(ValidationError::AlreadyLinked(0)))
        ));

        dev.destroy_link(l).unwrap();
        assert_eq!(dev.pools.digest(), before);
        assert!(matches!(
            dev.destroy_link(l),
            Err(Error::InvalidHandle {
                fault: HandleFault::NotReserved { .. },
                ..
            })
        ));
        dev.close_channel(a).unwrap();
    }

    #[test]
    fn link_rules() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::ALaw)).unwrap();
        assert_eq!(dev.create_link(a, a), Err(ValidationError::SameChannel.into()));
        assert_eq!(
            dev.create_link(a, b),
            Err(ValidationError::LawMismatch {
                first: PcmLaw::MuLaw,
                second: PcmLaw::ALaw
            }
            .into())
        );

        let mut bound = half(3, PcmLaw::MuLaw);
        bound.tdm.rin = Some(PortBinding::new(4, 0, PcmLaw::MuLaw));
        let c = dev.open_channel(bound).unwrap();
        assert_eq!(
            dev.create_link(a, c),
            Err(ValidationError::LinkPortBound {
                channel: 2,
                port: Port::Rin
            }
            .into())
        );
    }

    #[test]
    fn channel_handle_is_not_a_link_handle() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        assert!(matches!(
            dev.destroy_link(a),
            Err(Error::InvalidHandle {
                fault: HandleFault::WrongKind { .. },
                ..
            })
        ));
    }

    #[test]
    fn links_disabled_without_pool() {
        let cfg = DeviceConfig {
            max_bidir_channels: 0,
            ..Default::default()
        };
        let mut dev = Device::new(cfg).unwrap();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        assert_eq!(
            dev.create_link(a, b),
            Err(ValidationError::FeatureUnsupported("bidirectional channels").into())
        );
    }

    #[test]
    fn chip_failure_on_link_rolls_back() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        let before = dev.usage_digest();
        dev.chip_mut().fail_next(ChipOp::ProgramLink);
        assert!(matches!(dev.create_link(a, b), Err(Error::Device(_))));
        assert_eq!(dev.usage_digest(), before);
        assert_eq!(dev.channel_stats(a).unwrap().link, None);
        dev.create_link(a, b).unwrap();
    }

    #[test]
    fn chip_failure_on_unlink_mutates_nothing() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        let l = dev.create_link(a, b).unwrap();
        let before = dev.usage_digest();

        dev.chip_mut().fail_next(ChipOp::ClearLink);
        assert!(matches!(dev.destroy_link(l), Err(Error::Device(_))));
        assert_eq!(dev.usage_digest(), before);
        assert_eq!(dev.link_stats(l).unwrap().members, [a, b]);
        assert_eq!(dev.channel_stats(a).unwrap().link, Some(l));

        dev.destroy_link(l).unwrap();
        assert_eq!(in_use(&dev, Resource::BiDirChannel), 0);
    }

    #[test]
    fn linked_channel_rejects_only_real_tdm_changes() {
        let mut dev = device();
        let a = dev.open_channel(half(1, PcmLaw::MuLaw)).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        dev.create_link(a, b).unwrap();

        // Re-stating the current binding is not a change.
        let same = ChannelModify {
            tdm: Some(
                TdmModify::default().with(Port::Sin, Some(PortBinding::new(1, 0, PcmLaw::MuLaw))),
            ),
            vqe: Some(VqeModify {
                dc_offset_removal: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        dev.modify_channel(a, &same).unwrap();
        assert!(dev.channel_stats(a).unwrap().config.vqe.dc_offset_removal);

        let moved = ChannelModify {
            tdm: Some(
                TdmModify::default().with(Port::Sin, Some(PortBinding::new(9, 0, PcmLaw::MuLaw))),
            ),
            ..Default::default()
        };
        assert!(matches!(
            dev.modify_channel(a, &moved),
            Err(Error::ActiveDependency {
                resource: Resource::EchoChannel,
                ..
            })
        ));
    }

    #[test]
    fn extra_tsi_shared_with_tone_detection() {
        let mut dev = device();
        let mut cfg = half(1, PcmLaw::MuLaw);
        cfg.vqe.extended_tone_detection = true;
        let a = dev.open_channel(cfg).unwrap();
        let b = dev.open_channel(half(2, PcmLaw::MuLaw)).unwrap();
        // Two paths each, plus the extra slot tone detection gave `a`.
        assert_eq!(in_use(&dev, Resource::TsiMemory), 4 + 1);

        let l = dev.create_link(a, b).unwrap();
        // `a` reuses its extra TSI, `b` gets a fresh one.
        assert_eq!(in_use(&dev, Resource::TsiMemory), 4 + 2);

        // Dropping tone detection leaves the slot to the link.
        let off = ChannelModify {
            vqe: Some(VqeModify {
                extended_tone_detection: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        dev.modify_channel(a, &off).unwrap();
        assert_eq!(in_use(&dev, Resource::TsiMemory), 4 + 2);

        dev.destroy_link(l).unwrap();
        assert_eq!(in_use(&dev, Resource::TsiMemory), 4);
    }
}

//! Open, modify, close and mute echo channels.
//!
//! Every mutating call follows the same shape: validate (nothing touched),
//! reserve through one [`ReservationGuard`], write the entry tables, program
//! the chip. A failure after the guard has started undoes everything the
//! guard journaled and restores the tables, so the caller sees either the
//! full change or none of it. The one exception is `Error::Fatal`.

use ecres_core::channel::{ChannelConfig, ChannelModify, Direction, Port};
use ecres_core::error::{Error, FatalError, Result, ValidationError};
use ecres_core::handle::{Handle, ResourceKind};
use ecres_core::id::{ChannelIndex, PhasingIndex, Resource, SlotRef, TsstIndex};
use ecres_mem::{EntryTable, ReservationGuard};

use crate::chip::ChipIo;
use crate::device::{
    check_mute_quota, handle_for, release_tone, reserve_paths, reserve_tone, reserve_tssts,
    ChannelEntry, Device, PhasingEntry,
};
use crate::metrics;
use crate::validate;

type NewPhasing = Option<(PhasingIndex, PhasingEntry)>;

impl<C: ChipIo> Device<C> {
    /// Open a channel and return its handle. Every port is optional.
    pub fn open_channel(&mut self, config: ChannelConfig) -> Result<Handle> {
        self.open_inner(config).map_err(|e| metrics::failed("open", e))
    }

    /// Apply a partial update. Sections left as `None` keep their setting.
    pub fn modify_channel(&mut self, handle: Handle, modify: &ChannelModify) -> Result<()> {
        self.modify_inner(handle, modify)
            .map_err(|e| metrics::failed("modify", e))
    }

    /// Release everything the channel owns and invalidate its handle.
    pub fn close_channel(&mut self, handle: Handle) -> Result<()> {
        self.close_inner(handle).map_err(|e| metrics::failed("close", e))
    }

    /// Mute bound ports. Each newly muted port takes one mixer event;
    /// ports already muted are left alone.
    pub fn mute_ports(&mut self, handle: Handle, ports: &[Port]) -> Result<()> {
        let index = self.channel_index(handle)?;
        let current = *self.channels.live(index.get())?;
        if let Some(p) = ports.iter().find(|p| !current.config.tdm.is_bound(**p)) {
            return Err(ValidationError::MuteUnboundPort(*p).into());
        }
        self.update_mute(index, current, "mute", |g, e| {
            for p in ports {
                if e.mute[p.slot()].is_none() {
                    e.mute[p.slot()] = Some(g.alloc()?);
                }
            }
            Ok(())
        })
        .map_err(|e| metrics::failed("mute", e))
    }

    pub fn unmute_ports(&mut self, handle: Handle, ports: &[Port]) -> Result<()> {
        let index = self.channel_index(handle)?;
        let current = *self.channels.live(index.get())?;
        self.update_mute(index, current, "unmute", |g, e| {
            for p in ports {
                if let Some(ev) = e.mute[p.slot()].take() {
                    g.release(ev)?;
                }
            }
            Ok(())
        })
        .map_err(|e| metrics::failed("unmute", e))
    }

    fn open_inner(&mut self, config: ChannelConfig) -> Result<Handle> {
        validate::check_channel(&config, &self.cfg, &self.occupancy(None))?;

        let Device {
            pools,
            channels,
            phasing,
            chip,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, "open");
        let mut entry = ChannelEntry {
            config,
            ..Default::default()
        };
        let (index, fresh) = match reserve_open(&mut g, phasing, &mut entry) {
            Ok(v) => v,
            Err(e) => return Err(g.abort(e)),
        };
        if let Err(f) = commit_open(channels, phasing, index, entry, fresh) {
            return Err(g.abort(f.into()));
        }
        if let Err(e) = chip.program_channel(&entry.program(index)) {
            let undo = uncommit_open(channels, phasing, index, fresh);
            let err = g.abort(e.into());
            return Err(undo.map_or_else(Error::from, |()| err));
        }
        let steps = g.commit();

        let handle = handle_for(channels, ResourceKind::Channel, index.get())?;
        metrics::committed("open", handle, steps);
        Ok(handle)
    }

    fn modify_inner(&mut self, handle: Handle, modify: &ChannelModify) -> Result<()> {
        let index = self.channel_index(handle)?;
        let current = *self.channels.live(index.get())?;
        let merged = current.config.apply(modify);
        if current.link.is_some()
            && (merged.tdm != current.config.tdm || merged.codec != current.config.codec)
        {
            return Err(Error::ActiveDependency {
                resource: Resource::EchoChannel,
                index: index.get(),
                reason: "TDM and codec settings are fixed while linked",
            });
        }

        validate::check_channel(&merged, &self.cfg, &self.occupancy(Some(index)))?;
        if merged == current.config {
            return Ok(());
        }

        let Device {
            pools,
            channels,
            chip,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, "modify");
        let mut next = current;
        next.config = merged;
        if let Err(e) = rebind(&mut g, &current.config, &mut next) {
            return Err(g.abort(e));
        }
        match channels.live_mut(index.get()) {
            Ok(slot) => *slot = next,
            Err(f) => return Err(g.abort(f.into())),
        }
        if let Err(e) = chip.program_channel(&next.program(index)) {
            if let Ok(slot) = channels.live_mut(index.get()) {
                *slot = current;
            }
            return Err(g.abort(e.into()));
        }
        let steps = g.commit();
        metrics::committed("modify", handle, steps);
        Ok(())
    }

    fn close_inner(&mut self, handle: Handle) -> Result<()> {
        let index = self.channel_index(handle)?;
        let mut entry = *self.channels.live(index.get())?;
        if entry.link.is_some() {
            return Err(Error::ActiveDependency {
                resource: Resource::EchoChannel,
                index: index.get(),
                reason: "member of a bidirectional link",
            });
        }
        self.chip.clear_channel(index)?;

        let Device {
            pools,
            channels,
            phasing,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, "close");
        let freed = match release_channel(&mut g, phasing, &mut entry, index) {
            Ok(freed) => freed,
            Err(e) => return Err(g.abort(e)),
        };
        let steps = g.commit();

        channels.retire(index.get())?;
        if let Some(p) = freed {
            phasing.retire(p.get())?;
        }
        metrics::committed("close", handle, steps);
        Ok(())
    }

    fn update_mute(
        &mut self,
        index: ChannelIndex,
        current: ChannelEntry,
        tag: &'static str,
        change: impl FnOnce(&mut ReservationGuard<'_>, &mut ChannelEntry) -> Result<()>,
    ) -> Result<()> {
        let Device {
            pools,
            channels,
            chip,
            ..
        } = self;
        let mut g = ReservationGuard::begin(pools, tag);
        let mut next = current;
        if let Err(e) = change(&mut g, &mut next) {
            return Err(g.abort(e));
        }
        if g.is_empty() {
            g.commit();
            return Ok(());
        }
        match channels.live_mut(index.get()) {
            Ok(slot) => *slot = next,
            Err(f) => return Err(g.abort(f.into())),
        }
        if let Err(e) = chip.set_mute(index, &next.muted_ports()) {
            if let Ok(slot) = channels.live_mut(index.get()) {
                *slot = current;
            }
            return Err(g.abort(e.into()));
        }
        let steps = g.commit();
        metrics::committed(tag, index, steps);
        Ok(())
    }
}

/// Reservation steps for open, in acquisition order.
fn reserve_open(
    g: &mut ReservationGuard<'_>,
    phasing: &EntryTable<PhasingEntry>,
    e: &mut ChannelEntry,
) -> Result<(ChannelIndex, NewPhasing)> {
    let index = g.alloc::<ChannelIndex>()?;
    reserve_paths(g, e)?;
    if e.config.vqe.extended_tone_detection {
        reserve_tone(g, e)?;
    }

    let mut fresh = None;
    if let Some(ph) = e.config.phasing {
        let existing = phasing
            .iter()
            .find(|(_, p)| p.timeslot == ph.timeslot && p.stream == ph.stream)
            .map(|(i, _)| PhasingIndex::new(i));
        let slot = match existing {
            Some(p) => {
                g.retain(p)?;
                p
            }
            None => {
                let p = g.acquire_shared::<PhasingIndex>()?;
                let tsst = g.alloc::<TsstIndex>()?;
                fresh = Some((
                    p,
                    PhasingEntry {
                        timeslot: ph.timeslot,
                        stream: ph.stream,
                        length: ph.length,
                        tsst,
                    },
                ));
                p
            }
        };
        e.phasing = Some(slot);
    }

    reserve_tssts(g, e)?;
    check_mute_quota(g, e)?;
    Ok((index, fresh))
}

fn commit_open(
    channels: &mut EntryTable<ChannelEntry>,
    phasing: &mut EntryTable<PhasingEntry>,
    index: ChannelIndex,
    entry: ChannelEntry,
    fresh: NewPhasing,
) -> std::result::Result<(), FatalError> {
    if let Some((p, pe)) = fresh {
        phasing.commit(p.get(), pe)?;
    }
    channels.commit(index.get(), entry)
}

fn uncommit_open(
    channels: &mut EntryTable<ChannelEntry>,
    phasing: &mut EntryTable<PhasingEntry>,
    index: ChannelIndex,
    fresh: NewPhasing,
) -> std::result::Result<(), FatalError> {
    channels.uncommit(index.get())?;
    if let Some((p, _)) = fresh {
        phasing.uncommit(p.get())?;
    }
    Ok(())
}

/// Release a channel's slots in reverse acquisition order. Returns the
/// phasing slot if this channel was its last dependent.
fn release_channel(
    g: &mut ReservationGuard<'_>,
    phasing: &EntryTable<PhasingEntry>,
    e: &mut ChannelEntry,
    index: ChannelIndex,
) -> Result<Option<PhasingIndex>> {
    for port in Port::ALL.into_iter().rev() {
        if let Some(ev) = e.mute[port.slot()].take() {
            g.release(ev)?;
        }
    }
    for port in Port::ALL.into_iter().rev() {
        if let Some(t) = e.tsst[port.slot()].take() {
            g.release(t)?;
        }
    }

    // The phasing TSST was taken after the phasing slot, so it goes first
    // when this channel is the slot's last dependent.
    let mut freed = None;
    if let Some(p) = e.phasing.take() {
        if g.pools().dependents(SlotRef::of(p)) == 1 {
            g.release(phasing.live(p.get())?.tsst)?;
            freed = Some(p);
        }
        g.release_shared(p)?;
    }

    release_tone(g, e)?;
    for dir in Direction::ALL.into_iter().rev() {
        if let Some(c) = e.conversion[dir.slot()].take() {
            g.release(c)?;
        }
    }
    for dir in Direction::ALL.into_iter().rev() {
        if let Some(t) = e.tsi[dir.slot()].take() {
            g.release(t)?;
        }
    }
    g.release(index)?;
    Ok(freed)
}

/// Move `e`'s slots from `old` to `e.config`: release what the new
/// configuration no longer needs, then reserve what it adds.
fn rebind(g: &mut ReservationGuard<'_>, old: &ChannelConfig, e: &mut ChannelEntry) -> Result<()> {
    let cfg = e.config;

    for port in Port::ALL.into_iter().rev() {
        if cfg.tdm.is_bound(port) {
            continue;
        }
        if let Some(ev) = e.mute[port.slot()].take() {
            g.release(ev)?;
        }
    }
    for port in Port::ALL.into_iter().rev() {
        let same = match (old.tdm.get(port), cfg.tdm.get(port)) {
            (Some(a), Some(b)) => a.same_position(&b),
            _ => false,
        };
        if same {
            continue;
        }
        if let Some(t) = e.tsst[port.slot()].take() {
            g.release(t)?;
        }
    }
    if !cfg.vqe.extended_tone_detection {
        release_tone(g, e)?;
    }
    for dir in Direction::ALL.into_iter().rev() {
        if cfg.codec.converts(dir) {
            continue;
        }
        if let Some(c) = e.conversion[dir.slot()].take() {
            g.release(c)?;
        }
    }
    for dir in Direction::ALL.into_iter().rev() {
        if cfg.tdm.uses_direction(dir) {
            continue;
        }
        if let Some(t) = e.tsi[dir.slot()].take() {
            g.release(t)?;
        }
    }

    reserve_paths(g, e)?;
    if cfg.vqe.extended_tone_detection && e.tone.is_none() {
        reserve_tone(g, e)?;
    }
    reserve_tssts(g, e)?;
    check_mute_quota(g, e)
}

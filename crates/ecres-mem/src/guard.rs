//! All-or-nothing reservations across several pools.
//!
//! A [`ReservationGuard`] borrows the pools for the length of one operation
//! and journals every step that changed them. On success the caller calls
//! [`ReservationGuard::commit`]; on the first failure it calls
//! [`ReservationGuard::abort`], which undoes the journal in strict reverse
//! order. An undo that fails means the pools no longer match the journal, so
//! it is reported as fatal and never swallowed.
//!
//! Unlike a budget guard, dropping an unfinished reservation does *not*
//! release anything: undo can fail, and Drop has nowhere to report that.

use ecres_core::error::FatalError;
use ecres_core::id::{Resource, SlotId, SlotRef};

use crate::pool::ResourcePools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Acquired(SlotRef),
    AcquiredShared(SlotRef),
    Retained(SlotRef),
    Released(SlotRef),
    ReleasedShared { slot: SlotRef, freed: bool },
}

impl Step {
    fn undo(self, pools: &mut ResourcePools) -> Result<(), FatalError> {
        match self {
            Step::Acquired(s) => pools.dealloc(s),
            Step::AcquiredShared(s) => pools.discard_shared(s),
            Step::Retained(s) => pools.unretain(s),
            Step::Released(s) => pools.reclaim(s),
            Step::ReleasedShared { slot, freed: true } => pools.restore_shared(slot),
            Step::ReleasedShared { slot, freed: false } => pools.retain(slot).map(|_| ()),
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Acquired(s) => write!(f, "acquire {s}"),
            Step::AcquiredShared(s) => write!(f, "acquire shared {s}"),
            Step::Retained(s) => write!(f, "retain {s}"),
            Step::Released(s) => write!(f, "release {s}"),
            Step::ReleasedShared { slot, .. } => write!(f, "release shared {slot}"),
        }
    }
}

#[must_use = "a reservation must be committed or aborted"]
pub struct ReservationGuard<'p> {
    pools: &'p mut ResourcePools,
    steps: Vec<Step>,
    tag: &'static str,
    finished: bool,
}

impl<'p> ReservationGuard<'p> {
    pub fn begin(pools: &'p mut ResourcePools, tag: &'static str) -> Self {
        Self {
            pools,
            steps: Vec::new(),
            tag,
            finished: false,
        }
    }

    /// Read-only view of the pools, including this reservation's changes.
    pub fn pools(&self) -> &ResourcePools {
        self.pools
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn alloc<I: SlotId>(&mut self) -> Result<I, ecres_core::Error> {
        let id = self.pools.alloc::<I>()?;
        self.steps.push(Step::Acquired(SlotRef::of(id)));
        Ok(id)
    }

    pub fn acquire_shared<I: SlotId>(&mut self) -> Result<I, ecres_core::Error> {
        let id = self.pools.acquire_shared::<I>()?;
        self.steps.push(Step::AcquiredShared(SlotRef::of(id)));
        Ok(id)
    }

    pub fn retain<I: SlotId>(&mut self, id: I) -> Result<u32, ecres_core::Error> {
        let slot = SlotRef::of(id);
        let n = self.pools.retain(slot)?;
        self.steps.push(Step::Retained(slot));
        Ok(n)
    }

    pub fn release<I: SlotId>(&mut self, id: I) -> Result<(), ecres_core::Error> {
        let slot = SlotRef::of(id);
        self.pools.dealloc(slot)?;
        self.steps.push(Step::Released(slot));
        Ok(())
    }

    /// Drop one dependent; returns whether the slot was freed.
    pub fn release_shared<I: SlotId>(&mut self, id: I) -> Result<bool, ecres_core::Error> {
        let slot = SlotRef::of(id);
        let freed = self.pools.release_shared(slot)?;
        self.steps.push(Step::ReleasedShared { slot, freed });
        Ok(freed)
    }

    /// Capacity check without allocating.
    pub fn ensure_available(&self, resource: Resource, needed: u32) -> Result<(), ecres_core::Error> {
        if self.pools.available(resource) < needed {
            return Err(ecres_core::Error::Exhausted(resource));
        }
        Ok(())
    }

    /// Keep every change. Returns the number of steps journaled.
    pub fn commit(mut self) -> usize {
        self.finished = true;
        let n = self.steps.len();
        #[cfg(feature = "tracing")]
        tracing::trace!(tag = self.tag, steps = n, "reservation committed");
        n
    }

    /// Undo every journaled step in reverse order and hand back `cause`.
    /// If an undo step fails, the fatal error replaces `cause`.
    pub fn abort(mut self, cause: ecres_core::Error) -> ecres_core::Error {
        self.finished = true;
        match self.rollback() {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(tag = self.tag, error = %cause, "reservation rolled back");
                cause
            }
            Err(fatal) => {
                #[cfg(feature = "tracing")]
                tracing::error!(tag = self.tag, error = %fatal, original = %cause, "rollback failed");
                ecres_core::Error::Fatal(fatal)
            }
        }
    }

    fn rollback(&mut self) -> Result<(), FatalError> {
        while let Some(step) = self.steps.pop() {
            step.undo(self.pools).map_err(|cause| FatalError::RollbackFailed {
                step: step.to_string(),
                cause: Box::new(cause),
            })?;
        }
        Ok(())
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.steps.is_empty() && !std::thread::panicking() {
            debug_assert!(
                false,
                "reservation '{}' dropped with {} uncommitted steps",
                self.tag,
                self.steps.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecres_core::config::DeviceConfig;
    use ecres_core::id::{ChannelIndex, TsiIndex, TsstIndex};

    fn pools() -> ResourcePools {
        ResourcePools::new(&DeviceConfig {
            max_channels: 2,
            max_tsi_memory: 2,
            max_tsst: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn abort_restores_everything_in_reverse() {
        let mut p = pools();
        let before = p.digest();
        let mut g = ReservationGuard::begin(&mut p, "test");
        let _c: ChannelIndex = g.alloc().unwrap();
        let _t: TsiIndex = g.acquire_shared().unwrap();
        let _s1: TsstIndex = g.alloc().unwrap();
        let _s2: TsstIndex = g.alloc().unwrap();
        let err = g.alloc::<TsstIndex>().unwrap_err();
        assert_eq!(err, ecres_core::Error::Exhausted(Resource::Tsst));
        let err = g.abort(err);
        assert_eq!(err, ecres_core::Error::Exhausted(Resource::Tsst));
        assert_eq!(p.digest(), before);
    }

    #[test]
    fn abort_undoes_releases() {
        let mut p = pools();
        let t: TsiIndex = p.acquire_shared().unwrap();
        p.retain(SlotRef::of(t)).unwrap();
        let s: TsstIndex = p.alloc().unwrap();
        let before = p.digest();

        let mut g = ReservationGuard::begin(&mut p, "test");
        assert!(!g.release_shared(t).unwrap());
        assert!(g.release_shared(t).unwrap());
        g.release(s).unwrap();
        let err = g.abort(ecres_core::Error::Device("boom".into()));
        assert_eq!(err, ecres_core::Error::Device("boom".into()));
        assert_eq!(p.digest(), before);
        assert_eq!(p.dependents(SlotRef::of(t)), 2);
    }

    #[test]
    fn pools_view_includes_pending_steps() {
        let mut p = pools();
        let mut g = ReservationGuard::begin(&mut p, "test");
        let t: TsiIndex = g.acquire_shared().unwrap();
        g.retain(t).unwrap();
        assert_eq!(g.pools().dependents(SlotRef::of(t)), 2);
        assert_eq!(g.pools().available(Resource::TsiMemory), 1);
        let _ = g.abort(ecres_core::Error::Device("stop".into()));
        assert_eq!(p.dependents(SlotRef::of(t)), 0);
    }

    #[test]
    fn commit_keeps_changes() {
        let mut p = pools();
        let mut g = ReservationGuard::begin(&mut p, "test");
        let c: ChannelIndex = g.alloc().unwrap();
        assert_eq!(g.commit(), 1);
        assert!(p.is_allocated(c));
    }

    #[test]
    fn capacity_check_does_not_allocate() {
        let mut p = pools();
        let before = p.digest();
        let g = ReservationGuard::begin(&mut p, "test");
        g.ensure_available(Resource::Tsst, 2).unwrap();
        assert_eq!(
            g.ensure_available(Resource::Tsst, 3),
            Err(ecres_core::Error::Exhausted(Resource::Tsst))
        );
        assert_eq!(g.commit(), 0);
        assert_eq!(p.digest(), before);
    }

    #[test]
    fn failed_undo_is_fatal() {
        let mut p = pools();
        let mut g = ReservationGuard::begin(&mut p, "test");
        let c: ChannelIndex = g.alloc().unwrap();
        // Corrupt the pools behind the journal's back.
        g.pools.dealloc(SlotRef::of(c)).unwrap();
        let err = g.abort(ecres_core::Error::Exhausted(Resource::Tsst));
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ecres_core::Error::Fatal(FatalError::RollbackFailed { .. })
        ));
    }
}

//! Read-only views: per-channel and per-link snapshots, device usage, and
//! the state digest used to prove an operation left the device untouched.

use serde::Serialize;

use ecres_core::channel::{ChannelConfig, Port};
use ecres_core::error::Result;
use ecres_core::handle::{Handle, ResourceKind};
use ecres_core::hash::{Hash256, StateHasher};
use ecres_core::id::{
    ChannelIndex, ConversionIndex, LinkIndex, MixerEventIndex, PhasingIndex, TsiIndex, TsstIndex,
};
use ecres_mem::PoolUsage;

use crate::chip::ChipIo;
use crate::device::{handle_for, Device};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub handle: Handle,
    pub index: ChannelIndex,
    pub config: ChannelConfig,
    pub tsi: [Option<TsiIndex>; 2],
    pub conversion: [Option<ConversionIndex>; 2],
    pub tsst: [Option<TsstIndex>; 4],
    pub extra_tsi: Option<TsiIndex>,
    pub tone_companion: Option<ChannelIndex>,
    pub phasing: Option<PhasingIndex>,
    pub muted: Vec<Port>,
    pub link: Option<Handle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub handle: Handle,
    pub index: LinkIndex,
    pub members: [Handle; 2],
    pub copy_events: [MixerEventIndex; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceUsage {
    pub version: &'static str,
    pub open_channels: u32,
    pub active_links: u32,
    pub phasing_slots: u32,
    pub pools: Vec<PoolUsage>,
}

impl DeviceUsage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ecres_core::Error::Config(format!("usage encode: {e}")))
    }
}

impl<C: ChipIo> Device<C> {
    pub fn channel_stats(&self, handle: Handle) -> Result<ChannelSnapshot> {
        let index = self.channel_index(handle)?;
        let e = self.channels.live(index.get())?;
        let link = match e.link {
            Some(l) => Some(handle_for(&self.links, ResourceKind::BiDirChannel, l.get())?),
            None => None,
        };
        Ok(ChannelSnapshot {
            handle,
            index,
            config: e.config,
            tsi: e.tsi,
            conversion: e.conversion,
            tsst: e.tsst,
            extra_tsi: e.extra_tsi,
            tone_companion: e.tone.map(|t| t.companion),
            phasing: e.phasing,
            muted: e.muted_ports(),
            link,
        })
    }

    pub fn link_stats(&self, handle: Handle) -> Result<LinkSnapshot> {
        let index = self.link_index(handle)?;
        let e = self.links.live(index.get())?;
        let [a, b] = e.members;
        Ok(LinkSnapshot {
            handle,
            index,
            members: [self.channel_handle(a)?, self.channel_handle(b)?],
            copy_events: e.copy_events,
        })
    }

    pub fn usage(&self) -> DeviceUsage {
        DeviceUsage {
            version: ecres_core::VERSION,
            open_channels: self.channels.reserved_count(),
            active_links: self.links.reserved_count(),
            phasing_slots: self.phasing.reserved_count(),
            pools: self.pools.usage(),
        }
    }

    /// Digest of every allocated slot, dependency count, and table slot
    /// (reserved flag and generation). Equal before and after a call means
    /// the call changed nothing.
    pub fn usage_digest(&self) -> Hash256 {
        let mut h = StateHasher::new();
        self.pools.hash_into(&mut h);
        h.section("channels", &self.channels.fingerprint())
            .section("links", &self.links.fingerprint())
            .section("phasing", &self.phasing.fingerprint());
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecres_core::channel::{PcmLaw, PortBinding, TdmConfig};
    use ecres_core::config::DeviceConfig;
    use ecres_core::id::Resource;

    fn cfg() -> ChannelConfig {
        ChannelConfig {
            tdm: TdmConfig {
                sin: Some(PortBinding::new(7, 1, PcmLaw::ALaw)),
                sout: Some(PortBinding::new(7, 1, PcmLaw::ALaw)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn snapshot_reflects_entry() {
        let mut dev = Device::new(DeviceConfig::default()).unwrap();
        let h = dev.open_channel(cfg()).unwrap();
        dev.mute_ports(h, &[Port::Sout]).unwrap();
        let s = dev.channel_stats(h).unwrap();
        assert_eq!(s.handle, h);
        assert_eq!(s.tsi[0], None);
        assert!(s.tsi[1].is_some());
        assert_eq!(s.tsst.iter().flatten().count(), 2);
        assert_eq!(s.muted, vec![Port::Sout]);
        assert_eq!(s.link, None);
    }

    #[test]
    fn usage_report_serializes() {
        let mut dev = Device::new(DeviceConfig::default()).unwrap();
        dev.open_channel(cfg()).unwrap();
        let u = dev.usage();
        assert_eq!(u.open_channels, 1);
        let chans = u
            .pools
            .iter()
            .find(|p| p.resource == Resource::EchoChannel)
            .unwrap();
        assert_eq!((chans.in_use, chans.peak), (1, 1));

        let json = u.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["open_channels"], 1);
        assert_eq!(v["pools"][0]["resource"], "echo_channel");
    }

    #[test]
    fn digest_sees_generation_bumps() {
        let mut dev = Device::new(DeviceConfig::default()).unwrap();
        let before = dev.usage_digest();
        let h = dev.open_channel(cfg()).unwrap();
        dev.close_channel(h).unwrap();
        // Same slots free, but slot 0 is now generation 1.
        assert_ne!(dev.usage_digest(), before);
    }
}

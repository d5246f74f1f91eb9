//! Device configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::Resource;

/// Largest slot count a handle can address (16-bit index).
pub const MAX_HANDLE_SLOTS: u32 = 1 << 16;

/// TDM stream clock. Determines how many timeslots a stream carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFrequency {
    Mhz2,
    Mhz4,
    #[default]
    Mhz8,
    Mhz16,
}

impl StreamFrequency {
    pub const fn timeslots(self) -> u32 {
        match self {
            StreamFrequency::Mhz2 => 32,
            StreamFrequency::Mhz4 => 64,
            StreamFrequency::Mhz8 => 128,
            StreamFrequency::Mhz16 => 256,
        }
    }
}

/// Features the loaded firmware image supports. Read-only during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub adpcm: bool,
    pub acoustic_echo: bool,
    pub tail_displacement: bool,
    pub max_tail_displacement_ms: u32,
    pub extended_tone_detection: bool,
    pub silence_suppression: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            adpcm: true,
            acoustic_echo: true,
            tail_displacement: true,
            max_tail_displacement_ms: 896,
            extended_tone_detection: true,
            silence_suppression: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Echo channel slots. Also backs the extended tone detection companions.
    pub max_channels: u32,

    pub max_tsi_memory: u32,
    pub max_tsst: u32,

    /// Conversion (ADPCM/companding) memory. Zero disables codecs.
    pub max_conversion_memory: u32,

    /// Globally shared mixer events (mute, copy, tone companion events).
    pub max_mixer_events: u32,

    /// Bidirectional link slots. Zero disables linking.
    pub max_bidir_channels: u32,

    /// Phasing TSST slots. Zero disables phasing.
    pub max_phasing_tssts: u32,

    pub max_tdm_streams: u32,
    pub tdm_frequency: StreamFrequency,
    pub max_tail_length_ms: u32,

    pub capabilities: Capabilities,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_channels: 128,
            max_tsi_memory: 512,
            max_tsst: 768,
            max_conversion_memory: 64,
            max_mixer_events: 256,
            max_bidir_channels: 64,
            max_phasing_tssts: 16,
            max_tdm_streams: 32,
            tdm_frequency: StreamFrequency::Mhz8,
            max_tail_length_ms: 128,
            capabilities: Capabilities::default(),
        }
    }
}

impl DeviceConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `ECRES_MAX_CHANNELS`, `ECRES_MAX_TSI_MEMORY`, `ECRES_MAX_TSST`
    /// - `ECRES_MAX_CONVERSION_MEMORY`, `ECRES_MAX_MIXER_EVENTS`
    /// - `ECRES_MAX_BIDIR_CHANNELS`, `ECRES_MAX_PHASING_TSSTS`
    /// - `ECRES_MAX_TDM_STREAMS`, `ECRES_MAX_TAIL_LENGTH_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        let vars: [(&str, &mut u32); 9] = [
            ("ECRES_MAX_CHANNELS", &mut cfg.max_channels),
            ("ECRES_MAX_TSI_MEMORY", &mut cfg.max_tsi_memory),
            ("ECRES_MAX_TSST", &mut cfg.max_tsst),
            ("ECRES_MAX_CONVERSION_MEMORY", &mut cfg.max_conversion_memory),
            ("ECRES_MAX_MIXER_EVENTS", &mut cfg.max_mixer_events),
            ("ECRES_MAX_BIDIR_CHANNELS", &mut cfg.max_bidir_channels),
            ("ECRES_MAX_PHASING_TSSTS", &mut cfg.max_phasing_tssts),
            ("ECRES_MAX_TDM_STREAMS", &mut cfg.max_tdm_streams),
            ("ECRES_MAX_TAIL_LENGTH_MS", &mut cfg.max_tail_length_ms),
        ];
        for (name, slot) in vars {
            if let Ok(s) = std::env::var(name) {
                if let Ok(v) = s.parse::<u32>() {
                    *slot = v;
                }
            }
        }

        if let Ok(s) = std::env::var("ECRES_TDM_FREQUENCY") {
            cfg.tdm_frequency = match s.trim() {
                "2" => StreamFrequency::Mhz2,
                "4" => StreamFrequency::Mhz4,
                "8" => StreamFrequency::Mhz8,
                "16" => StreamFrequency::Mhz16,
                _ => cfg.tdm_frequency,
            };
        }

        cfg
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: DeviceConfig =
            serde_yaml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the device cannot be built from.
    pub fn validate(&self) -> Result<()> {
        let required = [
            (Resource::EchoChannel, self.max_channels),
            (Resource::TsiMemory, self.max_tsi_memory),
            (Resource::Tsst, self.max_tsst),
            (Resource::MixerEvent, self.max_mixer_events),
        ];
        for (resource, cap) in required {
            if cap == 0 {
                return Err(Error::Config(format!("{resource} capacity must be non-zero")));
            }
        }
        for (resource, cap) in [
            (Resource::EchoChannel, self.max_channels),
            (Resource::BiDirChannel, self.max_bidir_channels),
        ] {
            if cap > MAX_HANDLE_SLOTS {
                return Err(Error::Config(format!(
                    "{resource} capacity {cap} exceeds handle range {MAX_HANDLE_SLOTS}"
                )));
            }
        }
        if self.max_tdm_streams == 0 {
            return Err(Error::Config("at least one TDM stream is required".into()));
        }
        Ok(())
    }

    pub fn capacity(&self, resource: Resource) -> u32 {
        match resource {
            Resource::EchoChannel => self.max_channels,
            Resource::TsiMemory => self.max_tsi_memory,
            Resource::Tsst => self.max_tsst,
            Resource::ConversionMemory => self.max_conversion_memory,
            Resource::MixerEvent => self.max_mixer_events,
            Resource::BiDirChannel => self.max_bidir_channels,
            Resource::PhasingTsst => self.max_phasing_tssts,
        }
    }

    pub fn timeslots_per_stream(&self) -> u32 {
        self.tdm_frequency.timeslots()
    }
}

//! Channel and link configuration as supplied by the caller.
//!
//! Open takes a full [`ChannelConfig`]. Modify takes a [`ChannelModify`] where
//! every `None` means "keep the previous setting"; [`ChannelConfig::apply`]
//! resolves it against the current configuration before validation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four TDM ports of an echo channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Rin,
    Sin,
    Rout,
    Sout,
}

impl Port {
    /// Acquisition order for TSST slots; release runs in reverse.
    pub const ALL: [Port; 4] = [Port::Rin, Port::Sin, Port::Rout, Port::Sout];

    pub const fn is_input(self) -> bool {
        matches!(self, Port::Rin | Port::Sin)
    }

    pub const fn direction(self) -> Direction {
        match self {
            Port::Rin | Port::Rout => Direction::RinRout,
            Port::Sin | Port::Sout => Direction::SinSout,
        }
    }

    pub const fn slot(self) -> usize {
        match self {
            Port::Rin => 0,
            Port::Sin => 1,
            Port::Rout => 2,
            Port::Sout => 3,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Port::Rin => "Rin",
            Port::Sin => "Sin",
            Port::Rout => "Rout",
            Port::Sout => "Sout",
        })
    }
}

/// A TDM direction pair. Each pair in use consumes one TSI memory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    RinRout,
    SinSout,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::RinRout, Direction::SinSout];

    pub const fn slot(self) -> usize {
        match self {
            Direction::RinRout => 0,
            Direction::SinSout => 1,
        }
    }

    pub const fn ports(self) -> [Port; 2] {
        match self {
            Direction::RinRout => [Port::Rin, Port::Rout],
            Direction::SinSout => [Port::Sin, Port::Sout],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmLaw {
    MuLaw,
    ALaw,
}

/// Timeslot/stream assignment of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub timeslot: u32,
    pub stream: u32,
    pub law: PcmLaw,
}

impl PortBinding {
    pub const fn new(timeslot: u32, stream: u32, law: PcmLaw) -> Self {
        Self {
            timeslot,
            stream,
            law,
        }
    }

    /// Whether two bindings address the same TDM position.
    pub fn same_position(&self, other: &PortBinding) -> bool {
        self.timeslot == other.timeslot && self.stream == other.stream
    }
}

/// Per-port TDM bindings. An unbound port (`None`) consumes no TSST slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdmConfig {
    pub rin: Option<PortBinding>,
    pub sin: Option<PortBinding>,
    pub rout: Option<PortBinding>,
    pub sout: Option<PortBinding>,
}

impl TdmConfig {
    pub fn get(&self, port: Port) -> Option<PortBinding> {
        match port {
            Port::Rin => self.rin,
            Port::Sin => self.sin,
            Port::Rout => self.rout,
            Port::Sout => self.sout,
        }
    }

    pub fn set(&mut self, port: Port, binding: Option<PortBinding>) {
        match port {
            Port::Rin => self.rin = binding,
            Port::Sin => self.sin = binding,
            Port::Rout => self.rout = binding,
            Port::Sout => self.sout = binding,
        }
    }

    pub fn is_bound(&self, port: Port) -> bool {
        self.get(port).is_some()
    }

    pub fn bound_ports(&self) -> impl Iterator<Item = (Port, PortBinding)> + '_ {
        Port::ALL
            .into_iter()
            .filter_map(move |p| self.get(p).map(|b| (p, b)))
    }

    /// A direction pair is in use when either of its ports is bound.
    pub fn uses_direction(&self, dir: Direction) -> bool {
        dir.ports().iter().any(|p| self.is_bound(*p))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoMode {
    #[default]
    Normal,
    HtFreeze,
    HtReset,
    PowerDown,
    NoEcho,
    SpeechRecognition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComfortNoise {
    #[default]
    Normal,
    Extended,
    FastLatch,
    Off,
}

/// Voice-quality-enhancement settings. Only `extended_tone_detection`
/// consumes resources; the rest is validated and handed to the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VqeConfig {
    pub nlp: bool,
    pub comfort_noise: ComfortNoise,
    pub silence_suppression: bool,
    pub tail_length_ms: u32,
    pub tail_displacement_ms: u32,
    pub acoustic_echo: bool,
    pub dc_offset_removal: bool,
    pub extended_tone_detection: bool,
}

impl Default for VqeConfig {
    fn default() -> Self {
        Self {
            nlp: true,
            comfort_noise: ComfortNoise::Normal,
            silence_suppression: false,
            tail_length_ms: 128,
            tail_displacement_ms: 0,
            acoustic_echo: false,
            dc_offset_removal: false,
            extended_tone_detection: false,
        }
    }
}

/// ADPCM/companding encodings that need a conversion memory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    G726Kbps40,
    G726Kbps32,
    G726Kbps24,
    G726Kbps16,
    G727Kbps40,
    G727Kbps32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderConfig {
    pub port: Port,
    pub encoding: Encoding,
}

/// Encoder runs on an output port, decoder on an input port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    pub encoder: Option<CoderConfig>,
    pub decoder: Option<CoderConfig>,
}

impl CodecConfig {
    pub fn is_active(&self) -> bool {
        self.encoder.is_some() || self.decoder.is_some()
    }

    /// Whether `dir` carries an encoder or decoder.
    pub fn converts(&self, dir: Direction) -> bool {
        [self.encoder, self.decoder]
            .iter()
            .flatten()
            .any(|c| c.port.direction() == dir)
    }
}

/// Phasing TSST request. Channels asking for the same timeslot/stream share
/// one phasing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasingConfig {
    pub timeslot: u32,
    pub stream: u32,
    pub length: u32,
}

/// Full configuration of a channel, as passed to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub mode: EchoMode,
    #[serde(default)]
    pub tdm: TdmConfig,
    #[serde(default)]
    pub vqe: VqeConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub phasing: Option<PhasingConfig>,
}

impl ChannelConfig {
    /// Resolve a modify request against this configuration.
    pub fn apply(&self, m: &ChannelModify) -> ChannelConfig {
        ChannelConfig {
            mode: m.mode.unwrap_or(self.mode),
            tdm: m.tdm.map_or(self.tdm, |t| t.apply(&self.tdm)),
            vqe: m.vqe.map_or(self.vqe, |v| v.apply(&self.vqe)),
            codec: m.codec.map_or(self.codec, |c| c.apply(&self.codec)),
            phasing: self.phasing,
        }
    }
}

/// Outer `None` keeps the port as is; `Some(None)` unbinds it.
pub type PortChange = Option<Option<PortBinding>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdmModify {
    pub rin: PortChange,
    pub sin: PortChange,
    pub rout: PortChange,
    pub sout: PortChange,
}

impl TdmModify {
    pub fn change(&self, port: Port) -> PortChange {
        match port {
            Port::Rin => self.rin,
            Port::Sin => self.sin,
            Port::Rout => self.rout,
            Port::Sout => self.sout,
        }
    }

    pub fn with(mut self, port: Port, change: Option<PortBinding>) -> Self {
        match port {
            Port::Rin => self.rin = Some(change),
            Port::Sin => self.sin = Some(change),
            Port::Rout => self.rout = Some(change),
            Port::Sout => self.sout = Some(change),
        }
        self
    }

    pub fn apply(&self, cur: &TdmConfig) -> TdmConfig {
        let mut out = *cur;
        for p in Port::ALL {
            if let Some(b) = self.change(p) {
                out.set(p, b);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VqeModify {
    pub nlp: Option<bool>,
    pub comfort_noise: Option<ComfortNoise>,
    pub silence_suppression: Option<bool>,
    pub tail_length_ms: Option<u32>,
    pub tail_displacement_ms: Option<u32>,
    pub acoustic_echo: Option<bool>,
    pub dc_offset_removal: Option<bool>,
    pub extended_tone_detection: Option<bool>,
}

impl VqeModify {
    pub fn apply(&self, cur: &VqeConfig) -> VqeConfig {
        VqeConfig {
            nlp: self.nlp.unwrap_or(cur.nlp),
            comfort_noise: self.comfort_noise.unwrap_or(cur.comfort_noise),
            silence_suppression: self.silence_suppression.unwrap_or(cur.silence_suppression),
            tail_length_ms: self.tail_length_ms.unwrap_or(cur.tail_length_ms),
            tail_displacement_ms: self.tail_displacement_ms.unwrap_or(cur.tail_displacement_ms),
            acoustic_echo: self.acoustic_echo.unwrap_or(cur.acoustic_echo),
            dc_offset_removal: self.dc_offset_removal.unwrap_or(cur.dc_offset_removal),
            extended_tone_detection: self
                .extended_tone_detection
                .unwrap_or(cur.extended_tone_detection),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecModify {
    pub encoder: Option<Option<CoderConfig>>,
    pub decoder: Option<Option<CoderConfig>>,
}

impl CodecModify {
    pub fn apply(&self, cur: &CodecConfig) -> CodecConfig {
        CodecConfig {
            encoder: self.encoder.unwrap_or(cur.encoder),
            decoder: self.decoder.unwrap_or(cur.decoder),
        }
    }
}

/// Partial update for modify. Every `None` section keeps the previous state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelModify {
    pub mode: Option<EchoMode>,
    pub tdm: Option<TdmModify>,
    pub vqe: Option<VqeModify>,
    pub codec: Option<CodecModify>,
}

impl ChannelModify {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.tdm.is_none() && self.vqe.is_none() && self.codec.is_none()
    }
}

//! Static and cross-channel checks run before any pool is touched.
//!
//! Everything here is read-only. A request that passes [`check_channel`] may
//! still fail later on exhaustion, but never on a rule listed here.

use ecres_core::channel::{ChannelConfig, ComfortNoise, Port, PortBinding};
use ecres_core::config::DeviceConfig;
use ecres_core::error::ValidationError;

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Who holds a TDM position on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    Input,
    Output,
    Phasing { length: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupied {
    pub occupant: Occupant,
    pub timeslot: u32,
    pub stream: u32,
}

impl Occupied {
    fn at(&self, timeslot: u32, stream: u32) -> bool {
        self.timeslot == timeslot && self.stream == stream
    }

    fn reads(&self) -> bool {
        !matches!(self.occupant, Occupant::Output)
    }
}

/// Validate a full channel configuration against device limits, firmware
/// capabilities and the positions other channels already hold.
pub fn check_channel(cfg: &ChannelConfig, dev: &DeviceConfig, occupied: &[Occupied]) -> Result<()> {
    check_ports(cfg, dev, occupied)?;
    check_codec(cfg, dev)?;
    check_vqe(cfg, dev)?;
    check_phasing(cfg, dev, occupied)
}

fn check_ports(cfg: &ChannelConfig, dev: &DeviceConfig, occupied: &[Occupied]) -> Result<()> {
    let max_timeslot = dev.timeslots_per_stream() - 1;
    let max_stream = dev.max_tdm_streams - 1;

    let bound: Vec<(Port, PortBinding)> = cfg.tdm.bound_ports().collect();
    for (port, b) in &bound {
        if b.timeslot > max_timeslot {
            return Err(ValidationError::TimeslotOutOfRange {
                port: *port,
                timeslot: b.timeslot,
                max: max_timeslot,
            });
        }
        if b.stream > max_stream {
            return Err(ValidationError::StreamOutOfRange {
                port: *port,
                stream: b.stream,
                max: max_stream,
            });
        }
    }

    // Two inputs may not read, and two outputs may not drive, the same slot.
    for (i, (first, a)) in bound.iter().enumerate() {
        for (second, b) in &bound[i + 1..] {
            if first.is_input() == second.is_input() && a.same_position(b) {
                return Err(ValidationError::DuplicateBinding {
                    first: *first,
                    second: *second,
                });
            }
        }
    }

    for (port, b) in &bound {
        let clash = occupied
            .iter()
            .any(|o| o.at(b.timeslot, b.stream) && o.reads() == port.is_input());
        if clash {
            return Err(ValidationError::TimeslotInUse {
                port: *port,
                timeslot: b.timeslot,
                stream: b.stream,
            });
        }
    }
    Ok(())
}

fn check_codec(cfg: &ChannelConfig, dev: &DeviceConfig) -> Result<()> {
    let codec = &cfg.codec;
    if !codec.is_active() {
        return Ok(());
    }
    if !dev.capabilities.adpcm || dev.max_conversion_memory == 0 {
        return Err(ValidationError::FeatureUnsupported("ADPCM conversion"));
    }
    if let Some(enc) = codec.encoder {
        if enc.port.is_input() {
            return Err(ValidationError::EncoderPort(enc.port));
        }
        if !cfg.tdm.is_bound(enc.port) {
            return Err(ValidationError::CodecPortUnbound(enc.port));
        }
    }
    if let Some(dec) = codec.decoder {
        if !dec.port.is_input() {
            return Err(ValidationError::DecoderPort(dec.port));
        }
        if !cfg.tdm.is_bound(dec.port) {
            return Err(ValidationError::CodecPortUnbound(dec.port));
        }
    }
    if let (Some(enc), Some(dec)) = (codec.encoder, codec.decoder) {
        if enc.port.direction() == dec.port.direction() {
            return Err(ValidationError::CodecPortCombination {
                encoder: enc.port,
                decoder: dec.port,
            });
        }
    }
    Ok(())
}

fn check_vqe(cfg: &ChannelConfig, dev: &DeviceConfig) -> Result<()> {
    let vqe = &cfg.vqe;
    let caps = &dev.capabilities;

    if vqe.silence_suppression {
        if !caps.silence_suppression {
            return Err(ValidationError::FeatureUnsupported("silence suppression"));
        }
        if !vqe.nlp {
            return Err(ValidationError::RequiresNlp("silence suppression"));
        }
    }
    if vqe.comfort_noise != ComfortNoise::Off && !vqe.nlp {
        return Err(ValidationError::RequiresNlp("comfort noise"));
    }
    if vqe.acoustic_echo && !caps.acoustic_echo {
        return Err(ValidationError::FeatureUnsupported("acoustic echo cancellation"));
    }
    if vqe.extended_tone_detection && !caps.extended_tone_detection {
        return Err(ValidationError::FeatureUnsupported("extended tone detection"));
    }
    if vqe.tail_length_ms > dev.max_tail_length_ms {
        return Err(ValidationError::TailLength {
            requested: vqe.tail_length_ms,
            max: dev.max_tail_length_ms,
        });
    }
    if vqe.tail_displacement_ms > 0 {
        if !caps.tail_displacement {
            return Err(ValidationError::FeatureUnsupported("tail displacement"));
        }
        if vqe.tail_displacement_ms > caps.max_tail_displacement_ms {
            return Err(ValidationError::TailDisplacement {
                requested: vqe.tail_displacement_ms,
                max: caps.max_tail_displacement_ms,
            });
        }
    }
    Ok(())
}

fn check_phasing(cfg: &ChannelConfig, dev: &DeviceConfig, occupied: &[Occupied]) -> Result<()> {
    let Some(ph) = cfg.phasing else {
        return Ok(());
    };
    if dev.max_phasing_tssts == 0 {
        return Err(ValidationError::FeatureUnsupported("phasing"));
    }
    if !(2..=512).contains(&ph.length) {
        return Err(ValidationError::PhasingLength(ph.length));
    }
    if ph.timeslot >= dev.timeslots_per_stream() || ph.stream >= dev.max_tdm_streams {
        return Err(ValidationError::PhasingOutOfRange {
            timeslot: ph.timeslot,
            stream: ph.stream,
        });
    }

    let here = occupied.iter().filter(|o| o.at(ph.timeslot, ph.stream));
    let mut shared = false;
    for o in here {
        match o.occupant {
            Occupant::Phasing { length } if length != ph.length => {
                return Err(ValidationError::PhasingLengthMismatch {
                    existing: length,
                    requested: ph.length,
                });
            }
            Occupant::Phasing { .. } => shared = true,
            Occupant::Input => {
                return Err(ValidationError::PhasingInUse {
                    timeslot: ph.timeslot,
                    stream: ph.stream,
                })
            }
            Occupant::Output => {}
        }
    }

    // A new phasing slot must not sit on one of this channel's own inputs.
    // A shared one already failed the in-use check above.
    if !shared {
        let own_input = cfg
            .tdm
            .bound_ports()
            .any(|(p, b)| p.is_input() && b.timeslot == ph.timeslot && b.stream == ph.stream);
        if own_input {
            return Err(ValidationError::PhasingInUse {
                timeslot: ph.timeslot,
                stream: ph.stream,
            });
        }
    }
    Ok(())
}

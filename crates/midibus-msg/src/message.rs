//! MIDI message model.
//!
//! The first byte of an encoded message decides its family: `0xFF` is meta,
//! `0xF0`/`0xF7` are system exclusive, `0x80..=0xEF` are channel voice and the
//! remaining system statuses fall back to [`MidiMessage::RawShort`].

use midi_msg::MidiMsg;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::error::{MessageError, Result};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_CONTINUATION: u8 = 0xF7;
pub const META: u8 = 0xFF;

/// Largest meta payload whose length fits the four-group VLQ field.
pub const MAX_META_LEN: usize = 0x0FFF_FFFF;

/// Encoded message bytes. Short messages stay inline.
pub type MessageBytes = SmallVec<[u8; 3]>;

/// Channel-voice command (upper nibble of the status byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelCommand {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl ChannelCommand {
    #[inline]
    pub fn status_nibble(self) -> u8 {
        match self {
            ChannelCommand::NoteOff => 0x80,
            ChannelCommand::NoteOn => 0x90,
            ChannelCommand::PolyPressure => 0xA0,
            ChannelCommand::ControlChange => 0xB0,
            ChannelCommand::ProgramChange => 0xC0,
            ChannelCommand::ChannelPressure => 0xD0,
            ChannelCommand::PitchBend => 0xE0,
        }
    }

    /// `None` for data bytes and system statuses.
    #[inline]
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(ChannelCommand::NoteOff),
            0x90 => Some(ChannelCommand::NoteOn),
            0xA0 => Some(ChannelCommand::PolyPressure),
            0xB0 => Some(ChannelCommand::ControlChange),
            0xC0 => Some(ChannelCommand::ProgramChange),
            0xD0 => Some(ChannelCommand::ChannelPressure),
            0xE0 => Some(ChannelCommand::PitchBend),
            _ => None,
        }
    }

    /// Number of data bytes following the status byte.
    #[inline]
    pub fn data_len(self) -> usize {
        match self {
            ChannelCommand::ProgramChange | ChannelCommand::ChannelPressure => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SysExKind {
    /// `0xF0`
    Start,
    /// `0xF7`, a continuation packet of a split exclusive message.
    Continuation,
}

impl SysExKind {
    #[inline]
    pub fn status(self) -> u8 {
        match self {
            SysExKind::Start => SYSEX_START,
            SysExKind::Continuation => SYSEX_CONTINUATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiMessage {
    ChannelVoice {
        command: ChannelCommand,
        channel: u8,
        data1: u8,
        /// Always 0 for one-data-byte commands.
        data2: u8,
    },
    SystemExclusive {
        kind: SysExKind,
        /// Bytes after the status byte, including a trailing `0xF7` if present.
        data: Vec<u8>,
    },
    Meta {
        meta_type: u8,
        data: Vec<u8>,
    },
    RawShort {
        status: u8,
        data1: u8,
        data2: u8,
    },
}

#[inline]
fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 15) as u8
}

#[inline]
fn clamp_data(value: i32) -> u8 {
    value.clamp(0, 127) as u8
}

/// Data bytes expected after a short (non-variable-length) status byte.
fn short_data_len(status: u8) -> usize {
    match ChannelCommand::from_status(status) {
        Some(command) => command.data_len(),
        None => match status {
            0xF1 | 0xF3 => 1,
            0xF2 => 2,
            _ => 0,
        },
    }
}

fn check_meta_len(len: usize) -> Result<()> {
    if len > MAX_META_LEN {
        Err(MessageError::MetaTooLong(len))
    } else {
        Ok(())
    }
}

/// Every byte of a sysex body must be a data byte, except a closing `0xF7`.
fn check_sysex_body(data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(MessageError::EmptySysEx);
    }
    let last = data.len() - 1;
    for (i, &byte) in data.iter().enumerate() {
        if byte >= 0x80 && !(byte == SYSEX_CONTINUATION && i == last) {
            return Err(MessageError::InvalidDataByte {
                offset: i + 1,
                byte,
            });
        }
    }
    Ok(())
}

fn read_vlq(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    for (i, &byte) in bytes.iter().take(4).enumerate() {
        value = (value << 7) | (byte & 0x7F) as usize;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(MessageError::InvalidMetaLength)
}

fn write_vlq(mut value: usize, out: &mut MessageBytes) {
    let mut groups: SmallVec<[u8; 4]> = smallvec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    out.extend(groups.into_iter().rev());
}

impl MidiMessage {
    // ==================== Clamping construction ====================

    /// Out-of-range channel and data values are clamped, never rejected.
    pub fn channel_voice(command: ChannelCommand, channel: i32, data1: i32, data2: i32) -> Self {
        let data2 = if command.data_len() == 2 {
            clamp_data(data2)
        } else {
            0
        };
        MidiMessage::ChannelVoice {
            command,
            channel: clamp_channel(channel),
            data1: clamp_data(data1),
            data2,
        }
    }

    pub fn note_on(channel: i32, pitch: i32, velocity: i32) -> Self {
        Self::channel_voice(ChannelCommand::NoteOn, channel, pitch, velocity)
    }

    pub fn note_off(channel: i32, pitch: i32, velocity: i32) -> Self {
        Self::channel_voice(ChannelCommand::NoteOff, channel, pitch, velocity)
    }

    pub fn control_change(channel: i32, number: i32, value: i32) -> Self {
        Self::channel_voice(ChannelCommand::ControlChange, channel, number, value)
    }

    /// Meta message with the type clamped into `0..=127`. Payloads longer
    /// than [`MAX_META_LEN`] are rejected.
    pub fn meta(meta_type: i32, data: Vec<u8>) -> Result<Self> {
        check_meta_len(data.len())?;
        Ok(MidiMessage::Meta {
            meta_type: clamp_data(meta_type),
            data,
        })
    }

    /// Builds a short message from a status byte plus up to two data values.
    ///
    /// Data values are clamped. Unused data values are ignored. Data bytes and
    /// the variable-length statuses (`0xF0`, `0xF7`, `0xFF`) are rejected.
    pub fn from_status(status: u8, data1: i32, data2: i32) -> Result<Self> {
        if status < 0x80 {
            return Err(MessageError::NotAStatus(status));
        }
        if matches!(status, SYSEX_START | SYSEX_CONTINUATION | META) {
            return Err(MessageError::UnsupportedStatus(status));
        }
        if let Some(command) = ChannelCommand::from_status(status) {
            return Ok(Self::channel_voice(
                command,
                (status & 0x0F) as i32,
                data1,
                data2,
            ));
        }
        let len = short_data_len(status);
        Ok(MidiMessage::RawShort {
            status,
            data1: if len >= 1 { clamp_data(data1) } else { 0 },
            data2: if len >= 2 { clamp_data(data2) } else { 0 },
        })
    }

    /// Like [`from_status`](Self::from_status) but the status must not need data.
    pub fn from_status_only(status: u8) -> Result<Self> {
        if status >= 0x80 {
            let len = short_data_len(status);
            if len > 0 && !matches!(status, SYSEX_START | SYSEX_CONTINUATION | META) {
                return Err(MessageError::Truncated {
                    status,
                    expected: len + 1,
                    actual: 1,
                });
            }
        }
        Self::from_status(status, 0, 0)
    }

    // ==================== Decode / encode ====================

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let &status = bytes.first().ok_or(MessageError::Empty)?;
        match status {
            META => Self::decode_meta(bytes),
            SYSEX_START => Self::decode_sysex(SysExKind::Start, bytes),
            SYSEX_CONTINUATION => Self::decode_sysex(SysExKind::Continuation, bytes),
            s if s < 0x80 => Err(MessageError::NotAStatus(s)),
            s => Self::decode_short(s, bytes),
        }
    }

    fn decode_short(status: u8, bytes: &[u8]) -> Result<Self> {
        let expected = 1 + short_data_len(status);
        if bytes.len() < expected {
            return Err(MessageError::Truncated {
                status,
                expected,
                actual: bytes.len(),
            });
        }
        if let Some((offset, &byte)) = bytes[1..expected]
            .iter()
            .enumerate()
            .find(|&(_, &b)| b >= 0x80)
        {
            return Err(MessageError::InvalidDataByte {
                offset: offset + 1,
                byte,
            });
        }
        let data1 = bytes.get(1).filter(|_| expected > 1).copied().unwrap_or(0);
        let data2 = bytes.get(2).filter(|_| expected > 2).copied().unwrap_or(0);
        Ok(match ChannelCommand::from_status(status) {
            Some(command) => MidiMessage::ChannelVoice {
                command,
                channel: status & 0x0F,
                data1,
                data2,
            },
            None => MidiMessage::RawShort {
                status,
                data1,
                data2,
            },
        })
    }

    fn decode_sysex(kind: SysExKind, bytes: &[u8]) -> Result<Self> {
        let data = &bytes[1..];
        check_sysex_body(data)?;
        Ok(MidiMessage::SystemExclusive {
            kind,
            data: data.to_vec(),
        })
    }

    fn decode_meta(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(MessageError::Truncated {
                status: META,
                expected: 3,
                actual: bytes.len(),
            });
        }
        let meta_type = bytes[1];
        if meta_type >= 0x80 {
            return Err(MessageError::InvalidMetaType(meta_type));
        }
        let (len, consumed) = read_vlq(&bytes[2..])?;
        let start = 2 + consumed;
        let end = start + len;
        if bytes.len() < end {
            return Err(MessageError::Truncated {
                status: META,
                expected: end,
                actual: bytes.len(),
            });
        }
        Ok(MidiMessage::Meta {
            meta_type,
            data: bytes[start..end].to_vec(),
        })
    }

    /// Checks what clamping cannot repair: a raw short status outside the
    /// system common/realtime range, a malformed sysex body, or a meta
    /// payload too long for its length field.
    pub fn validate(&self) -> Result<()> {
        match self {
            MidiMessage::ChannelVoice { .. } => Ok(()),
            MidiMessage::SystemExclusive { data, .. } => check_sysex_body(data),
            MidiMessage::Meta { data, .. } => check_meta_len(data.len()),
            MidiMessage::RawShort { status, .. } => match *status {
                s if s < 0x80 => Err(MessageError::NotAStatus(s)),
                0xF1..=0xFE if *status != SYSEX_CONTINUATION => Ok(()),
                s => Err(MessageError::UnsupportedStatus(s)),
            },
        }
    }

    /// Channel, data and meta type values are clamped into range, so a
    /// message built field by field never puts a stray status byte on the wire.
    pub fn encode(&self) -> MessageBytes {
        match self {
            MidiMessage::ChannelVoice {
                command,
                data1,
                data2,
                ..
            } => {
                let mut out: MessageBytes = smallvec![self.status(), (*data1).min(0x7F)];
                if command.data_len() == 2 {
                    out.push((*data2).min(0x7F));
                }
                out
            }
            MidiMessage::SystemExclusive { kind, data } => {
                let mut out = MessageBytes::with_capacity(data.len() + 1);
                out.push(kind.status());
                out.extend_from_slice(data);
                out
            }
            MidiMessage::Meta { meta_type, data } => {
                let mut out = MessageBytes::with_capacity(data.len() + 4);
                out.push(META);
                out.push((*meta_type).min(0x7F));
                write_vlq(data.len(), &mut out);
                out.extend_from_slice(data);
                out
            }
            MidiMessage::RawShort {
                status,
                data1,
                data2,
            } => {
                let mut out: MessageBytes = smallvec![*status];
                let len = short_data_len(*status);
                if len >= 1 {
                    out.push((*data1).min(0x7F));
                }
                if len >= 2 {
                    out.push((*data2).min(0x7F));
                }
                out
            }
        }
    }

    // ==================== Normalization ====================

    /// Rewrites note-on with velocity 0 into the equivalent note-off.
    ///
    /// Every other message is returned unchanged.
    pub fn normalize(self) -> Self {
        match self {
            MidiMessage::ChannelVoice {
                command: ChannelCommand::NoteOn,
                channel,
                data1,
                data2: 0,
            } => MidiMessage::ChannelVoice {
                command: ChannelCommand::NoteOff,
                channel,
                data1,
                data2: 0,
            },
            other => other,
        }
    }

    // ==================== Accessors ====================

    pub fn status(&self) -> u8 {
        match self {
            MidiMessage::ChannelVoice {
                command, channel, ..
            } => command.status_nibble() | (*channel).min(0x0F),
            MidiMessage::SystemExclusive { kind, .. } => kind.status(),
            MidiMessage::Meta { .. } => META,
            MidiMessage::RawShort { status, .. } => *status,
        }
    }

    #[inline]
    pub fn command(&self) -> Option<ChannelCommand> {
        match self {
            MidiMessage::ChannelVoice { command, .. } => Some(*command),
            _ => None,
        }
    }

    #[inline]
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::ChannelVoice { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.command() == Some(ChannelCommand::NoteOn)
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.command() == Some(ChannelCommand::NoteOff)
    }

    #[inline]
    pub fn is_controller_change(&self) -> bool {
        self.command() == Some(ChannelCommand::ControlChange)
    }

    /// `(channel, data1, data2)` for channel-voice messages.
    #[inline]
    pub fn channel_data(&self) -> Option<(u8, u8, u8)> {
        match self {
            MidiMessage::ChannelVoice {
                channel,
                data1,
                data2,
                ..
            } => Some((*channel, *data1, *data2)),
            _ => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            MidiMessage::ChannelVoice { command, .. } => 1 + command.data_len(),
            MidiMessage::SystemExclusive { data, .. } => 1 + data.len(),
            MidiMessage::Meta { .. } => self.encode().len(),
            MidiMessage::RawShort { status, .. } => 1 + short_data_len(*status),
        }
    }

    /// Typed view from the `midi-msg` crate. `None` for meta messages and for
    /// anything `midi-msg` does not parse.
    pub fn to_midi_msg(&self) -> Option<MidiMsg> {
        if matches!(self, MidiMessage::Meta { .. }) {
            return None;
        }
        MidiMsg::from_midi(&self.encode()).ok().map(|(msg, _)| msg)
    }
}

impl TryFrom<&[u8]> for MidiMessage {
    type Error = MessageError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes)
    }
}

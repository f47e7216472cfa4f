//! MIDI message model for midibus.
//!
//! Typed representation of MIDI 1.0 wire messages: channel voice, system
//! exclusive, meta and raw short messages. Provides decode/encode, clamping
//! constructors for outbound traffic and the inbound note-on/velocity-0
//! normalization.

pub mod error;
pub use error::{MessageError, Result};

pub(crate) mod message;
pub use message::{
    ChannelCommand, MessageBytes, MidiMessage, SysExKind, MAX_META_LEN, META, SYSEX_CONTINUATION,
    SYSEX_START,
};

// Re-export the typed view so callers don't need to depend on midi-msg directly
pub use midi_msg::{Channel, ChannelVoiceMsg, ControlChange, MidiMsg};

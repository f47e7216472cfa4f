//! Error types for the message model.

use thiserror::Error;

/// Why a byte sequence (or a set of scalar arguments) does not form a MIDI message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("byte 0x{0:02X} is a data byte, not a status byte")]
    NotAStatus(u8),

    #[error("status 0x{status:02X} needs {expected} bytes, got {actual}")]
    Truncated {
        status: u8,
        expected: usize,
        actual: usize,
    },

    #[error("data byte 0x{byte:02X} at offset {offset} is out of range")]
    InvalidDataByte { offset: usize, byte: u8 },

    #[error("system exclusive message has no payload")]
    EmptySysEx,

    #[error("meta type 0x{0:02X} is out of range")]
    InvalidMetaType(u8),

    #[error("meta length is not a valid variable-length quantity")]
    InvalidMetaLength,

    #[error("meta payload of {0} bytes does not fit a four-byte length field")]
    MetaTooLong(usize),

    #[error("status 0x{0:02X} cannot be built from scalar arguments")]
    UnsupportedStatus(u8),
}

pub type Result<T> = std::result::Result<T, MessageError>;

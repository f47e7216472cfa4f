//! Error types for the MIDI bus.

use midibus_msg::MessageError;
use thiserror::Error;

use crate::provider::PortType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No MIDI device found: {0}")]
    NotFound(String),

    #[error("MIDI device \"{0}\" is unavailable")]
    Unavailable(String),

    #[error("MIDI device \"{name}\" cannot be used as an {wanted} (it has no {wanted} side)")]
    WrongDirection { name: String, wanted: PortType },

    #[error("Invalid MIDI data: {0}")]
    InvalidMessage(#[from] MessageError),

    #[error("Callback {callback} panicked: {reason}")]
    CallbackFault { callback: String, reason: String },

    #[error("MIDI device \"{0}\" is already attached")]
    AlreadyAttached(String),

    #[error("MIDI bus is closed")]
    Closed,

    #[error("MIDI device error: {0}")]
    Device(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Device(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::Device(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::Device(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::Device(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

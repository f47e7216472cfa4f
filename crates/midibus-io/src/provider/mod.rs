//! Device provider abstraction.
//!
//! A provider enumerates endpoint descriptors and opens them into device
//! handles. An opened handle hands out a send side (outputs) or a receive side
//! with a callback registration (inputs). The bus only talks to these traits,
//! so hardware backends and in-memory devices are interchangeable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

mod virtual_device;
pub use virtual_device::VirtualMidiProvider;

#[cfg(feature = "midi-io")]
mod hardware;
#[cfg(feature = "midi-io")]
pub use hardware::MidirProvider;

/// Capacity value meaning "no limit" for [`DeviceHandle::max_receivers`] and
/// [`DeviceHandle::max_transmitters`].
pub const UNLIMITED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Input,
    Output,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Input => f.write_str("input"),
            PortType::Output => f.write_str("output"),
        }
    }
}

/// Endpoint identity: display name plus an opaque native id.
///
/// Compared structurally, so two descriptors obtained from separate
/// enumerations of the same device are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub id: String,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Receive callback: raw message bytes plus the transport timestamp, if any.
pub type InboundCallback = Arc<dyn Fn(&[u8], Option<u64>) + Send + Sync>;

pub trait MidiProvider: Send + Sync {
    /// Every endpoint the provider knows about, openable or not.
    fn descriptors(&self) -> Vec<Descriptor>;

    /// Open a descriptor. Fails with `Error::Unavailable` when the device
    /// exists but cannot be opened, `Error::NotFound` when it is unknown.
    fn open(&self, descriptor: &Descriptor) -> Result<Box<dyn DeviceHandle>>;
}

/// An opened device.
pub trait DeviceHandle: Send {
    fn descriptor(&self) -> &Descriptor;

    /// Send sides the device accepts. 0 means it cannot be used as an output.
    fn max_receivers(&self) -> usize;

    /// Receive sides the device offers. 0 means it cannot be used as an input.
    fn max_transmitters(&self) -> usize;

    fn sender(&mut self) -> Result<Box<dyn MidiSender>>;

    fn receiver(&mut self) -> Result<Box<dyn MidiReceiver>>;

    /// Must tolerate being called more than once.
    fn close(&mut self);
}

pub trait MidiSender: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Must tolerate being called more than once.
    fn close(&mut self);
}

pub trait MidiReceiver: Send {
    /// Install the callback invoked for every message arriving on this side.
    fn set_callback(&mut self, callback: InboundCallback) -> Result<()>;

    /// Unregisters the callback. Must tolerate being called more than once.
    fn close(&mut self);
}

//! MIDI merge/fan-out bus.
//!
//! Attaches any number of input and output devices to a [`MidiBus`], merges
//! inbound traffic into one stream for listeners and host callbacks, and
//! broadcasts outbound messages to every output.
//!
//! Feature gates: `midi-io` (hardware ports via midir). The in-memory
//! [`VirtualMidiProvider`] is always available.

pub mod error;
pub use error::{Error, Result};

pub mod provider;
#[cfg(feature = "midi-io")]
pub use provider::MidirProvider;
pub use provider::{
    Descriptor, DeviceHandle, InboundCallback, MidiProvider, MidiReceiver, MidiSender, PortType,
    VirtualMidiProvider, UNLIMITED,
};

mod bus;
pub use bus::{MidiBus, MidiBusBuilder};

mod dispatch;
mod endpoint;

pub mod enumeration;

mod host;
pub use host::{HostBindings, HostEvent, HostSlot, SlotState};

mod listener;
pub use listener::{
    midi_input_channel, midi_input_channel_with_capacity, ChannelListener, FullObserver,
    MidiListener, RawObserver, SimpleObserver,
};

mod registry;
pub use registry::DeviceSelector;

pub use midibus_msg::{ChannelCommand, MessageError, MidiMessage, SysExKind};

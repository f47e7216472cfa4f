//! # midibus - MIDI merge/fan-out bus
//!
//! Attach any number of MIDI inputs and outputs to a bus. Inbound messages from
//! every input are merged, normalized and delivered to listeners and host
//! callbacks; outbound messages are broadcast to every output.
//!
//! ## Architecture
//!
//! midibus is an umbrella crate over:
//! - **midibus-msg** - Message model (decode, encode, clamping, normalization)
//! - **midibus-io** - Providers, endpoints, listeners, host callbacks, the bus
//!
//! ## Quick Start
//!
//! ```ignore
//! use midibus::prelude::*;
//!
//! let bus = MidiBus::builder()
//!     .name("Keys")
//!     .host(HostBindings::new().note_on(|channel, pitch, velocity| {
//!         println!("{} {} {}", channel, pitch, velocity);
//!     }))
//!     .build()?;
//!
//! bus.add_input(0)?;
//! bus.add_output("IAC Driver Bus 1")?;
//! bus.send_controller_change(0, 7, 100)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Hardware I/O
//! - `midi-io` - Hardware ports via midir

mod error;
pub use error::{Error, Result};

/// Re-export of midibus-msg for direct access
pub use midibus_msg as msg;

/// Re-export of midibus-io for direct access
pub use midibus_io as io;

// Message model
pub use midibus_msg::{ChannelCommand, MessageBytes, MessageError, MidiMessage, SysExKind};

// Bus
pub use midibus_io::{
    enumeration, midi_input_channel, midi_input_channel_with_capacity, ChannelListener,
    Descriptor, DeviceSelector, FullObserver, HostBindings, HostEvent, HostSlot, MidiBus,
    MidiBusBuilder, MidiListener, MidiProvider, PortType, RawObserver, SimpleObserver, SlotState,
    VirtualMidiProvider,
};

#[cfg(feature = "midi-io")]
pub use midibus_io::MidirProvider;

/// Everything needed to build a bus and observe it.
pub mod prelude {
    pub use crate::{
        ChannelCommand, FullObserver, HostBindings, MidiBus, MidiListener, MidiMessage,
        RawObserver, SimpleObserver, VirtualMidiProvider,
    };

    #[cfg(feature = "midi-io")]
    pub use crate::MidirProvider;
}

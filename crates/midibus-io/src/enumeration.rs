//! Device enumeration.
//!
//! Stateless helpers over a [`MidiProvider`]. Each call checks every device by
//! opening and immediately closing it, so results reflect what can be
//! attached right now.

use tracing::trace;

use crate::provider::{Descriptor, MidiProvider, PortType};

enum OpenCheck {
    Openable { transmitters: usize, receivers: usize },
    Unavailable,
}

fn try_open(provider: &dyn MidiProvider, descriptor: &Descriptor) -> OpenCheck {
    match provider.open(descriptor) {
        Ok(mut handle) => {
            let check = OpenCheck::Openable {
                transmitters: handle.max_transmitters(),
                receivers: handle.max_receivers(),
            };
            handle.close();
            check
        }
        Err(e) => {
            trace!("Opening {} failed: {}", descriptor.name, e);
            OpenCheck::Unavailable
        }
    }
}

fn available(provider: &dyn MidiProvider, direction: PortType) -> Vec<Descriptor> {
    provider
        .descriptors()
        .into_iter()
        .filter(|descriptor| match try_open(provider, descriptor) {
            OpenCheck::Openable {
                transmitters,
                receivers,
            } => match direction {
                PortType::Input => transmitters != 0,
                PortType::Output => receivers != 0,
            },
            OpenCheck::Unavailable => false,
        })
        .collect()
}

fn names(descriptors: Vec<Descriptor>) -> Vec<String> {
    descriptors.into_iter().map(|d| d.name).collect()
}

/// Devices that open and can transmit to the bus.
pub fn available_inputs(provider: &dyn MidiProvider) -> Vec<Descriptor> {
    available(provider, PortType::Input)
}

/// Devices that open and can receive from the bus.
pub fn available_outputs(provider: &dyn MidiProvider) -> Vec<Descriptor> {
    available(provider, PortType::Output)
}

/// Devices the provider lists but cannot open.
pub fn unavailable_devices(provider: &dyn MidiProvider) -> Vec<Descriptor> {
    provider
        .descriptors()
        .into_iter()
        .filter(|descriptor| matches!(try_open(provider, descriptor), OpenCheck::Unavailable))
        .collect()
}

pub fn available_input_names(provider: &dyn MidiProvider) -> Vec<String> {
    names(available_inputs(provider))
}

pub fn available_output_names(provider: &dyn MidiProvider) -> Vec<String> {
    names(available_outputs(provider))
}

pub fn unavailable_device_names(provider: &dyn MidiProvider) -> Vec<String> {
    names(unavailable_devices(provider))
}

//! Input and output endpoint containers.
//!
//! A container owns the opened device handle plus the receive or send side
//! taken from it. Closing releases both and is idempotent; dropping a
//! container closes it.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{
    Descriptor, DeviceHandle, InboundCallback, MidiProvider, MidiReceiver, MidiSender, PortType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Open,
    Closed,
}

/// Provider failures other than "not found" surface as `Unavailable`.
fn open_device(
    provider: &dyn MidiProvider,
    descriptor: &Descriptor,
) -> Result<Box<dyn DeviceHandle>> {
    provider.open(descriptor).map_err(|e| match e {
        Error::NotFound(_) | Error::Unavailable(_) => e,
        other => {
            debug!("Opening {} failed: {}", descriptor.name, other);
            Error::Unavailable(descriptor.name.clone())
        }
    })
}

pub(crate) struct InputEndpoint {
    descriptor: Descriptor,
    device: Box<dyn DeviceHandle>,
    receiver: Box<dyn MidiReceiver>,
    state: EndpointState,
}

impl InputEndpoint {
    /// Open `descriptor` for receiving and install `callback` on it.
    ///
    /// Everything opened so far is closed again when a later step fails.
    pub(crate) fn open(
        provider: &dyn MidiProvider,
        descriptor: &Descriptor,
        callback: InboundCallback,
    ) -> Result<Self> {
        let mut device = open_device(provider, descriptor)?;

        if device.max_transmitters() == 0 {
            device.close();
            return Err(Error::WrongDirection {
                name: descriptor.name.clone(),
                wanted: PortType::Input,
            });
        }

        let mut receiver = match device.receiver() {
            Ok(receiver) => receiver,
            Err(e) => {
                device.close();
                debug!("No receive side on {}: {}", descriptor.name, e);
                return Err(Error::Unavailable(descriptor.name.clone()));
            }
        };

        if let Err(e) = receiver.set_callback(callback) {
            receiver.close();
            device.close();
            debug!("Installing callback on {} failed: {}", descriptor.name, e);
            return Err(Error::Unavailable(descriptor.name.clone()));
        }

        debug!("Opened MIDI input {}", descriptor.name);
        Ok(Self {
            descriptor: descriptor.clone(),
            device,
            receiver,
            state: EndpointState::Open,
        })
    }

    pub(crate) fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub(crate) fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> EndpointState {
        self.state
    }

    pub(crate) fn close(&mut self) {
        if self.state == EndpointState::Closed {
            return;
        }
        self.receiver.close();
        self.device.close();
        self.state = EndpointState::Closed;
        debug!("Closed MIDI input {}", self.descriptor.name);
    }
}

impl Drop for InputEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

struct OutputInner {
    device: Box<dyn DeviceHandle>,
    sender: Box<dyn MidiSender>,
    state: EndpointState,
}

/// Shared between the registry and in-flight broadcasts, so the send side
/// sits behind a mutex.
pub(crate) struct OutputEndpoint {
    descriptor: Descriptor,
    inner: Mutex<OutputInner>,
}

impl OutputEndpoint {
    pub(crate) fn open(provider: &dyn MidiProvider, descriptor: &Descriptor) -> Result<Self> {
        let mut device = open_device(provider, descriptor)?;

        if device.max_receivers() == 0 {
            device.close();
            return Err(Error::WrongDirection {
                name: descriptor.name.clone(),
                wanted: PortType::Output,
            });
        }

        let sender = match device.sender() {
            Ok(sender) => sender,
            Err(e) => {
                device.close();
                debug!("No send side on {}: {}", descriptor.name, e);
                return Err(Error::Unavailable(descriptor.name.clone()));
            }
        };

        debug!("Opened MIDI output {}", descriptor.name);
        Ok(Self {
            descriptor: descriptor.clone(),
            inner: Mutex::new(OutputInner {
                device,
                sender,
                state: EndpointState::Open,
            }),
        })
    }

    pub(crate) fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub(crate) fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> EndpointState {
        self.inner.lock().state
    }

    /// `Ok(false)` when the endpoint was closed before the send got the lock.
    pub(crate) fn send(&self, bytes: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state == EndpointState::Closed {
            return Ok(false);
        }
        inner.sender.send(bytes)?;
        Ok(true)
    }

    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == EndpointState::Closed {
            return;
        }
        inner.sender.close();
        inner.device.close();
        inner.state = EndpointState::Closed;
        debug!("Closed MIDI output {}", self.descriptor.name);
    }
}

impl Drop for OutputEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

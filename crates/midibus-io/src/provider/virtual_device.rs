//! In-memory MIDI devices.
//!
//! Useful for routing between parts of an application without hardware and for
//! tests: bytes can be injected into an input device as if they came from a
//! transport, and everything sent to an output device is captured.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{
    Descriptor, DeviceHandle, InboundCallback, MidiProvider, MidiReceiver, MidiSender, UNLIMITED,
};
use crate::error::{Error, Result};

struct VirtualDevice {
    descriptor: Descriptor,
    receivers: usize,
    transmitters: usize,
    available: bool,
    callbacks: Vec<(u64, InboundCallback)>,
    sent: Vec<Vec<u8>>,
    open_handles: usize,
}

#[derive(Default)]
struct VirtualInner {
    devices: RwLock<Vec<VirtualDevice>>,
    next_id: AtomicU64,
    next_token: AtomicU64,
}

impl VirtualInner {
    fn with_device<R>(
        &self,
        descriptor: &Descriptor,
        f: impl FnOnce(&mut VirtualDevice) -> R,
    ) -> Option<R> {
        let mut devices = self.devices.write();
        devices
            .iter_mut()
            .find(|d| &d.descriptor == descriptor)
            .map(f)
    }
}

/// Provider backed by in-memory devices. Clone is cheap (Arc internally).
#[derive(Clone, Default)]
pub struct VirtualMidiProvider {
    inner: Arc<VirtualInner>,
}

impl VirtualMidiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device with explicit capacities (0 disables a direction).
    pub fn add_device(
        &self,
        name: impl Into<String>,
        transmitters: usize,
        receivers: usize,
    ) -> Descriptor {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = Descriptor::new(name, format!("virtual:{}", id));
        self.inner.devices.write().push(VirtualDevice {
            descriptor: descriptor.clone(),
            receivers,
            transmitters,
            available: true,
            callbacks: Vec::new(),
            sent: Vec::new(),
            open_handles: 0,
        });
        debug!("Created virtual MIDI device {}: {}", descriptor.id, descriptor.name);
        descriptor
    }

    /// Input-only device.
    pub fn add_input(&self, name: impl Into<String>) -> Descriptor {
        self.add_device(name, UNLIMITED, 0)
    }

    /// Output-only device.
    pub fn add_output(&self, name: impl Into<String>) -> Descriptor {
        self.add_device(name, 0, UNLIMITED)
    }

    /// Unavailable devices are still enumerated but fail to open.
    pub fn set_available(&self, descriptor: &Descriptor, available: bool) -> bool {
        self.inner
            .with_device(descriptor, |d| d.available = available)
            .is_some()
    }

    /// Deliver `bytes` to every callback installed on the device, as a
    /// transport thread would. Returns how many callbacks were invoked.
    ///
    /// Callbacks run on the calling thread, outside the provider lock.
    pub fn inject(&self, descriptor: &Descriptor, bytes: &[u8]) -> usize {
        let callbacks: Vec<InboundCallback> = self
            .inner
            .with_device(descriptor, |d| {
                d.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
            })
            .unwrap_or_default();
        for callback in &callbacks {
            callback(bytes, None);
        }
        callbacks.len()
    }

    /// Everything sent to the device so far, oldest first.
    pub fn sent(&self, descriptor: &Descriptor) -> Vec<Vec<u8>> {
        self.inner
            .with_device(descriptor, |d| d.sent.clone())
            .unwrap_or_default()
    }

    pub fn clear_sent(&self, descriptor: &Descriptor) {
        self.inner.with_device(descriptor, |d| d.sent.clear());
    }

    /// Handles opened and not yet closed.
    pub fn open_handle_count(&self, descriptor: &Descriptor) -> usize {
        self.inner
            .with_device(descriptor, |d| d.open_handles)
            .unwrap_or(0)
    }

    /// Receive callbacks currently installed.
    pub fn callback_count(&self, descriptor: &Descriptor) -> usize {
        self.inner
            .with_device(descriptor, |d| d.callbacks.len())
            .unwrap_or(0)
    }
}

impl MidiProvider for VirtualMidiProvider {
    fn descriptors(&self) -> Vec<Descriptor> {
        self.inner
            .devices
            .read()
            .iter()
            .map(|d| d.descriptor.clone())
            .collect()
    }

    fn open(&self, descriptor: &Descriptor) -> Result<Box<dyn DeviceHandle>> {
        let capacities = self
            .inner
            .with_device(descriptor, |d| {
                if d.available {
                    d.open_handles += 1;
                    Ok((d.receivers, d.transmitters))
                } else {
                    Err(Error::Unavailable(descriptor.name.clone()))
                }
            })
            .ok_or_else(|| Error::NotFound(descriptor.name.clone()))??;

        Ok(Box::new(VirtualHandle {
            inner: Arc::clone(&self.inner),
            descriptor: descriptor.clone(),
            receivers: capacities.0,
            transmitters: capacities.1,
            closed: false,
        }))
    }
}

struct VirtualHandle {
    inner: Arc<VirtualInner>,
    descriptor: Descriptor,
    receivers: usize,
    transmitters: usize,
    closed: bool,
}

impl DeviceHandle for VirtualHandle {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn max_receivers(&self) -> usize {
        self.receivers
    }

    fn max_transmitters(&self) -> usize {
        self.transmitters
    }

    fn sender(&mut self) -> Result<Box<dyn MidiSender>> {
        if self.closed || self.receivers == 0 {
            return Err(Error::Device(format!(
                "{} has no open send side",
                self.descriptor.name
            )));
        }
        Ok(Box::new(VirtualSender {
            inner: Arc::clone(&self.inner),
            descriptor: self.descriptor.clone(),
            closed: false,
        }))
    }

    fn receiver(&mut self) -> Result<Box<dyn MidiReceiver>> {
        if self.closed || self.transmitters == 0 {
            return Err(Error::Device(format!(
                "{} has no open receive side",
                self.descriptor.name
            )));
        }
        Ok(Box::new(VirtualReceiver {
            inner: Arc::clone(&self.inner),
            descriptor: self.descriptor.clone(),
            token: None,
        }))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.with_device(&self.descriptor, |d| {
            d.open_handles = d.open_handles.saturating_sub(1);
        });
    }
}

struct VirtualSender {
    inner: Arc<VirtualInner>,
    descriptor: Descriptor,
    closed: bool,
}

impl MidiSender for VirtualSender {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Device(format!("{} is closed", self.descriptor.name)));
        }
        self.inner
            .with_device(&self.descriptor, |d| d.sent.push(bytes.to_vec()))
            .ok_or_else(|| Error::NotFound(self.descriptor.name.clone()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct VirtualReceiver {
    inner: Arc<VirtualInner>,
    descriptor: Descriptor,
    token: Option<u64>,
}

impl MidiReceiver for VirtualReceiver {
    fn set_callback(&mut self, callback: InboundCallback) -> Result<()> {
        self.close();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .with_device(&self.descriptor, |d| d.callbacks.push((token, callback)))
            .ok_or_else(|| Error::NotFound(self.descriptor.name.clone()))?;
        self.token = Some(token);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(token) = self.token.take() {
            self.inner.with_device(&self.descriptor, |d| {
                d.callbacks.retain(|(t, _)| *t != token);
            });
        }
    }
}

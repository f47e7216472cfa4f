//! The MIDI bus.
//!
//! A [`MidiBus`] merges every attached input into one inbound stream, delivers
//! it to registered listeners and host callbacks, and broadcasts outbound
//! messages to every attached output.
//!
//! ```ignore
//! let bus = MidiBus::builder()
//!     .name("Keys")
//!     .host(HostBindings::new().note_on(|channel, pitch, velocity| {
//!         println!("note on {} {} {}", channel, pitch, velocity);
//!     }))
//!     .build()?;
//!
//! bus.add_input("IAC Bus 1")?;
//! bus.add_output(0)?;
//! bus.send_note_on(0, 60, 100)?;
//! ```

mod builder;
pub use builder::MidiBusBuilder;

use midibus_msg::{ChannelCommand, MessageError, MidiMessage};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::dispatch::Dispatcher;
use crate::enumeration;
use crate::error::{Error, Result};
use crate::host::{HostBindings, HostSlot, HostSlots, SlotState};
use crate::listener::MidiListener;
use crate::provider::{Descriptor, InboundCallback, MidiProvider};
use crate::registry::{BusRegistry, DeviceSelector};

pub struct MidiBus {
    dispatcher: Arc<Dispatcher>,
    registry: BusRegistry,
}

impl MidiBus {
    pub fn builder() -> MidiBusBuilder {
        MidiBusBuilder::default()
    }

    /// Bus with a generated name on the default provider and no host callbacks.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub(crate) fn from_parts(
        name: String,
        provider: Arc<dyn MidiProvider>,
        host: HostBindings,
    ) -> Self {
        debug!("Creating MIDI bus {} ({:?})", name, host);
        Self {
            dispatcher: Arc::new(Dispatcher::new(name, HostSlots::resolve(host))),
            registry: BusRegistry::new(provider),
        }
    }

    pub fn name(&self) -> String {
        self.dispatcher.name().as_str().to_owned()
    }

    /// Takes effect for callbacks delivered after the call returns.
    pub fn set_name(&self, name: impl Into<String>) {
        self.dispatcher.set_name(name.into());
    }

    pub fn provider(&self) -> &Arc<dyn MidiProvider> {
        self.registry.provider()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.registry.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Log a failed operation. Duplicate attaches are expected and only
    /// logged at debug level.
    fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        match &result {
            Err(Error::AlreadyAttached(name)) => {
                debug!("[{}] {}: {} is already attached", self.name(), operation, name);
            }
            Err(e) => warn!("[{}] {} failed: {}", self.name(), operation, e),
            Ok(_) => {}
        }
        result
    }

    fn inbound_callback(&self) -> InboundCallback {
        let dispatcher = Arc::clone(&self.dispatcher);
        Arc::new(move |bytes: &[u8], _timestamp: Option<u64>| {
            dispatcher.handle_inbound(bytes)
        })
    }

    // ==================== Inputs ====================

    /// Attach an input by index into [`available_inputs`](Self::available_inputs),
    /// by name, or by descriptor.
    pub fn add_input(&self, selector: impl Into<DeviceSelector>) -> Result<()> {
        let selector = selector.into();
        let result = self.ensure_open().and_then(|_| {
            self.registry.add_input(&selector, self.inbound_callback())
        });
        let descriptor = self.report("add_input", result)?;
        debug!("[{}] Attached input {}", self.name(), descriptor);
        Ok(())
    }

    /// Detach an input by index into [`attached_inputs`](Self::attached_inputs),
    /// by name, or by descriptor.
    pub fn remove_input(&self, selector: impl Into<DeviceSelector>) -> Result<()> {
        let descriptor = self.report("remove_input", self.registry.remove_input(&selector.into()))?;
        debug!("[{}] Detached input {}", self.name(), descriptor);
        Ok(())
    }

    pub fn clear_inputs(&self) {
        let removed = self.registry.clear_inputs();
        debug!("[{}] Detached {} input(s)", self.name(), removed);
    }

    /// Names of attached inputs, in attach order.
    pub fn attached_inputs(&self) -> Vec<String> {
        self.attached_input_descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    pub fn attached_input_descriptors(&self) -> Vec<Descriptor> {
        self.registry.input_descriptors()
    }

    pub fn input_count(&self) -> usize {
        self.registry.input_count()
    }

    // ==================== Outputs ====================

    /// Attach an output by index into [`available_outputs`](Self::available_outputs),
    /// by name, or by descriptor.
    pub fn add_output(&self, selector: impl Into<DeviceSelector>) -> Result<()> {
        let selector = selector.into();
        let result = self
            .ensure_open()
            .and_then(|_| self.registry.add_output(&selector));
        let descriptor = self.report("add_output", result)?;
        debug!("[{}] Attached output {}", self.name(), descriptor);
        Ok(())
    }

    pub fn remove_output(&self, selector: impl Into<DeviceSelector>) -> Result<()> {
        let descriptor =
            self.report("remove_output", self.registry.remove_output(&selector.into()))?;
        debug!("[{}] Detached output {}", self.name(), descriptor);
        Ok(())
    }

    pub fn clear_outputs(&self) {
        let removed = self.registry.clear_outputs();
        debug!("[{}] Detached {} output(s)", self.name(), removed);
    }

    pub fn attached_outputs(&self) -> Vec<String> {
        self.attached_output_descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    pub fn attached_output_descriptors(&self) -> Vec<Descriptor> {
        self.registry.output_descriptors()
    }

    pub fn output_count(&self) -> usize {
        self.registry.output_count()
    }

    /// Detach every input and output.
    pub fn clear_all(&self) {
        self.clear_inputs();
        self.clear_outputs();
    }

    // ==================== Listeners ====================

    /// `false` if the same listener object is already registered.
    pub fn add_listener(&self, listener: Arc<dyn MidiListener>) -> bool {
        self.dispatcher.add_listener(listener)
    }

    /// `false` if the listener was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn MidiListener>) -> bool {
        self.dispatcher.remove_listener(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.listener_count()
    }

    pub fn host_slot_state(&self, slot: HostSlot) -> SlotState {
        self.dispatcher.host_slot_state(slot)
    }

    // ==================== Enumeration ====================

    pub fn available_inputs(&self) -> Vec<Descriptor> {
        enumeration::available_inputs(self.provider().as_ref())
    }

    pub fn available_outputs(&self) -> Vec<Descriptor> {
        enumeration::available_outputs(self.provider().as_ref())
    }

    pub fn unavailable_devices(&self) -> Vec<Descriptor> {
        enumeration::unavailable_devices(self.provider().as_ref())
    }

    // ==================== Sending ====================

    fn send_built(&self, built: std::result::Result<MidiMessage, MessageError>) -> Result<()> {
        self.report("send", self.ensure_open())?;
        let message = self.report("send", built.map_err(Error::from))?;
        self.send_message(&message)
    }

    /// Encoded bytes of any message family. Anything after a complete short
    /// message is ignored.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.send_built(MidiMessage::decode(bytes))
    }

    /// A status-only message such as clock (`0xF8`) or tune request (`0xF6`).
    pub fn send_status(&self, status: u8) -> Result<()> {
        self.send_built(MidiMessage::from_status_only(status))
    }

    pub fn send_status_data1(&self, status: u8, data1: i32) -> Result<()> {
        self.send_built(MidiMessage::from_status(status, data1, 0))
    }

    pub fn send_status_data2(&self, status: u8, data1: i32, data2: i32) -> Result<()> {
        self.send_built(MidiMessage::from_status(status, data1, data2))
    }

    /// Channel and data values are clamped into range.
    pub fn send_channel_message(
        &self,
        command: ChannelCommand,
        channel: i32,
        data1: i32,
        data2: i32,
    ) -> Result<()> {
        self.send_message(&MidiMessage::channel_voice(command, channel, data1, data2))
    }

    pub fn send_note_on(&self, channel: i32, pitch: i32, velocity: i32) -> Result<()> {
        self.send_message(&MidiMessage::note_on(channel, pitch, velocity))
    }

    pub fn send_note_off(&self, channel: i32, pitch: i32, velocity: i32) -> Result<()> {
        self.send_message(&MidiMessage::note_off(channel, pitch, velocity))
    }

    pub fn send_controller_change(&self, channel: i32, number: i32, value: i32) -> Result<()> {
        self.send_message(&MidiMessage::control_change(channel, number, value))
    }

    pub fn send_message(&self, message: &MidiMessage) -> Result<()> {
        self.broadcast(message).map(|_| ())
    }

    /// Send to every attached output in attach order and return how many
    /// accepted the message. Per-output failures are logged and skipped; with
    /// no outputs this is a successful no-op.
    ///
    /// Out-of-range fields of a hand-built message are clamped on encode.
    /// Messages that cannot be clamped into shape fail with `InvalidMessage`.
    pub fn broadcast(&self, message: &MidiMessage) -> Result<usize> {
        self.report("send", self.ensure_open())?;
        self.report("send", message.validate().map_err(Error::from))?;
        let bytes = message.encode();
        let delivered = self.registry.broadcast(&bytes);
        trace!(
            "[{}] Sent {:02X?} to {} output(s)",
            self.name(),
            bytes.as_slice(),
            delivered
        );
        Ok(delivered)
    }

    // ==================== Duplication ====================

    /// A new bus with the same name, provider and host callbacks, the same
    /// inputs and outputs attached again in order, and the same listener
    /// objects registered.
    ///
    /// Host slots start out active even where this bus disabled them. Fails
    /// when this bus is closed or a device cannot be attached again; the
    /// partial copy is closed before the error is returned.
    pub fn duplicate(&self) -> Result<MidiBus> {
        self.report("duplicate", self.ensure_open())?;
        let copy = MidiBus::from_parts(
            self.name(),
            Arc::clone(self.provider()),
            self.dispatcher.host_bindings(),
        );
        for descriptor in self.attached_input_descriptors() {
            copy.add_input(descriptor)?;
        }
        for descriptor in self.attached_output_descriptors() {
            copy.add_output(descriptor)?;
        }
        for listener in self.dispatcher.listeners().iter() {
            copy.add_listener(Arc::clone(listener));
        }
        debug!("[{}] Duplicated bus ({})", self.name(), copy);
        Ok(copy)
    }

    // ==================== Lifecycle ====================

    /// Detach everything and reject further attach and send calls.
    ///
    /// Safe to call more than once and from any thread. Listener registrations
    /// and accessors stay usable.
    pub fn close(&self) {
        let Some((inputs, outputs)) = self.registry.close() else {
            return;
        };
        debug!(
            "[{}] Closed MIDI bus ({} input(s), {} output(s) released)",
            self.name(),
            inputs,
            outputs
        );
    }

    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }
}

impl Drop for MidiBus {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for MidiBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MidiBus: {} [{} input(s), {} output(s), {} listener(s)]",
            self.dispatcher.name(),
            self.input_count(),
            self.output_count(),
            self.listener_count()
        )
    }
}

/// Equal when the names match, the same inputs and outputs are attached in the
/// same order, and the same listener objects are registered in the same order.
/// Host callbacks and the provider are not compared.
impl PartialEq for MidiBus {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || (self.dispatcher.name() == other.dispatcher.name()
                && self.attached_input_descriptors() == other.attached_input_descriptors()
                && self.attached_output_descriptors() == other.attached_output_descriptors()
                && self.dispatcher.same_listeners(&other.dispatcher))
    }
}

impl Eq for MidiBus {}

impl fmt::Debug for MidiBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiBus")
            .field("name", &self.dispatcher.name())
            .field("inputs", &self.attached_inputs())
            .field("outputs", &self.attached_outputs())
            .field("listeners", &self.listener_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

//! Inbound merge and fan-out.
//!
//! Every attached input funnels into [`Dispatcher::handle_inbound`], possibly
//! from several transport threads at once. Listeners are read from an
//! `ArcSwap` snapshot so no lock is held while user code runs; listener and
//! host callbacks may therefore re-enter the bus.

use arc_swap::ArcSwap;
use midibus_msg::MidiMessage;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::Error;
use crate::host::{HostBindings, HostSlot, HostSlots, SlotState};
use crate::listener::MidiListener;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn same_listener(a: &Arc<dyn MidiListener>, b: &Arc<dyn MidiListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

pub(crate) struct Dispatcher {
    name: ArcSwap<String>,
    listeners: ArcSwap<Vec<Arc<dyn MidiListener>>>,
    control: Mutex<()>,
    host: HostSlots,
}

impl Dispatcher {
    pub(crate) fn new(name: String, host: HostSlots) -> Self {
        Self {
            name: ArcSwap::from_pointee(name),
            listeners: ArcSwap::from_pointee(Vec::new()),
            control: Mutex::new(()),
            host,
        }
    }

    pub(crate) fn name(&self) -> Arc<String> {
        self.name.load_full()
    }

    pub(crate) fn set_name(&self, name: String) {
        self.name.store(Arc::new(name));
    }

    // ==================== Listeners ====================

    /// `false` if this exact listener (same allocation) is already registered.
    pub(crate) fn add_listener(&self, listener: Arc<dyn MidiListener>) -> bool {
        let _guard = self.control.lock();
        let current = self.listeners.load();
        if current.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(listener);
        self.listeners.store(Arc::new(next));
        true
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn MidiListener>) -> bool {
        let _guard = self.control.lock();
        let current = self.listeners.load();
        let Some(position) = current.iter().position(|l| same_listener(l, listener)) else {
            return false;
        };
        let mut next: Vec<_> = current.iter().cloned().collect();
        next.remove(position);
        self.listeners.store(Arc::new(next));
        true
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    pub(crate) fn listeners(&self) -> Arc<Vec<Arc<dyn MidiListener>>> {
        self.listeners.load_full()
    }

    /// Same listener objects in the same order.
    pub(crate) fn same_listeners(&self, other: &Dispatcher) -> bool {
        let ours = self.listeners.load();
        let theirs = other.listeners.load();
        ours.len() == theirs.len()
            && ours.iter().zip(theirs.iter()).all(|(a, b)| same_listener(a, b))
    }

    pub(crate) fn host_bindings(&self) -> HostBindings {
        self.host.bindings()
    }

    pub(crate) fn host_slot_state(&self, slot: HostSlot) -> SlotState {
        self.host.state(slot)
    }

    // ==================== Inbound path ====================

    /// Entry point for bytes arriving on any input.
    ///
    /// Malformed data is logged and dropped. Note-on with velocity 0 is
    /// delivered as note-off.
    pub(crate) fn handle_inbound(&self, bytes: &[u8]) {
        let message = match MidiMessage::decode(bytes) {
            Ok(message) => message.normalize(),
            Err(e) => {
                warn!(
                    "[{}] Dropping inbound MIDI data {:02X?}: {}",
                    self.name(),
                    bytes,
                    e
                );
                return;
            }
        };
        let encoded = message.encode();
        trace!("[{}] Inbound {:02X?}", self.name(), encoded.as_slice());
        self.deliver(&message, &encoded);
    }

    /// Listeners first, in registration order, then host slots.
    pub(crate) fn deliver(&self, message: &MidiMessage, bytes: &[u8]) {
        let listeners = self.listeners.load_full();
        for (index, listener) in listeners.iter().enumerate() {
            self.isolate(index, "raw", || {
                if let Some(raw) = listener.as_raw() {
                    raw.on_raw(bytes);
                }
            });

            self.isolate(index, "simple", || {
                let Some(simple) = listener.as_simple() else {
                    return;
                };
                let Some((channel, data1, data2)) = message.channel_data() else {
                    return;
                };
                if message.is_note_on() {
                    simple.on_note_on(channel, data1, data2);
                } else if message.is_note_off() {
                    simple.on_note_off(channel, data1, data2);
                } else if message.is_controller_change() {
                    simple.on_controller_change(channel, data1, data2);
                }
            });

            self.isolate(index, "full", || {
                if let Some(full) = listener.as_full() {
                    full.on_message(message, bytes);
                }
            });
        }

        self.host.notify(message, bytes, &self.name());
    }

    fn isolate(&self, index: usize, capability: &str, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let fault = Error::CallbackFault {
                callback: format!("listener {} ({})", index, capability),
                reason: panic_message(payload.as_ref()),
            };
            warn!("[{}] {}", self.name(), fault);
        }
    }
}

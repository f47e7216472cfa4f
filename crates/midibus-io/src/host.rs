//! Host callback slots.
//!
//! A host registers up to ten optional callbacks through [`HostBindings`]:
//! one per event kind, each in a plain form and a form that also receives the
//! bus name. The table is fixed when the bus is built. A slot whose callback
//! panics is disabled for the rest of the bus's lifetime.

use midibus_msg::MidiMessage;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::dispatch::panic_message;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    NoteOn,
    NoteOff,
    ControllerChange,
    RawMidi,
    FullMessage,
}

impl HostEvent {
    fn qualifies(self, message: &MidiMessage) -> bool {
        match self {
            HostEvent::NoteOn => message.is_note_on(),
            HostEvent::NoteOff => message.is_note_off(),
            HostEvent::ControllerChange => message.is_controller_change(),
            HostEvent::RawMidi | HostEvent::FullMessage => true,
        }
    }
}

/// One of the ten callback positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostSlot {
    pub event: HostEvent,
    pub with_bus_name: bool,
}

impl HostSlot {
    pub const fn new(event: HostEvent, with_bus_name: bool) -> Self {
        Self {
            event,
            with_bus_name,
        }
    }

    /// Every slot, in the order slots are notified.
    pub const ALL: [HostSlot; 10] = [
        HostSlot::new(HostEvent::NoteOn, false),
        HostSlot::new(HostEvent::NoteOn, true),
        HostSlot::new(HostEvent::NoteOff, false),
        HostSlot::new(HostEvent::NoteOff, true),
        HostSlot::new(HostEvent::ControllerChange, false),
        HostSlot::new(HostEvent::ControllerChange, true),
        HostSlot::new(HostEvent::RawMidi, false),
        HostSlot::new(HostEvent::RawMidi, true),
        HostSlot::new(HostEvent::FullMessage, false),
        HostSlot::new(HostEvent::FullMessage, true),
    ];

    /// Position in [`HostSlot::ALL`].
    pub fn index(self) -> usize {
        let event = match self.event {
            HostEvent::NoteOn => 0,
            HostEvent::NoteOff => 1,
            HostEvent::ControllerChange => 2,
            HostEvent::RawMidi => 3,
            HostEvent::FullMessage => 4,
        };
        event * 2 + usize::from(self.with_bus_name)
    }
}

impl fmt::Display for HostSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.event {
            HostEvent::NoteOn => "note_on",
            HostEvent::NoteOff => "note_off",
            HostEvent::ControllerChange => "controller_change",
            HostEvent::RawMidi => "raw_midi",
            HostEvent::FullMessage => "full_message",
        };
        if self.with_bus_name {
            write!(f, "{}_with_bus_name", name)
        } else {
            f.write_str(name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unbound,
    Active,
    Disabled,
}

type ChannelFn = Arc<dyn Fn(u8, u8, u8) + Send + Sync>;
type NamedChannelFn = Arc<dyn Fn(u8, u8, u8, &str) + Send + Sync>;
type RawFn = Arc<dyn Fn(&[u8]) + Send + Sync>;
type NamedRawFn = Arc<dyn Fn(&[u8], &str) + Send + Sync>;
type MessageFn = Arc<dyn Fn(&MidiMessage) + Send + Sync>;
type NamedMessageFn = Arc<dyn Fn(&MidiMessage, &str) + Send + Sync>;

#[derive(Clone)]
enum HostCallback {
    Channel(ChannelFn),
    NamedChannel(NamedChannelFn),
    Raw(RawFn),
    NamedRaw(NamedRawFn),
    Message(MessageFn),
    NamedMessage(NamedMessageFn),
}

impl HostCallback {
    fn call(&self, message: &MidiMessage, bytes: &[u8], bus_name: &str) {
        match self {
            HostCallback::Channel(f) => {
                if let Some((channel, data1, data2)) = message.channel_data() {
                    f(channel, data1, data2);
                }
            }
            HostCallback::NamedChannel(f) => {
                if let Some((channel, data1, data2)) = message.channel_data() {
                    f(channel, data1, data2, bus_name);
                }
            }
            HostCallback::Raw(f) => f(bytes),
            HostCallback::NamedRaw(f) => f(bytes, bus_name),
            HostCallback::Message(f) => f(message),
            HostCallback::NamedMessage(f) => f(message, bus_name),
        }
    }
}

/// Callback table handed to [`MidiBusBuilder::host`](crate::MidiBusBuilder::host).
///
/// Registering the same slot twice keeps the last callback.
/// Cloning shares the callbacks.
#[derive(Clone, Default)]
pub struct HostBindings {
    callbacks: [Option<HostCallback>; 10],
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(mut self, slot: HostSlot, callback: HostCallback) -> Self {
        self.callbacks[slot.index()] = Some(callback);
        self
    }

    pub fn note_on(self, f: impl Fn(u8, u8, u8) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::NoteOn, false),
            HostCallback::Channel(Arc::new(f)),
        )
    }

    pub fn note_on_with_bus_name(
        self,
        f: impl Fn(u8, u8, u8, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bind(
            HostSlot::new(HostEvent::NoteOn, true),
            HostCallback::NamedChannel(Arc::new(f)),
        )
    }

    pub fn note_off(self, f: impl Fn(u8, u8, u8) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::NoteOff, false),
            HostCallback::Channel(Arc::new(f)),
        )
    }

    pub fn note_off_with_bus_name(
        self,
        f: impl Fn(u8, u8, u8, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bind(
            HostSlot::new(HostEvent::NoteOff, true),
            HostCallback::NamedChannel(Arc::new(f)),
        )
    }

    pub fn controller_change(self, f: impl Fn(u8, u8, u8) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::ControllerChange, false),
            HostCallback::Channel(Arc::new(f)),
        )
    }

    pub fn controller_change_with_bus_name(
        self,
        f: impl Fn(u8, u8, u8, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bind(
            HostSlot::new(HostEvent::ControllerChange, true),
            HostCallback::NamedChannel(Arc::new(f)),
        )
    }

    pub fn raw_midi(self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::RawMidi, false),
            HostCallback::Raw(Arc::new(f)),
        )
    }

    pub fn raw_midi_with_bus_name(self, f: impl Fn(&[u8], &str) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::RawMidi, true),
            HostCallback::NamedRaw(Arc::new(f)),
        )
    }

    pub fn full_message(self, f: impl Fn(&MidiMessage) + Send + Sync + 'static) -> Self {
        self.bind(
            HostSlot::new(HostEvent::FullMessage, false),
            HostCallback::Message(Arc::new(f)),
        )
    }

    pub fn full_message_with_bus_name(
        self,
        f: impl Fn(&MidiMessage, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bind(
            HostSlot::new(HostEvent::FullMessage, true),
            HostCallback::NamedMessage(Arc::new(f)),
        )
    }

    pub fn is_bound(&self, slot: HostSlot) -> bool {
        self.callbacks[slot.index()].is_some()
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound: Vec<String> = HostSlot::ALL
            .iter()
            .filter(|slot| self.is_bound(**slot))
            .map(|slot| slot.to_string())
            .collect();
        f.debug_struct("HostBindings").field("bound", &bound).finish()
    }
}

// ==================== Resolved slots ====================

struct ResolvedSlot {
    callback: Option<HostCallback>,
    disabled: AtomicBool,
}

/// The bus-owned form of [`HostBindings`]: immutable apart from the
/// per-slot disable bits.
pub(crate) struct HostSlots {
    slots: Vec<ResolvedSlot>,
}

impl HostSlots {
    pub(crate) fn resolve(bindings: HostBindings) -> Self {
        let slots = bindings
            .callbacks
            .into_iter()
            .map(|callback| ResolvedSlot {
                callback,
                disabled: AtomicBool::new(false),
            })
            .collect();
        Self { slots }
    }

    /// The bound callbacks, with every disable bit cleared.
    pub(crate) fn bindings(&self) -> HostBindings {
        let mut bindings = HostBindings::default();
        for (target, resolved) in bindings.callbacks.iter_mut().zip(&self.slots) {
            *target = resolved.callback.clone();
        }
        bindings
    }

    pub(crate) fn state(&self, slot: HostSlot) -> SlotState {
        let resolved = &self.slots[slot.index()];
        match resolved.callback {
            None => SlotState::Unbound,
            Some(_) if resolved.disabled.load(Ordering::Acquire) => SlotState::Disabled,
            Some(_) => SlotState::Active,
        }
    }

    /// Call every active slot that qualifies for `message`, in
    /// [`HostSlot::ALL`] order.
    pub(crate) fn notify(&self, message: &MidiMessage, bytes: &[u8], bus_name: &str) {
        for slot in HostSlot::ALL {
            if slot.event.qualifies(message) {
                self.invoke(slot, message, bytes, bus_name);
            }
        }
    }

    fn invoke(&self, slot: HostSlot, message: &MidiMessage, bytes: &[u8], bus_name: &str) {
        let resolved = &self.slots[slot.index()];
        let Some(callback) = &resolved.callback else {
            return;
        };
        if resolved.disabled.load(Ordering::Acquire) {
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            callback.call(message, bytes, bus_name)
        }));

        if let Err(payload) = result {
            // Concurrent faults on the same slot log once
            if !resolved.disabled.swap(true, Ordering::AcqRel) {
                let fault = Error::CallbackFault {
                    callback: format!("host slot {}", slot),
                    reason: panic_message(payload.as_ref()),
                };
                warn!("[{}] {}; slot disabled", bus_name, fault);
            }
        }
    }
}

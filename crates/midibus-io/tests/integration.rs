//! Integration tests for midibus-io.
//!
//! These tests drive a bus end to end through the in-memory provider: bytes
//! are injected into virtual inputs and captured from virtual outputs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use midibus_io::{
    midi_input_channel, midi_input_channel_with_capacity, Error, FullObserver, HostBindings,
    HostEvent, HostSlot, MidiBus, MidiListener, MidiMessage, RawObserver, SimpleObserver,
    SlotState, VirtualMidiProvider,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    raw: Mutex<Vec<Vec<u8>>>,
    simple: Mutex<Vec<(&'static str, u8, u8, u8)>>,
    full: Mutex<Vec<MidiMessage>>,
}

impl RawObserver for Recorder {
    fn on_raw(&self, bytes: &[u8]) {
        self.raw.lock().push(bytes.to_vec());
    }
}

impl SimpleObserver for Recorder {
    fn on_note_on(&self, channel: u8, pitch: u8, velocity: u8) {
        self.simple.lock().push(("note_on", channel, pitch, velocity));
    }

    fn on_note_off(&self, channel: u8, pitch: u8, velocity: u8) {
        self.simple.lock().push(("note_off", channel, pitch, velocity));
    }

    fn on_controller_change(&self, channel: u8, number: u8, value: u8) {
        self.simple.lock().push(("cc", channel, number, value));
    }
}

impl FullObserver for Recorder {
    fn on_message(&self, message: &MidiMessage, _bytes: &[u8]) {
        self.full.lock().push(message.clone());
    }
}

impl MidiListener for Recorder {
    fn as_raw(&self) -> Option<&dyn RawObserver> {
        Some(self)
    }

    fn as_simple(&self) -> Option<&dyn SimpleObserver> {
        Some(self)
    }

    fn as_full(&self) -> Option<&dyn FullObserver> {
        Some(self)
    }
}

/// Counts every capability call; only exposes the raw one.
#[derive(Default)]
struct RawOnly {
    raw: AtomicUsize,
    other: AtomicUsize,
}

impl RawObserver for RawOnly {
    fn on_raw(&self, _bytes: &[u8]) {
        self.raw.fetch_add(1, Ordering::SeqCst);
    }
}

impl SimpleObserver for RawOnly {
    fn on_note_on(&self, _channel: u8, _pitch: u8, _velocity: u8) {
        self.other.fetch_add(1, Ordering::SeqCst);
    }
}

impl MidiListener for RawOnly {
    fn as_raw(&self) -> Option<&dyn RawObserver> {
        Some(self)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn bus_on(provider: &VirtualMidiProvider) -> MidiBus {
    init_tracing();
    MidiBus::builder()
        .name("Integration")
        .provider(provider.clone())
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// 1. Inbound normalization and independence of the send path
// ---------------------------------------------------------------------------

#[test]
fn test_note_on_velocity_zero_reaches_everyone_as_note_off() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let synth = provider.add_output("Synth");

    let host_calls = Arc::new(Mutex::new(Vec::new()));
    let hc = Arc::clone(&host_calls);
    let hc_on = Arc::clone(&host_calls);
    let bus = MidiBus::builder()
        .name("Integration")
        .provider(provider.clone())
        .host(
            HostBindings::new()
                .note_off(move |channel, pitch, velocity| {
                    hc.lock().push(("note_off", channel, pitch, velocity));
                })
                .note_on(move |channel, pitch, velocity| {
                    hc_on.lock().push(("note_on", channel, pitch, velocity));
                }),
        )
        .build()
        .unwrap();

    bus.add_input(&keys).unwrap();
    bus.add_output(&synth).unwrap();
    let recorder = Arc::new(Recorder::default());
    assert!(bus.add_listener(recorder.clone()));

    assert_eq!(provider.inject(&keys, &[0x90, 0x40, 0x00]), 1);

    assert_eq!(*recorder.raw.lock(), vec![vec![0x80, 0x40, 0x00]]);
    assert_eq!(*recorder.simple.lock(), vec![("note_off", 0, 0x40, 0)]);
    assert_eq!(*recorder.full.lock(), vec![MidiMessage::note_off(0, 0x40, 0)]);
    assert_eq!(*host_calls.lock(), vec![("note_off", 0, 0x40, 0)]);

    // Inbound traffic is never echoed to outputs
    assert!(provider.sent(&synth).is_empty());
}

#[test]
fn test_inputs_are_merged() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let pads = provider.add_input("Pads");
    let bus = bus_on(&provider);
    bus.add_input("Keys").unwrap();
    bus.add_input("Pads").unwrap();

    let (listener, receiver) = midi_input_channel();
    bus.add_listener(listener);

    provider.inject(&keys, &[0x90, 60, 100]);
    provider.inject(&pads, &[0x99, 36, 127]);

    let received: Vec<MidiMessage> = receiver.try_iter().collect();
    assert_eq!(
        received,
        vec![MidiMessage::note_on(0, 60, 100), MidiMessage::note_on(9, 36, 127)]
    );
}

#[test]
fn test_detached_input_no_longer_dispatches() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();

    let recorder = Arc::new(Recorder::default());
    bus.add_listener(recorder.clone());

    provider.inject(&keys, &[0xB0, 1, 64]);
    bus.remove_input("Keys").unwrap();
    assert_eq!(provider.inject(&keys, &[0xB0, 1, 65]), 0);

    assert_eq!(*recorder.simple.lock(), vec![("cc", 0, 1, 64)]);
}

#[test]
fn test_malformed_inbound_is_dropped() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();
    let recorder = Arc::new(Recorder::default());
    bus.add_listener(recorder.clone());

    provider.inject(&keys, &[0x3C, 0x40]);
    provider.inject(&keys, &[0x90, 0x40]);
    provider.inject(&keys, &[0xF0]);
    provider.inject(&keys, &[0xF8]);

    // Only the clock byte survives
    assert_eq!(*recorder.raw.lock(), vec![vec![0xF8]]);
}

// ---------------------------------------------------------------------------
// 2. Registry rules
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_attach_keeps_one_container() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let bus = bus_on(&provider);

    bus.add_input(&keys).unwrap();
    assert!(matches!(bus.add_input(&keys), Err(Error::AlreadyAttached(_))));
    assert!(matches!(bus.add_input(0), Err(Error::AlreadyAttached(_))));
    assert_eq!(bus.attached_inputs(), vec!["Keys".to_string()]);
    assert_eq!(provider.callback_count(&keys), 1);
}

#[test]
fn test_detach_out_of_range_leaves_registry() {
    let provider = VirtualMidiProvider::new();
    let synth = provider.add_output("Synth");
    let bus = bus_on(&provider);
    bus.add_output(&synth).unwrap();

    assert!(matches!(bus.remove_output(3), Err(Error::NotFound(_))));
    assert!(matches!(bus.remove_output("Nope"), Err(Error::NotFound(_))));
    assert_eq!(bus.attached_output_descriptors(), vec![synth]);
}

#[test]
fn test_attach_errors() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let synth = provider.add_output("Synth");
    let broken = provider.add_input("Broken");
    provider.set_available(&broken, false);
    let bus = bus_on(&provider);

    assert!(matches!(bus.add_input(""), Err(Error::NotFound(_))));
    assert!(matches!(bus.add_input(7), Err(Error::NotFound(_))));
    assert!(matches!(bus.add_input("Synth"), Err(Error::NotFound(_))));
    assert!(matches!(
        bus.add_input(&synth),
        Err(Error::WrongDirection { .. })
    ));
    assert!(matches!(
        bus.add_output(&keys),
        Err(Error::WrongDirection { .. })
    ));
    assert!(matches!(bus.add_input(&broken), Err(Error::Unavailable(_))));
    assert_eq!(bus.input_count(), 0);
    assert_eq!(bus.output_count(), 0);
}

#[test]
fn test_enumeration_through_bus() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let synth = provider.add_output("Synth");
    let broken = provider.add_output("Broken");
    provider.set_available(&broken, false);
    let bus = bus_on(&provider);

    assert_eq!(bus.available_inputs(), vec![keys]);
    assert_eq!(bus.available_outputs(), vec![synth]);
    assert_eq!(bus.unavailable_devices(), vec![broken]);
}

#[test]
fn test_clear_all() {
    let provider = VirtualMidiProvider::new();
    provider.add_input("Keys");
    provider.add_input("Pads");
    provider.add_output("Synth");
    let bus = bus_on(&provider);
    bus.add_input(0).unwrap();
    bus.add_input(1).unwrap();
    bus.add_output(0).unwrap();
    assert_eq!(bus.attached_inputs(), vec!["Keys".to_string(), "Pads".to_string()]);

    bus.clear_all();
    bus.clear_all();
    assert_eq!(bus.input_count(), 0);
    assert_eq!(bus.output_count(), 0);
}

// ---------------------------------------------------------------------------
// 3. Listener capabilities and isolation
// ---------------------------------------------------------------------------

#[test]
fn test_raw_only_listener_gets_nothing_else() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();

    let listener = Arc::new(RawOnly::default());
    bus.add_listener(listener.clone());

    provider.inject(&keys, &[0x90, 60, 100]);
    provider.inject(&keys, &[0xB0, 7, 100]);
    provider.inject(&keys, &[0xF0, 0x01, 0xF7]);

    assert_eq!(listener.raw.load(Ordering::SeqCst), 3);
    assert_eq!(listener.other.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panicking_listener_does_not_stop_later_ones() {
    struct Faulty;
    impl FullObserver for Faulty {
        fn on_message(&self, _message: &MidiMessage, _bytes: &[u8]) {
            panic!("listener bug");
        }
    }
    impl MidiListener for Faulty {
        fn as_full(&self) -> Option<&dyn FullObserver> {
            Some(self)
        }
    }

    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();

    let faulty: Arc<dyn MidiListener> = Arc::new(Faulty);
    let recorder = Arc::new(Recorder::default());
    bus.add_listener(faulty.clone());
    bus.add_listener(recorder.clone());

    provider.inject(&keys, &[0x90, 60, 100]);
    provider.inject(&keys, &[0x80, 60, 0]);

    assert_eq!(recorder.full.lock().len(), 2);
    // Listeners are never auto-removed
    assert_eq!(bus.listener_count(), 2);
    assert!(bus.remove_listener(&faulty));
}

// ---------------------------------------------------------------------------
// 4. Host slots
// ---------------------------------------------------------------------------

#[test]
fn test_only_raw_midi_slot_bound() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let bus = MidiBus::builder()
        .provider(provider.clone())
        .host(HostBindings::new().raw_midi(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();
    bus.add_input(&keys).unwrap();

    for slot in HostSlot::ALL {
        let expected = if slot.event == HostEvent::RawMidi && !slot.with_bus_name {
            SlotState::Active
        } else {
            SlotState::Unbound
        };
        assert_eq!(bus.host_slot_state(slot), expected);
    }

    provider.inject(&keys, &[0x90, 60, 100]);
    provider.inject(&keys, &[0xC0, 4]);
    provider.inject(&keys, &[0xFF, 0x2F, 0x00]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_faulting_host_slot_is_disabled_for_good() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let faulty_calls = Arc::new(AtomicUsize::new(0));
    let healthy_calls = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&faulty_calls);
    let h = Arc::clone(&healthy_calls);
    let bus = MidiBus::builder()
        .provider(provider.clone())
        .host(
            HostBindings::new()
                .note_on(move |_, _, _| {
                    f.fetch_add(1, Ordering::SeqCst);
                    panic!("host bug");
                })
                .full_message(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .build()
        .unwrap();
    bus.add_input(&keys).unwrap();

    for pitch in 60..65 {
        provider.inject(&keys, &[0x90, pitch, 100]);
    }

    assert_eq!(faulty_calls.load(Ordering::SeqCst), 1);
    assert_eq!(healthy_calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        bus.host_slot_state(HostSlot::new(HostEvent::NoteOn, false)),
        SlotState::Disabled
    );
    assert_eq!(
        bus.host_slot_state(HostSlot::new(HostEvent::FullMessage, false)),
        SlotState::Active
    );
}

#[test]
fn test_bus_name_slot_sees_renames() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let names = Arc::new(Mutex::new(Vec::new()));
    let n = Arc::clone(&names);
    let bus = MidiBus::builder()
        .name("First")
        .provider(provider.clone())
        .host(
            HostBindings::new().full_message_with_bus_name(move |_, bus_name| {
                n.lock().push(bus_name.to_string());
            }),
        )
        .build()
        .unwrap();
    bus.add_input(&keys).unwrap();

    provider.inject(&keys, &[0xF8]);
    bus.set_name("Second");
    provider.inject(&keys, &[0xF8]);

    assert_eq!(*names.lock(), vec!["First".to_string(), "Second".to_string()]);
}

// ---------------------------------------------------------------------------
// 5. Outbound
// ---------------------------------------------------------------------------

#[test]
fn test_send_with_no_outputs_is_noop() {
    let provider = VirtualMidiProvider::new();
    let bus = bus_on(&provider);
    assert_eq!(bus.broadcast(&MidiMessage::note_on(0, 60, 100)).unwrap(), 0);
    bus.send_note_on(0, 60, 100).unwrap();
}

#[test]
fn test_broadcast_reaches_every_output_in_order() {
    let provider = VirtualMidiProvider::new();
    let a = provider.add_output("A");
    let b = provider.add_output("B");
    let bus = bus_on(&provider);
    bus.add_output("A").unwrap();
    bus.add_output("B").unwrap();

    bus.send_note_on(20, 200, -5).unwrap();
    bus.send_controller_change(-1, 7, 64).unwrap();

    let expected = vec![vec![0x9F, 127, 0], vec![0xB0, 7, 64]];
    assert_eq!(provider.sent(&a), expected);
    assert_eq!(provider.sent(&b), expected);
}

#[test]
fn test_removed_output_stops_receiving() {
    let provider = VirtualMidiProvider::new();
    let a = provider.add_output("A");
    let b = provider.add_output("B");
    let bus = bus_on(&provider);
    bus.add_output(&a).unwrap();
    bus.add_output(&b).unwrap();

    bus.remove_output(0).unwrap();
    assert_eq!(bus.broadcast(&MidiMessage::note_off(0, 60, 0)).unwrap(), 1);
    assert!(provider.sent(&a).is_empty());
    assert_eq!(provider.sent(&b).len(), 1);
}

// ---------------------------------------------------------------------------
// 6. Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_inputs_and_control() {
    let provider = VirtualMidiProvider::new();
    let inputs: Vec<_> = (0..4)
        .map(|i| provider.add_input(format!("In {}", i)))
        .collect();
    let synth = provider.add_output("Synth");
    let bus = Arc::new(bus_on(&provider));
    for input in &inputs {
        bus.add_input(input).unwrap();
    }

    let (listener, receiver) = midi_input_channel_with_capacity(1024);
    bus.add_listener(listener);

    let senders: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|input| {
            let provider = provider.clone();
            thread::spawn(move || {
                for pitch in 0..50u8 {
                    provider.inject(&input, &[0x90, pitch, 1]);
                }
            })
        })
        .collect();

    // Control-path churn while deliveries are in flight
    let control = {
        let bus = Arc::clone(&bus);
        thread::spawn(move || {
            for _ in 0..20 {
                bus.add_output(&synth).unwrap();
                bus.send_status(0xF8).unwrap();
                bus.remove_output(0).unwrap();
            }
        })
    };

    for t in senders {
        t.join().unwrap();
    }
    control.join().unwrap();

    assert_eq!(receiver.try_iter().count(), 200);
    assert_eq!(bus.output_count(), 0);
}

// ---------------------------------------------------------------------------
// 7. Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_close_rejects_io_but_keeps_accessors() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let synth = provider.add_output("Synth");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();
    bus.add_output(&synth).unwrap();
    let recorder: Arc<dyn MidiListener> = Arc::new(Recorder::default());
    bus.add_listener(recorder);

    bus.close();

    assert!(matches!(bus.add_output(&synth), Err(Error::Closed)));
    assert!(matches!(bus.send_bytes(&[0xF8]), Err(Error::Closed)));
    assert_eq!(provider.inject(&keys, &[0x90, 60, 100]), 0);
    assert_eq!(
        bus.to_string(),
        "MidiBus: Integration [0 input(s), 0 output(s), 1 listener(s)]"
    );
}

#[test]
fn test_close_racing_attach_from_another_thread() {
    let provider = VirtualMidiProvider::new();
    let inputs: Vec<_> = (0..16).map(|i| provider.add_input(format!("In {}", i))).collect();
    let outputs: Vec<_> = (0..16).map(|i| provider.add_output(format!("Out {}", i))).collect();
    let bus = Arc::new(bus_on(&provider));

    let control = {
        let bus = Arc::clone(&bus);
        let inputs = inputs.clone();
        let outputs = outputs.clone();
        thread::spawn(move || {
            for (input, output) in inputs.iter().zip(&outputs) {
                let _ = bus.add_input(input);
                let _ = bus.add_output(output);
            }
        })
    };
    thread::yield_now();
    bus.close();
    control.join().unwrap();

    assert_eq!(bus.input_count(), 0);
    assert_eq!(bus.output_count(), 0);
    for d in inputs.iter().chain(&outputs) {
        assert_eq!(provider.open_handle_count(d), 0, "{} still open", d);
    }
}

// ---------------------------------------------------------------------------
// 8. Duplication and equality
// ---------------------------------------------------------------------------

#[test]
fn test_duplicate_reattaches_devices_and_listeners() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let pads = provider.add_input("Pads");
    let synth = provider.add_output("Synth");
    let host_calls = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&host_calls);

    let bus = MidiBus::builder()
        .name("Keys Bus")
        .provider(provider.clone())
        .host(HostBindings::new().raw_midi(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();
    bus.add_input(&pads).unwrap();
    bus.add_input(&keys).unwrap();
    bus.add_output(&synth).unwrap();
    let recorder = Arc::new(Recorder::default());
    bus.add_listener(recorder.clone());

    let copy = bus.duplicate().unwrap();
    assert_eq!(copy.name(), "Keys Bus");
    assert_eq!(copy.attached_inputs(), vec!["Pads", "Keys"]);
    assert_eq!(copy.attached_outputs(), vec!["Synth"]);
    assert_eq!(copy.listener_count(), 1);
    assert_eq!(copy, bus);
    assert_eq!(provider.callback_count(&keys), 2);

    // Both buses deliver to the shared listener and host callback
    assert_eq!(provider.inject(&keys, &[0x90, 60, 100]), 2);
    assert_eq!(recorder.full.lock().len(), 2);
    assert_eq!(host_calls.load(Ordering::SeqCst), 2);

    copy.send_note_on(0, 60, 100).unwrap();
    assert_eq!(provider.sent(&synth), vec![vec![0x90, 60, 100]]);

    // Independent after the copy
    copy.set_name("Copy");
    assert_ne!(copy, bus);
    copy.close();
    assert_eq!(bus.input_count(), 2);
    assert_eq!(provider.callback_count(&keys), 1);
}

#[test]
fn test_duplicate_failure_releases_partial_copy() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let synth = provider.add_output("Synth");
    let bus = bus_on(&provider);
    bus.add_input(&keys).unwrap();
    bus.add_output(&synth).unwrap();

    provider.set_available(&synth, false);
    assert!(matches!(bus.duplicate(), Err(Error::Unavailable(_))));
    assert_eq!(provider.open_handle_count(&keys), 1);
    assert_eq!(provider.callback_count(&keys), 1);

    bus.close();
    assert!(matches!(bus.duplicate(), Err(Error::Closed)));
}

#[test]
fn test_equality_follows_routing() {
    let provider = VirtualMidiProvider::new();
    let keys = provider.add_input("Keys");
    let a = bus_on(&provider);
    let b = bus_on(&provider);
    assert_eq!(a, b);

    a.add_input(&keys).unwrap();
    assert_ne!(a, b);
    b.add_input(&keys).unwrap();
    assert_eq!(a, b);

    let listener: Arc<dyn MidiListener> = Arc::new(RawOnly::default());
    a.add_listener(Arc::clone(&listener));
    assert_ne!(a, b);
    let other: Arc<dyn MidiListener> = Arc::new(RawOnly::default());
    b.add_listener(Arc::clone(&other));
    assert_ne!(a, b, "a different listener object is not the same listener");

    b.remove_listener(&other);
    b.add_listener(listener);
    assert_eq!(a, b);
}

//! Listener capabilities.
//!
//! A listener registered on a bus may observe inbound traffic through any
//! subset of three capabilities: raw bytes, the simple channel-voice triple
//! (note-on, note-off, controller change) and the full typed message. The bus
//! asks each listener for every capability on every message and delivers to
//! whichever it exposes.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use midibus_msg::MidiMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

/// Receives the encoded bytes of every inbound message.
pub trait RawObserver: Send + Sync {
    fn on_raw(&self, bytes: &[u8]);
}

/// Receives note-on, note-off and controller-change messages as
/// `(channel, data1, data2)`. Other messages never reach this capability.
pub trait SimpleObserver: Send + Sync {
    fn on_note_on(&self, _channel: u8, _pitch: u8, _velocity: u8) {}

    fn on_note_off(&self, _channel: u8, _pitch: u8, _velocity: u8) {}

    fn on_controller_change(&self, _channel: u8, _number: u8, _value: u8) {}
}

/// Receives every inbound message in typed form alongside its bytes.
pub trait FullObserver: Send + Sync {
    fn on_message(&self, message: &MidiMessage, bytes: &[u8]);
}

/// An object registered with [`MidiBus::add_listener`](crate::MidiBus::add_listener).
///
/// Every accessor defaults to `None`; a listener overriding none of them is
/// registered but never called.
///
/// ```ignore
/// struct Monitor;
///
/// impl RawObserver for Monitor {
///     fn on_raw(&self, bytes: &[u8]) {
///         println!("{:02X?}", bytes);
///     }
/// }
///
/// impl MidiListener for Monitor {
///     fn as_raw(&self) -> Option<&dyn RawObserver> {
///         Some(self)
///     }
/// }
/// ```
pub trait MidiListener: Send + Sync {
    fn as_raw(&self) -> Option<&dyn RawObserver> {
        None
    }

    fn as_simple(&self) -> Option<&dyn SimpleObserver> {
        None
    }

    fn as_full(&self) -> Option<&dyn FullObserver> {
        None
    }
}

// ==================== Channel listener ====================

/// Forwards every inbound message into a bounded queue.
///
/// Never blocks the delivering thread: when the queue is full the message is
/// dropped and counted.
pub struct ChannelListener {
    sender: Sender<MidiMessage>,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Messages lost to a full (or disconnected) queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FullObserver for ChannelListener {
    fn on_message(&self, message: &MidiMessage, _bytes: &[u8]) {
        match self.sender.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Warn on the first loss only
                if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!("MIDI listener queue full, dropping messages");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl MidiListener for ChannelListener {
    fn as_full(&self) -> Option<&dyn FullObserver> {
        Some(self)
    }
}

pub fn midi_input_channel() -> (Arc<ChannelListener>, Receiver<MidiMessage>) {
    midi_input_channel_with_capacity(DEFAULT_CAPACITY)
}

pub fn midi_input_channel_with_capacity(
    capacity: usize,
) -> (Arc<ChannelListener>, Receiver<MidiMessage>) {
    let (sender, receiver) = bounded(capacity);
    (
        Arc::new(ChannelListener {
            sender,
            dropped: AtomicU64::new(0),
        }),
        receiver,
    )
}

//! Hardware MIDI devices via midir.
//!
//! midir exposes inputs and outputs as separate port lists, so every hardware
//! port becomes one descriptor with a single direction. Descriptor ids encode
//! the direction and the enumeration index (`in:3`, `out:0`). Opening re-checks
//! that the port at that index still carries the same name and makes a trial
//! connection, so enumeration reports busy ports as unavailable.
//!
//! Each connection is owned by a dedicated thread and driven over a channel.

use crossbeam_channel::{bounded, unbounded, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use super::{
    Descriptor, DeviceHandle, InboundCallback, MidiProvider, MidiReceiver, MidiSender, PortType,
};
use crate::error::{Error, Result};

const DEFAULT_CLIENT_NAME: &str = "midibus";

pub struct MidirProvider {
    client_name: String,
}

impl MidirProvider {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_client(&self) -> Result<MidiInput> {
        let mut input = MidiInput::new(&format!("{}-input", self.client_name))?;
        input.ignore(Ignore::None);
        Ok(input)
    }

    fn output_client(&self) -> Result<MidiOutput> {
        Ok(MidiOutput::new(&format!("{}-output", self.client_name))?)
    }
}

impl Default for MidirProvider {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_NAME)
    }
}

fn parse_id(descriptor: &Descriptor) -> Option<(PortType, usize)> {
    let (direction, index) = descriptor.id.split_once(':')?;
    let index = index.parse().ok()?;
    match direction {
        "in" => Some((PortType::Input, index)),
        "out" => Some((PortType::Output, index)),
        _ => None,
    }
}

impl MidiProvider for MidirProvider {
    fn descriptors(&self) -> Vec<Descriptor> {
        let mut descriptors = Vec::new();
        if let Ok(input) = self.input_client() {
            for (index, port) in input.ports().iter().enumerate() {
                let name = input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Input {}", index));
                descriptors.push(Descriptor::new(name, format!("in:{}", index)));
            }
        }
        if let Ok(output) = self.output_client() {
            for (index, port) in output.ports().iter().enumerate() {
                let name = output
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Output {}", index));
                descriptors.push(Descriptor::new(name, format!("out:{}", index)));
            }
        }
        descriptors
    }

    fn open(&self, descriptor: &Descriptor) -> Result<Box<dyn DeviceHandle>> {
        let (direction, index) =
            parse_id(descriptor).ok_or_else(|| Error::NotFound(descriptor.to_string()))?;

        // The port list may have changed since enumeration, and a listed port
        // can still be busy, so open only succeeds after a trial connection
        let trial_name = format!("{}-trial", self.client_name);
        let listed = |name: Option<String>| name.as_deref() == Some(descriptor.name.as_str());
        match direction {
            PortType::Input => {
                let input = self.input_client()?;
                let ports = input.ports();
                let port = ports
                    .get(index)
                    .filter(|p| listed(input.port_name(p).ok()))
                    .ok_or_else(|| Error::Unavailable(descriptor.name.clone()))?
                    .clone();
                input.connect(&port, &trial_name, |_, _, _| {}, ())?.close();
            }
            PortType::Output => {
                let output = self.output_client()?;
                let ports = output.ports();
                let port = ports
                    .get(index)
                    .filter(|p| listed(output.port_name(p).ok()))
                    .ok_or_else(|| Error::Unavailable(descriptor.name.clone()))?
                    .clone();
                output.connect(&port, &trial_name)?.close();
            }
        }

        Ok(Box::new(MidirHandle {
            client_name: self.client_name.clone(),
            descriptor: descriptor.clone(),
            direction,
            index,
            closed: false,
        }))
    }
}

struct MidirHandle {
    client_name: String,
    descriptor: Descriptor,
    direction: PortType,
    index: usize,
    closed: bool,
}

impl DeviceHandle for MidirHandle {
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn max_receivers(&self) -> usize {
        match self.direction {
            PortType::Output => 1,
            PortType::Input => 0,
        }
    }

    fn max_transmitters(&self) -> usize {
        match self.direction {
            PortType::Input => 1,
            PortType::Output => 0,
        }
    }

    fn sender(&mut self) -> Result<Box<dyn MidiSender>> {
        if self.closed || self.direction != PortType::Output {
            return Err(Error::Device(format!(
                "{} has no open send side",
                self.descriptor.name
            )));
        }
        Ok(Box::new(MidirSender::spawn(
            self.client_name.clone(),
            self.descriptor.clone(),
            self.index,
        )?))
    }

    fn receiver(&mut self) -> Result<Box<dyn MidiReceiver>> {
        if self.closed || self.direction != PortType::Input {
            return Err(Error::Device(format!(
                "{} has no open receive side",
                self.descriptor.name
            )));
        }
        Ok(Box::new(MidirReceiver {
            client_name: self.client_name.clone(),
            descriptor: self.descriptor.clone(),
            index: self.index,
            shutdown: None,
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn spawn_error(e: std::io::Error) -> Error {
    Error::Device(format!("Failed to spawn MIDI thread: {}", e))
}

fn thread_gone(name: &str) -> Error {
    Error::Device(format!("MIDI thread for {} exited", name))
}

// ==================== Output ====================

enum OutputCommand {
    Send(Vec<u8>),
    Shutdown,
}

/// midir connections live on their own thread; the sender only queues
/// commands to it.
struct MidirSender {
    name: String,
    commands: Sender<OutputCommand>,
    thread: Option<JoinHandle<()>>,
}

impl MidirSender {
    fn spawn(client_name: String, descriptor: Descriptor, index: usize) -> Result<Self> {
        let (command_sender, command_receiver) = unbounded();
        let (ready_sender, ready_receiver) = bounded::<Result<()>>(1);
        let name = descriptor.name.clone();

        let thread = thread::Builder::new()
            .name(format!("midibus-out-{}", index))
            .spawn(move || {
                let mut connection = match connect_output(&client_name, &descriptor, index) {
                    Ok(connection) => {
                        let _ = ready_sender.send(Ok(()));
                        connection
                    }
                    Err(e) => {
                        let _ = ready_sender.send(Err(e));
                        return;
                    }
                };
                while let Ok(command) = command_receiver.recv() {
                    match command {
                        OutputCommand::Send(bytes) => {
                            if let Err(e) = connection.send(&bytes) {
                                warn!("Failed to send to {}: {}", descriptor.name, e);
                            }
                        }
                        OutputCommand::Shutdown => break,
                    }
                }
                connection.close();
                debug!("Disconnected MIDI output {}", descriptor.name);
            })
            .map_err(spawn_error)?;

        ready_receiver.recv().map_err(|_| thread_gone(&name))??;
        Ok(Self {
            name,
            commands: command_sender,
            thread: Some(thread),
        })
    }
}

fn connect_output(
    client_name: &str,
    descriptor: &Descriptor,
    index: usize,
) -> Result<MidiOutputConnection> {
    let output = MidirProvider::new(client_name).output_client()?;
    let ports = output.ports();
    let port = ports
        .get(index)
        .ok_or_else(|| Error::Unavailable(descriptor.name.clone()))?;
    let connection = output.connect(port, &format!("{}-out", client_name))?;
    debug!("Connected MIDI output {}", descriptor.name);
    Ok(connection)
}

impl MidiSender for MidirSender {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::Device(format!("{} is closed", self.name)));
        }
        self.commands
            .send(OutputCommand::Send(bytes.to_vec()))
            .map_err(|_| thread_gone(&self.name))
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(OutputCommand::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for MidirSender {
    fn drop(&mut self) {
        self.close();
    }
}

// ==================== Input ====================

struct MidirReceiver {
    client_name: String,
    descriptor: Descriptor,
    index: usize,
    shutdown: Option<Sender<()>>,
}

fn connect_input(
    client_name: &str,
    descriptor: &Descriptor,
    index: usize,
    callback: InboundCallback,
) -> Result<MidiInputConnection<()>> {
    let input = MidirProvider::new(client_name).input_client()?;
    let ports = input.ports();
    let port = ports
        .get(index)
        .ok_or_else(|| Error::Unavailable(descriptor.name.clone()))?;
    let connection = input.connect(
        port,
        &format!("{}-in", client_name),
        move |timestamp, message, _| callback(message, Some(timestamp)),
        (),
    )?;
    debug!("Connected MIDI input {}", descriptor.name);
    Ok(connection)
}

impl MidiReceiver for MidirReceiver {
    fn set_callback(&mut self, callback: InboundCallback) -> Result<()> {
        self.close();

        let (shutdown_sender, shutdown_receiver) = bounded::<()>(1);
        let (ready_sender, ready_receiver) = bounded::<Result<()>>(1);
        let client_name = self.client_name.clone();
        let descriptor = self.descriptor.clone();
        let index = self.index;

        thread::Builder::new()
            .name(format!("midibus-in-{}", index))
            .spawn(move || {
                let connection = match connect_input(&client_name, &descriptor, index, callback)
                {
                    Ok(connection) => {
                        let _ = ready_sender.send(Ok(()));
                        connection
                    }
                    Err(e) => {
                        let _ = ready_sender.send(Err(e));
                        return;
                    }
                };
                // Held until shutdown is requested or the receiver is dropped
                let _ = shutdown_receiver.recv();
                connection.close();
                debug!("Disconnected MIDI input {}", descriptor.name);
            })
            .map_err(spawn_error)?;

        ready_receiver
            .recv()
            .map_err(|_| thread_gone(&self.descriptor.name))??;
        self.shutdown = Some(shutdown_sender);
        Ok(())
    }

    /// Not joined: the disconnect may wait on a midir callback that is itself
    /// calling back into the bus.
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

//! Attached inputs and outputs of one bus.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::endpoint::{InputEndpoint, OutputEndpoint};
use crate::enumeration;
use crate::error::{Error, Result};
use crate::provider::{Descriptor, InboundCallback, MidiProvider, PortType};

/// Picks a device for attach or detach.
///
/// For attach, an index counts into the currently available devices of the
/// matching direction and a name picks the first available device carrying
/// it. For detach, both refer to the attached list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
    Descriptor(Descriptor),
}

impl From<usize> for DeviceSelector {
    fn from(index: usize) -> Self {
        DeviceSelector::Index(index)
    }
}

impl From<&str> for DeviceSelector {
    fn from(name: &str) -> Self {
        DeviceSelector::Name(name.to_string())
    }
}

impl From<String> for DeviceSelector {
    fn from(name: String) -> Self {
        DeviceSelector::Name(name)
    }
}

impl From<Descriptor> for DeviceSelector {
    fn from(descriptor: Descriptor) -> Self {
        DeviceSelector::Descriptor(descriptor)
    }
}

impl From<&Descriptor> for DeviceSelector {
    fn from(descriptor: &Descriptor) -> Self {
        DeviceSelector::Descriptor(descriptor.clone())
    }
}

fn not_found(selector: &DeviceSelector, direction: PortType, attached: bool) -> Error {
    let scope = if attached { "attached" } else { "available" };
    Error::NotFound(match selector {
        DeviceSelector::Index(index) => format!("no {} {} at index {}", scope, direction, index),
        DeviceSelector::Name(name) if name.is_empty() => format!("empty {} name", direction),
        DeviceSelector::Name(name) => format!("no {} {} named \"{}\"", scope, direction, name),
        DeviceSelector::Descriptor(d) => format!("no {} {} \"{}\"", scope, direction, d.name),
    })
}

pub(crate) struct BusRegistry {
    provider: Arc<dyn MidiProvider>,
    inputs: Mutex<Vec<InputEndpoint>>,
    outputs: ArcSwap<Vec<Arc<OutputEndpoint>>>,
    output_control: Mutex<()>,
    /// Written only while both `inputs` and `output_control` are held, so an
    /// attach that checks it under either lock cannot outlive a close.
    closed: AtomicBool,
}

impl BusRegistry {
    pub(crate) fn new(provider: Arc<dyn MidiProvider>) -> Self {
        Self {
            provider,
            inputs: Mutex::new(Vec::new()),
            outputs: ArcSwap::from_pointee(Vec::new()),
            output_control: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn MidiProvider> {
        &self.provider
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Reject further attaches, then release everything attached. Returns the
    /// released input and output counts, or `None` if already closed.
    pub(crate) fn close(&self) -> Option<(usize, usize)> {
        {
            let _inputs = self.inputs.lock();
            let _outputs = self.output_control.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return None;
            }
        }
        Some((self.clear_inputs(), self.clear_outputs()))
    }

    fn resolve_available(
        &self,
        selector: &DeviceSelector,
        direction: PortType,
    ) -> Result<Descriptor> {
        let candidates = || match direction {
            PortType::Input => enumeration::available_inputs(self.provider.as_ref()),
            PortType::Output => enumeration::available_outputs(self.provider.as_ref()),
        };
        let found = match selector {
            DeviceSelector::Index(index) => candidates().into_iter().nth(*index),
            DeviceSelector::Name(name) if name.is_empty() => None,
            DeviceSelector::Name(name) => candidates().into_iter().find(|d| &d.name == name),
            DeviceSelector::Descriptor(descriptor) => Some(descriptor.clone()),
        };
        found.ok_or_else(|| not_found(selector, direction, false))
    }

    // ==================== Inputs ====================

    pub(crate) fn add_input(
        &self,
        selector: &DeviceSelector,
        callback: InboundCallback,
    ) -> Result<Descriptor> {
        let descriptor = self.resolve_available(selector, PortType::Input)?;

        let mut inputs = self.inputs.lock();
        self.ensure_open()?;
        if inputs.iter().any(|e| e.descriptor() == &descriptor) {
            return Err(Error::AlreadyAttached(descriptor.name));
        }
        let endpoint = InputEndpoint::open(self.provider.as_ref(), &descriptor, callback)?;
        inputs.push(endpoint);
        Ok(descriptor)
    }

    pub(crate) fn remove_input(&self, selector: &DeviceSelector) -> Result<Descriptor> {
        let mut removed = {
            let mut inputs = self.inputs.lock();
            let position = match selector {
                DeviceSelector::Index(index) => Some(*index).filter(|i| *i < inputs.len()),
                DeviceSelector::Name(name) => inputs.iter().position(|e| e.name() == name),
                DeviceSelector::Descriptor(d) => inputs.iter().position(|e| e.descriptor() == d),
            };
            let position = position.ok_or_else(|| not_found(selector, PortType::Input, true))?;
            inputs.remove(position)
        };
        // Closed outside the lock: a backend may wait for its callback thread
        removed.close();
        Ok(removed.descriptor().clone())
    }

    pub(crate) fn clear_inputs(&self) -> usize {
        let removed = std::mem::take(&mut *self.inputs.lock());
        let count = removed.len();
        for mut endpoint in removed {
            endpoint.close();
        }
        count
    }

    pub(crate) fn input_descriptors(&self) -> Vec<Descriptor> {
        self.inputs
            .lock()
            .iter()
            .map(|e| e.descriptor().clone())
            .collect()
    }

    pub(crate) fn input_count(&self) -> usize {
        self.inputs.lock().len()
    }

    // ==================== Outputs ====================

    pub(crate) fn add_output(&self, selector: &DeviceSelector) -> Result<Descriptor> {
        let descriptor = self.resolve_available(selector, PortType::Output)?;

        let _guard = self.output_control.lock();
        self.ensure_open()?;
        let current = self.outputs.load_full();
        if current.iter().any(|e| e.descriptor() == &descriptor) {
            return Err(Error::AlreadyAttached(descriptor.name));
        }
        let endpoint = OutputEndpoint::open(self.provider.as_ref(), &descriptor)?;

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(endpoint));
        self.outputs.store(Arc::new(next));
        Ok(descriptor)
    }

    pub(crate) fn remove_output(&self, selector: &DeviceSelector) -> Result<Descriptor> {
        let removed = {
            let _guard = self.output_control.lock();
            let current = self.outputs.load_full();
            let position = match selector {
                DeviceSelector::Index(index) => Some(*index).filter(|i| *i < current.len()),
                DeviceSelector::Name(name) => current.iter().position(|e| e.name() == name),
                DeviceSelector::Descriptor(d) => current.iter().position(|e| e.descriptor() == d),
            };
            let position =
                position.ok_or_else(|| not_found(selector, PortType::Output, true))?;
            let mut next: Vec<_> = current.iter().cloned().collect();
            let removed = next.remove(position);
            self.outputs.store(Arc::new(next));
            removed
        };
        removed.close();
        Ok(removed.descriptor().clone())
    }

    pub(crate) fn clear_outputs(&self) -> usize {
        let removed = {
            let _guard = self.output_control.lock();
            self.outputs.swap(Arc::new(Vec::new()))
        };
        for endpoint in removed.iter() {
            endpoint.close();
        }
        removed.len()
    }

    pub(crate) fn output_descriptors(&self) -> Vec<Descriptor> {
        self.outputs
            .load()
            .iter()
            .map(|e| e.descriptor().clone())
            .collect()
    }

    pub(crate) fn output_count(&self) -> usize {
        self.outputs.load().len()
    }

    /// Send `bytes` to every attached output in attach order. Returns how many
    /// outputs accepted them; failures are logged and skipped.
    pub(crate) fn broadcast(&self, bytes: &[u8]) -> usize {
        let outputs = self.outputs.load_full();
        let mut delivered = 0;
        for output in outputs.iter() {
            match output.send(bytes) {
                Ok(true) => delivered += 1,
                Ok(false) => debug!("Skipping closed output {}", output.name()),
                Err(e) => warn!("Failed to send to {}: {}", output.name(), e),
            }
        }
        delivered
    }
}

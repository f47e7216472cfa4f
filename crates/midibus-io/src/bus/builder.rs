//! MidiBus builder.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "midi-io")]
use crate::provider::MidirProvider;
#[cfg(not(feature = "midi-io"))]
use crate::provider::VirtualMidiProvider;

use super::MidiBus;
use crate::error::{Error, Result};
use crate::host::HostBindings;
use crate::provider::MidiProvider;

/// `MidiBus_` plus the wall clock in milliseconds, mod 10^8, zero padded.
pub(crate) fn generated_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("MidiBus_{:08}", millis % 100_000_000)
}

#[cfg(feature = "midi-io")]
fn default_provider() -> Arc<dyn MidiProvider> {
    Arc::new(MidirProvider::default())
}

#[cfg(not(feature = "midi-io"))]
fn default_provider() -> Arc<dyn MidiProvider> {
    Arc::new(VirtualMidiProvider::new())
}

#[derive(Default)]
pub struct MidiBusBuilder {
    name: Option<String>,
    provider: Option<Arc<dyn MidiProvider>>,
    host: HostBindings,
}

impl MidiBusBuilder {
    /// Without a name the bus gets a generated `MidiBus_XXXXXXXX` one.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Device backend. Defaults to hardware ports via midir when the
    /// `midi-io` feature is enabled, otherwise to an empty virtual provider.
    pub fn provider(mut self, provider: impl MidiProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn shared_provider(mut self, provider: Arc<dyn MidiProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Host callbacks. Fixed for the lifetime of the bus.
    pub fn host(mut self, host: HostBindings) -> Self {
        self.host = host;
        self
    }

    pub fn build(self) -> Result<MidiBus> {
        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(Error::InvalidConfig(
                    "bus name must not be empty".to_string(),
                ))
            }
            Some(name) => name,
            None => generated_name(),
        };
        let provider = self.provider.unwrap_or_else(default_provider);
        Ok(MidiBus::from_parts(name, provider, self.host))
    }
}

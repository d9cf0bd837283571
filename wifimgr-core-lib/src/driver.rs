//! The seam between the connection manager and the lower layers.
//!
//! The firmware driver and IP stack live behind `DriverPort`: the manager
//! submits commands, the port posts `DriverEvent`s back through an
//! `EventSink`. Key handling lives behind `Supplicant` so builds with an
//! embedded supplicant and builds that offload keys to the firmware share
//! one call surface.

use std::sync::Arc;

use crate::bss::ChannelList;
use crate::error::WifiError;
use crate::events::{DriverCommand, DriverEvent};
use crate::profile::NetworkProfile;

/// Where a driver delivers its events. Cheap to clone; posting never blocks
/// the caller beyond a queue push.
#[derive(Clone)]
pub struct EventSink {
    post: Arc<dyn Fn(DriverEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(post: impl Fn(DriverEvent) + Send + Sync + 'static) -> Self {
        Self {
            post: Arc::new(post),
        }
    }

    pub fn post(&self, event: DriverEvent) {
        (self.post)(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

/// Command/event interface of the Wi-Fi firmware driver plus the IP stack
/// shim. Implementations own their bus and interrupt plumbing; the manager
/// only ever sees owned event values.
pub trait DriverPort: Send {
    /// Load firmware and begin delivering events into `sink`. The port is
    /// expected to report MAC addresses and `InterfaceConfig` as part of
    /// bring-up.
    fn start(&mut self, sink: EventSink) -> Result<(), WifiError>;

    /// Queue one command. The driver serializes execution internally.
    fn submit(&mut self, cmd: DriverCommand) -> Result<(), WifiError>;

    /// A bus transfer is currently in flight; sleep confirm must wait.
    fn outstanding_transfer(&self) -> bool {
        false
    }

    /// Channels permitted by the current regulatory domain (11d). Empty
    /// means no restriction has been learned.
    fn allowed_channels(&self) -> ChannelList {
        ChannelList::new()
    }
}

/// Key-management backend. `configure` is called before each association
/// attempt with the profile as matched; `deconfigure` on disconnect.
pub trait Supplicant: Send {
    fn add_profile(&mut self, profile: &NetworkProfile) -> Result<(), WifiError>;
    fn remove_profile(&mut self, name: &str) -> Result<(), WifiError>;
    fn configure(&mut self, profile: &NetworkProfile) -> Result<(), WifiError>;
    fn deconfigure(&mut self) -> Result<(), WifiError>;
}

/// Backend for firmware-offloaded key handling: the PSK/password rides on
/// the association command, so every call is a successful no-op.
#[derive(Debug, Default)]
pub struct FirmwareSupplicant;

impl Supplicant for FirmwareSupplicant {
    fn add_profile(&mut self, _profile: &NetworkProfile) -> Result<(), WifiError> {
        Ok(())
    }

    fn remove_profile(&mut self, _name: &str) -> Result<(), WifiError> {
        Ok(())
    }

    fn configure(&mut self, _profile: &NetworkProfile) -> Result<(), WifiError> {
        Ok(())
    }

    fn deconfigure(&mut self) -> Result<(), WifiError> {
        Ok(())
    }
}

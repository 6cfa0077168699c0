//! Channel manager
//!
//! Owns every named channel, the shared message registry, and the event bus
//! that channels publish to. The host drives all channels from one place with
//! [`ChannelManager::update`].

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::event::{ChannelEvent, EventBus};
use crate::registry::MessageRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Registry of named channels sharing one message registry and event bus
pub struct ChannelManager {
    channels: DashMap<String, Channel>,
    registry: Arc<MessageRegistry>,
    events: Arc<EventBus>,
    runtime: Handle,
    focus_heartbeat: AtomicBool,
}

impl ChannelManager {
    /// Create a manager bound to the current tokio runtime
    pub fn new(registry: Arc<MessageRegistry>) -> Result<Self, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        Ok(Self::with_runtime(registry, runtime))
    }

    /// Create a manager that spawns its I/O tasks on `runtime`
    pub fn with_runtime(registry: Arc<MessageRegistry>, runtime: Handle) -> Self {
        info!("Channel manager created with {} message types", registry.len());
        Self {
            channels: DashMap::new(),
            registry,
            events: Arc::new(EventBus::new()),
            runtime,
            focus_heartbeat: AtomicBool::new(true),
        }
    }

    /// Receive events from every channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Shared message registry
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Create a channel; names are unique
    pub fn create_channel(
        &self,
        name: impl Into<String>,
        config: ChannelConfig,
    ) -> Result<Channel, ChannelError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ChannelError::InvalidName);
        }
        config.validate()?;

        match self.channels.entry(name.clone()) {
            Entry::Occupied(_) => Err(ChannelError::DuplicateChannel(name)),
            Entry::Vacant(slot) => {
                let channel = Channel::new(
                    name.clone(),
                    config,
                    Arc::clone(&self.registry),
                    Arc::clone(&self.events),
                    self.runtime.clone(),
                )?;
                if !self.focus_heartbeat.load(Ordering::Acquire) {
                    channel.set_focus_heartbeat(false);
                }
                slot.insert(channel.clone());
                debug!(channel = %name, "Channel created");
                Ok(channel)
            }
        }
    }

    /// Shut down and forget a channel; false if unknown
    pub fn destroy_channel(&self, name: &str) -> bool {
        match self.channels.remove(name) {
            Some((_, channel)) => {
                channel.shutdown();
                debug!(channel = %name, "Channel destroyed");
                true
            }
            None => false,
        }
    }

    /// Channel handle by name
    pub fn get_channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    /// Whether a channel named `name` exists
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Names of all channels, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// No channels registered
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Tick every channel by `delta`
    pub fn update(&self, delta: Duration) {
        // Snapshot so handlers may create or destroy channels while running
        let channels: Vec<Channel> = self.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.update(delta);
        }
    }

    /// Pause or resume heartbeat sends on every channel, including future ones
    pub fn set_focus_heartbeat(&self, focus: bool) {
        self.focus_heartbeat.store(focus, Ordering::Release);
        for entry in self.channels.iter() {
            entry.value().set_focus_heartbeat(focus);
        }
    }

    /// Shut down and drop every channel
    pub fn shutdown(&self) {
        let names = self.channel_names();
        for name in &names {
            self.destroy_channel(name);
        }
        info!("Channel manager shut down ({} channels)", names.len());
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channel_names())
            .field("registry", &self.registry)
            .finish()
    }
}

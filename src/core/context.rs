//! Shared state behind every object of one Bluetooth context

use std::sync::Arc;

use crate::{
    adapter::{AdapterRegistry, BleAdapter},
    core::{error::BluetoothResult, notification::NotificationRouter},
};

/// Adapter registry and notification router shared by one context
///
/// Each entity (device, service, ...) holds an `Arc` to the context it was
/// created from instead of reaching for global state.
#[derive(Debug)]
pub struct Context<A: BleAdapter> {
    adapters: AdapterRegistry<A>,
    notifications: NotificationRouter,
}

impl<A: BleAdapter> Context<A> {
    pub fn new() -> Self {
        Self {
            adapters: AdapterRegistry::new(),
            notifications: NotificationRouter::new(),
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry<A> {
        &self.adapters
    }

    pub fn notifications(&self) -> &NotificationRouter {
        &self.notifications
    }

    /// The active adapter
    pub async fn adapter(&self) -> BluetoothResult<Arc<A>> {
        self.adapters.active().await
    }
}

impl<A: BleAdapter> Default for Context<A> {
    fn default() -> Self {
        Self::new()
    }
}

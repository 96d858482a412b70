//! Active adapter registry

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    adapter::BleAdapter,
    core::error::{BluetoothError, BluetoothResult},
};

#[derive(Debug)]
struct RegisteredAdapter<A> {
    name: String,
    adapter: Arc<A>,
}

/// Holds the single active adapter
///
/// Registering a new adapter replaces the previous one; there is no way to
/// pick among registered adapters per call.
#[derive(Debug)]
pub struct AdapterRegistry<A: BleAdapter> {
    active: RwLock<Option<RegisteredAdapter<A>>>,
}

impl<A: BleAdapter> AdapterRegistry<A> {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Initialise `adapter` and make it the active one
    ///
    /// If initialisation fails the previously active adapter stays in place.
    pub async fn register(&self, name: impl Into<String>, adapter: A) -> BluetoothResult<()> {
        let name = name.into();
        adapter
            .init()
            .await
            .map_err(BluetoothError::adapter("register_adapter"))?;

        let previous = self.active.write().await.replace(RegisteredAdapter {
            name: name.clone(),
            adapter: Arc::new(adapter),
        });
        if let Some(previous) = previous {
            warn!("Adapter '{}' replaced by '{}'", previous.name, name);
        }
        info!("Adapter '{}' registered and active", name);
        Ok(())
    }

    /// The active adapter, or [`BluetoothError::NoAdapter`]
    pub async fn active(&self) -> BluetoothResult<Arc<A>> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|registered| registered.adapter.clone())
            .ok_or(BluetoothError::NoAdapter)
    }

    pub async fn active_name(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|registered| registered.name.clone())
    }
}

impl<A: BleAdapter> Default for AdapterRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapter::MockAdapter, core::error::AdapterError};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_no_adapter_before_registration() {
        let registry: AdapterRegistry<MockAdapter> = AdapterRegistry::new();
        assert_eq!(registry.active().await.err(), Some(BluetoothError::NoAdapter));
        assert_eq!(registry.active_name().await, None);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = AdapterRegistry::new();
        registry.register("first", MockAdapter::new()).await.unwrap();
        registry.register("second", MockAdapter::new()).await.unwrap();

        assert_eq!(registry.active_name().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_failed_init_keeps_previous() {
        let registry = AdapterRegistry::new();
        registry.register("working", MockAdapter::new()).await.unwrap();

        let broken = MockAdapter::new();
        broken.set_init_failure(true).await;
        let err = assert_err!(registry.register("broken", broken).await);

        assert_eq!(
            err,
            BluetoothError::Adapter {
                operation: "register_adapter",
                source: AdapterError::NotEnabled,
            }
        );
        assert_eq!(registry.active_name().await.as_deref(), Some("working"));
    }
}

//! GATT server of a connected device

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    adapter::BleAdapter,
    core::{
        context::Context,
        error::{AttributeKind, BluetoothError, BluetoothResult},
        types::Handle,
        uuids::{AttributeId, CanonicalUuid},
    },
    gatt::{Device, Service, device::DeviceInner, ensure_found, requested_uuid, uuid_filter},
};

struct ServerInner<A: BleAdapter> {
    context: Arc<Context<A>>,
    device: Weak<DeviceInner<A>>,
    device_handle: Handle,
    connected: Arc<AtomicBool>,
    services: RwLock<Vec<Service<A>>>,
}

/// Entry point for service discovery on a connected device
pub struct GattServer<A: BleAdapter> {
    inner: Arc<ServerInner<A>>,
}

impl<A: BleAdapter> GattServer<A> {
    pub(crate) fn new(
        context: Arc<Context<A>>,
        device: Weak<DeviceInner<A>>,
        device_handle: Handle,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                context,
                device,
                device_handle,
                connected,
                services: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The owning device, if it is still alive
    pub fn device(&self) -> Option<Device<A>> {
        self.inner.device.upgrade().map(Device::from_inner)
    }

    /// Whether both values are the same server
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Services handed out so far, one per UUID
    pub async fn cached_services(&self) -> Vec<Service<A>> {
        self.inner.services.read().await.clone()
    }

    /// Drop the link to the device
    ///
    /// `connected` turns false before the adapter is asked, and calling this
    /// on a disconnected server is allowed.
    pub async fn disconnect(&self) -> BluetoothResult<()> {
        let adapter = self.inner.context.adapter().await?;
        self.inner.connected.store(false, Ordering::SeqCst);
        adapter
            .disconnect(&self.inner.device_handle)
            .await
            .map_err(BluetoothError::adapter("disconnect"))?;
        info!("Disconnected from {}", self.inner.device_handle);
        Ok(())
    }

    pub async fn get_primary_service(&self, service: impl Into<AttributeId>) -> BluetoothResult<Service<A>> {
        const OPERATION: &str = "get_primary_service";

        let uuid = requested_uuid(service.into(), OPERATION, AttributeKind::Service)?;
        let mut services = self.discover(OPERATION, &[uuid]).await?;
        if services.is_empty() {
            return Err(BluetoothError::NotFound {
                operation: OPERATION,
                kind: AttributeKind::Service,
            });
        }
        Ok(services.swap_remove(0))
    }

    /// All primary services, or those matching `service`
    pub async fn get_primary_services(&self, service: Option<AttributeId>) -> BluetoothResult<Vec<Service<A>>> {
        const OPERATION: &str = "get_primary_services";

        let filter = uuid_filter(service, AttributeKind::Service)?;
        let services = self.discover(OPERATION, &filter).await?;
        ensure_found(services, &filter, OPERATION, AttributeKind::Service)
    }

    async fn discover(
        &self,
        operation: &'static str,
        filter: &[CanonicalUuid],
    ) -> BluetoothResult<Vec<Service<A>>> {
        let adapter = self.inner.context.adapter().await?;
        let records = adapter
            .discover_services(&self.inner.device_handle, filter)
            .await
            .map_err(BluetoothError::adapter(operation))?;
        debug!(
            "{}: {} service(s) on {}",
            operation,
            records.len(),
            self.inner.device_handle
        );

        let services = records
            .into_iter()
            .map(|record| {
                Service::from_record(self.inner.context.clone(), self.inner.device.clone(), record)
            })
            .collect::<BluetoothResult<Vec<_>>>()?;

        let mut cached = self.inner.services.write().await;
        for service in &services {
            if !cached.iter().any(|known| known.uuid() == service.uuid()) {
                cached.push(service.clone());
            }
        }
        Ok(services)
    }
}

impl<A: BleAdapter> Clone for GattServer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> fmt::Debug for GattServer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattServer")
            .field("device", &self.inner.device_handle)
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{MockAdapter, MockCharacteristic, MockPeripheral, MockService},
        core::error::AdapterError,
    };
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn uuid(alias: u32) -> CanonicalUuid {
        CanonicalUuid::from_alias(alias)
    }

    async fn connected(adapter: &MockAdapter) -> (Device<MockAdapter>, GattServer<MockAdapter>) {
        adapter
            .add_peripheral(
                MockPeripheral::new("aa:aa")
                    .service(
                        MockService::primary(uuid(0x180d))
                            .characteristic(MockCharacteristic::new(uuid(0x2a37), &["notify"])),
                    )
                    .service(MockService::primary(uuid(0x180f)))
                    .service(MockService::secondary(uuid(0x1801))),
            )
            .await;
        let context = Arc::new(Context::new());
        context
            .adapters()
            .register("mock", adapter.clone())
            .await
            .unwrap();
        let mut scan = adapter.start_scan(&[]).await.unwrap();
        let device = Device::from_record(context, scan.recv().await.unwrap());
        let server = device.connect_gatt().await.unwrap();
        (device, server)
    }

    #[tokio::test]
    async fn test_get_primary_service() {
        let adapter = MockAdapter::new();
        let (device, server) = connected(&adapter).await;

        let service = assert_ok!(server.get_primary_service("heart_rate").await);

        assert_eq!(service.uuid().to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
        assert!(service.is_primary());
        assert_eq!(service.device(), Some(device.clone()));
        assert_eq!(server.device().map(|d| d.id().to_string()), Some("aa:aa".into()));
    }

    #[tokio::test]
    async fn test_unknown_service_not_found() {
        let adapter = MockAdapter::new();
        let (_device, server) = connected(&adapter).await;

        let err = assert_err!(
            server
                .get_primary_service("0000aaaa-0000-1000-8000-00805f9b34fb")
                .await
        );
        assert_eq!(err.to_string(), "get_primary_service error: service not found");

        let err = assert_err!(server.get_primary_services(Some(0xaaaau16.into())).await);
        assert_eq!(
            err,
            BluetoothError::NotFound {
                operation: "get_primary_services",
                kind: AttributeKind::Service,
            }
        );
    }

    #[tokio::test]
    async fn test_all_primary_services() {
        let adapter = MockAdapter::new();
        let (_device, server) = connected(&adapter).await;

        let services = assert_ok!(server.get_primary_services(None).await);

        let uuids: Vec<_> = services.iter().map(|s| *s.uuid()).collect();
        assert_eq!(uuids, vec![uuid(0x180d), uuid(0x180f)]);
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let adapter = MockAdapter::new();
        let (_device, server) = connected(&adapter).await;

        let err = assert_err!(server.get_primary_service("").await);
        assert_eq!(err.to_string(), "get_primary_service error: no service specified");
    }

    #[tokio::test]
    async fn test_cached_services_deduplicated() {
        let adapter = MockAdapter::new();
        let (_device, server) = connected(&adapter).await;

        server.get_primary_service("heart_rate").await.unwrap();
        server.get_primary_service(0x180du16).await.unwrap();
        server.get_primary_services(None).await.unwrap();

        let cached: Vec<_> = server
            .cached_services()
            .await
            .iter()
            .map(|s| *s.uuid())
            .collect();
        assert_eq!(cached, vec![uuid(0x180d), uuid(0x180f)]);
        assert_eq!(adapter.cached_service_count().await, 2);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_prefixed() {
        let adapter = MockAdapter::new();
        let (_device, server) = connected(&adapter).await;
        adapter.set_discovery_failure(true).await;

        let err = assert_err!(server.get_primary_services(None).await);
        assert_eq!(
            err,
            BluetoothError::Adapter {
                operation: "get_primary_services",
                source: AdapterError::Native("Mock discovery failure".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = MockAdapter::new();
        let (device, server) = connected(&adapter).await;

        assert_ok!(server.disconnect().await);
        assert!(!server.connected());
        assert_ok!(server.disconnect().await);
        assert!(!device.gatt_server().await.unwrap().connected());
    }
}

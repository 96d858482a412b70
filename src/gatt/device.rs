//! Remote device

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    adapter::{BleAdapter, DisconnectHandler},
    core::{
        context::Context,
        error::{BluetoothError, BluetoothResult},
        types::{AdvertisementData, DeviceRecord, Handle, VendorInfo},
        uuids::CanonicalUuid,
    },
    gatt::GattServer,
};

pub(crate) struct DeviceInner<A: BleAdapter> {
    pub(crate) context: Arc<Context<A>>,
    pub(crate) handle: Handle,
    id: String,
    name: Option<String>,
    uuids: Vec<CanonicalUuid>,
    ad_data: AdvertisementData,
    paired: bool,
    device_class: Option<u32>,
    vendor: Option<VendorInfo>,
    gatt_server: RwLock<Option<GattServer<A>>>,
}

/// A device returned by `request_device` / `request_devices`
pub struct Device<A: BleAdapter> {
    inner: Arc<DeviceInner<A>>,
}

impl<A: BleAdapter> Device<A> {
    pub(crate) fn from_record(context: Arc<Context<A>>, record: DeviceRecord) -> Self {
        let uuids = record
            .uuids
            .iter()
            .filter_map(|raw| match CanonicalUuid::parse(raw) {
                Ok(uuid) => Some(uuid),
                Err(e) => {
                    debug!("Device {}: skipping advertised UUID: {}", record.id, e);
                    None
                }
            })
            .collect();

        Self {
            inner: Arc::new(DeviceInner {
                context,
                handle: record.handle,
                id: record.id,
                name: record.name,
                uuids,
                ad_data: record.ad_data.into(),
                paired: record.paired,
                device_class: record.device_class,
                vendor: record.vendor,
                gatt_server: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DeviceInner<A>>) -> Self {
        Self { inner }
    }

    /// Adapter-specific identity (a MAC address on BlueZ)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Advertised service UUIDs
    pub fn uuids(&self) -> &[CanonicalUuid] {
        &self.inner.uuids
    }

    pub fn ad_data(&self) -> &AdvertisementData {
        &self.inner.ad_data
    }

    pub fn paired(&self) -> bool {
        self.inner.paired
    }

    pub fn device_class(&self) -> Option<u32> {
        self.inner.device_class
    }

    pub fn appearance(&self) -> Option<u16> {
        self.inner.ad_data.appearance
    }

    pub fn vendor(&self) -> Option<&VendorInfo> {
        self.inner.vendor.as_ref()
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Server of the last successful `connect_gatt`
    pub async fn gatt_server(&self) -> Option<GattServer<A>> {
        self.inner.gatt_server.read().await.clone()
    }

    /// Connect and build a fresh GATT server
    ///
    /// When the adapter later reports the link dropping, the returned server
    /// flips to disconnected. A failed connect leaves the previous server in
    /// place.
    pub async fn connect_gatt(&self) -> BluetoothResult<GattServer<A>> {
        let adapter = self.inner.context.adapter().await?;
        debug!("Connecting to {}", self.inner.id);

        let connected = Arc::new(AtomicBool::new(true));
        let link = connected.clone();
        let id = self.inner.id.clone();
        let on_disconnect: DisconnectHandler = Box::new(move || {
            link.store(false, Ordering::SeqCst);
            info!("Device {} disconnected", id);
        });

        adapter
            .connect(&self.inner.handle, on_disconnect)
            .await
            .map_err(BluetoothError::Connection)?;

        let server = GattServer::new(
            self.inner.context.clone(),
            Arc::downgrade(&self.inner),
            self.inner.handle.clone(),
            connected,
        );
        *self.inner.gatt_server.write().await = Some(server.clone());
        info!("Connected to {}", self.inner.id);
        Ok(server)
    }
}

impl<A: BleAdapter> Clone for Device<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> fmt::Debug for Device<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("uuids", &self.inner.uuids)
            .finish_non_exhaustive()
    }
}

impl<A: BleAdapter> PartialEq for Device<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::MockAdapter,
        core::{error::AdapterError, types::AdvertisementRecord},
    };
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    async fn device(adapter: &MockAdapter) -> Device<MockAdapter> {
        let context = Arc::new(Context::new());
        context
            .adapters()
            .register("mock", adapter.clone())
            .await
            .unwrap();
        // Scanning registers the device handle with the mock
        let mut scan = adapter.start_scan(&[]).await.unwrap();
        let record = scan.recv().await.unwrap();
        adapter.stop_scan().await.unwrap();
        Device::from_record(context, record)
    }

    #[test]
    fn test_from_record_canonicalizes() {
        let mut record = DeviceRecord::new(Handle::from("aa"), "aa");
        record.uuids = vec!["180D".into(), "garbage".into()];
        record.ad_data = AdvertisementRecord {
            appearance: Some(0x0341),
            service_data: [("180f".to_string(), vec![0x64])].into(),
            ..Default::default()
        };

        let device: Device<MockAdapter> = Device::from_record(Arc::new(Context::new()), record);

        assert_eq!(device.uuids(), &[CanonicalUuid::from_alias(0x180d)]);
        assert_eq!(device.appearance(), Some(0x0341));
        assert_eq!(
            device.ad_data().service_data.get(&CanonicalUuid::from_alias(0x180f)),
            Some(&vec![0x64])
        );
    }

    #[tokio::test]
    async fn test_connect_and_remote_disconnect() {
        let adapter = MockAdapter::new();
        adapter
            .add_peripheral(crate::adapter::MockPeripheral::new("aa:aa"))
            .await;
        let device = device(&adapter).await;
        assert!(device.gatt_server().await.is_none());

        let server = assert_ok!(device.connect_gatt().await);
        assert!(server.connected());

        adapter.simulate_disconnect(device.handle()).await;

        // Same server object, now disconnected
        assert!(!server.connected());
        let current = device.gatt_server().await.unwrap();
        assert!(!current.connected());
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_previous_server() {
        let adapter = MockAdapter::new();
        adapter
            .add_peripheral(crate::adapter::MockPeripheral::new("aa:aa"))
            .await;
        let device = device(&adapter).await;
        let first = device.connect_gatt().await.unwrap();

        adapter.set_connect_failure(true).await;
        let err = assert_err!(device.connect_gatt().await);

        assert_eq!(
            err,
            BluetoothError::Connection(AdapterError::Native("Mock connect failure".into()))
        );
        assert!(err.to_string().starts_with("connect_gatt error: "));
        assert!(device.gatt_server().await.unwrap().ptr_eq(&first));
    }

    #[tokio::test]
    async fn test_reconnect_disconnects_previous_server() {
        let adapter = MockAdapter::new();
        adapter
            .add_peripheral(crate::adapter::MockPeripheral::new("aa:aa"))
            .await;
        let device = device(&adapter).await;
        let first = device.connect_gatt().await.unwrap();

        let second = assert_ok!(device.connect_gatt().await);

        assert!(!first.connected());
        assert!(second.connected());
        assert!(device.gatt_server().await.unwrap().ptr_eq(&second));

        // Only the live link reacts to a later drop
        adapter.simulate_disconnect(device.handle()).await;
        assert!(!second.connected());
    }

    #[tokio::test]
    async fn test_connect_without_adapter() {
        let device: Device<MockAdapter> = Device::from_record(
            Arc::new(Context::new()),
            DeviceRecord::new(Handle::from("aa"), "aa"),
        );

        assert_eq!(device.connect_gatt().await.err(), Some(BluetoothError::NoAdapter));
    }
}

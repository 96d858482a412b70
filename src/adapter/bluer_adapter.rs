//! BlueZ adapter implementation

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bluer::{
    Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
    gatt::{
        CharacteristicFlags,
        remote::{Characteristic, Descriptor, Service},
    },
};
use futures::StreamExt;
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    adapter::{BleAdapter, DisconnectHandler, ScanReceiver},
    core::{
        error::{AdapterError, AdapterResult},
        handle_cache::AdapterHandles,
        notification::NotificationSink,
        types::{
            AdvertisementRecord, CharacteristicRecord, DescriptorRecord, DeviceRecord, Handle,
            ServiceRecord, VendorInfo,
        },
        uuids::CanonicalUuid,
    },
};

type BluerHandles = AdapterHandles<Device, Service, Characteristic, Descriptor>;

struct BluerState {
    // Keeps the D-Bus connection alive for `adapter`
    _session: Session,
    adapter: Adapter,
}

/// Adapter backed by BlueZ over D-Bus
pub struct BluerAdapter {
    adapter_name: Option<String>,
    state: RwLock<Option<BluerState>>,
    handles: Arc<RwLock<BluerHandles>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    /// Dropping a sender ends that link's watcher
    links: Mutex<HashMap<Handle, oneshot::Sender<()>>>,
    notify_tasks: Mutex<HashMap<Handle, JoinHandle<()>>>,
}

impl BluerAdapter {
    /// Adapter for `adapter_name` (e.g. `hci0`), or the default adapter
    pub fn new(adapter_name: Option<String>) -> Self {
        Self {
            adapter_name,
            state: RwLock::new(None),
            handles: Arc::new(RwLock::new(BluerHandles::default())),
            scan_task: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
            notify_tasks: Mutex::new(HashMap::new()),
        }
    }

    async fn adapter(&self) -> AdapterResult<Adapter> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|state| state.adapter.clone())
            .ok_or(AdapterError::NotEnabled)
    }

    async fn device(&self, handle: &Handle) -> AdapterResult<Device> {
        self.handles.read().await.devices.lookup(handle).cloned()
    }

    async fn service(&self, handle: &Handle) -> AdapterResult<Service> {
        self.handles.read().await.services.lookup(handle).cloned()
    }

    async fn characteristic(&self, handle: &Handle) -> AdapterResult<Characteristic> {
        self.handles.read().await.characteristics.lookup(handle).cloned()
    }

    async fn descriptor(&self, handle: &Handle) -> AdapterResult<Descriptor> {
        self.handles.read().await.descriptors.lookup(handle).cloned()
    }

    async fn service_records(
        &self,
        services: Vec<Service>,
        filter: &[CanonicalUuid],
        primary_only: bool,
    ) -> AdapterResult<Vec<ServiceRecord>> {
        let mut records = Vec::new();
        for service in services {
            let uuid = CanonicalUuid::from(service.uuid().await?);
            if !filter.is_empty() && !filter.contains(&uuid) {
                continue;
            }
            let primary = service.primary().await?;
            if primary_only && !primary {
                continue;
            }

            let handle = Handle::for_uuid(&uuid);
            self.handles
                .write()
                .await
                .services
                .insert_if_absent(handle.clone(), service);
            records.push(ServiceRecord {
                handle,
                uuid: uuid.to_string(),
                primary,
            });
        }
        Ok(records)
    }
}

async fn device_record(device: &Device) -> bluer::Result<DeviceRecord> {
    let id = device.address().to_string();
    let mut record = DeviceRecord::new(Handle::new(id.clone()), id);

    record.name = device.name().await?;
    record.uuids = device
        .uuids()
        .await?
        .unwrap_or_default()
        .into_iter()
        .map(|uuid| uuid.to_string())
        .collect();
    record.paired = device.is_paired().await?;
    record.device_class = device.class().await?;
    record.vendor = device.modalias().await?.map(|modalias| VendorInfo {
        vendor_id_source: modalias.source,
        vendor_id: modalias.vendor,
        product_id: modalias.product,
        product_version: modalias.device,
    });
    record.ad_data = AdvertisementRecord {
        appearance: device.appearance().await?,
        tx_power: device.tx_power().await?,
        rssi: device.rssi().await?,
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
        service_data: device
            .service_data()
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|(uuid, data)| (uuid.to_string(), data))
            .collect(),
    };
    Ok(record)
}

fn property_names(flags: &CharacteristicFlags) -> Vec<String> {
    [
        ("broadcast", flags.broadcast),
        ("read", flags.read),
        ("writeWithoutResponse", flags.write_without_response),
        ("write", flags.write),
        ("notify", flags.notify),
        ("indicate", flags.indicate),
        ("authenticatedSignedWrites", flags.authenticated_signed_writes),
        ("reliableWrite", flags.reliable_write),
        ("writableAuxiliaries", flags.writable_auxiliaries),
    ]
    .into_iter()
    .filter_map(|(name, set)| set.then(|| name.to_string()))
    .collect()
}

impl BleAdapter for BluerAdapter {
    async fn init(&self) -> AdapterResult<()> {
        let session = Session::new().await?;
        let adapter = match &self.adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        adapter.set_powered(true).await?;
        info!("Using BLE adapter: {}", adapter.name());

        *self.state.write().await = Some(BluerState {
            _session: session,
            adapter,
        });
        Ok(())
    }

    async fn start_scan(&self, service_uuids: &[CanonicalUuid]) -> AdapterResult<ScanReceiver> {
        let adapter = self.adapter().await?;
        if !adapter.is_powered().await? {
            return Err(AdapterError::NotEnabled);
        }

        let mut filter = DiscoveryFilter::default();
        filter.uuids = service_uuids
            .iter()
            .map(|uuid| *uuid.as_uuid())
            .collect::<HashSet<_>>();
        filter.transport = DiscoveryTransport::Le;
        adapter.set_discovery_filter(filter).await?;

        let events = adapter
            .discover_devices()
            .await
            .map_err(|e| AdapterError::ScanFailed(e.to_string()))?;
        debug!("BlueZ discovery started ({} service filters)", service_uuids.len());

        let (tx, rx) = mpsc::unbounded_channel();
        let handles = self.handles.clone();
        let service_uuids = service_uuids.to_vec();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let device = match adapter.device(address) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!("Cannot access device {}: {}", address, e);
                        continue;
                    }
                };
                match device_record(&device).await {
                    // BlueZ also reports already known devices, whatever the filter
                    Ok(record) if !record.advertises_any(&service_uuids) => {
                        debug!("Device {} skipped, no requested service", record.id);
                    }
                    Ok(record) => {
                        handles
                            .write()
                            .await
                            .devices
                            .insert_if_absent(record.handle.clone(), device);
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Cannot read properties of {}: {}", address, e),
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        // Dropping the discovery stream ends the BlueZ discovery session
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
            debug!("BlueZ discovery stopped");
        }
        Ok(())
    }

    async fn connect(&self, device: &Handle, on_disconnect: DisconnectHandler) -> AdapterResult<()> {
        let native = self.device(device).await?;
        let events = native.events().await?;
        native.connect().await?;

        let (release, mut released) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut events = Box::pin(events);
            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) | None => {
                            break;
                        }
                        Some(_) => {}
                    },
                    // Replaced by a newer link to the same device
                    _ = &mut released => break,
                }
            }
            on_disconnect();
        });

        // Dropping the previous sender fires the displaced link's handler
        if self.links.lock().await.insert(device.clone(), release).is_some() {
            debug!("Replaced link watcher for {}", device);
        }
        Ok(())
    }

    async fn disconnect(&self, device: &Handle) -> AdapterResult<()> {
        let native = self.device(device).await?;
        native.disconnect().await?;
        Ok(())
    }

    async fn discover_services(
        &self,
        device: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>> {
        let native = self.device(device).await?;
        let services = native.services().await?;
        self.service_records(services, filter, true).await
    }

    async fn discover_included_services(
        &self,
        service: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>> {
        let native = self.service(service).await?;
        let device = self.adapter().await?.device(native.device_address())?;

        let mut included = Vec::new();
        for id in native.includes().await? {
            included.push(device.service(id).await?);
        }
        let mut records = self.service_records(included, filter, false).await?;
        for record in &mut records {
            record.primary = false;
        }
        Ok(records)
    }

    async fn discover_characteristics(
        &self,
        service: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<CharacteristicRecord>> {
        let native = self.service(service).await?;

        let mut records = Vec::new();
        for characteristic in native.characteristics().await? {
            let uuid = CanonicalUuid::from(characteristic.uuid().await?);
            if !filter.is_empty() && !filter.contains(&uuid) {
                continue;
            }
            let properties = property_names(&characteristic.flags().await?);

            let handle = Handle::for_uuid(&uuid);
            self.handles
                .write()
                .await
                .characteristics
                .insert_if_absent(handle.clone(), characteristic);
            records.push(CharacteristicRecord {
                handle,
                uuid: uuid.to_string(),
                properties,
            });
        }
        Ok(records)
    }

    async fn discover_descriptors(
        &self,
        characteristic: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<DescriptorRecord>> {
        let native = self.characteristic(characteristic).await?;
        let characteristic_uuid = CanonicalUuid::from(native.uuid().await?);

        let mut records = Vec::new();
        for descriptor in native.descriptors().await? {
            let uuid = CanonicalUuid::from(descriptor.uuid().await?);
            if !filter.is_empty() && !filter.contains(&uuid) {
                continue;
            }

            let handle = Handle::for_descriptor(&characteristic_uuid, &uuid);
            self.handles
                .write()
                .await
                .descriptors
                .insert_if_absent(handle.clone(), descriptor);
            records.push(DescriptorRecord {
                handle,
                uuid: uuid.to_string(),
            });
        }
        Ok(records)
    }

    async fn read_characteristic(&self, characteristic: &Handle) -> AdapterResult<Vec<u8>> {
        Ok(self.characteristic(characteristic).await?.read().await?)
    }

    async fn write_characteristic(&self, characteristic: &Handle, value: &[u8]) -> AdapterResult<()> {
        Ok(self.characteristic(characteristic).await?.write(value).await?)
    }

    async fn enable_notify(&self, characteristic: &Handle, sink: NotificationSink) -> AdapterResult<()> {
        let native = self.characteristic(characteristic).await?;
        let values = native.notify().await?;

        let task = tokio::spawn(async move {
            let mut values = Box::pin(values);
            while let Some(value) = values.next().await {
                sink.value_changed(&value, true).await;
            }
        });

        if let Some(previous) = self
            .notify_tasks
            .lock()
            .await
            .insert(characteristic.clone(), task)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn disable_notify(&self, characteristic: &Handle) -> AdapterResult<()> {
        self.characteristic(characteristic).await?;
        // Dropping the notification stream makes BlueZ send StopNotify
        if let Some(task) = self.notify_tasks.lock().await.remove(characteristic) {
            task.abort();
        }
        Ok(())
    }

    async fn read_descriptor(&self, descriptor: &Handle) -> AdapterResult<Vec<u8>> {
        Ok(self.descriptor(descriptor).await?.read().await?)
    }

    async fn write_descriptor(&self, descriptor: &Handle, value: &[u8]) -> AdapterResult<()> {
        Ok(self.descriptor(descriptor).await?.write(value).await?)
    }
}

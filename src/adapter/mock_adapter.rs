//! Mock BLE adapter for testing

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Mutex, sync::mpsc, task::JoinHandle, time::Instant};

use crate::{
    adapter::{BleAdapter, DisconnectHandler, ScanReceiver},
    core::{
        error::{AdapterError, AdapterResult},
        handle_cache::AdapterHandles,
        notification::NotificationSink,
        types::{CharacteristicRecord, DescriptorRecord, DeviceRecord, Handle, ServiceRecord},
        uuids::CanonicalUuid,
    },
};

/// Simulated descriptor
#[derive(Debug, Clone)]
pub struct MockDescriptor {
    uuid: CanonicalUuid,
    value: Vec<u8>,
}

impl MockDescriptor {
    pub fn new(uuid: CanonicalUuid) -> Self {
        Self {
            uuid,
            value: Vec::new(),
        }
    }

    pub fn value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }
}

/// Simulated characteristic
#[derive(Debug, Clone)]
pub struct MockCharacteristic {
    uuid: CanonicalUuid,
    properties: Vec<String>,
    value: Vec<u8>,
    descriptors: Vec<MockDescriptor>,
}

impl MockCharacteristic {
    pub fn new(uuid: CanonicalUuid, properties: &[&str]) -> Self {
        Self {
            uuid,
            properties: properties.iter().map(|p| p.to_string()).collect(),
            value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn descriptor(mut self, descriptor: MockDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

/// Simulated service, possibly including other services
#[derive(Debug, Clone)]
pub struct MockService {
    uuid: CanonicalUuid,
    primary: bool,
    characteristics: Vec<MockCharacteristic>,
    included: Vec<MockService>,
}

impl MockService {
    pub fn primary(uuid: CanonicalUuid) -> Self {
        Self {
            uuid,
            primary: true,
            characteristics: Vec::new(),
            included: Vec::new(),
        }
    }

    pub fn secondary(uuid: CanonicalUuid) -> Self {
        Self {
            primary: false,
            ..Self::primary(uuid)
        }
    }

    pub fn characteristic(mut self, characteristic: MockCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn include(mut self, service: MockService) -> Self {
        self.included.push(service);
        self
    }
}

/// Simulated remote device
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    record: DeviceRecord,
    advertise_after: Duration,
    services: Vec<MockService>,
}

impl MockPeripheral {
    /// Peripheral whose id doubles as its device handle
    pub fn new(id: &str) -> Self {
        Self {
            record: DeviceRecord::new(Handle::new(id), id),
            advertise_after: Duration::ZERO,
            services: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.record.name = Some(name.to_string());
        self
    }

    /// Add an advertised service UUID, in whatever text shape the stack uses
    pub fn advertising(mut self, uuid: &str) -> Self {
        self.record.uuids.push(uuid.to_string());
        self
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.record.ad_data.rssi = Some(rssi);
        self
    }

    pub fn service_data(mut self, uuid: &str, data: impl Into<Vec<u8>>) -> Self {
        self.record
            .ad_data
            .service_data
            .insert(uuid.to_string(), data.into());
        self
    }

    /// Delay between scan start and this peripheral's advertisement
    pub fn advertise_after(mut self, delay: Duration) -> Self {
        self.advertise_after = delay;
        self
    }

    pub fn service(mut self, service: MockService) -> Self {
        self.services.push(service);
        self
    }

    fn advertises_any(&self, filter: &[CanonicalUuid]) -> bool {
        self.record.advertises_any(filter)
    }
}

/// Location of a service in the simulated tree
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServicePath {
    device: usize,
    indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CharacteristicPath {
    service: ServicePath,
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DescriptorPath {
    characteristic: CharacteristicPath,
    index: usize,
}

type MockHandles = AdapterHandles<usize, ServicePath, CharacteristicPath, DescriptorPath>;

/// Internal state for the mock adapter
struct MockState {
    peripherals: Vec<MockPeripheral>,
    handles: MockHandles,
    should_fail_init: bool,
    scan_failure: Option<AdapterError>,
    should_fail_connect: bool,
    should_fail_discovery: bool,
    should_fail_read: bool,
    should_fail_write: bool,
    notify_confirms: bool,
    scan_task: Option<JoinHandle<()>>,
    stop_scan_calls: usize,
    links: HashMap<Handle, DisconnectHandler>,
    notify_sinks: HashMap<Handle, NotificationSink>,
    notifying: HashSet<Handle>,
}

impl MockState {
    fn stale() -> AdapterError {
        AdapterError::Native("mock tree changed under cached handle".into())
    }

    fn service(&self, path: &ServicePath) -> AdapterResult<&MockService> {
        let (first, rest) = path.indices.split_first().ok_or_else(Self::stale)?;
        let mut service = self
            .peripherals
            .get(path.device)
            .and_then(|p| p.services.get(*first))
            .ok_or_else(Self::stale)?;
        for index in rest {
            service = service.included.get(*index).ok_or_else(Self::stale)?;
        }
        Ok(service)
    }

    fn service_mut(&mut self, path: &ServicePath) -> AdapterResult<&mut MockService> {
        let (first, rest) = path.indices.split_first().ok_or_else(Self::stale)?;
        let mut service = self
            .peripherals
            .get_mut(path.device)
            .and_then(|p| p.services.get_mut(*first))
            .ok_or_else(Self::stale)?;
        for index in rest {
            service = service.included.get_mut(*index).ok_or_else(Self::stale)?;
        }
        Ok(service)
    }

    fn characteristic(&self, path: &CharacteristicPath) -> AdapterResult<&MockCharacteristic> {
        self.service(&path.service)?
            .characteristics
            .get(path.index)
            .ok_or_else(Self::stale)
    }

    fn characteristic_mut(
        &mut self,
        path: &CharacteristicPath,
    ) -> AdapterResult<&mut MockCharacteristic> {
        self.service_mut(&path.service)?
            .characteristics
            .get_mut(path.index)
            .ok_or_else(Self::stale)
    }

    fn descriptor_mut(&mut self, path: &DescriptorPath) -> AdapterResult<&mut MockDescriptor> {
        self.characteristic_mut(&path.characteristic)?
            .descriptors
            .get_mut(path.index)
            .ok_or_else(Self::stale)
    }

    fn check_discovery(&self) -> AdapterResult<()> {
        if self.should_fail_discovery {
            return Err(AdapterError::Native("Mock discovery failure".into()));
        }
        Ok(())
    }

    fn collect_services<'a>(
        &mut self,
        parent: &ServicePath,
        candidates: impl Iterator<Item = (usize, &'a MockService)>,
        filter: &[CanonicalUuid],
    ) -> Vec<ServiceRecord> {
        let mut records = Vec::new();
        for (index, service) in candidates {
            if !filter.is_empty() && !filter.contains(&service.uuid) {
                continue;
            }
            let handle = Handle::for_uuid(&service.uuid);
            let mut path = parent.clone();
            path.indices.push(index);
            self.handles.services.insert_if_absent(handle.clone(), path);
            records.push(ServiceRecord {
                handle,
                uuid: service.uuid.to_string(),
                primary: service.primary,
            });
        }
        records
    }
}

/// Mock BLE adapter for testing
///
/// Simulates a set of peripherals without hardware. Reads return the last
/// written value, so writes echo back.
#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Create a new mock adapter with no peripherals
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                peripherals: Vec::new(),
                handles: MockHandles::default(),
                should_fail_init: false,
                scan_failure: None,
                should_fail_connect: false,
                should_fail_discovery: false,
                should_fail_read: false,
                should_fail_write: false,
                notify_confirms: true,
                scan_task: None,
                stop_scan_calls: 0,
                links: HashMap::new(),
                notify_sinks: HashMap::new(),
                notifying: HashSet::new(),
            })),
        }
    }

    /// Add a peripheral; adding the same one twice makes it advertise twice
    pub async fn add_peripheral(&self, peripheral: MockPeripheral) {
        self.inner.lock().await.peripherals.push(peripheral);
    }

    /// Configure mock to fail initialisation
    pub async fn set_init_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_init = should_fail;
    }

    /// Configure mock to fail scan start with `error`
    pub async fn set_scan_failure(&self, error: Option<AdapterError>) {
        self.inner.lock().await.scan_failure = error;
    }

    pub async fn set_connect_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_connect = should_fail;
    }

    pub async fn set_discovery_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_discovery = should_fail;
    }

    pub async fn set_read_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_read = should_fail;
    }

    pub async fn set_write_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_write = should_fail;
    }

    /// When `false`, notify state changes are confirmed as the opposite state
    pub async fn set_notify_confirmation(&self, confirms: bool) {
        self.inner.lock().await.notify_confirms = confirms;
    }

    pub async fn stop_scan_calls(&self) -> usize {
        self.inner.lock().await.stop_scan_calls
    }

    pub async fn is_notifying(&self, characteristic: &CanonicalUuid) -> bool {
        self.inner
            .lock()
            .await
            .notifying
            .contains(&Handle::for_uuid(characteristic))
    }

    pub async fn cached_service_count(&self) -> usize {
        self.inner.lock().await.handles.services.len()
    }

    /// Simulate the peripheral pushing a new value
    ///
    /// The value reaches the last sink registered for the characteristic,
    /// even after notifications were disabled, like a late radio packet.
    /// Returns whether a subscriber received it.
    pub async fn emit_notification(&self, characteristic: &CanonicalUuid, value: &[u8]) -> bool {
        let handle = Handle::for_uuid(characteristic);
        let sink = {
            let mut state = self.inner.lock().await;
            if let Some(path) = state.handles.characteristics.get(&handle).cloned() {
                if let Ok(native) = state.characteristic_mut(&path) {
                    native.value = value.to_vec();
                }
            }
            state.notify_sinks.get(&handle).cloned()
        };
        match sink {
            Some(sink) => sink.value_changed(value, true).await,
            None => false,
        }
    }

    /// Simulate the link to `device` dropping
    pub async fn simulate_disconnect(&self, device: &Handle) {
        let handler = self.inner.lock().await.links.remove(device);
        if let Some(handler) = handler {
            handler();
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter for MockAdapter {
    async fn init(&self) -> AdapterResult<()> {
        if self.inner.lock().await.should_fail_init {
            return Err(AdapterError::NotEnabled);
        }
        Ok(())
    }

    async fn start_scan(&self, service_uuids: &[CanonicalUuid]) -> AdapterResult<ScanReceiver> {
        let mut state = self.inner.lock().await;
        if let Some(err) = state.scan_failure.clone() {
            return Err(err);
        }

        let mut adverts = Vec::new();
        for (index, peripheral) in state.peripherals.iter().enumerate() {
            if peripheral.advertises_any(service_uuids) {
                adverts.push((index, peripheral.advertise_after, peripheral.record.clone()));
            }
        }
        adverts.sort_by_key(|(_, delay, _)| *delay);
        for (index, _, record) in &adverts {
            state
                .handles
                .devices
                .insert_if_absent(record.handle.clone(), *index);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let task = tokio::spawn(async move {
            for (_, delay, record) in adverts {
                tokio::time::sleep_until(started + delay).await;
                if tx.send(record).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = state.scan_task.replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> AdapterResult<()> {
        let mut state = self.inner.lock().await;
        state.stop_scan_calls += 1;
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(&self, device: &Handle, on_disconnect: DisconnectHandler) -> AdapterResult<()> {
        let displaced = {
            let mut state = self.inner.lock().await;
            state.handles.devices.lookup(device)?;
            if state.should_fail_connect {
                return Err(AdapterError::Native("Mock connect failure".into()));
            }
            state.links.insert(device.clone(), on_disconnect)
        };
        // The earlier link is gone once a new one replaces it
        if let Some(handler) = displaced {
            handler();
        }
        Ok(())
    }

    async fn disconnect(&self, device: &Handle) -> AdapterResult<()> {
        let handler = {
            let mut state = self.inner.lock().await;
            state.handles.devices.lookup(device)?;
            state.links.remove(device)
        };
        if let Some(handler) = handler {
            handler();
        }
        Ok(())
    }

    async fn discover_services(
        &self,
        device: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>> {
        let mut state = self.inner.lock().await;
        state.check_discovery()?;
        let index = *state.handles.devices.lookup(device)?;
        let services = state
            .peripherals
            .get(index)
            .map(|p| p.services.clone())
            .unwrap_or_default();

        let root = ServicePath {
            device: index,
            indices: Vec::new(),
        };
        let primary = services.iter().enumerate().filter(|(_, s)| s.primary);
        Ok(state.collect_services(&root, primary, filter))
    }

    async fn discover_included_services(
        &self,
        service: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>> {
        let mut state = self.inner.lock().await;
        state.check_discovery()?;
        let path = state.handles.services.lookup(service)?.clone();
        let included = state.service(&path)?.included.clone();

        let mut records = state.collect_services(&path, included.iter().enumerate(), filter);
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
        let mut state = self.inner.lock().await;
        state.check_discovery()?;
        let path = state.handles.services.lookup(service)?.clone();
        let characteristics = state.service(&path)?.characteristics.clone();

        let mut records = Vec::new();
        for (index, characteristic) in characteristics.iter().enumerate() {
            if !filter.is_empty() && !filter.contains(&characteristic.uuid) {
                continue;
            }
            let handle = Handle::for_uuid(&characteristic.uuid);
            state.handles.characteristics.insert_if_absent(
                handle.clone(),
                CharacteristicPath {
                    service: path.clone(),
                    index,
                },
            );
            records.push(CharacteristicRecord {
                handle,
                uuid: characteristic.uuid.to_string(),
                properties: characteristic.properties.clone(),
            });
        }
        Ok(records)
    }

    async fn discover_descriptors(
        &self,
        characteristic: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<DescriptorRecord>> {
        let mut state = self.inner.lock().await;
        state.check_discovery()?;
        let path = state.handles.characteristics.lookup(characteristic)?.clone();
        let native = state.characteristic(&path)?.clone();

        let mut records = Vec::new();
        for (index, descriptor) in native.descriptors.iter().enumerate() {
            if !filter.is_empty() && !filter.contains(&descriptor.uuid) {
                continue;
            }
            let handle = Handle::for_descriptor(&native.uuid, &descriptor.uuid);
            state.handles.descriptors.insert_if_absent(
                handle.clone(),
                DescriptorPath {
                    characteristic: path.clone(),
                    index,
                },
            );
            records.push(DescriptorRecord {
                handle,
                uuid: descriptor.uuid.to_string(),
            });
        }
        Ok(records)
    }

    async fn read_characteristic(&self, characteristic: &Handle) -> AdapterResult<Vec<u8>> {
        let state = self.inner.lock().await;
        let path = state.handles.characteristics.lookup(characteristic)?;
        if state.should_fail_read {
            return Err(AdapterError::Native("Mock read failure".into()));
        }
        Ok(state.characteristic(path)?.value.clone())
    }

    async fn write_characteristic(&self, characteristic: &Handle, value: &[u8]) -> AdapterResult<()> {
        let mut state = self.inner.lock().await;
        let path = state.handles.characteristics.lookup(characteristic)?.clone();
        if state.should_fail_write {
            return Err(AdapterError::Native("Mock write failure".into()));
        }
        state.characteristic_mut(&path)?.value = value.to_vec();
        Ok(())
    }

    async fn enable_notify(&self, characteristic: &Handle, sink: NotificationSink) -> AdapterResult<()> {
        let mut state = self.inner.lock().await;
        state.handles.characteristics.lookup(characteristic)?;
        if !state.notify_confirms {
            return Err(AdapterError::NotifyStateMismatch {
                expected_enabled: true,
            });
        }
        state.notify_sinks.insert(characteristic.clone(), sink);
        state.notifying.insert(characteristic.clone());
        Ok(())
    }

    async fn disable_notify(&self, characteristic: &Handle) -> AdapterResult<()> {
        let mut state = self.inner.lock().await;
        state.handles.characteristics.lookup(characteristic)?;
        if !state.notify_confirms {
            return Err(AdapterError::NotifyStateMismatch {
                expected_enabled: false,
            });
        }
        state.notifying.remove(characteristic);
        Ok(())
    }

    async fn read_descriptor(&self, descriptor: &Handle) -> AdapterResult<Vec<u8>> {
        let mut state = self.inner.lock().await;
        let path = state.handles.descriptors.lookup(descriptor)?.clone();
        if state.should_fail_read {
            return Err(AdapterError::Native("Mock read failure".into()));
        }
        Ok(state.descriptor_mut(&path)?.value.clone())
    }

    async fn write_descriptor(&self, descriptor: &Handle, value: &[u8]) -> AdapterResult<()> {
        let mut state = self.inner.lock().await;
        let path = state.handles.descriptors.lookup(descriptor)?.clone();
        if state.should_fail_write {
            return Err(AdapterError::Native("Mock write failure".into()));
        }
        state.descriptor_mut(&path)?.value = value.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notification::NotificationRouter;
    use pretty_assertions::assert_eq;

    fn heart_rate_peripheral() -> MockPeripheral {
        MockPeripheral::new("51:CF:84:C2:A2:3E")
            .name("Hi_Rob")
            .advertising("180d")
            .service(
                MockService::primary(CanonicalUuid::from_alias(0x180d)).characteristic(
                    MockCharacteristic::new(CanonicalUuid::from_alias(0x2a37), &["notify"])
                        .descriptor(MockDescriptor::new(CanonicalUuid::from_alias(0x2902))),
                ),
            )
    }

    #[tokio::test]
    async fn test_mock_scan_filters_by_advertised_service() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_peripheral()).await;
        adapter
            .add_peripheral(MockPeripheral::new("00:11:22:33:44:55").advertising("180f"))
            .await;

        let mut found = adapter
            .start_scan(&[CanonicalUuid::from_alias(0x180d)])
            .await
            .unwrap();
        let record = found.recv().await.unwrap();
        assert_eq!(record.name.as_deref(), Some("Hi_Rob"));
        assert!(found.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_scan_failure() {
        let adapter = MockAdapter::new();
        adapter.set_scan_failure(Some(AdapterError::NotEnabled)).await;

        assert_eq!(adapter.start_scan(&[]).await.err(), Some(AdapterError::NotEnabled));
    }

    #[tokio::test]
    async fn test_mock_requires_discovery_before_use() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_peripheral()).await;
        let characteristic = Handle::for_uuid(&CanonicalUuid::from_alias(0x2a37));

        assert_eq!(
            adapter.read_characteristic(&characteristic).await,
            Err(AdapterError::UnknownHandle(characteristic.clone()))
        );

        let device = Handle::new("51:CF:84:C2:A2:3E");
        drop(adapter.start_scan(&[]).await.unwrap());
        let services = adapter.discover_services(&device, &[]).await.unwrap();
        adapter
            .discover_characteristics(&services[0].handle, &[])
            .await
            .unwrap();

        adapter
            .write_characteristic(&characteristic, &[1, 2])
            .await
            .unwrap();
        assert_eq!(
            adapter.read_characteristic(&characteristic).await.unwrap(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_mock_descriptor_handles_are_composite() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_peripheral()).await;
        drop(adapter.start_scan(&[]).await.unwrap());

        let services = adapter
            .discover_services(&Handle::new("51:CF:84:C2:A2:3E"), &[])
            .await
            .unwrap();
        let characteristics = adapter
            .discover_characteristics(&services[0].handle, &[])
            .await
            .unwrap();
        let descriptors = adapter
            .discover_descriptors(&characteristics[0].handle, &[])
            .await
            .unwrap();

        assert_eq!(
            descriptors[0].handle,
            Handle::for_descriptor(
                &CanonicalUuid::from_alias(0x2a37),
                &CanonicalUuid::from_alias(0x2902)
            )
        );
    }

    #[tokio::test]
    async fn test_mock_notify_confirmation() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_peripheral()).await;
        drop(adapter.start_scan(&[]).await.unwrap());
        let services = adapter
            .discover_services(&Handle::new("51:CF:84:C2:A2:3E"), &[])
            .await
            .unwrap();
        let characteristics = adapter
            .discover_characteristics(&services[0].handle, &[])
            .await
            .unwrap();

        let uuid = CanonicalUuid::from_alias(0x2a37);
        let router = NotificationRouter::new();
        adapter.set_notify_confirmation(false).await;
        assert_eq!(
            adapter
                .enable_notify(&characteristics[0].handle, router.sink(uuid))
                .await,
            Err(AdapterError::NotifyStateMismatch {
                expected_enabled: true
            })
        );

        adapter.set_notify_confirmation(true).await;
        adapter
            .enable_notify(&characteristics[0].handle, router.sink(uuid))
            .await
            .unwrap();
        assert!(adapter.is_notifying(&uuid).await);
    }
}

//! BLE adapter capability trait

use tokio::sync::mpsc;
use trait_variant::make;

use crate::core::{
    error::AdapterResult,
    notification::NotificationSink,
    types::{CharacteristicRecord, DescriptorRecord, DeviceRecord, Handle, ServiceRecord},
    uuids::CanonicalUuid,
};

/// Stream of devices reported while a scan runs
pub type ScanReceiver = mpsc::UnboundedReceiver<DeviceRecord>;

/// Invoked once when the adapter observes the link to a device drop
pub type DisconnectHandler = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over a native BLE central stack
///
/// All radio I/O goes through this trait so that the object model can run
/// against BlueZ, a platform stack or a test double. Discovery methods
/// receive a filter of canonical UUIDs; an empty filter means "everything".
/// Implementations keep the native objects behind the handles they return,
/// typically in an [`AdapterHandles`](crate::core::handle_cache::AdapterHandles).
#[make(Send)]
pub trait BleAdapter: Send + Sync + 'static {
    /// Prepare the native stack; called once on registration
    async fn init(&self) -> AdapterResult<()>;

    /// Start scanning for devices advertising any of `service_uuids`
    ///
    /// Returning `Ok` means the scan has started. Devices found afterwards are
    /// delivered through the receiver until [`stop_scan`](Self::stop_scan).
    async fn start_scan(&self, service_uuids: &[CanonicalUuid]) -> AdapterResult<ScanReceiver>;

    async fn stop_scan(&self) -> AdapterResult<()>;

    /// Connect to a device; `on_disconnect` fires when the link later drops
    async fn connect(&self, device: &Handle, on_disconnect: DisconnectHandler) -> AdapterResult<()>;

    async fn disconnect(&self, device: &Handle) -> AdapterResult<()>;

    async fn discover_services(
        &self,
        device: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>>;

    async fn discover_included_services(
        &self,
        service: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<ServiceRecord>>;

    async fn discover_characteristics(
        &self,
        service: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<CharacteristicRecord>>;

    async fn discover_descriptors(
        &self,
        characteristic: &Handle,
        filter: &[CanonicalUuid],
    ) -> AdapterResult<Vec<DescriptorRecord>>;

    async fn read_characteristic(&self, characteristic: &Handle) -> AdapterResult<Vec<u8>>;

    async fn write_characteristic(&self, characteristic: &Handle, value: &[u8]) -> AdapterResult<()>;

    /// Enable notifications and push later value changes into `sink`
    ///
    /// Resolves once the native stack confirms the enabled state; a confirmed
    /// disabled state is reported as
    /// [`AdapterError::NotifyStateMismatch`](crate::core::error::AdapterError::NotifyStateMismatch).
    async fn enable_notify(&self, characteristic: &Handle, sink: NotificationSink) -> AdapterResult<()>;

    async fn disable_notify(&self, characteristic: &Handle) -> AdapterResult<()>;

    async fn read_descriptor(&self, descriptor: &Handle) -> AdapterResult<Vec<u8>>;

    async fn write_descriptor(&self, descriptor: &Handle, value: &[u8]) -> AdapterResult<()>;
}

//! GATT service

use std::{
    fmt,
    sync::{Arc, Weak},
};

use tracing::debug;

use crate::{
    adapter::BleAdapter,
    core::{
        context::Context,
        error::{AttributeKind, BluetoothError, BluetoothResult},
        types::{Handle, ServiceRecord},
        uuids::{AttributeId, CanonicalUuid},
    },
    gatt::{Characteristic, Device, device::DeviceInner, ensure_found, requested_uuid, uuid_filter},
};

struct ServiceInner<A: BleAdapter> {
    context: Arc<Context<A>>,
    device: Weak<DeviceInner<A>>,
    handle: Handle,
    uuid: CanonicalUuid,
    primary: bool,
}

/// A primary or included service
pub struct Service<A: BleAdapter> {
    inner: Arc<ServiceInner<A>>,
}

impl<A: BleAdapter> Service<A> {
    pub(crate) fn from_record(
        context: Arc<Context<A>>,
        device: Weak<DeviceInner<A>>,
        record: ServiceRecord,
    ) -> BluetoothResult<Self> {
        Ok(Self {
            inner: Arc::new(ServiceInner {
                context,
                device,
                uuid: CanonicalUuid::parse(&record.uuid)?,
                handle: record.handle,
                primary: record.primary,
            }),
        })
    }

    pub(crate) fn context(&self) -> &Arc<Context<A>> {
        &self.inner.context
    }

    pub fn uuid(&self) -> &CanonicalUuid {
        &self.inner.uuid
    }

    pub fn is_primary(&self) -> bool {
        self.inner.primary
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// The device this service lives on, if it is still alive
    pub fn device(&self) -> Option<Device<A>> {
        self.inner.device.upgrade().map(Device::from_inner)
    }

    pub async fn get_characteristic(
        &self,
        characteristic: impl Into<AttributeId>,
    ) -> BluetoothResult<Characteristic<A>> {
        const OPERATION: &str = "get_characteristic";

        let uuid = requested_uuid(characteristic.into(), OPERATION, AttributeKind::Characteristic)?;
        self.discover_characteristics(OPERATION, &[uuid])
            .await?
            .into_iter()
            .next()
            .ok_or(BluetoothError::NotFound {
                operation: OPERATION,
                kind: AttributeKind::Characteristic,
            })
    }

    /// All characteristics, or those matching `characteristic`
    pub async fn get_characteristics(
        &self,
        characteristic: Option<AttributeId>,
    ) -> BluetoothResult<Vec<Characteristic<A>>> {
        const OPERATION: &str = "get_characteristics";

        let filter = uuid_filter(characteristic, AttributeKind::Characteristic)?;
        let found = self.discover_characteristics(OPERATION, &filter).await?;
        ensure_found(found, &filter, OPERATION, AttributeKind::Characteristic)
    }

    pub async fn get_included_service(&self, service: impl Into<AttributeId>) -> BluetoothResult<Service<A>> {
        const OPERATION: &str = "get_included_service";

        let uuid = requested_uuid(service.into(), OPERATION, AttributeKind::Service)?;
        self.discover_included(OPERATION, &[uuid])
            .await?
            .into_iter()
            .next()
            .ok_or(BluetoothError::NotFound {
                operation: OPERATION,
                kind: AttributeKind::Service,
            })
    }

    /// All included services, or those matching `service`
    pub async fn get_included_services(&self, service: Option<AttributeId>) -> BluetoothResult<Vec<Service<A>>> {
        const OPERATION: &str = "get_included_services";

        let filter = uuid_filter(service, AttributeKind::Service)?;
        let found = self.discover_included(OPERATION, &filter).await?;
        ensure_found(found, &filter, OPERATION, AttributeKind::Service)
    }

    async fn discover_characteristics(
        &self,
        operation: &'static str,
        filter: &[CanonicalUuid],
    ) -> BluetoothResult<Vec<Characteristic<A>>> {
        let adapter = self.inner.context.adapter().await?;
        let records = adapter
            .discover_characteristics(&self.inner.handle, filter)
            .await
            .map_err(BluetoothError::adapter(operation))?;
        debug!("{}: {} characteristic(s) in {}", operation, records.len(), self.inner.uuid);

        records
            .into_iter()
            .map(|record| Characteristic::from_record(self.clone(), record))
            .collect()
    }

    async fn discover_included(
        &self,
        operation: &'static str,
        filter: &[CanonicalUuid],
    ) -> BluetoothResult<Vec<Service<A>>> {
        let adapter = self.inner.context.adapter().await?;
        let records = adapter
            .discover_included_services(&self.inner.handle, filter)
            .await
            .map_err(BluetoothError::adapter(operation))?;
        debug!("{}: {} included service(s) in {}", operation, records.len(), self.inner.uuid);

        records
            .into_iter()
            .map(|record| {
                Service::from_record(self.inner.context.clone(), self.inner.device.clone(), record)
            })
            .collect()
    }
}

impl<A: BleAdapter> Clone for Service<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> fmt::Debug for Service<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("uuid", &self.inner.uuid)
            .field("primary", &self.inner.primary)
            .finish_non_exhaustive()
    }
}

//! GATT characteristic: value access and notifications

use std::{fmt, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    adapter::BleAdapter,
    core::{
        context::Context,
        error::{AttributeKind, BluetoothError, BluetoothResult},
        types::{CharacteristicProperties, CharacteristicRecord, Handle},
        uuids::{AttributeId, CanonicalUuid},
    },
    gatt::{Descriptor, Service, ensure_found, requested_uuid, uuid_filter},
};

struct CharacteristicInner<A: BleAdapter> {
    service: Service<A>,
    handle: Handle,
    uuid: CanonicalUuid,
    properties: CharacteristicProperties,
    value: RwLock<Option<Vec<u8>>>,
}

/// A characteristic of a service
pub struct Characteristic<A: BleAdapter> {
    inner: Arc<CharacteristicInner<A>>,
}

impl<A: BleAdapter> Characteristic<A> {
    pub(crate) fn from_record(service: Service<A>, record: CharacteristicRecord) -> BluetoothResult<Self> {
        Ok(Self {
            inner: Arc::new(CharacteristicInner {
                uuid: CanonicalUuid::parse(&record.uuid)?,
                properties: record.properties.iter().collect(),
                handle: record.handle,
                service,
                value: RwLock::new(None),
            }),
        })
    }

    pub(crate) fn context(&self) -> &Arc<Context<A>> {
        self.inner.service.context()
    }

    pub fn uuid(&self) -> &CanonicalUuid {
        &self.inner.uuid
    }

    pub fn properties(&self) -> &CharacteristicProperties {
        &self.inner.properties
    }

    pub fn service(&self) -> &Service<A> {
        &self.inner.service
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Last value read or written, `None` before the first one
    pub async fn value(&self) -> Option<Vec<u8>> {
        self.inner.value.read().await.clone()
    }

    pub async fn get_descriptor(&self, descriptor: impl Into<AttributeId>) -> BluetoothResult<Descriptor<A>> {
        const OPERATION: &str = "get_descriptor";

        let uuid = requested_uuid(descriptor.into(), OPERATION, AttributeKind::Descriptor)?;
        self.discover_descriptors(OPERATION, &[uuid])
            .await?
            .into_iter()
            .next()
            .ok_or(BluetoothError::NotFound {
                operation: OPERATION,
                kind: AttributeKind::Descriptor,
            })
    }

    /// All descriptors, or those matching `descriptor`
    pub async fn get_descriptors(&self, descriptor: Option<AttributeId>) -> BluetoothResult<Vec<Descriptor<A>>> {
        const OPERATION: &str = "get_descriptors";

        let filter = uuid_filter(descriptor, AttributeKind::Descriptor)?;
        let found = self.discover_descriptors(OPERATION, &filter).await?;
        ensure_found(found, &filter, OPERATION, AttributeKind::Descriptor)
    }

    pub async fn read_value(&self) -> BluetoothResult<Vec<u8>> {
        let adapter = self.context().adapter().await?;
        let value = adapter
            .read_characteristic(&self.inner.handle)
            .await
            .map_err(BluetoothError::Read)?;
        *self.inner.value.write().await = Some(value.clone());
        Ok(value)
    }

    /// Write `value`, accepting anything that views as bytes
    pub async fn write_value(&self, value: impl AsRef<[u8]>) -> BluetoothResult<()> {
        let value = value.as_ref();
        let adapter = self.context().adapter().await?;
        adapter
            .write_characteristic(&self.inner.handle, value)
            .await
            .map_err(BluetoothError::Write)?;
        *self.inner.value.write().await = Some(value.to_vec());
        Ok(())
    }

    /// Enable notifications, routing every pushed value to `callback`
    ///
    /// The callback is registered once the adapter confirms. There is one
    /// callback per characteristic UUID in a context, so a later call
    /// (from any `Characteristic` with the same UUID) replaces it.
    pub async fn start_notifications<F>(&self, callback: F) -> BluetoothResult<()>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let context = self.context();
        let adapter = context.adapter().await?;
        let sink = context.notifications().sink(self.inner.uuid);
        adapter
            .enable_notify(&self.inner.handle, sink)
            .await
            .map_err(BluetoothError::NotifyEnable)?;

        context
            .notifications()
            .subscribe(self.inner.uuid, Arc::new(callback))
            .await;
        info!("Notifications started for {}", self.inner.uuid);
        Ok(())
    }

    /// Disable notifications and drop the registered callback
    pub async fn stop_notifications(&self) -> BluetoothResult<()> {
        let context = self.context();
        let adapter = context.adapter().await?;
        if !context.notifications().unsubscribe(&self.inner.uuid).await {
            debug!("No notification callback registered for {}", self.inner.uuid);
        }
        adapter
            .disable_notify(&self.inner.handle)
            .await
            .map_err(BluetoothError::NotifyDisable)?;
        info!("Notifications stopped for {}", self.inner.uuid);
        Ok(())
    }

    async fn discover_descriptors(
        &self,
        operation: &'static str,
        filter: &[CanonicalUuid],
    ) -> BluetoothResult<Vec<Descriptor<A>>> {
        let adapter = self.context().adapter().await?;
        let records = adapter
            .discover_descriptors(&self.inner.handle, filter)
            .await
            .map_err(BluetoothError::adapter(operation))?;
        debug!("{}: {} descriptor(s) on {}", operation, records.len(), self.inner.uuid);

        records
            .into_iter()
            .map(|record| Descriptor::from_record(self.clone(), record))
            .collect()
    }
}

impl<A: BleAdapter> Clone for Characteristic<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> fmt::Debug for Characteristic<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("uuid", &self.inner.uuid)
            .field("properties", &self.inner.properties.names())
            .finish_non_exhaustive()
    }
}

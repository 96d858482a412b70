//! GATT descriptor

use std::{fmt, sync::Arc};

use tokio::sync::RwLock;

use crate::{
    adapter::BleAdapter,
    core::{
        error::{BluetoothError, BluetoothResult},
        types::{DescriptorRecord, Handle},
        uuids::CanonicalUuid,
    },
    gatt::Characteristic,
};

struct DescriptorInner<A: BleAdapter> {
    characteristic: Characteristic<A>,
    handle: Handle,
    uuid: CanonicalUuid,
    value: RwLock<Option<Vec<u8>>>,
}

/// A descriptor of a characteristic
///
/// Its handle is keyed by both UUIDs, since the same descriptor UUID
/// appears under many characteristics.
pub struct Descriptor<A: BleAdapter> {
    inner: Arc<DescriptorInner<A>>,
}

impl<A: BleAdapter> Descriptor<A> {
    pub(crate) fn from_record(characteristic: Characteristic<A>, record: DescriptorRecord) -> BluetoothResult<Self> {
        Ok(Self {
            inner: Arc::new(DescriptorInner {
                uuid: CanonicalUuid::parse(&record.uuid)?,
                handle: record.handle,
                characteristic,
                value: RwLock::new(None),
            }),
        })
    }

    pub fn uuid(&self) -> &CanonicalUuid {
        &self.inner.uuid
    }

    pub fn characteristic(&self) -> &Characteristic<A> {
        &self.inner.characteristic
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub async fn value(&self) -> Option<Vec<u8>> {
        self.inner.value.read().await.clone()
    }

    pub async fn read_value(&self) -> BluetoothResult<Vec<u8>> {
        let adapter = self.inner.characteristic.context().adapter().await?;
        let value = adapter
            .read_descriptor(&self.inner.handle)
            .await
            .map_err(BluetoothError::Read)?;
        *self.inner.value.write().await = Some(value.clone());
        Ok(value)
    }

    pub async fn write_value(&self, value: impl AsRef<[u8]>) -> BluetoothResult<()> {
        let value = value.as_ref();
        let adapter = self.inner.characteristic.context().adapter().await?;
        adapter
            .write_descriptor(&self.inner.handle, value)
            .await
            .map_err(BluetoothError::Write)?;
        *self.inner.value.write().await = Some(value.to_vec());
        Ok(())
    }
}

impl<A: BleAdapter> Clone for Descriptor<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: BleAdapter> fmt::Debug for Descriptor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("uuid", &self.inner.uuid)
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{BleAdapter, MockAdapter, MockCharacteristic, MockDescriptor, MockPeripheral, MockService},
        core::{context::Context, error::AdapterError},
        gatt::Device,
    };
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn uuid(alias: u32) -> CanonicalUuid {
        CanonicalUuid::from_alias(alias)
    }

    /// Two characteristics sharing a descriptor UUID
    async fn descriptors(adapter: &MockAdapter) -> (Descriptor<MockAdapter>, Descriptor<MockAdapter>) {
        adapter
            .add_peripheral(
                MockPeripheral::new("aa:aa").service(
                    MockService::primary(uuid(0x180f))
                        .characteristic(
                            MockCharacteristic::new(uuid(0x2a19), &["read", "notify"])
                                .descriptor(MockDescriptor::new(uuid(0x2901)).value(*b"Level")),
                        )
                        .characteristic(
                            MockCharacteristic::new(uuid(0x2a1a), &["read"])
                                .descriptor(MockDescriptor::new(uuid(0x2901)).value(*b"State")),
                        ),
                ),
            )
            .await;
        let context = std::sync::Arc::new(Context::new());
        context
            .adapters()
            .register("mock", adapter.clone())
            .await
            .unwrap();
        let mut scan = adapter.start_scan(&[]).await.unwrap();
        let device = Device::from_record(context, scan.recv().await.unwrap());
        let service = device
            .connect_gatt()
            .await
            .unwrap()
            .get_primary_service(0x180fu16)
            .await
            .unwrap();

        let mut found = Vec::new();
        for characteristic in service.get_characteristics(None).await.unwrap() {
            found.push(characteristic.get_descriptor("gatt.characteristic_user_description").await.unwrap());
        }
        let second = found.pop().unwrap();
        let first = found.pop().unwrap();
        (first, second)
    }

    #[tokio::test]
    async fn test_same_uuid_under_different_characteristics() {
        let adapter = MockAdapter::new();
        let (level, state) = descriptors(&adapter).await;

        assert_eq!(level.uuid(), state.uuid());
        assert_ne!(level.handle(), state.handle());
        assert_eq!(
            level.handle().as_str(),
            "00002a19-0000-1000-8000-00805f9b34fb-00002901-0000-1000-8000-00805f9b34fb"
        );

        assert_eq!(assert_ok!(level.read_value().await), b"Level".to_vec());
        assert_eq!(assert_ok!(state.read_value().await), b"State".to_vec());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let adapter = MockAdapter::new();
        let (level, _) = descriptors(&adapter).await;
        assert_eq!(level.value().await, None);

        assert_ok!(level.write_value(b"Charge").await);
        assert_eq!(level.value().await, Some(b"Charge".to_vec()));
        assert_eq!(level.read_value().await.unwrap(), b"Charge".to_vec());
        assert_eq!(level.characteristic().uuid(), &uuid(0x2a19));
    }

    #[tokio::test]
    async fn test_read_failure() {
        let adapter = MockAdapter::new();
        let (level, _) = descriptors(&adapter).await;
        adapter.set_read_failure(true).await;

        let err = assert_err!(level.read_value().await);
        assert_eq!(err.to_string(), "read_value error: Mock read failure");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_value() {
        let adapter = MockAdapter::new();
        let (level, _) = descriptors(&adapter).await;
        level.write_value(b"Charge").await.unwrap();
        adapter.set_write_failure(true).await;

        let err = assert_err!(level.write_value(b"Empty").await);

        assert_eq!(
            err,
            BluetoothError::Write(AdapterError::Native("Mock write failure".into()))
        );
        assert_eq!(err.to_string(), "write_value error: Mock write failure");
        assert_eq!(level.value().await, Some(b"Charge".to_vec()));
        assert_eq!(assert_ok!(level.read_value().await), b"Charge".to_vec());
    }
}

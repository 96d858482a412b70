//! Device, GATT server, service, characteristic and descriptor objects
//!
//! Every object wraps an `Arc` and clones cheaply. Downward navigation always
//! goes through adapter discovery; upward links (service to device) are
//! weak so that a device and its server can be dropped independently of the
//! attributes a caller still holds.

mod characteristic;
mod descriptor;
mod device;
mod server;
mod service;

pub use characteristic::Characteristic;
pub use descriptor::Descriptor;
pub use device::Device;
pub use server::GattServer;
pub use service::Service;

use crate::core::{
    error::{AttributeKind, BluetoothError, BluetoothResult},
    uuids::{AttributeId, CanonicalUuid},
};

/// Canonical UUID of a single requested attribute
fn requested_uuid(
    id: AttributeId,
    operation: &'static str,
    kind: AttributeKind,
) -> BluetoothResult<CanonicalUuid> {
    if id.is_empty() {
        return Err(BluetoothError::MissingArgument { operation, kind });
    }
    id.resolve(kind)
}

/// Discovery filter for the plural getters; empty means "all"
fn uuid_filter(id: Option<AttributeId>, kind: AttributeKind) -> BluetoothResult<Vec<CanonicalUuid>> {
    match id {
        Some(id) if !id.is_empty() => Ok(vec![id.resolve(kind)?]),
        _ => Ok(Vec::new()),
    }
}

/// An empty result is only an error when a specific UUID was asked for
fn ensure_found<T>(
    found: Vec<T>,
    filter: &[CanonicalUuid],
    operation: &'static str,
    kind: AttributeKind,
) -> BluetoothResult<Vec<T>> {
    if found.is_empty() && !filter.is_empty() {
        return Err(BluetoothError::NotFound { operation, kind });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_requested_uuid() {
        assert_eq!(
            requested_uuid("".into(), "get_descriptor", AttributeKind::Descriptor),
            Err(BluetoothError::MissingArgument {
                operation: "get_descriptor",
                kind: AttributeKind::Descriptor,
            })
        );
        assert_eq!(
            requested_uuid(
                "gatt.client_characteristic_configuration".into(),
                "get_descriptor",
                AttributeKind::Descriptor
            ),
            Ok(CanonicalUuid::from_alias(0x2902))
        );
    }

    #[test]
    fn test_uuid_filter() {
        assert_eq!(uuid_filter(None, AttributeKind::Service), Ok(vec![]));
        assert_eq!(uuid_filter(Some("".into()), AttributeKind::Service), Ok(vec![]));
        assert_eq!(
            uuid_filter(Some(0x180fu16.into()), AttributeKind::Service),
            Ok(vec![CanonicalUuid::from_alias(0x180f)])
        );
    }

    #[test]
    fn test_ensure_found() {
        let filter = [CanonicalUuid::from_alias(0x2a37)];
        assert_eq!(
            ensure_found(Vec::<u8>::new(), &filter, "get_characteristics", AttributeKind::Characteristic),
            Err(BluetoothError::NotFound {
                operation: "get_characteristics",
                kind: AttributeKind::Characteristic,
            })
        );
        assert_eq!(
            ensure_found(Vec::<u8>::new(), &[], "get_characteristics", AttributeKind::Characteristic),
            Ok(vec![])
        );
    }
}

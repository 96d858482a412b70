//! Web Bluetooth style object model for Bluetooth Low Energy
//!
//! Devices, GATT servers, services, characteristics and descriptors are
//! exposed as async objects, while all radio I/O is delegated to a pluggable
//! adapter:
//! - BlueZ through `bluer` ([`adapter::BluerAdapter`])
//! - A simulated peripheral set for tests ([`adapter::MockAdapter`])

pub mod adapter;
pub mod config;
pub mod core;
pub mod gatt;

pub use adapter::{BleAdapter, BluerAdapter, MockAdapter};
pub use self::core::{
    bluetooth::Bluetooth,
    error::{AdapterError, AttributeKind, BluetoothError, BluetoothResult},
    types::{RequestDeviceOptions, ScanFilter, ScanState},
    uuids::{AttributeId, CanonicalUuid, canonicalize},
};
pub use gatt::{Characteristic, Descriptor, Device, GattServer, Service};

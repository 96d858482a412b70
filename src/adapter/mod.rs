//! BLE adapter abstraction layer

pub mod ble_adapter;
pub mod bluer_adapter;
pub mod mock_adapter;
pub mod registry;

pub use ble_adapter::{BleAdapter, DisconnectHandler, ScanReceiver};
pub use bluer_adapter::BluerAdapter;
pub use mock_adapter::{MockAdapter, MockCharacteristic, MockDescriptor, MockPeripheral, MockService};
pub use registry::AdapterRegistry;

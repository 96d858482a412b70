//! Main Bluetooth facade

use std::{sync::Arc, time::Duration};

use crate::{
    adapter::BleAdapter,
    config::Settings,
    core::{
        context::Context,
        error::BluetoothResult,
        scanner::{DEFAULT_SCAN_TIME, ScanController},
        types::{RequestDeviceOptions, ScanState},
    },
    gatt::Device,
};

/// Main Bluetooth facade
///
/// Owns one context (adapter registry plus notification router) and the scan
/// controller running against it. Independent `Bluetooth` values share
/// nothing.
pub struct Bluetooth<A: BleAdapter> {
    context: Arc<Context<A>>,
    scanner: ScanController<A>,
}

impl<A: BleAdapter> Bluetooth<A> {
    pub fn new() -> Self {
        Self::with_scan_time(DEFAULT_SCAN_TIME)
    }

    pub fn with_settings(settings: &Settings) -> Self {
        Self::with_scan_time(settings.default_scan_time)
    }

    fn with_scan_time(default_scan_time: Duration) -> Self {
        let context = Arc::new(Context::new());
        let scanner = ScanController::new(context.clone(), default_scan_time);
        Self { context, scanner }
    }

    /// Initialise `adapter` and make it the active one
    pub async fn register_adapter(&self, name: impl Into<String>, adapter: A) -> BluetoothResult<()> {
        self.context.adapters().register(name, adapter).await
    }

    pub async fn adapter_name(&self) -> Option<String> {
        self.context.adapters().active_name().await
    }

    /// First device matching `options`
    pub async fn request_device(&self, options: &RequestDeviceOptions) -> BluetoothResult<Device<A>> {
        let record = self.scanner.request_device(options).await?;
        Ok(Device::from_record(self.context.clone(), record))
    }

    /// Every device matching `options` within the scan window
    pub async fn request_devices(&self, options: &RequestDeviceOptions) -> BluetoothResult<Vec<Device<A>>> {
        let records = self.scanner.request_devices(options).await?;
        Ok(records
            .into_iter()
            .map(|record| Device::from_record(self.context.clone(), record))
            .collect())
    }

    pub async fn scan_state(&self) -> ScanState {
        self.scanner.state().await
    }

    /// Reset the scan state to idle
    pub async fn reset_scan(&self) {
        self.scanner.reset().await;
    }

    pub fn context(&self) -> &Arc<Context<A>> {
        &self.context
    }
}

impl<A: BleAdapter> Default for Bluetooth<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{MockAdapter, MockCharacteristic, MockPeripheral, MockService},
        core::{
            error::BluetoothError,
            types::ScanFilter,
            uuids::{CanonicalUuid, canonicalize},
        },
    };
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn heart_rate_monitor() -> MockPeripheral {
        MockPeripheral::new("c0:ff:ee:00:00:01")
            .name("Polar H7")
            .advertising("180d")
            .rssi(-58)
            .advertise_after(Duration::from_millis(120))
            .service(
                MockService::primary(CanonicalUuid::from_alias(0x180d)).characteristic(
                    MockCharacteristic::new(CanonicalUuid::from_alias(0x2a37), &["notify"]),
                ),
            )
    }

    async fn bluetooth(adapter: &MockAdapter) -> Bluetooth<MockAdapter> {
        let bluetooth = Bluetooth::new();
        bluetooth
            .register_adapter("mock", adapter.clone())
            .await
            .unwrap();
        bluetooth
    }

    #[tokio::test]
    async fn test_request_before_registration() {
        let bluetooth: Bluetooth<MockAdapter> = Bluetooth::new();

        let err = assert_err!(bluetooth.request_device(&RequestDeviceOptions::new()).await);
        assert_eq!(err, BluetoothError::NoAdapter);
        assert_eq!(bluetooth.adapter_name().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_scenario() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_monitor()).await;
        let bluetooth = bluetooth(&adapter).await;

        let filter = ScanFilter::services(["heart_rate"]);
        assert_eq!(
            canonicalize("heart_rate").unwrap().to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );

        let device = assert_ok!(
            bluetooth
                .request_device(&RequestDeviceOptions::new().with_filter(filter))
                .await
        );
        assert_eq!(device.name(), Some("Polar H7"));
        assert_eq!(device.ad_data().rssi, Some(-58));
        assert_eq!(bluetooth.scan_state().await, ScanState::Found);

        let server = assert_ok!(device.connect_gatt().await);
        let service = assert_ok!(server.get_primary_service("heart_rate").await);
        let characteristic = assert_ok!(service.get_characteristic("heart_rate_measurement").await);
        assert_eq!(
            characteristic.uuid().to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );

        let beats = Arc::new(Mutex::new(Vec::new()));
        let sink = beats.clone();
        assert_ok!(
            characteristic
                .start_notifications(move |value: &[u8]| sink.lock().unwrap().push(value[1]))
                .await
        );
        adapter
            .emit_notification(characteristic.uuid(), &[0x06, 72])
            .await;
        adapter
            .emit_notification(characteristic.uuid(), &[0x06, 75])
            .await;
        assert_eq!(*beats.lock().unwrap(), vec![72, 75]);

        assert_ok!(server.disconnect().await);
        assert!(!server.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_devices_wraps_every_record() {
        let adapter = MockAdapter::new();
        adapter.add_peripheral(heart_rate_monitor()).await;
        // Same peripheral advertising twice surfaces twice
        adapter.add_peripheral(heart_rate_monitor()).await;
        adapter
            .add_peripheral(MockPeripheral::new("c0:ff:ee:00:00:02").advertising("180d"))
            .await;
        let bluetooth = bluetooth(&adapter).await;

        let options = RequestDeviceOptions::new()
            .with_filter(ScanFilter::services([0x180du16]))
            .with_scan_time(Duration::from_secs(1));
        let devices = assert_ok!(bluetooth.request_devices(&options).await);

        let ids: Vec<_> = devices.iter().map(|d| d.id()).collect();
        assert_eq!(
            ids,
            vec!["c0:ff:ee:00:00:02", "c0:ff:ee:00:00:01", "c0:ff:ee:00:00:01"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_scan_time_applies() {
        let adapter = MockAdapter::new();
        let settings = Settings {
            default_scan_time: Duration::from_millis(500),
            ..Settings::default()
        };
        let bluetooth = Bluetooth::with_settings(&settings);
        bluetooth
            .register_adapter("mock", adapter.clone())
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let err = assert_err!(bluetooth.request_devices(&RequestDeviceOptions::new()).await);

        assert_eq!(
            err.to_string(),
            "request_devices error: no devices found"
        );
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(bluetooth.scan_state().await, ScanState::TimedOut);

        bluetooth.reset_scan().await;
        assert_eq!(bluetooth.scan_state().await, ScanState::Idle);
    }
}

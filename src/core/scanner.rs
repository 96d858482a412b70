//! Device scanning with state machine

use std::{sync::Arc, time::Duration};

use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    adapter::BleAdapter,
    core::{
        context::Context,
        error::{BluetoothError, BluetoothResult},
        types::{DeviceRecord, RequestDeviceOptions, ScanState},
    },
};

/// Scan window used when the request options carry none
pub const DEFAULT_SCAN_TIME: Duration = Duration::from_millis(10_240);

/// Scan state machine
///
/// Manages the state transitions of one context's device scans
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    found: usize,
    error: Option<String>,
    /// Stop task left behind by a dropped scan
    cleanup: Option<JoinHandle<()>>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            found: 0,
            error: None,
            cleanup: None,
        }
    }

    fn start_scan(&mut self, operation: &'static str) -> BluetoothResult<()> {
        if !self.state.is_idle() {
            return Err(BluetoothError::ScanInProgress { operation });
        }
        self.state = ScanState::Scanning;
        self.found = 0;
        self.error = None;
        Ok(())
    }

    fn complete_scan(&mut self, found: usize) {
        self.state = ScanState::Found;
        self.found = found;
    }

    fn time_out(&mut self) {
        self.state = ScanState::TimedOut;
        self.found = 0;
    }

    fn fail_scan(&mut self, error: String) {
        self.state = ScanState::Error;
        self.error = Some(error);
        self.found = 0;
    }

    fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.found = 0;
        self.error = None;
    }

    fn state(&self) -> ScanState {
        self.state
    }
}

/// Stops the adapter scan and returns the state machine to idle when a scan
/// future is dropped before its window closes
struct ScanGuard<A: BleAdapter> {
    adapter: Option<Arc<A>>,
    state_machine: Arc<RwLock<ScanStateMachine>>,
}

impl<A: BleAdapter> ScanGuard<A> {
    fn new(adapter: Arc<A>, state_machine: Arc<RwLock<ScanStateMachine>>) -> Self {
        Self {
            adapter: Some(adapter),
            state_machine,
        }
    }

    /// The scan reached its normal end
    fn disarm(&mut self) {
        self.adapter = None;
    }
}

impl<A: BleAdapter> Drop for ScanGuard<A> {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Scan dropped outside a runtime, adapter scan left running");
            return;
        };

        warn!("Scan dropped before its window closed, stopping adapter scan");
        let state_machine = self.state_machine.clone();
        let task = runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
            state_machine.write().await.reset();
        });
        // The state stays Scanning until the stop completes
        if let Ok(mut state_machine) = self.state_machine.try_write() {
            state_machine.cleanup = Some(task);
        }
    }
}

/// How many matching devices end a scan early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Resolve with the first match
    First,
    /// Collect every match until the window closes
    All,
}

/// Device scanning controller
///
/// Runs one scan at a time against the context's active adapter.
pub struct ScanController<A: BleAdapter> {
    context: Arc<Context<A>>,
    default_scan_time: Duration,
    state_machine: Arc<RwLock<ScanStateMachine>>,
}

impl<A: BleAdapter> ScanController<A> {
    pub fn new(context: Arc<Context<A>>, default_scan_time: Duration) -> Self {
        Self {
            context,
            default_scan_time,
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
        }
    }

    /// Scan until the first matching device is reported
    ///
    /// The adapter scan is stopped as soon as a device matches. Fails with
    /// [`BluetoothError::NoDevicesFound`] once the scan window elapses.
    pub async fn request_device(&self, options: &RequestDeviceOptions) -> BluetoothResult<DeviceRecord> {
        let mut found = self.scan("request_device", options, ScanMode::First).await?;
        // scan() never returns an empty list
        found.pop().ok_or(BluetoothError::NoDevicesFound {
            operation: "request_device",
        })
    }

    /// Scan for the whole window and return every matching device in
    /// discovery order
    ///
    /// Repeats reported by the adapter are kept.
    pub async fn request_devices(&self, options: &RequestDeviceOptions) -> BluetoothResult<Vec<DeviceRecord>> {
        self.scan("request_devices", options, ScanMode::All).await
    }

    pub async fn state(&self) -> ScanState {
        self.state_machine.read().await.state()
    }

    /// Error message of the last failed scan
    pub async fn last_error(&self) -> Option<String> {
        self.state_machine.read().await.error.clone()
    }

    /// Number of devices the last scan resolved with
    pub async fn last_found(&self) -> usize {
        self.state_machine.read().await.found
    }

    /// Reset the scan state to idle
    ///
    /// Dropped scans clean up after themselves; this forces the state back
    /// without stopping the adapter.
    pub async fn reset(&self) {
        self.state_machine.write().await.reset();
    }

    async fn scan(
        &self,
        operation: &'static str,
        options: &RequestDeviceOptions,
        mode: ScanMode,
    ) -> BluetoothResult<Vec<DeviceRecord>> {
        let service_uuids = options.service_uuids()?;
        let adapter = self.context.adapter().await?;

        let pending = self.state_machine.write().await.cleanup.take();
        if let Some(task) = pending {
            debug!("Waiting for a dropped scan to stop");
            if let Err(e) = task.await {
                warn!("Stop task of a dropped scan failed: {}", e);
            }
        }
        self.state_machine.write().await.start_scan(operation)?;

        let mut receiver = match adapter.start_scan(&service_uuids).await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.state_machine.write().await.fail_scan(e.to_string());
                return Err(BluetoothError::adapter(operation)(e));
            }
        };
        let mut guard = ScanGuard::new(adapter.clone(), self.state_machine.clone());

        let scan_time = options.scan_time.unwrap_or(self.default_scan_time);
        info!(
            "Scanning for {:?} ({} service filters)",
            scan_time,
            service_uuids.len()
        );

        let deadline = tokio::time::sleep(scan_time);
        tokio::pin!(deadline);

        let mut found = Vec::new();
        let mut reporting = true;
        loop {
            tokio::select! {
                record = receiver.recv(), if reporting => match record {
                    Some(record) if options.accepts(&record) => {
                        debug!("Device found: {} ({:?})", record.id, record.name);
                        found.push(record);
                        if mode == ScanMode::First {
                            break;
                        }
                    }
                    Some(record) => debug!("Device {} rejected by name filters", record.id),
                    // Adapter stopped reporting; the window still runs out
                    None => reporting = false,
                },
                () = &mut deadline => break,
            }
        }
        drop(receiver);
        guard.disarm();

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let mut state_machine = self.state_machine.write().await;
        if found.is_empty() {
            info!("Scan window elapsed without a matching device");
            state_machine.time_out();
            return Err(BluetoothError::NoDevicesFound { operation });
        }
        info!("Scan finished with {} device(s)", found.len());
        state_machine.complete_scan(found.len());
        Ok(found)
    }
}

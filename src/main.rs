//! webble - scan for a BLE device and walk its GATT tree

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webble::{
    Bluetooth, BluetoothResult, BluerAdapter, CanonicalUuid, Device,
    config::{CliArgs, Settings},
    core::types::{AdvertisementData, VendorInfo},
};

/// JSON shape of a found device
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary<'a> {
    id: &'a str,
    name: Option<&'a str>,
    uuids: &'a [CanonicalUuid],
    ad_data: &'a AdvertisementData,
    paired: bool,
    device_class: Option<u32>,
    vendor: Option<&'a VendorInfo>,
}

impl<'a> From<&'a Device<BluerAdapter>> for DeviceSummary<'a> {
    fn from(device: &'a Device<BluerAdapter>) -> Self {
        DeviceSummary {
            id: device.id(),
            name: device.name(),
            uuids: device.uuids(),
            ad_data: device.ad_data(),
            paired: device.paired(),
            device_class: device.device_class(),
            vendor: device.vendor(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,webble=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting webble");
    let settings = Settings::from(args);

    let bluetooth = Bluetooth::with_settings(&settings);
    let adapter_name = settings.adapter.clone().unwrap_or_else(|| "bluez".to_string());
    bluetooth
        .register_adapter(adapter_name, BluerAdapter::new(settings.adapter.clone()))
        .await?;

    tokio::select! {
        result = run(&bluetooth, &settings) => {
            if let Err(e) = result {
                error!("{}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down");
        }
    }

    Ok(())
}

async fn run(bluetooth: &Bluetooth<BluerAdapter>, settings: &Settings) -> BluetoothResult<()> {
    let devices = if settings.all {
        bluetooth.request_devices(&settings.options).await?
    } else {
        vec![bluetooth.request_device(&settings.options).await?]
    };

    for device in &devices {
        print_device(device, settings.json);
        if settings.connect {
            if let Err(e) = walk(device).await {
                warn!("Skipping {}: {}", device.id(), e);
            }
        }
    }
    Ok(())
}

fn print_device(device: &Device<BluerAdapter>, json: bool) {
    if json {
        match serde_json::to_string(&DeviceSummary::from(device)) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Cannot encode {}: {}", device.id(), e),
        }
        return;
    }

    println!(
        "{} {} rssi={}",
        device.id(),
        device.name().unwrap_or("<unnamed>"),
        device
            .ad_data()
            .rssi
            .map_or_else(|| "-".to_string(), |rssi| rssi.to_string())
    );
    for uuid in device.uuids() {
        println!("  advertises {uuid}");
    }
    for (company, data) in &device.ad_data().manufacturer_data {
        println!("  manufacturer {company:#06x}: {}", hex::encode(data));
    }
}

/// Connect and print every primary service, characteristic and descriptor
async fn walk(device: &Device<BluerAdapter>) -> BluetoothResult<()> {
    let server = device.connect_gatt().await?;

    for service in server.get_primary_services(None).await? {
        println!("  service {}", service.uuid());
        for characteristic in service.get_characteristics(None).await? {
            let properties = characteristic.properties();
            let value = if properties.read {
                match characteristic.read_value().await {
                    Ok(value) => hex::encode(value),
                    Err(e) => e.to_string(),
                }
            } else {
                "-".to_string()
            };
            println!(
                "    characteristic {} [{}] {}",
                characteristic.uuid(),
                properties.names().join(","),
                value
            );
            for descriptor in characteristic.get_descriptors(None).await? {
                println!("      descriptor {}", descriptor.uuid());
            }
        }
    }

    server.disconnect().await
}

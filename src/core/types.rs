//! Domain types shared between the object model and adapters

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    error::{AttributeKind, BluetoothResult},
    uuids::{AttributeId, CanonicalUuid},
};

/// Adapter-opaque reference to a native object
///
/// Adapters hand these out in discovery records and receive them back on
/// every later call. For attributes the handle is the handle-cache key: the
/// canonical UUID, or `characteristicUUID-descriptorUUID` for descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Handle keyed by an attribute UUID
    pub fn for_uuid(uuid: &CanonicalUuid) -> Self {
        Self(uuid.to_string())
    }

    /// Composite handle for a descriptor under its characteristic
    pub fn for_descriptor(characteristic: &CanonicalUuid, descriptor: &CanonicalUuid) -> Self {
        Self(format!("{characteristic}-{descriptor}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Handle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Advertisement data as reported by an adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementRecord {
    pub appearance: Option<u16>,
    pub tx_power: Option<i16>,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Keyed by the UUID string the native stack reported
    pub service_data: HashMap<String, Vec<u8>>,
}

/// Vendor and product identification (device ID profile)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorInfo {
    pub vendor_id_source: String,
    pub vendor_id: u32,
    pub product_id: u32,
    pub product_version: u32,
}

/// A device found while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub handle: Handle,
    pub id: String,
    pub name: Option<String>,
    pub uuids: Vec<String>,
    pub ad_data: AdvertisementRecord,
    pub paired: bool,
    pub device_class: Option<u32>,
    pub vendor: Option<VendorInfo>,
}

impl DeviceRecord {
    /// Record with only identity filled in
    pub fn new(handle: Handle, id: impl Into<String>) -> Self {
        Self {
            handle,
            id: id.into(),
            name: None,
            uuids: Vec::new(),
            ad_data: AdvertisementRecord::default(),
            paired: false,
            device_class: None,
            vendor: None,
        }
    }

    /// Whether the device advertises any of `filter`; an empty filter matches
    /// every device
    ///
    /// Advertised UUIDs that do not parse are ignored.
    pub fn advertises_any(&self, filter: &[CanonicalUuid]) -> bool {
        filter.is_empty()
            || self
                .uuids
                .iter()
                .filter_map(|uuid| CanonicalUuid::parse(uuid).ok())
                .any(|uuid| filter.contains(&uuid))
    }
}

/// A discovered primary or included service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub handle: Handle,
    pub uuid: String,
    pub primary: bool,
}

/// A discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub handle: Handle,
    pub uuid: String,
    /// Subset of [`PROPERTY_NAMES`]
    pub properties: Vec<String>,
}

/// A discovered descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub handle: Handle,
    pub uuid: String,
}

/// Advertisement data with service data keyed by canonical UUID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementData {
    pub appearance: Option<u16>,
    pub tx_power: Option<i16>,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<CanonicalUuid, Vec<u8>>,
}

impl From<AdvertisementRecord> for AdvertisementData {
    fn from(record: AdvertisementRecord) -> Self {
        let service_data = record
            .service_data
            .into_iter()
            .filter_map(|(uuid, data)| match CanonicalUuid::parse(&uuid) {
                Ok(uuid) => Some((uuid, data)),
                Err(e) => {
                    debug!("Dropping service data: {}", e);
                    None
                }
            })
            .collect();

        Self {
            appearance: record.appearance,
            tx_power: record.tx_power,
            rssi: record.rssi,
            manufacturer_data: record.manufacturer_data,
            service_data,
        }
    }
}

/// Property names an adapter may report for a characteristic
pub const PROPERTY_NAMES: [&str; 9] = [
    "broadcast",
    "read",
    "writeWithoutResponse",
    "write",
    "notify",
    "indicate",
    "authenticatedSignedWrites",
    "reliableWrite",
    "writableAuxiliaries",
];

/// Characteristic property flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub reliable_write: bool,
    pub writable_auxiliaries: bool,
}

impl CharacteristicProperties {
    /// Names of the set flags, in [`PROPERTY_NAMES`] order
    pub fn names(&self) -> Vec<&'static str> {
        let flags = [
            self.broadcast,
            self.read,
            self.write_without_response,
            self.write,
            self.notify,
            self.indicate,
            self.authenticated_signed_writes,
            self.reliable_write,
            self.writable_auxiliaries,
        ];
        PROPERTY_NAMES
            .iter()
            .zip(flags)
            .filter_map(|(name, set)| set.then_some(*name))
            .collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for CharacteristicProperties {
    fn from_iter<I: IntoIterator<Item = S>>(names: I) -> Self {
        let mut properties = Self::default();
        for name in names {
            match name.as_ref() {
                "broadcast" => properties.broadcast = true,
                "read" => properties.read = true,
                "writeWithoutResponse" => properties.write_without_response = true,
                "write" => properties.write = true,
                "notify" => properties.notify = true,
                "indicate" => properties.indicate = true,
                "authenticatedSignedWrites" => properties.authenticated_signed_writes = true,
                "reliableWrite" => properties.reliable_write = true,
                "writableAuxiliaries" => properties.writable_auxiliaries = true,
                other => debug!("Ignoring unknown characteristic property: {}", other),
            }
        }
        properties
    }
}

/// Device scan state machine states
///
/// `Found`, `TimedOut` and `Error` are terminal outcomes of the last scan and
/// behave like `Idle`: a new scan may start from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Found,
    TimedOut,
    Error,
}

impl ScanState {
    pub fn is_idle(&self) -> bool {
        !matches!(self, ScanState::Scanning)
    }
}

/// One entry of [`RequestDeviceOptions::filters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanFilter {
    /// Service UUIDs or alias names, passed to the adapter's scan filter
    pub services: Vec<AttributeId>,
    /// Exact advertised name
    pub name: Option<String>,
    /// Advertised name prefix
    pub name_prefix: Option<String>,
}

impl ScanFilter {
    pub fn services<I, T>(services: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AttributeId>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    fn accepts_name(&self, name: Option<&str>) -> bool {
        let exact = self.name.as_deref().is_none_or(|wanted| name == Some(wanted));
        let prefix = self
            .name_prefix
            .as_deref()
            .is_none_or(|prefix| name.is_some_and(|name| name.starts_with(prefix)));
        exact && prefix
    }
}

/// Options for `request_device` / `request_devices`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDeviceOptions {
    pub filters: Vec<ScanFilter>,
    /// Scan window; the context default applies when absent
    #[serde(with = "millis")]
    pub scan_time: Option<Duration>,
}

impl RequestDeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_scan_time(mut self, scan_time: Duration) -> Self {
        self.scan_time = Some(scan_time);
        self
    }

    /// De-duplicated canonical service UUIDs across all filters, in order
    pub fn service_uuids(&self) -> BluetoothResult<Vec<CanonicalUuid>> {
        let mut uuids = Vec::new();
        for id in self.filters.iter().flat_map(|filter| &filter.services) {
            let uuid = id.resolve(AttributeKind::Service)?;
            if !uuids.contains(&uuid) {
                uuids.push(uuid);
            }
        }
        Ok(uuids)
    }

    /// Applies the name constraints; service matching is left to the adapter
    pub fn accepts(&self, record: &DeviceRecord) -> bool {
        self.filters.is_empty()
            || self
                .filters
                .iter()
                .any(|filter| filter.accepts_name(record.name.as_deref()))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

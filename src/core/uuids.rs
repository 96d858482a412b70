//! UUID canonicalization
//!
//! Every attribute identifier accepted by the object model ends up as a
//! [`CanonicalUuid`]: a 128-bit UUID rendered as lowercase hyphenated text.
//! Accepted shapes:
//! - an assigned-number alias name such as `"heart_rate"`
//! - a 16 or 32-bit numeric alias, given as a number or as 1 to 8 hex digits
//! - 32 hex digits without hyphens
//! - the 36-character hyphenated form, in any letter case

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::{
    assigned_numbers,
    error::{AttributeKind, BluetoothError, BluetoothResult},
};

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`
pub const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// A 128-bit attribute UUID in canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUuid(Uuid);

impl CanonicalUuid {
    /// Expands a 16 or 32-bit alias onto the Bluetooth base UUID
    pub const fn from_alias(alias: u32) -> Self {
        Self(Uuid::from_u128(BASE_UUID | ((alias as u128) << 96)))
    }

    /// Parses one of the textual shapes, without alias-name lookup
    pub fn parse(input: &str) -> BluetoothResult<Self> {
        let invalid = || BluetoothError::InvalidUuid(input.to_string());
        let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());

        match input.len() {
            1..=8 if is_hex(input) => u32::from_str_radix(input, 16)
                .map(Self::from_alias)
                .map_err(|_| invalid()),
            32 if is_hex(input) => u128::from_str_radix(input, 16)
                .map(|value| Self(Uuid::from_u128(value)))
                .map_err(|_| invalid()),
            36 => {
                let groups: Vec<&str> = input.split('-').collect();
                let shape_ok = groups.len() == 5
                    && groups
                        .iter()
                        .zip([8, 4, 4, 4, 12])
                        .all(|(group, len)| group.len() == len && is_hex(group));
                if !shape_ok {
                    return Err(invalid());
                }
                u128::from_str_radix(&groups.concat(), 16)
                    .map(|value| Self(Uuid::from_u128(value)))
                    .map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }

    /// The underlying UUID value
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The 16 or 32-bit alias, if this UUID lies on the Bluetooth base
    pub fn alias(&self) -> Option<u32> {
        let value = self.0.as_u128();
        (value & ((1u128 << 96) - 1) == BASE_UUID).then_some((value >> 96) as u32)
    }
}

impl From<Uuid> for CanonicalUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CanonicalUuid> for Uuid {
    fn from(uuid: CanonicalUuid) -> Self {
        uuid.0
    }
}

impl fmt::Display for CanonicalUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for CanonicalUuid {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CanonicalUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        canonicalize(raw.as_str()).map_err(serde::de::Error::custom)
    }
}

/// An attribute identifier as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeId {
    /// Numeric 16 or 32-bit alias
    Alias(u32),
    /// Alias name or textual UUID
    Name(String),
}

impl AttributeId {
    /// An empty name counts as "no identifier given"
    pub fn is_empty(&self) -> bool {
        matches!(self, AttributeId::Name(name) if name.is_empty())
    }

    /// Resolves against the assigned-number table of `kind`
    pub fn resolve(&self, kind: AttributeKind) -> BluetoothResult<CanonicalUuid> {
        match self {
            AttributeId::Alias(alias) => Ok(CanonicalUuid::from_alias(*alias)),
            AttributeId::Name(name) => match assigned_numbers::lookup(kind, name) {
                Some(alias) => Ok(CanonicalUuid::from_alias(alias.into())),
                None => CanonicalUuid::parse(&name.to_ascii_lowercase()),
            },
        }
    }
}

impl From<&str> for AttributeId {
    fn from(value: &str) -> Self {
        AttributeId::Name(value.to_string())
    }
}

impl From<String> for AttributeId {
    fn from(value: String) -> Self {
        AttributeId::Name(value)
    }
}

impl From<&String> for AttributeId {
    fn from(value: &String) -> Self {
        AttributeId::Name(value.clone())
    }
}

impl From<u16> for AttributeId {
    fn from(value: u16) -> Self {
        AttributeId::Alias(value.into())
    }
}

impl From<u32> for AttributeId {
    fn from(value: u32) -> Self {
        AttributeId::Alias(value)
    }
}

impl From<Uuid> for AttributeId {
    fn from(value: Uuid) -> Self {
        AttributeId::Name(value.hyphenated().to_string())
    }
}

impl From<CanonicalUuid> for AttributeId {
    fn from(value: CanonicalUuid) -> Self {
        AttributeId::Name(value.to_string())
    }
}

/// Canonicalizes any identifier shape
///
/// Alias names are looked up in the service table first, then the
/// characteristic table, then the descriptor table. Use
/// [`AttributeId::resolve`] when the attribute kind is known, since a few
/// names (`current_time`) exist in more than one table.
pub fn canonicalize(id: impl Into<AttributeId>) -> BluetoothResult<CanonicalUuid> {
    let id = id.into();
    if let AttributeId::Name(name) = &id {
        let alias = [
            AttributeKind::Service,
            AttributeKind::Characteristic,
            AttributeKind::Descriptor,
        ]
        .into_iter()
        .find_map(|kind| assigned_numbers::lookup(kind, name));
        if let Some(alias) = alias {
            return Ok(CanonicalUuid::from_alias(alias.into()));
        }
    }
    id.resolve(AttributeKind::Service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEART_RATE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

    #[test]
    fn test_equivalent_shapes_canonicalize_identically() {
        let inputs: Vec<AttributeId> = vec![
            "heart_rate".into(),
            0x180du16.into(),
            0x180du32.into(),
            "180d".into(),
            "180D".into(),
            "0000180d".into(),
            "0000180d00001000800000805f9b34fb".into(),
            "0000180D-0000-1000-8000-00805F9B34FB".into(),
            HEART_RATE.into(),
        ];

        for input in inputs {
            assert_eq!(canonicalize(input.clone()).unwrap().to_string(), HEART_RATE, "{input:?}");
        }
    }

    #[test]
    fn test_idempotent() {
        for input in ["heart_rate", "2a37", "d69a37ee1d8a4329bd2425db4af3c865"] {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(once.to_string()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        for input in [
            "",
            "xyz",
            "123456789",
            "0000180d-0000-1000-8000-00805f9b34f",
            "0000180d+0000-1000-8000-00805f9b34fb",
            "0000180d0000100080000080zf9b34fb",
            "not_a_known_service_name",
        ] {
            assert!(
                matches!(canonicalize(input), Err(BluetoothError::InvalidUuid(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_kind_specific_lookup() {
        let id = AttributeId::from("current_time");
        assert_eq!(
            id.resolve(AttributeKind::Service).unwrap(),
            CanonicalUuid::from_alias(0x1805)
        );
        assert_eq!(
            id.resolve(AttributeKind::Characteristic).unwrap(),
            CanonicalUuid::from_alias(0x2a2b)
        );
        assert_eq!(
            AttributeId::from("gatt.client_characteristic_configuration")
                .resolve(AttributeKind::Descriptor)
                .unwrap()
                .to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_alias_extraction() {
        assert_eq!(CanonicalUuid::from_alias(0x2a37).alias(), Some(0x2a37));
        assert_eq!(
            canonicalize("d69a37ee-1d8a-4329-bd24-25db4af3c865")
                .unwrap()
                .alias(),
            None
        );
    }

    #[test]
    fn test_serde_accepts_aliases() {
        let uuid: CanonicalUuid = serde_json::from_str(r#""battery_service""#).unwrap();
        assert_eq!(uuid, CanonicalUuid::from_alias(0x180f));
        assert_eq!(
            serde_json::to_string(&uuid).unwrap(),
            r#""0000180f-0000-1000-8000-00805f9b34fb""#
        );
    }
}

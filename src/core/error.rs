//! Error types for the Web Bluetooth object model

use std::fmt;

use thiserror::Error;

use super::types::Handle;

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for object model operations
pub type BluetoothResult<T> = Result<T, BluetoothError>;

/// Errors reported by an adapter implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("adapter not enabled")]
    NotEnabled,

    #[error("unknown handle: {0}")]
    UnknownHandle(Handle),

    #[error("notify failed to {}", notify_verb(.expected_enabled))]
    NotifyStateMismatch { expected_enabled: bool },

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("{0}")]
    Native(String),
}

fn notify_verb(enabled: &bool) -> &'static str {
    if *enabled { "enable" } else { "disable" }
}

impl From<bluer::Error> for AdapterError {
    fn from(err: bluer::Error) -> Self {
        AdapterError::Native(err.to_string())
    }
}

/// Kind of GATT attribute an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Service,
    Characteristic,
    Descriptor,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttributeKind::Service => "service",
            AttributeKind::Characteristic => "characteristic",
            AttributeKind::Descriptor => "descriptor",
        })
    }
}

/// Errors surfaced to callers of the object model
///
/// Every variant carrying an adapter error is prefixed with the name of the
/// operation that failed, so the message alone identifies the call site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BluetoothError {
    #[error("invalid UUID: {0:?}")]
    InvalidUuid(String),

    #[error("no adapter registered")]
    NoAdapter,

    #[error("{operation} error: no {kind} specified")]
    MissingArgument {
        operation: &'static str,
        kind: AttributeKind,
    },

    #[error("{operation} error: {kind} not found")]
    NotFound {
        operation: &'static str,
        kind: AttributeKind,
    },

    #[error("{operation} error: no devices found")]
    NoDevicesFound { operation: &'static str },

    #[error("{operation} error: scan already in progress")]
    ScanInProgress { operation: &'static str },

    #[error("connect_gatt error: {0}")]
    Connection(#[source] AdapterError),

    #[error("{operation} error: {source}")]
    Adapter {
        operation: &'static str,
        #[source]
        source: AdapterError,
    },

    #[error("read_value error: {0}")]
    Read(#[source] AdapterError),

    #[error("write_value error: {0}")]
    Write(#[source] AdapterError),

    #[error("start_notifications error: {0}")]
    NotifyEnable(#[source] AdapterError),

    #[error("stop_notifications error: {0}")]
    NotifyDisable(#[source] AdapterError),
}

impl BluetoothError {
    /// Wraps an adapter error with the failing operation name
    pub(crate) fn adapter(operation: &'static str) -> impl FnOnce(AdapterError) -> Self {
        move |source| BluetoothError::Adapter { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_messages_carry_operation_prefix() {
        let err = BluetoothError::NotFound {
            operation: "get_primary_service",
            kind: AttributeKind::Service,
        };
        assert_eq!(err.to_string(), "get_primary_service error: service not found");

        let err = BluetoothError::adapter("get_characteristics")(AdapterError::Native(
            "link lost".into(),
        ));
        assert_eq!(err.to_string(), "get_characteristics error: link lost");

        let err = BluetoothError::Connection(AdapterError::NotEnabled);
        assert_eq!(err.to_string(), "connect_gatt error: adapter not enabled");
    }

    #[test]
    fn test_notify_mismatch_message() {
        assert_eq!(
            AdapterError::NotifyStateMismatch {
                expected_enabled: true
            }
            .to_string(),
            "notify failed to enable"
        );
        assert_eq!(
            BluetoothError::NotifyDisable(AdapterError::NotifyStateMismatch {
                expected_enabled: false
            })
            .to_string(),
            "stop_notifications error: notify failed to disable"
        );
    }
}

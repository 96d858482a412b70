//! Routing of characteristic value-change notifications

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::RwLock;
use tracing::debug;

use super::uuids::CanonicalUuid;

/// Callback invoked with the raw bytes of each notification
pub type NotificationCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Registry of active notification subscriptions
///
/// Holds at most one callback per characteristic UUID. Subscribing again
/// replaces the previous callback.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    subscriptions: Arc<RwLock<HashMap<CanonicalUuid, NotificationCallback>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`, returning `true` if it replaced another one
    pub async fn subscribe(&self, uuid: CanonicalUuid, callback: NotificationCallback) -> bool {
        let replaced = self
            .subscriptions
            .write()
            .await
            .insert(uuid, callback)
            .is_some();
        if replaced {
            debug!("Notification callback for {} replaced", uuid);
        }
        replaced
    }

    /// Removes the subscription, returning `true` if one existed
    pub async fn unsubscribe(&self, uuid: &CanonicalUuid) -> bool {
        self.subscriptions.write().await.remove(uuid).is_some()
    }

    pub async fn is_subscribed(&self, uuid: &CanonicalUuid) -> bool {
        self.subscriptions.read().await.contains_key(uuid)
    }

    /// Delivers a value change to the subscribed callback
    ///
    /// Plain read results (`is_notification == false`) and values for
    /// characteristics without a subscription are dropped. Returns whether a
    /// callback ran.
    pub async fn dispatch(&self, uuid: &CanonicalUuid, value: &[u8], is_notification: bool) -> bool {
        if !is_notification {
            return false;
        }

        let callback = self.subscriptions.read().await.get(uuid).cloned();
        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => {
                debug!("Dropping notification for {} ({} bytes)", uuid, value.len());
                false
            }
        }
    }

    /// A sink bound to one characteristic, handed to the adapter
    pub fn sink(&self, uuid: CanonicalUuid) -> NotificationSink {
        NotificationSink {
            router: self.clone(),
            uuid,
        }
    }
}

impl fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRouter").finish_non_exhaustive()
    }
}

/// Where an adapter pushes value changes for one characteristic
#[derive(Clone, Debug)]
pub struct NotificationSink {
    router: NotificationRouter,
    uuid: CanonicalUuid,
}

impl NotificationSink {
    pub fn uuid(&self) -> &CanonicalUuid {
        &self.uuid
    }

    /// Reports a native "value changed" event
    pub async fn value_changed(&self, value: &[u8], is_notification: bool) -> bool {
        self.router.dispatch(&self.uuid, value, is_notification).await
    }
}

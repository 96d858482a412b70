//! Per-adapter handle cache
//!
//! Maps handle keys to native objects. An entry is stored at most once per
//! key: repeated discovery of the same attribute keeps the first native
//! object. Lookups never trigger discovery, so callers must discover an
//! attribute before reading or writing it.
//!
//! Entries live as long as the adapter. Nothing is evicted on disconnect,
//! which means a later device exposing the same service UUID resolves to the
//! first device's native service.

use std::collections::HashMap;

use tracing::debug;

use super::{
    error::{AdapterError, AdapterResult},
    types::Handle,
};

/// Cache of native objects of one kind
#[derive(Debug)]
pub struct HandleCache<T> {
    entries: HashMap<Handle, T>,
}

impl<T> HandleCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Stores `native` unless the key is already cached
    ///
    /// Returns `true` when the entry was inserted.
    pub fn insert_if_absent(&mut self, handle: Handle, native: T) -> bool {
        if self.entries.contains_key(&handle) {
            debug!("Handle already cached: {}", handle);
            return false;
        }
        self.entries.insert(handle, native);
        true
    }

    pub fn get(&self, handle: &Handle) -> Option<&T> {
        self.entries.get(handle)
    }

    /// Like [`get`](Self::get) but reports a missing entry as an adapter error
    pub fn lookup(&self, handle: &Handle) -> AdapterResult<&T> {
        self.entries
            .get(handle)
            .ok_or_else(|| AdapterError::UnknownHandle(handle.clone()))
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for HandleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The four caches an adapter keeps for one session
#[derive(Debug)]
pub struct AdapterHandles<D, S, C, Ds> {
    pub devices: HandleCache<D>,
    pub services: HandleCache<S>,
    pub characteristics: HandleCache<C>,
    pub descriptors: HandleCache<Ds>,
}

impl<D, S, C, Ds> Default for AdapterHandles<D, S, C, Ds> {
    fn default() -> Self {
        Self {
            devices: HandleCache::new(),
            services: HandleCache::new(),
            characteristics: HandleCache::new(),
            descriptors: HandleCache::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::uuids::CanonicalUuid;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_first_insert_wins() {
        let mut cache = HandleCache::new();
        let handle = Handle::for_uuid(&CanonicalUuid::from_alias(0x180d));

        assert!(cache.insert_if_absent(handle.clone(), "first"));
        assert!(!cache.insert_if_absent(handle.clone(), "second"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&handle), Some(&"first"));
    }

    #[test]
    fn test_lookup_never_discovers() {
        let cache: HandleCache<u8> = HandleCache::new();
        let handle = Handle::from("missing");

        assert_eq!(
            cache.lookup(&handle),
            Err(AdapterError::UnknownHandle(handle.clone()))
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_descriptor_keys_are_per_characteristic() {
        let mut handles: AdapterHandles<(), (), (), &str> = AdapterHandles::default();
        let cccd = CanonicalUuid::from_alias(0x2902);

        let a = Handle::for_descriptor(&CanonicalUuid::from_alias(0x2a37), &cccd);
        let b = Handle::for_descriptor(&CanonicalUuid::from_alias(0x2a19), &cccd);
        assert!(handles.descriptors.insert_if_absent(a.clone(), "hr"));
        assert!(handles.descriptors.insert_if_absent(b.clone(), "battery"));

        assert_eq!(handles.descriptors.lookup(&a), Ok(&"hr"));
        assert_eq!(handles.descriptors.lookup(&b), Ok(&"battery"));
    }
}

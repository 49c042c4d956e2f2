//! Per-request storage keyed by filter identity.
//!
//! The host owns one [`RequestScope`] per logical request and drops it when
//! the request ends. Each filter instance stores its bridge under its own
//! [`FilterKey`], so two filters on the same request never share a bridge.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{plog_trace, Error, Result};

/// Opaque identity of one filter instance, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterKey(Uuid);

impl FilterKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for FilterKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FilterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Item = Box<dyn Any + Send + Sync>;

/// Request-scoped associative storage.
#[derive(Default)]
pub struct RequestScope {
    items: Mutex<HashMap<FilterKey, Item>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, HashMap<FilterKey, Item>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the value stored under `key`, creating it with `init` on first use.
    ///
    /// Values are handed out by clone, so store handles (like a bridge), not
    /// data that should be unique.
    pub fn get_or_insert_with<T, F>(&self, key: FilterKey, init: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut items = self.items();
        let item = items.entry(key).or_insert_with(|| {
            plog_trace!("request scope: creating entry {}", key.short());
            Box::new(init())
        });
        item.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| Error::ScopeTypeMismatch {
                key: key.to_string(),
            })
    }

    pub fn get<T>(&self, key: FilterKey) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.items().get(&key) {
            None => Ok(None),
            Some(item) => item
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::ScopeTypeMismatch {
                    key: key.to_string(),
                }),
        }
    }

    pub fn contains(&self, key: FilterKey) -> bool {
        self.items().contains_key(&key)
    }

    /// Drop the entry under `key`; returns whether one existed.
    pub fn remove(&self, key: FilterKey) -> bool {
        self.items().remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn clear(&self) {
        self.items().clear();
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("entries", &self.len())
            .finish()
    }
}

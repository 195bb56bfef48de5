//! The SharedStore abstraction
//!
//! A minimal façade over a real-time key/value store with per-leaf
//! last-write-wins writes and change notification. The delivery
//! contract is weak on purpose: subscribers may see events reordered or
//! duplicated, and must absorb both. No cross-path transactions exist;
//! higher layers coordinate through field-level ownership and
//! idempotent reducers instead.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreResult;

/// Opaque handle identifying one live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equality filter on one field of a child record
///
/// The equivalent of `orderByChild(field).equalTo(value)`: a child
/// matches when its `field` leaf equals `equals` exactly.
#[derive(Debug, Clone)]
pub struct ChildFilter {
    pub field: String,
    pub equals: Value,
}

impl ChildFilter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: value.into(),
        }
    }

    /// Whether the given child value matches this filter
    pub fn matches(&self, child: &Value) -> bool {
        child.get(&self.field) == Some(&self.equals)
    }
}

/// Read/write/subscribe façade over the external real-time store.
///
/// Semantics every implementation must provide:
///
/// - `write` replaces the whole subtree at `path`; `update` merges leaf
///   fields into the object at `path`, creating it if absent.
/// - Value subscriptions deliver the current value (if any) on
///   subscribe, then a value for every write touching the path.
///   Deliveries are at-least-once and may repeat an unchanged value.
/// - Child subscriptions replay existing matching children on
///   subscribe, then fire once per newly added direct child. Later
///   mutations of an already-delivered child do not refire.
/// - `new_id` returns a fresh push key; keys allocated later sort
///   lexicographically after keys allocated earlier.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Replace the value at `path`
    async fn write(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge `fields` into the object at `path`
    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Read the value at `path`, if any
    async fn read(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Read the direct children of `path`, optionally filtered
    async fn query_children(
        &self,
        path: &str,
        filter: Option<&ChildFilter>,
    ) -> StoreResult<Vec<(String, Value)>>;

    /// Subscribe to the value at `path`
    async fn subscribe_value(
        &self,
        path: &str,
    ) -> StoreResult<(SubscriptionHandle, mpsc::UnboundedReceiver<Value>)>;

    /// Subscribe to children added under `path`
    async fn subscribe_child_added(
        &self,
        path: &str,
        filter: Option<ChildFilter>,
    ) -> StoreResult<(SubscriptionHandle, mpsc::UnboundedReceiver<(String, Value)>)>;

    /// Cancel a subscription; a no-op for unknown handles
    async fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Allocate a fresh push key under `path`
    fn new_id(&self, path: &str) -> String;
}

/// Typed helpers over the raw JSON surface of [`SharedStore`]
#[async_trait]
pub trait SharedStoreExt: SharedStore {
    /// Read and decode the record at `path`
    async fn read_record<T>(&self, path: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.read(path).await? {
            Some(value) if !value.is_null() => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }

    /// Encode and write the record at `path`
    async fn write_record<T>(&self, path: &str, record: &T) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        self.write(path, serde_json::to_value(record)?).await
    }

    /// Merge a list of named fields into the object at `path`
    async fn update_fields(&self, path: &str, fields: Vec<(&str, Value)>) -> StoreResult<()> {
        let mut map = Map::new();
        for (name, value) in fields {
            map.insert(name.to_string(), value);
        }
        self.update(path, map).await
    }
}

impl<S: SharedStore + ?Sized> SharedStoreExt for S {}

//! In-memory SharedStore implementation
//!
//! A single-process store holding a nested JSON tree. It is the
//! reference implementation of the [`SharedStore`] delivery contract
//! and what the integration tests run two clients against: both parties
//! share one `Arc<MemoryStore>` and observe each other's writes through
//! their subscriptions, exactly as they would through a hosted
//! real-time database.
//!
//! Notification fan-out is deliberately chatty: a value subscription
//! fires for any write touching its path, including writes that leave
//! the subscribed leaf unchanged. Consumers must absorb duplicates, and
//! this store makes sure they get some.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::store::{ChildFilter, SharedStore, SubscriptionHandle};

struct ValueSub {
    path: String,
    tx: mpsc::UnboundedSender<Value>,
}

struct ChildSub {
    path: String,
    filter: Option<ChildFilter>,
    tx: mpsc::UnboundedSender<(String, Value)>,
    /// Keys already delivered; child_added fires once per child
    seen: HashSet<String>,
}

/// In-process [`SharedStore`] over a nested JSON tree
pub struct MemoryStore {
    root: RwLock<Value>,
    value_subs: Mutex<HashMap<SubscriptionHandle, ValueSub>>,
    child_subs: Mutex<HashMap<SubscriptionHandle, ChildSub>>,
    next_push: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            value_subs: Mutex::new(HashMap::new()),
            child_subs: Mutex::new(HashMap::new()),
            next_push: AtomicU64::new(1),
        }
    }

    fn segments(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Whether one path lies on the other's branch of the tree
    fn related(a: &str, b: &str) -> bool {
        let a = Self::segments(a);
        let b = Self::segments(b);
        let len = a.len().min(b.len());
        a[..len] == b[..len]
    }

    fn get_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = root;
        for segment in Self::segments(path) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    fn object_at<'a>(root: &'a mut Value, path: &str) -> &'a mut Map<String, Value> {
        let mut current = root;
        for segment in Self::segments(path) {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just coerced to object")
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current.as_object_mut().expect("just coerced to object")
    }

    fn set_at(root: &mut Value, path: &str, value: Value) {
        let segments = Self::segments(path);
        match segments.split_last() {
            Some((leaf, parents)) => {
                let parent_path = parents.join("/");
                let parent = Self::object_at(root, &parent_path);
                parent.insert((*leaf).to_string(), value);
            }
            None => *root = value,
        }
    }

    /// Fan a change at `changed_path` out to every affected subscriber
    fn notify(&self, changed_path: &str) {
        let root = self.root.read();

        let mut value_subs = self.value_subs.lock();
        value_subs.retain(|handle, sub| {
            if !Self::related(&sub.path, changed_path) {
                return true;
            }
            let payload = Self::get_at(&root, &sub.path)
                .cloned()
                .unwrap_or(Value::Null);
            trace!(%handle, path = %sub.path, "value notification");
            sub.tx.send(payload).is_ok()
        });
        drop(value_subs);

        let mut child_subs = self.child_subs.lock();
        child_subs.retain(|handle, sub| {
            if !Self::related(&sub.path, changed_path) {
                return true;
            }
            let children = match Self::get_at(&root, &sub.path).and_then(Value::as_object) {
                Some(map) => map,
                None => return true,
            };
            for (key, child) in children {
                if sub.seen.contains(key) {
                    continue;
                }
                if let Some(filter) = &sub.filter {
                    if !filter.matches(child) {
                        continue;
                    }
                }
                sub.seen.insert(key.clone());
                trace!(%handle, path = %sub.path, child = %key, "child notification");
                if sub.tx.send((key.clone(), child.clone())).is_err() {
                    return false;
                }
            }
            true
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn write(&self, path: &str, value: Value) -> StoreResult<()> {
        {
            let mut root = self.root.write();
            Self::set_at(&mut root, path, value);
        }
        self.notify(path);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        {
            let mut root = self.root.write();
            let target = Self::object_at(&mut root, path);
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        self.notify(path);
        Ok(())
    }

    async fn read(&self, path: &str) -> StoreResult<Option<Value>> {
        let root = self.root.read();
        Ok(Self::get_at(&root, path).cloned())
    }

    async fn query_children(
        &self,
        path: &str,
        filter: Option<&ChildFilter>,
    ) -> StoreResult<Vec<(String, Value)>> {
        let root = self.root.read();
        let mut rows = Vec::new();
        if let Some(map) = Self::get_at(&root, path).and_then(Value::as_object) {
            for (key, child) in map {
                if let Some(filter) = filter {
                    if !filter.matches(child) {
                        continue;
                    }
                }
                rows.push((key.clone(), child.clone()));
            }
        }
        Ok(rows)
    }

    async fn subscribe_value(
        &self,
        path: &str,
    ) -> StoreResult<(SubscriptionHandle, mpsc::UnboundedReceiver<Value>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();

        // Deliver the current value, if any, before live updates.
        let current = {
            let root = self.root.read();
            Self::get_at(&root, path).cloned()
        };
        if let Some(value) = current {
            let _ = tx.send(value);
        }

        self.value_subs.lock().insert(
            handle,
            ValueSub {
                path: path.to_string(),
                tx,
            },
        );
        Ok((handle, rx))
    }

    async fn subscribe_child_added(
        &self,
        path: &str,
        filter: Option<ChildFilter>,
    ) -> StoreResult<(SubscriptionHandle, mpsc::UnboundedReceiver<(String, Value)>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();
        let mut seen = HashSet::new();

        // Replay existing matching children, as child_added does.
        {
            let root = self.root.read();
            if let Some(map) = Self::get_at(&root, path).and_then(Value::as_object) {
                for (key, child) in map {
                    if let Some(filter) = &filter {
                        if !filter.matches(child) {
                            continue;
                        }
                    }
                    seen.insert(key.clone());
                    let _ = tx.send((key.clone(), child.clone()));
                }
            }
        }

        self.child_subs.lock().insert(
            handle,
            ChildSub {
                path: path.to_string(),
                filter,
                tx,
                seen,
            },
        );
        Ok((handle, rx))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.value_subs.lock().remove(&handle);
        self.child_subs.lock().remove(&handle);
    }

    fn new_id(&self, _path: &str) -> String {
        // Counter prefix keeps push keys in allocation order under
        // lexicographic sort; the suffix keeps them unique across
        // store instances.
        let n = self.next_push.fetch_add(1, Ordering::SeqCst);
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{:012}-{}", n, &suffix[..8])
    }
}

//! Contact directory
//!
//! Maintains the mutual contact relation and handle lookup. A contact
//! add writes both directed edges; the store offers no multi-key
//! atomicity, so the second write is retried until it lands and a
//! transient one-sided edge is an accepted intermediate state - readers
//! rely only on the converged result.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::recovery::{retry_with_backoff, RetryConfig};
use zvonok_store_core::{
    paths, ChildFilter, ContactRecord, PresenceStatus, SharedStore, SharedStoreExt,
    SubscriptionHandle, UserId, UserRecord,
};

/// One entry of the local contact list
#[derive(Debug, Clone)]
pub struct ContactEntry {
    pub user_id: UserId,
    /// Name the contact publishes about itself
    pub name: String,
    /// Cached override from the contact edge; falls back to `name`
    pub display_name: String,
    pub email: String,
    pub status: PresenceStatus,
}

/// Bidirectional contact relation and lookup-by-handle
pub struct ContactDirectory {
    store: Arc<dyn SharedStore>,
    me: UserId,
    my_name: String,
    my_email: String,
    entries: DashMap<UserId, ContactEntry>,
    event_tx: broadcast::Sender<ClientEvent>,
    watch: Mutex<Option<(SubscriptionHandle, JoinHandle<()>)>>,
}

impl ContactDirectory {
    pub fn new(
        store: Arc<dyn SharedStore>,
        me: UserId,
        my_name: impl Into<String>,
        my_email: impl Into<String>,
        event_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            store,
            me,
            my_name: my_name.into(),
            my_email: my_email.into(),
            entries: DashMap::new(),
            event_tx,
            watch: Mutex::new(None),
        }
    }

    /// Look up a registered user by public handle.
    ///
    /// Fails with `InvalidHandle` for an empty handle or the caller's
    /// own, `NotFound` when no user matches.
    pub async fn resolve_by_handle(&self, handle: &str) -> ClientResult<(UserId, UserRecord)> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(ClientError::invalid_handle("empty handle"));
        }
        if handle.eq_ignore_ascii_case(&self.my_email) {
            return Err(ClientError::invalid_handle("cannot add yourself"));
        }

        let filter = ChildFilter::equals("email", handle);
        let rows = self.store.query_children(paths::USERS, Some(&filter)).await?;
        let (id, value) = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found(handle))?;
        let record: UserRecord = serde_json::from_value(value)
            .map_err(|e| ClientError::internal(format!("malformed user record {}: {}", id, e)))?;
        Ok((UserId::new(id), record))
    }

    /// Resolve a handle and add the mutual contact
    pub async fn add_by_handle(&self, handle: &str) -> ClientResult<UserId> {
        let (other, record) = self.resolve_by_handle(handle).await?;
        self.add_mutual(&other, &record.name).await?;
        Ok(other)
    }

    /// Add a mutual contact by identity, the share-link flow
    pub async fn add_by_id(&self, other: &UserId) -> ClientResult<()> {
        if *other == self.me {
            return Err(ClientError::invalid_handle("cannot add yourself"));
        }
        let record: UserRecord = self
            .store
            .read_record(&paths::user(other))
            .await?
            .ok_or_else(|| ClientError::not_found(other.as_str()))?;
        self.add_mutual(other, &record.name).await
    }

    /// Write both directed edges of the relation.
    ///
    /// The forward edge goes first; the reverse edge is retried with
    /// backoff. If retries exhaust, the partial state is surfaced to
    /// the caller rather than silently accepted.
    async fn add_mutual(&self, other: &UserId, other_name: &str) -> ClientResult<()> {
        let forward = ContactRecord::new(other_name);
        self.store
            .write_record(&paths::contact(&self.me, other), &forward)
            .await?;

        let reverse = ContactRecord::new(self.my_name.clone());
        let result = retry_with_backoff("mutual_contact_reverse_edge", RetryConfig::quick(), || {
            let path = paths::contact(other, &self.me);
            let reverse = reverse.clone();
            async move {
                self.store
                    .write_record(&path, &reverse)
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await;

        if let Err(e) = result {
            warn!(other = %other, error = %e, "reverse contact edge did not land, relation is one-sided");
            return Err(ClientError::internal(format!(
                "contact {} partially added: {}",
                other, e
            )));
        }

        info!(other = %other, "mutual contact added");
        Ok(())
    }

    /// Start watching this user's contact edges, emitting
    /// `ContactListChanged` snapshots as they converge.
    pub async fn start_watch(self: &Arc<Self>) -> ClientResult<()> {
        let (handle, mut rx) = self
            .store
            .subscribe_value(&paths::contacts(&self.me))
            .await?;

        let dir = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                if let Err(e) = dir.rebuild_entries(value).await {
                    warn!(error = %e, "contact list refresh failed");
                }
            }
            debug!("contact watch channel closed");
        });

        *self.watch.lock() = Some((handle, task));
        Ok(())
    }

    async fn rebuild_entries(&self, value: serde_json::Value) -> ClientResult<()> {
        let edges: std::collections::BTreeMap<String, ContactRecord> = match value {
            serde_json::Value::Null => Default::default(),
            other => serde_json::from_value(other)
                .map_err(|e| ClientError::internal(format!("malformed contact edges: {}", e)))?,
        };

        self.entries.clear();
        for (other_id, edge) in edges {
            let other = UserId::new(other_id);
            let user: Option<UserRecord> = self.store.read_record(&paths::user(&other)).await?;
            let Some(user) = user else {
                debug!(other = %other, "contact edge points at unknown user, skipping");
                continue;
            };
            let display_name = if edge.display_name.is_empty() {
                user.name.clone()
            } else {
                edge.display_name.clone()
            };
            self.entries.insert(
                other.clone(),
                ContactEntry {
                    user_id: other,
                    name: user.name,
                    display_name,
                    email: user.email,
                    status: user.status,
                },
            );
        }

        let _ = self.event_tx.send(ClientEvent::ContactListChanged {
            contacts: self.snapshot(),
        });
        Ok(())
    }

    /// Whether the given user is a known contact
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Cached entry for the given contact
    pub fn get(&self, user_id: &UserId) -> Option<ContactEntry> {
        self.entries.get(user_id).map(|e| e.value().clone())
    }

    /// Current contact list, sorted by display name
    pub fn snapshot(&self) -> Vec<ContactEntry> {
        let mut contacts: Vec<ContactEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        contacts.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        contacts
    }

    /// Stop the contact watch and drop the subscription
    pub async fn stop(&self) {
        let watch = self.watch.lock().take();
        if let Some((handle, task)) = watch {
            self.store.unsubscribe(handle).await;
            task.abort();
        }
    }
}

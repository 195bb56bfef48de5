//! # zvonok-store-core
//!
//! Wire-level foundation of the zvonok calling stack: the record shapes
//! two clients exchange through a real-time shared key/value store, and
//! the [`SharedStore`] abstraction those records travel over.
//!
//! The store is deliberately generic: any backend offering per-leaf
//! last-write-wins writes, field merges, and at-least-once change
//! notification (a Firebase-style realtime database, or the in-process
//! [`MemoryStore`]) can carry the protocol. Delivery may be reordered
//! and duplicated; every consumer in the stack is written to absorb
//! both.
//!
//! # What lives here
//!
//! - [`records`] - serde types for `users/{id}`, `contacts/{owner}/{other}`
//!   and `calls/{callId}`, plus the monotonic [`CallStatus`] reducer that
//!   keeps concurrent writers convergent.
//! - [`paths`] - the canonical store paths for those records.
//! - [`store`] - the [`SharedStore`] trait, [`ChildFilter`] queries and
//!   typed read/write helpers.
//! - [`memory`] - an in-memory [`SharedStore`] used by tests and as the
//!   reference implementation of the delivery contract.

pub mod error;
pub mod memory;
pub mod paths;
pub mod records;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use records::{
    CallId, CallRecord, CallRole, CallStatus, ContactRecord, IceCandidate, PresenceStatus,
    SdpKind, SessionDescription, UserId, UserRecord,
};
pub use store::{ChildFilter, SharedStore, SharedStoreExt, SubscriptionHandle};

//! The client coordination layer
//!
//! [`ClientManager`] is the single entry point an application embeds:
//! it owns the store connection, the contact directory, the one live
//! call session, and the background watchers. Its implementation is
//! spread across focused modules:
//!
//! - [`manager`] - construction, start/stop, presence, event plumbing
//! - [`calls`] - call operations and teardown ordering
//! - [`signaling`] - offer/answer/candidate exchange driving PeerLink
//! - [`watcher`] - incoming-call detection (push and poll fallback)

pub mod calls;
pub mod manager;
pub mod signaling;
pub mod watcher;

pub use manager::ClientManager;

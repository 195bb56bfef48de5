//! Event surface toward the embedding application
//!
//! Two complementary surfaces, both optional: a broadcast channel of
//! [`ClientEvent`] values for consumers that want a stream, and the
//! [`ClientEventHandler`] trait for consumers that want callbacks (and,
//! for incoming calls, a say in what happens via [`CallAction`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::call::{CallId, CallState, TerminationReason, UserId};
use crate::contacts::ContactEntry;
use crate::error::ClientError;

/// Action an event handler chooses for an incoming call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Answer immediately
    Accept,
    /// Refuse; writes `declined` to the record
    Decline,
    /// Leave it ringing for an explicit `answer_call`/`decline_call`
    Ignore,
}

/// Details of a call ringing at this client
#[derive(Debug, Clone)]
pub struct IncomingCallInfo {
    pub call_id: CallId,
    pub caller: UserId,
    pub caller_name: String,
    pub created_at: DateTime<Utc>,
}

/// Details of a local call state transition
#[derive(Debug, Clone)]
pub struct CallStateInfo {
    pub call_id: CallId,
    pub new_state: CallState,
    pub previous_state: Option<CallState>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Events emitted toward the embedding application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A call addressed to this client is ringing
    IncomingCall {
        call_id: CallId,
        caller: UserId,
        caller_name: String,
    },
    /// A locally initiated call is ringing at the far side
    OutgoingRinging {
        call_id: CallId,
        callee: UserId,
        callee_name: String,
    },
    /// Both sides completed negotiation
    CallActive { call_id: CallId, peer_name: String },
    /// The call reached a terminal state
    CallEnded {
        call_id: CallId,
        reason: TerminationReason,
    },
    /// The contact list converged to a new snapshot
    ContactListChanged { contacts: Vec<ContactEntry> },
    /// A non-fatal error worth reporting
    Error { kind: String, message: String },
}

/// Callback-style consumer of client events.
///
/// All methods have no-op defaults except none: implement what you
/// need. `on_incoming_call` returns a [`CallAction`]; returning
/// `Ignore` leaves the call ringing for explicit handling.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    async fn on_incoming_call(&self, _info: IncomingCallInfo) -> CallAction {
        CallAction::Ignore
    }

    async fn on_call_state_changed(&self, _info: CallStateInfo) {}

    async fn on_contact_list_changed(&self, _contacts: &[ContactEntry]) {}

    async fn on_client_error(&self, _error: &ClientError) {}
}

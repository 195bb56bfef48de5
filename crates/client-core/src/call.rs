//! Local call state
//!
//! [`CallState`] is the client-local view of one call's lifecycle. It is
//! driven exclusively by the status reducer (see
//! [`Session::apply_status`](crate::session::Session::apply_status)):
//! remote observations and local actions both fold into it through the
//! same monotonic rule, so duplicate and out-of-order deliveries are
//! silent no-ops and `Terminated` is absorbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use zvonok_store_core::{CallId, CallRole, CallStatus, UserId};

/// Why a call left the `Active`/`Ringing` states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Hung up after being active
    Ended,
    /// Callee refused while ringing
    Declined,
    /// Caller withdrew while ringing
    Cancelled,
    /// The media transport failed or disconnected mid-call
    TransportFailure,
}

impl TerminationReason {
    /// Status written to the shared record for this reason.
    ///
    /// A transport failure is reported on the wire as a plain `ended`;
    /// the far side sees an ordinary hangup, not a distinct error.
    pub fn wire_status(&self) -> CallStatus {
        match self {
            TerminationReason::Ended | TerminationReason::TransportFailure => CallStatus::Ended,
            TerminationReason::Declined => CallStatus::Declined,
            TerminationReason::Cancelled => CallStatus::Cancelled,
        }
    }

    /// Reason corresponding to a terminal status observed remotely
    pub fn from_status(status: CallStatus) -> Option<Self> {
        match status {
            CallStatus::Ended => Some(TerminationReason::Ended),
            CallStatus::Declined => Some(TerminationReason::Declined),
            CallStatus::Cancelled => Some(TerminationReason::Cancelled),
            CallStatus::Ringing | CallStatus::Active => None,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::Ended => "ended",
            TerminationReason::Declined => "declined",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::TransportFailure => "transport-failure",
        };
        write!(f, "{}", s)
    }
}

/// Client-local lifecycle state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Ringing, with the local side's role
    Ringing(CallRole),
    /// Media negotiation completed on both sides
    Active,
    /// Final state; all further observations for the record are ignored
    Terminated(TerminationReason),
}

impl CallState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Terminated(_))
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, CallState::Ringing(_))
    }

    /// The wire status this local state corresponds to, for the reducer
    pub fn effective_status(&self) -> Option<CallStatus> {
        match self {
            CallState::Idle => None,
            CallState::Ringing(_) => Some(CallStatus::Ringing),
            CallState::Active => Some(CallStatus::Active),
            CallState::Terminated(reason) => Some(reason.wire_status()),
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Ringing(CallRole::Caller) => write!(f, "ringing (caller)"),
            CallState::Ringing(CallRole::Callee) => write!(f, "ringing (callee)"),
            CallState::Active => write!(f, "active"),
            CallState::Terminated(reason) => write!(f, "terminated ({})", reason),
        }
    }
}

/// Snapshot of one call as seen by this client
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: CallId,
    pub role: CallRole,
    /// The other party
    pub peer: UserId,
    pub peer_name: String,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

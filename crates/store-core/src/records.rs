//! Wire record shapes shared by every client
//!
//! These types are the persisted contract: any client that honors these
//! shapes can interoperate, whatever its implementation language. Field
//! names are camelCase on the wire and timestamps are Unix milliseconds,
//! matching what existing clients already write.
//!
//! The one piece of behavior that lives here is [`CallStatus::advance`],
//! the reducer that makes concurrently-written call status converge: a
//! call record has no server-side lock, so both parties may race to
//! write a terminal status, and every observer folds what it sees
//! through this single monotonic rule.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Stable identifier of a registered user
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one call attempt; never reused across attempts
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a call this client is on
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    /// The other side of the call
    pub fn remote(&self) -> CallRole {
        match self {
            CallRole::Caller => CallRole::Callee,
            CallRole::Callee => CallRole::Caller,
        }
    }

    /// Wire field under which this role publishes its ICE candidates
    pub fn candidate_field(&self) -> &'static str {
        match self {
            CallRole::Caller => "iceCandidatesCaller",
            CallRole::Callee => "iceCandidatesCallee",
        }
    }
}

/// Liveness status a user publishes about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceStatus {
    Online,
    Offline,
    InCall,
}

/// `users/{id}` - owned and mutated only by that user's client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub name: String,
    pub email: String,
    pub status: PresenceStatus,
    /// Unix milliseconds
    pub last_seen: i64,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            status: PresenceStatus::Online,
            last_seen: now_millis(),
        }
    }
}

/// `contacts/{owner}/{other}` - one directed edge of the contact relation
///
/// A completed "add contact" produces both directed edges. Readers must
/// tolerate observing a transient one-sided edge; only the converged
/// state is relied upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    /// Cached display name override for the other party
    pub display_name: String,
    /// Unix milliseconds
    pub added_at: i64,
}

impl ContactRecord {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            added_at: now_millis(),
        }
    }
}

/// Status of one call attempt
///
/// Transitions are monotonic: `ringing -> {active, declined, cancelled}`
/// and `active -> ended`. Nothing moves a record backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    Declined,
    Cancelled,
}

impl CallStatus {
    /// Whether this status ends the call record's life
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Declined | CallStatus::Cancelled
        )
    }

    /// Position along the lifecycle; higher never yields to lower
    fn rank(&self) -> u8 {
        match self {
            CallStatus::Ringing => 0,
            CallStatus::Active => 1,
            CallStatus::Ended | CallStatus::Declined | CallStatus::Cancelled => 2,
        }
    }

    /// The status reducer: fold an observed status into the current one.
    ///
    /// Returns `Some(observed)` when the observation advances the
    /// lifecycle, `None` when it is a duplicate, behind the current
    /// status, or arrives after a terminal status (terminal states are
    /// absorbing). Observers apply any interleaving of deliveries
    /// through this rule and converge on the same answer.
    pub fn advance(current: CallStatus, observed: CallStatus) -> Option<CallStatus> {
        if current.is_terminal() {
            return None;
        }
        if observed.rank() > current.rank() {
            Some(observed)
        } else {
            None
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Declined => "declined",
            CallStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An SDP blob produced by one end's media engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One connectivity option discovered by a media engine
///
/// Serialized exactly as an `RTCIceCandidate` JSON so existing web
/// clients can apply it unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u32>,
}

/// `calls/{callId}` - the coordination record for one call attempt
///
/// Both parties write to disjoint fields of the same record: the caller
/// owns `offer` and its candidate sequence, the callee owns `answer`
/// and its sequence, and `status` converges through
/// [`CallStatus::advance`]. Candidate sequences are push-keyed children
/// so appends from the two sides never collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub caller: UserId,
    pub callee: UserId,
    pub status: CallStatus,
    /// Unix milliseconds
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ice_candidates_caller: BTreeMap<String, IceCandidate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ice_candidates_callee: BTreeMap<String, IceCandidate>,
}

impl CallRecord {
    /// A fresh ringing record, as the caller creates it
    pub fn new(caller: UserId, callee: UserId) -> Self {
        Self {
            caller,
            callee,
            status: CallStatus::Ringing,
            created_at: now_millis(),
            offer: None,
            answer: None,
            ice_candidates_caller: BTreeMap::new(),
            ice_candidates_callee: BTreeMap::new(),
        }
    }

    /// Candidate sequence published by the given role, in push-key order
    pub fn candidates_from(&self, role: CallRole) -> &BTreeMap<String, IceCandidate> {
        match role {
            CallRole::Caller => &self.ice_candidates_caller,
            CallRole::Callee => &self.ice_candidates_callee,
        }
    }
}

/// Current time as Unix milliseconds, the wire timestamp format
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

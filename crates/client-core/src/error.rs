//! Error types for the client coordination layer

use thiserror::Error;
use zvonok_store_core::StoreError;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by client operations
///
/// Propagation policy: lookup and validation failures abort only the
/// action that triggered them and never create a session. A transport
/// failure during an established call is not returned as an error at
/// all - it is folded into the normal teardown path and reported as
/// `call-ended` with a transport-failure reason.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No registered user matches the given handle
    #[error("no user found for handle: {handle}")]
    NotFound { handle: String },

    /// The handle is unusable (empty, or the caller's own)
    #[error("invalid handle: {reason}")]
    InvalidHandle { reason: String },

    /// The call target is not in the contact directory
    #[error("not a known contact: {user_id}")]
    UnknownContact { user_id: String },

    /// The call record advanced past the expected status
    #[error("call {call_id} is no longer available")]
    StaleCall { call_id: String },

    /// Microphone access was refused
    #[error("local audio permission denied")]
    PermissionDenied,

    /// The media transport failed
    #[error("transport failure: {message}")]
    TransportFailure { message: String },

    /// Push delivery is presumed unreliable; the fallback is engaged
    #[error("delivery degraded: {message}")]
    DeliveryDegraded { message: String },

    /// The call could not be set up
    #[error("call setup failed: {reason}")]
    CallSetupFailed { reason: String },

    /// A call is already in progress locally
    #[error("another call is already in progress")]
    AlreadyInCall,

    /// Shared-store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error
    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create a not-found error
    pub fn not_found(handle: impl Into<String>) -> Self {
        Self::NotFound {
            handle: handle.into(),
        }
    }

    /// Create an invalid-handle error
    pub fn invalid_handle(reason: impl Into<String>) -> Self {
        Self::InvalidHandle {
            reason: reason.into(),
        }
    }

    /// Create a stale-call error
    pub fn stale_call(call_id: impl std::fmt::Display) -> Self {
        Self::StaleCall {
            call_id: call_id.to_string(),
        }
    }

    /// Create a transport-failure error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Create a call-setup error
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::CallSetupFailed {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Short machine-readable tag for event reporting
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not-found",
            Self::InvalidHandle { .. } => "invalid-handle",
            Self::UnknownContact { .. } => "unknown-contact",
            Self::StaleCall { .. } => "stale-call",
            Self::PermissionDenied => "permission-denied",
            Self::TransportFailure { .. } => "transport-failure",
            Self::DeliveryDegraded { .. } => "delivery-degraded",
            Self::CallSetupFailed { .. } => "call-setup-failed",
            Self::AlreadyInCall => "already-in-call",
            Self::Store(_) => "store",
            Self::InternalError { .. } => "internal",
        }
    }

    /// Whether retrying the same operation could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::TransportFailure { .. }
                | Self::DeliveryDegraded { .. }
                | Self::CallSetupFailed { .. }
        )
    }
}

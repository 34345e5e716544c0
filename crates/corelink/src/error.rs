//! Error types for the corelink bridge.
//!
//! One enum covers both sides of the boundary: host-side dispatch faults
//! (which are flattened into wire envelopes, never thrown across the
//! boundary) and client-side call/subscription failures surfaced to callers.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum LinkError {
    // Host-side dispatch faults. These become `isSuccess: false` envelope
    // data; the variants exist so the messages stay in one place.
    #[error("could not resolve the calling client context")]
    ClientUnknown,

    #[error("method '{name}' is not registered")]
    MethodUnknown { name: String },

    #[error("method '{name}' is registered as async-only")]
    NotSyncAllowed { name: String },

    #[error("method handler failed: {message}")]
    MethodRuntime { message: String },

    #[error("result could not be encoded to JSON: {message}")]
    Serialization { message: String },

    #[error("event '{name}' is not registered")]
    EventUnknown { name: String },

    // Client-side failures surfaced to callers.
    #[error("method '{method}': {message}")]
    MethodExecute { method: String, message: String },

    #[error("event '{event}': subscribe failed: {message}")]
    SubscribeFailed { event: String, message: String },

    #[error("event '{event}': unsubscribe failed: {message}")]
    UnsubscribeFailed { event: String, message: String },

    #[error("event '{event}': unsubscribe failed: no listeners are registered")]
    UnsubscribeNoListeners { event: String },

    #[error("event '{event}': unsubscribe failed: no listener with this id")]
    UnsubscribeUnknownListener { event: String },

    // Transport and wire faults.
    #[error("transport channel closed")]
    ChannelClosed,

    #[error("protocol violation: {message}")]
    Protocol { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LinkError {
    /// Shorthand for a protocol violation with a formatted message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        LinkError::Protocol {
            message: message.into(),
        }
    }
}

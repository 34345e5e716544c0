//! Wire model for the host/client boundary.
//!
//! Every message is a JSON-like structure: requests travel client-to-host,
//! replies answer round-trip requests on the same channel, and pushes travel
//! host-to-client unprompted. The async `Execute` channel is the one
//! exception to the request/reply pairing: its request is fire-and-forget and
//! its answer arrives later as [`Push::ExecuteReply`], matched by call id.

use crate::id::CallId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved event name dispatched to a client's own listeners when its
/// context tears down. Listeners on it are purely local; the name never
/// crosses the boundary.
pub const CLOSE_EVENT: &str = "Client.close";

/// Client-to-host request, one variant per logical channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum Request {
    /// Fire-and-forget method call; answered by [`Push::ExecuteReply`].
    Execute {
        method: String,
        id: CallId,
        args: Vec<Value>,
    },
    /// Round-trip method call; the issuing turn blocks for the reply.
    ExecuteSync { method: String, args: Vec<Value> },
    GetMethods,
    Subscribe { event: String },
    Unsubscribe { event: String },
    HasEvent { event: String },
    GetEvents,
    GetFlags,
}

/// Host answer to a round-trip [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum Reply {
    Execute(MethodReturn),
    /// JSON-encoded [`MethodsList`]; the receiver decodes it once more.
    Methods(String),
    Subscribe(SubscribeReturn),
    Unsubscribe(SubscribeReturn),
    HasEvent(bool),
    Events(Vec<String>),
    Flags(Flags),
}

/// Host-to-client push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum Push {
    ExecuteReply { id: CallId, ret: MethodReturn },
    CallEvent { event: String, args: Vec<Value> },
}

/// Result envelope delivered for every method call, success or failure.
///
/// `is_object == true` means `data` is a JSON-encoded string the receiver
/// must decode once more; primitives pass through as-is. The double encoding
/// keeps the blocking channel primitive-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodReturn {
    pub is_success: bool,
    pub is_object: bool,
    pub data: Value,
}

/// Answer envelope for subscribe/unsubscribe requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeReturn {
    pub is_success: bool,
    pub data: String,
}

impl SubscribeReturn {
    pub fn ok() -> Self {
        Self {
            is_success: true,
            data: String::from("no error"),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            data: message.into(),
        }
    }
}

/// Registered method names, as reported by the host.
///
/// Every registered method appears in `async`; only sync-allowed ones also
/// appear in `sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodsList {
    #[serde(rename = "async")]
    pub r#async: Vec<String>,
    pub sync: Vec<String>,
}

/// Host runtime flags, settable by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub is_debug: bool,
    pub is_production: bool,
}

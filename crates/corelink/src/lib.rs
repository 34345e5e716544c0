//! Corelink - host/client bridge over a message-passing boundary.
//!
//! One privileged host and any number of sandboxed clients expose named
//! methods and named broadcast events to each other across a boundary that
//! only carries structured messages. The crate provides the correlation and
//! lifecycle protocol that makes this feel like ordinary function calls and
//! event subscriptions: a method registry with call/response correlation
//! (blocking and non-blocking), and an event registry with per-client
//! subscription bookkeeping tied to client lifetime.
//!
//! The transport is pluggable (see [`transport::HostPort`] and
//! [`transport::EventSink`]); [`transport::connect_local`] wires a client to
//! a host in-process over tokio channels.
//!
//! # Example
//!
//! ```rust,ignore
//! use corelink::{connect_local, HostCore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> corelink::Result<()> {
//!     let host = HostCore::new();
//!     host.add_method("double", true, |_client, args| async move {
//!         let x = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(json!(x * 2))
//!     });
//!     host.add_event("timer");
//!
//!     let client = connect_local(&host);
//!     let answer = client.exec("double", vec![json!(21)]).await?;
//!     assert_eq!(answer, json!(42));
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod host;
pub mod id;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientCore, EventCallback};
pub use error::{LinkError, Result};
pub use host::{EventRegistry, HostCore, MethodEntry, MethodRegistry, MethodResult, RegistryObserver};
pub use id::{CallId, ClientId, ListenerId};
pub use protocol::{Flags, MethodReturn, MethodsList, SubscribeReturn, CLOSE_EVENT};
pub use transport::{connect_local, EventSink, HostPort};

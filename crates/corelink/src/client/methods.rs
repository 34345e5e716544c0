//! Client-side method proxy: call correlation and response decoding.
//!
//! Each async call records a pending entry keyed by a fresh [`CallId`]
//! before the request leaves, so the answer can never race past its
//! bookkeeping. Responses for ids with no pending entry are warned about and
//! dropped — the call may have been abandoned before the answer arrived —
//! and that path must never fail.

use crate::codec;
use crate::error::{LinkError, Result};
use crate::id::{CallId, IdGenerator};
use crate::protocol::{MethodReturn, MethodsList, Reply, Request};
use crate::transport::HostPort;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

pub(crate) struct MethodProxy {
    port: Arc<dyn HostPort>,
    pending: Mutex<HashMap<CallId, PendingCall>>,
    ids: IdGenerator,
}

impl MethodProxy {
    pub(crate) fn new(port: Arc<dyn HostPort>) -> Self {
        Self {
            port,
            pending: Mutex::new(HashMap::new()),
            ids: IdGenerator::new(),
        }
    }

    /// Call a host method over the non-blocking channel.
    pub(crate) async fn execute(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.ids.call_id();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().expect("pending table poisoned").insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );

        if let Err(err) = self.port.post(Request::Execute {
            method: method.to_string(),
            id,
            args,
        }) {
            self.pending
                .lock()
                .expect("pending table poisoned")
                .remove(&id);
            return Err(err);
        }

        rx.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Call a sync-enabled host method over the blocking channel.
    ///
    /// The blocking channel pairs answer to request by construction, so no
    /// correlation bookkeeping is needed. Must not be called from an async
    /// context (see [`HostPort::request_blocking`]).
    pub(crate) fn execute_sync(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let reply = self.port.request_blocking(Request::ExecuteSync {
            method: method.to_string(),
            args,
        })?;
        Self::expect_execute(method, reply)
    }

    /// Settle the pending call matching an incoming answer.
    pub(crate) fn handle_reply(&self, id: CallId, ret: MethodReturn) {
        let pending = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&id);

        let Some(pending) = pending else {
            warn!(
                %id,
                "response received for a call that is no longer pending; \
                 the call may have been abandoned"
            );
            return;
        };

        let outcome = codec::decode_return(&pending.method, ret);
        if pending.tx.send(outcome).is_err() {
            debug!(%id, method = %pending.method, "caller went away before the response settled");
        }
    }

    pub(crate) async fn methods(&self) -> Result<MethodsList> {
        Self::expect_methods(self.port.request(Request::GetMethods).await?)
    }

    pub(crate) fn methods_sync(&self) -> Result<MethodsList> {
        Self::expect_methods(self.port.request_blocking(Request::GetMethods)?)
    }

    /// Drop every in-flight call. Orphans are logged, never resolved.
    pub(crate) fn abandon_pending(&self) {
        let orphans: Vec<(CallId, PendingCall)> = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .drain()
            .collect();

        for (id, pending) in orphans {
            warn!(%id, method = %pending.method, "abandoning in-flight call on teardown");
        }
    }

    fn expect_execute(method: &str, reply: Reply) -> Result<Value> {
        match reply {
            Reply::Execute(ret) => codec::decode_return(method, ret),
            other => Err(LinkError::protocol(format!(
                "expected an execute answer, got {:?}",
                other
            ))),
        }
    }

    fn expect_methods(reply: Reply) -> Result<MethodsList> {
        match reply {
            Reply::Methods(encoded) => Ok(serde_json::from_str(&encoded)?),
            other => Err(LinkError::protocol(format!(
                "expected a method list, got {:?}",
                other
            ))),
        }
    }
}

//! Transport seams and the in-process reference transport.
//!
//! The core never talks to a concrete channel: the client side consumes a
//! [`HostPort`] (the three send primitives) and receives pushes through
//! [`ClientCore::handle_push`]; the host side consumes one [`EventSink`] per
//! attached client. Any boundary that can carry the wire model — sockets,
//! pipes, embedded channels — can implement these seams.
//!
//! [`connect_local`] is the reference implementation over tokio channels:
//! one ordered queue per client into [`HostCore::dispatch`] (requests are
//! processed in arrival order) and one push queue pumped into the client.
//!
//! [`ClientCore::handle_push`]: crate::client::ClientCore::handle_push

use crate::client::ClientCore;
use crate::error::{LinkError, Result};
use crate::host::HostCore;
use crate::protocol::{Push, Reply, Request};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Host-to-client push channel, one per attached client.
pub trait EventSink: Send + Sync {
    /// Deliver a push. Fails only when the client's channel is gone; the
    /// host treats that as a stale handle, not an error.
    fn push(&self, push: Push) -> Result<()>;
}

/// Client-to-host channel: the transport primitives the client side consumes.
#[async_trait]
pub trait HostPort: Send + Sync {
    /// Fire-and-forget send.
    fn post(&self, request: Request) -> Result<()>;

    /// Non-blocking round trip: suspends the calling task until the host
    /// answers.
    async fn request(&self, request: Request) -> Result<Reply>;

    /// Blocking round trip: parks the calling thread until the host answers.
    ///
    /// Caller contract: never call this from an async context or from a
    /// dispatch path that is itself servicing a request — the boundary would
    /// deadlock on itself.
    fn request_blocking(&self, request: Request) -> Result<Reply>;
}

type QueuedRequest = (Request, Option<oneshot::Sender<Reply>>);

struct LocalSink {
    tx: mpsc::UnboundedSender<Push>,
}

impl EventSink for LocalSink {
    fn push(&self, push: Push) -> Result<()> {
        self.tx.send(push).map_err(|_| LinkError::ChannelClosed)
    }
}

struct LocalPort {
    tx: mpsc::UnboundedSender<QueuedRequest>,
}

#[async_trait]
impl HostPort for LocalPort {
    fn post(&self, request: Request) -> Result<()> {
        self.tx
            .send((request, None))
            .map_err(|_| LinkError::ChannelClosed)
    }

    async fn request(&self, request: Request) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, Some(reply_tx)))
            .map_err(|_| LinkError::ChannelClosed)?;
        reply_rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    fn request_blocking(&self, request: Request) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, Some(reply_tx)))
            .map_err(|_| LinkError::ChannelClosed)?;
        reply_rx.blocking_recv().map_err(|_| LinkError::ChannelClosed)
    }
}

/// Connect a new client context to an in-process host.
///
/// Attaches the client to the host's table, spawns the two pump tasks, and
/// returns the client surface. The pumps end when either side drops: closing
/// the client releases its queues, and `HostCore::client_closed` severs the
/// push channel from the host side.
pub fn connect_local(host: &Arc<HostCore>) -> Arc<ClientCore> {
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let client_id = host.attach_client(Arc::new(LocalSink { tx: push_tx }));

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    tokio::spawn(host_pump(Arc::clone(host), client_id, request_rx));

    let client = ClientCore::new(client_id, Arc::new(LocalPort { tx: request_tx }));
    tokio::spawn(push_pump(Arc::downgrade(&client), push_rx));

    client
}

/// Drain one client's ordered request queue into the host.
async fn host_pump(
    host: Arc<HostCore>,
    origin: crate::id::ClientId,
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
) {
    while let Some((request, reply_tx)) = rx.recv().await {
        let reply = host.dispatch(origin, request).await;
        match (reply_tx, reply) {
            (Some(tx), Some(reply)) => {
                // A dropped receiver means the caller gave up; nothing to do.
                let _ = tx.send(reply);
            }
            (Some(_), None) => {
                warn!(%origin, "round-trip request produced no reply");
            }
            (None, Some(_)) => {
                warn!(%origin, "fire-and-forget request produced an unexpected reply");
            }
            (None, None) => {}
        }
    }
    debug!(%origin, "request pump ended");
}

/// Deliver host pushes to the client until either side is gone.
async fn push_pump(client: Weak<ClientCore>, mut rx: mpsc::UnboundedReceiver<Push>) {
    while let Some(push) = rx.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        client.handle_push(push).await;
    }
}

//! Client side of the bridge.
//!
//! [`ClientCore`] is the surface a sandboxed context programs against: call
//! host methods, listen to host events, query the catalogues — each in a
//! non-blocking and a blocking flavor. It owns the per-context state (the
//! pending-call table and the listener table) and tears both down
//! deterministically on [`ClientCore::close`].

pub mod listeners;

mod methods;

use crate::error::Result;
use crate::id::{ClientId, ListenerId};
use crate::protocol::{Flags, MethodsList, Push, Reply, Request};
use crate::transport::HostPort;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub use listeners::EventCallback;

use listeners::ListenerProxy;
use methods::MethodProxy;

/// One client context's view of the bridge.
pub struct ClientCore {
    id: ClientId,
    port: Arc<dyn HostPort>,
    methods: MethodProxy,
    listeners: ListenerProxy,
    closed: AtomicBool,
}

impl ClientCore {
    /// Build a client over an established transport. Use
    /// [`connect_local`](crate::transport::connect_local) for the in-process
    /// transport; other transports call this after wiring their channels.
    pub fn new(id: ClientId, port: Arc<dyn HostPort>) -> Arc<Self> {
        Arc::new(Self {
            id,
            methods: MethodProxy::new(Arc::clone(&port)),
            listeners: ListenerProxy::new(Arc::clone(&port)),
            port,
            closed: AtomicBool::new(false),
        })
    }

    /// The handle the host knows this context by.
    pub fn id(&self) -> ClientId {
        self.id
    }

    // ------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------

    /// Call a host method; resolves when the correlated answer arrives.
    pub async fn exec(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.methods.execute(method, args).await
    }

    /// Call a sync-enabled host method, blocking the calling thread.
    ///
    /// Caller contract: never call this from an async context or from inside
    /// a listener callback — the boundary would deadlock on itself.
    pub fn exec_sync(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.methods.execute_sync(method, args)
    }

    /// Fetch the host's method catalogue.
    pub async fn methods(&self) -> Result<MethodsList> {
        self.methods.methods().await
    }

    pub fn methods_sync(&self) -> Result<MethodsList> {
        self.methods.methods_sync()
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a listener for a host event.
    pub async fn on<F>(&self, event: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.add(event, Arc::new(callback), false).await
    }

    /// Register a listener that fires at most once.
    pub async fn once<F>(&self, event: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.add(event, Arc::new(callback), true).await
    }

    /// Remove a listener by the id `on`/`once` returned.
    pub async fn remove(&self, event: &str, id: ListenerId) -> Result<()> {
        self.listeners.remove(event, id).await
    }

    pub fn on_sync<F>(&self, event: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.add_sync(event, Arc::new(callback), false)
    }

    pub fn once_sync<F>(&self, event: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.add_sync(event, Arc::new(callback), true)
    }

    pub fn remove_sync(&self, event: &str, id: ListenerId) -> Result<()> {
        self.listeners.remove_sync(event, id)
    }

    /// Fetch the host's event catalogue.
    pub async fn events(&self) -> Result<Vec<String>> {
        self.listeners.events().await
    }

    pub fn events_sync(&self) -> Result<Vec<String>> {
        self.listeners.events_sync()
    }

    /// Ask the host whether an event name is registered.
    pub async fn has_event(&self, event: &str) -> Result<bool> {
        self.listeners.has_event(event).await
    }

    pub fn has_event_sync(&self, event: &str) -> Result<bool> {
        self.listeners.has_event_sync(event)
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    /// Fetch the host's runtime flags.
    pub async fn flags(&self) -> Result<Flags> {
        Self::expect_flags(self.port.request(Request::GetFlags).await?)
    }

    pub fn flags_sync(&self) -> Result<Flags> {
        Self::expect_flags(self.port.request_blocking(Request::GetFlags)?)
    }

    // ------------------------------------------------------------------
    // Inbound pushes and teardown
    // ------------------------------------------------------------------

    /// Demultiplex one host push. Called by the transport's receive pump.
    pub async fn handle_push(&self, push: Push) {
        match push {
            Push::ExecuteReply { id, ret } => self.methods.handle_reply(id, ret),
            Push::CallEvent { event, args } => self.listeners.dispatch(&event, &args).await,
        }
    }

    /// Tear this context down: dispatch the reserved close event to local
    /// listeners, release every host subscription best-effort, and abandon
    /// in-flight calls. Idempotent; never blocks shutdown on a failure.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(client = %self.id, "close called twice");
            return;
        }

        self.listeners.close().await;
        self.methods.abandon_pending();
        info!(client = %self.id, "client context closed");
    }

    fn expect_flags(reply: Reply) -> Result<Flags> {
        match reply {
            Reply::Flags(flags) => Ok(flags),
            other => Err(crate::error::LinkError::protocol(format!(
                "expected flags, got {:?}",
                other
            ))),
        }
    }
}

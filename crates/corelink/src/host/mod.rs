//! Host side of the bridge.
//!
//! [`HostCore`] owns the method and event registries, the table of attached
//! clients, and the transport-facing dispatch. There is no global instance:
//! the embedding application constructs one host, wires a transport to
//! [`HostCore::dispatch`], and tells it when client contexts close.
//!
//! # Lifecycle
//!
//! - `attach_client` mints a [`ClientId`] for a connected context and stores
//!   its push sink.
//! - `client_closed` (driven by the external context manager) drops the sink
//!   and force-unsubscribes the handle from every event — the registries
//!   never retain a handle past its context's lifetime.

pub mod events;
pub mod methods;

use crate::id::{ClientId, IdGenerator};
use crate::protocol::{Flags, Push, Reply, Request, SubscribeReturn};
use crate::transport::EventSink;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub use events::{EventRegistry, RegistryObserver};
pub use methods::{MethodEntry, MethodRegistry, MethodResult};

/// Attached clients and their push channels.
pub(crate) struct ClientTable {
    inner: RwLock<HashMap<ClientId, Arc<dyn EventSink>>>,
}

impl ClientTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, client: ClientId, sink: Arc<dyn EventSink>) {
        self.inner
            .write()
            .expect("client table poisoned")
            .insert(client, sink);
    }

    pub(crate) fn remove(&self, client: ClientId) -> bool {
        self.inner
            .write()
            .expect("client table poisoned")
            .remove(&client)
            .is_some()
    }

    pub(crate) fn get(&self, client: ClientId) -> Option<Arc<dyn EventSink>> {
        self.inner
            .read()
            .expect("client table poisoned")
            .get(&client)
            .cloned()
    }

    pub(crate) fn contains(&self, client: ClientId) -> bool {
        self.inner
            .read()
            .expect("client table poisoned")
            .contains_key(&client)
    }
}

/// The privileged side of the bridge: registries, client table, dispatch.
pub struct HostCore {
    methods: MethodRegistry,
    events: EventRegistry,
    clients: ClientTable,
    ids: IdGenerator,
    is_debug: AtomicBool,
    is_production: AtomicBool,
}

impl HostCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            methods: MethodRegistry::new(),
            events: EventRegistry::new(),
            clients: ClientTable::new(),
            ids: IdGenerator::new(),
            is_debug: AtomicBool::new(false),
            is_production: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------
    // Management surface (consumed by the embedding application)
    // ------------------------------------------------------------------

    /// Register a method. Returns `false` if the name is already taken.
    pub fn add_method<F, Fut>(&self, name: &str, allow_sync: bool, handler: F) -> bool
    where
        F: Fn(ClientId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.methods.add(name, allow_sync, handler)
    }

    pub fn remove_method(&self, name: &str) -> bool {
        self.methods.remove(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.has(name)
    }

    pub fn get_method(&self, name: &str) -> Option<methods::MethodEntry> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> crate::protocol::MethodsList {
        self.methods.names()
    }

    /// Register an event name. Returns `false` if it already exists.
    pub fn add_event(&self, name: &str) -> bool {
        self.events.add(name)
    }

    pub fn remove_event(&self, name: &str) -> bool {
        self.events.remove(name)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.has(name)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.names()
    }

    /// Broadcast an event to every subscribed client.
    pub fn emit_event(&self, name: &str, args: &[Value]) {
        self.events.broadcast(&self.clients, name, args);
    }

    /// Broadcast an event to a single subscribed client.
    pub fn emit_event_to(&self, name: &str, client: ClientId, args: &[Value]) {
        self.events.broadcast_to_one(&self.clients, name, client, args);
    }

    /// Observe subscription traffic (analytics hook, not protocol).
    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.events.add_observer(observer);
    }

    pub fn set_debug(&self, value: bool) {
        self.is_debug.store(value, Ordering::Relaxed);
    }

    pub fn set_production(&self, value: bool) {
        self.is_production.store(value, Ordering::Relaxed);
    }

    pub fn flags(&self) -> Flags {
        Flags {
            is_debug: self.is_debug.load(Ordering::Relaxed),
            is_production: self.is_production.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Client lifecycle (driven by the transport / context manager)
    // ------------------------------------------------------------------

    /// Attach a connected client context and mint its handle.
    pub fn attach_client(&self, sink: Arc<dyn EventSink>) -> ClientId {
        let client = self.ids.client_id();
        self.clients.insert(client, sink);
        info!(%client, "client attached");
        client
    }

    /// Notification that a client context closed: drop its push channel and
    /// force-unsubscribe it from every event.
    pub fn client_closed(&self, client: ClientId) {
        if self.clients.remove(client) {
            self.events.purge_client(client);
            info!(%client, "client detached");
        } else {
            debug!(%client, "close notification for an unknown client");
        }
    }

    // ------------------------------------------------------------------
    // Transport-facing dispatch
    // ------------------------------------------------------------------

    /// Process one inbound request from `origin`.
    ///
    /// Round-trip channels return `Some(reply)`. The async `Execute` channel
    /// returns `None`: its handler runs in a spawned task so one slow method
    /// never stalls the client's ordered request queue, and the answer goes
    /// back as [`Push::ExecuteReply`] matched by call id.
    pub async fn dispatch(self: &Arc<Self>, origin: ClientId, request: Request) -> Option<Reply> {
        match request {
            Request::Execute { method, id, args } => {
                let host = Arc::clone(self);
                tokio::spawn(async move {
                    let resolved = host.resolve(origin);
                    let ret = host.methods.invoke(resolved, &method, args, false).await;
                    host.push_to(origin, Push::ExecuteReply { id, ret });
                });
                None
            }

            Request::ExecuteSync { method, args } => {
                let resolved = self.resolve(origin);
                Some(Reply::Execute(
                    self.methods.invoke(resolved, &method, args, true).await,
                ))
            }

            Request::GetMethods => {
                let list = self.methods.names();
                let encoded = serde_json::to_string(&list).unwrap_or_else(|e| {
                    warn!("failed to encode method list: {}", e);
                    String::from("{\"async\":[],\"sync\":[]}")
                });
                Some(Reply::Methods(encoded))
            }

            Request::Subscribe { event } => {
                Some(Reply::Subscribe(self.handle_subscribe(origin, &event, true)))
            }

            Request::Unsubscribe { event } => Some(Reply::Unsubscribe(
                self.handle_subscribe(origin, &event, false),
            )),

            Request::HasEvent { event } => Some(Reply::HasEvent(self.events.has(&event))),

            Request::GetEvents => Some(Reply::Events(self.events.names())),

            Request::GetFlags => Some(Reply::Flags(self.flags())),
        }
    }

    fn handle_subscribe(&self, origin: ClientId, event: &str, subscribe: bool) -> SubscribeReturn {
        let Some(client) = self.resolve(origin) else {
            warn!(event, "subscription request from an unresolvable client context");
            return SubscribeReturn::fail(crate::error::LinkError::ClientUnknown.to_string());
        };

        let result = if subscribe {
            self.events.subscribe(client, event)
        } else {
            self.events.unsubscribe(client, event)
        };

        match result {
            Ok(()) => SubscribeReturn::ok(),
            Err(err) => SubscribeReturn::fail(err.to_string()),
        }
    }

    /// Resolve a raw transport origin to a live client handle.
    ///
    /// Fails only when the context detached mid-flight (or the transport is
    /// misbehaving); the caller reports that as an internal fault.
    fn resolve(&self, origin: ClientId) -> Option<ClientId> {
        self.clients.contains(origin).then_some(origin)
    }

    fn push_to(&self, client: ClientId, push: Push) {
        match self.clients.get(client) {
            Some(sink) => {
                if sink.push(push).is_err() {
                    warn!(%client, "dropping push for a closed client channel");
                }
            }
            None => warn!(%client, "client vanished before push delivery"),
        }
    }
}

//! Host-side event registry and broadcast dispatch.
//!
//! Maps event names to the set of subscribed client handles. Subscribing is
//! idempotent per handle; unsubscribing a stranger is a no-op success — the
//! protocol favors idempotent teardown over strict bookkeeping. Broadcast is
//! best-effort: a handle whose context already closed is skipped, never an
//! error.

use crate::error::{LinkError, Result};
use crate::id::ClientId;
use crate::protocol::Push;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::ClientTable;

/// Internal observer for subscription traffic, consumed by the embedding
/// application (analytics and the like). Not part of the protocol.
pub trait RegistryObserver: Send + Sync {
    fn on_subscribe(&self, event: &str, client: ClientId) {
        let _ = (event, client);
    }

    fn on_unsubscribe(&self, event: &str, client: ClientId) {
        let _ = (event, client);
    }
}

/// Registry of named events and their subscribers.
pub struct EventRegistry {
    events: RwLock<HashMap<String, Vec<ClientId>>>,
    observers: RwLock<Vec<Arc<dyn RegistryObserver>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event name. Returns `false` if it already exists.
    pub fn add(&self, name: &str) -> bool {
        let mut events = self.events.write().expect("event registry poisoned");
        if events.contains_key(name) {
            return false;
        }
        events.insert(name.to_string(), Vec::new());
        true
    }

    /// Returns `true` if an entry existed and was deleted.
    pub fn remove(&self, name: &str) -> bool {
        self.events
            .write()
            .expect("event registry poisoned")
            .remove(name)
            .is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.events
            .read()
            .expect("event registry poisoned")
            .contains_key(name)
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .events
            .read()
            .expect("event registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers
            .write()
            .expect("observer list poisoned")
            .push(observer);
    }

    /// Record `client` as a subscriber of `name`.
    ///
    /// Duplicate subscriptions are accepted without creating a second entry;
    /// the notification still fires for every accepted request.
    pub fn subscribe(&self, client: ClientId, name: &str) -> Result<()> {
        {
            let mut events = self.events.write().expect("event registry poisoned");
            let subscribers = events.get_mut(name).ok_or_else(|| LinkError::EventUnknown {
                name: name.to_string(),
            })?;
            if !subscribers.contains(&client) {
                subscribers.push(client);
            }
        }

        self.notify(name, client, true);
        Ok(())
    }

    /// Remove `client` from `name`'s subscribers. Unsubscribing a handle
    /// that was never subscribed succeeds as a no-op.
    pub fn unsubscribe(&self, client: ClientId, name: &str) -> Result<()> {
        {
            let mut events = self.events.write().expect("event registry poisoned");
            let subscribers = events.get_mut(name).ok_or_else(|| LinkError::EventUnknown {
                name: name.to_string(),
            })?;
            subscribers.retain(|c| *c != client);
        }

        self.notify(name, client, false);
        Ok(())
    }

    /// Deliver `name` to every subscriber over its push channel.
    pub fn broadcast(&self, clients: &ClientTable, name: &str, args: &[Value]) {
        let Some(subscribers) = self.subscribers(name) else {
            warn!(event = name, "broadcast to an unregistered event");
            return;
        };

        if subscribers.is_empty() {
            debug!(event = name, "broadcast with no subscribers");
            return;
        }

        for client in subscribers {
            self.send_to(clients, name, client, args);
        }
    }

    /// Deliver `name` to a single subscriber.
    pub fn broadcast_to_one(
        &self,
        clients: &ClientTable,
        name: &str,
        client: ClientId,
        args: &[Value],
    ) {
        let Some(subscribers) = self.subscribers(name) else {
            warn!(event = name, "broadcast to an unregistered event");
            return;
        };

        if !subscribers.contains(&client) {
            warn!(event = name, %client, "client is not subscribed to this event");
            return;
        }

        self.send_to(clients, name, client, args);
    }

    /// Drop every subscription held by `client`. Called when its context
    /// tears down, without waiting for explicit unsubscribe requests.
    pub fn purge_client(&self, client: ClientId) {
        let purged: Vec<String> = {
            let mut events = self.events.write().expect("event registry poisoned");
            events
                .iter_mut()
                .filter_map(|(name, subscribers)| {
                    let before = subscribers.len();
                    subscribers.retain(|c| *c != client);
                    (subscribers.len() != before).then(|| name.clone())
                })
                .collect()
        };

        for name in purged {
            debug!(event = %name, %client, "forced unsubscribe on teardown");
            self.notify(&name, client, false);
        }
    }

    fn subscribers(&self, name: &str) -> Option<Vec<ClientId>> {
        self.events
            .read()
            .expect("event registry poisoned")
            .get(name)
            .cloned()
    }

    fn send_to(&self, clients: &ClientTable, name: &str, client: ClientId, args: &[Value]) {
        let push = Push::CallEvent {
            event: name.to_string(),
            args: args.to_vec(),
        };
        match clients.get(client) {
            Some(sink) => {
                if sink.push(push).is_err() {
                    debug!(event = name, %client, "dropping event for a closed client channel");
                }
            }
            None => {
                debug!(event = name, %client, "subscriber context already closed");
            }
        }
    }

    fn notify(&self, name: &str, client: ClientId, subscribed: bool) {
        let observers = self.observers.read().expect("observer list poisoned").clone();
        for observer in observers {
            if subscribed {
                observer.on_subscribe(name, client);
            } else {
                observer.on_unsubscribe(name, client);
            }
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EventSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        pushes: Mutex<Vec<Push>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pushes: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<(String, Vec<Value>)> {
            self.pushes
                .lock()
                .unwrap()
                .iter()
                .filter_map(|p| match p {
                    Push::CallEvent { event, args } => Some((event.clone(), args.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn push(&self, push: Push) -> Result<()> {
            self.pushes.lock().unwrap().push(push);
            Ok(())
        }
    }

    struct CountingObserver {
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    impl CountingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                subscribes: AtomicUsize::new(0),
                unsubscribes: AtomicUsize::new(0),
            })
        }
    }

    impl RegistryObserver for CountingObserver {
        fn on_subscribe(&self, _event: &str, _client: ClientId) {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unsubscribe(&self, _event: &str, _client: ClientId) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn table_with(client: ClientId, sink: Arc<RecordingSink>) -> ClientTable {
        let table = ClientTable::new();
        table.insert(client, sink);
        table
    }

    #[test]
    fn test_add_is_unique() {
        let registry = EventRegistry::new();
        assert!(registry.add("tick"));
        assert!(!registry.add("tick"));
        assert!(registry.has("tick"));
        assert!(registry.remove("tick"));
        assert!(!registry.remove("tick"));
    }

    #[test]
    fn test_subscribe_unknown_event_fails_then_succeeds_after_add() {
        let registry = EventRegistry::new();
        let client = ClientId::from_raw(1);

        let err = registry.subscribe(client, "tick").unwrap_err();
        assert!(matches!(err, LinkError::EventUnknown { .. }));

        registry.add("tick");
        registry.subscribe(client, "tick").unwrap();
    }

    #[test]
    fn test_duplicate_subscribe_is_idempotent() {
        let registry = EventRegistry::new();
        let client = ClientId::from_raw(1);
        registry.add("tick");

        registry.subscribe(client, "tick").unwrap();
        registry.subscribe(client, "tick").unwrap();

        let sink = RecordingSink::new();
        let clients = table_with(client, Arc::clone(&sink));
        registry.broadcast(&clients, "tick", &[json!(7)]);

        // One membership, one delivery.
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stranger_is_noop_success() {
        let registry = EventRegistry::new();
        registry.add("tick");
        registry
            .unsubscribe(ClientId::from_raw(42), "tick")
            .unwrap();
    }

    #[test]
    fn test_broadcast_to_unknown_event_is_noop() {
        let registry = EventRegistry::new();
        let clients = ClientTable::new();
        // Must not panic, must not deliver.
        registry.broadcast(&clients, "missing", &[json!(1)]);
    }

    #[test]
    fn test_broadcast_with_zero_subscribers_is_noop() {
        let registry = EventRegistry::new();
        registry.add("tick");

        let client = ClientId::from_raw(1);
        let sink = RecordingSink::new();
        let clients = table_with(client, Arc::clone(&sink));

        // Registered event, empty subscriber set: distinct from the unknown
        // case, equally harmless.
        registry.broadcast(&clients, "tick", &[json!(1)]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_broadcast_delivers_to_every_subscriber() {
        let registry = EventRegistry::new();
        registry.add("tick");

        let a = ClientId::from_raw(1);
        let b = ClientId::from_raw(2);
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();
        let clients = ClientTable::new();
        clients.insert(a, Arc::clone(&sink_a) as Arc<dyn EventSink>);
        clients.insert(b, Arc::clone(&sink_b) as Arc<dyn EventSink>);

        registry.subscribe(a, "tick").unwrap();
        registry.subscribe(b, "tick").unwrap();
        registry.broadcast(&clients, "tick", &[json!(7)]);

        assert_eq!(sink_a.events(), vec![("tick".to_string(), vec![json!(7)])]);
        assert_eq!(sink_b.events(), vec![("tick".to_string(), vec![json!(7)])]);
    }

    #[test]
    fn test_broadcast_skips_closed_contexts() {
        let registry = EventRegistry::new();
        registry.add("tick");

        let gone = ClientId::from_raw(1);
        let alive = ClientId::from_raw(2);
        let sink = RecordingSink::new();
        let clients = table_with(alive, Arc::clone(&sink));

        registry.subscribe(gone, "tick").unwrap();
        registry.subscribe(alive, "tick").unwrap();

        // `gone` has no sink in the table; delivery to `alive` still happens.
        registry.broadcast(&clients, "tick", &[json!(true)]);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_broadcast_to_one_requires_subscription() {
        let registry = EventRegistry::new();
        registry.add("tick");

        let client = ClientId::from_raw(1);
        let sink = RecordingSink::new();
        let clients = table_with(client, Arc::clone(&sink));

        // Not subscribed: logged, not delivered, not an error.
        registry.broadcast_to_one(&clients, "tick", client, &[json!(1)]);
        assert!(sink.events().is_empty());

        registry.subscribe(client, "tick").unwrap();
        registry.broadcast_to_one(&clients, "tick", client, &[json!(1)]);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_purge_client_removes_every_membership() {
        let registry = EventRegistry::new();
        registry.add("tick");
        registry.add("tock");

        let client = ClientId::from_raw(1);
        let observer = CountingObserver::new();
        registry.add_observer(Arc::clone(&observer) as Arc<dyn RegistryObserver>);

        registry.subscribe(client, "tick").unwrap();
        registry.subscribe(client, "tock").unwrap();
        registry.purge_client(client);

        let sink = RecordingSink::new();
        let clients = table_with(client, Arc::clone(&sink));
        registry.broadcast(&clients, "tick", &[]);
        registry.broadcast(&clients, "tock", &[]);

        assert!(sink.events().is_empty());
        assert_eq!(observer.unsubscribes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_sees_subscription_traffic() {
        let registry = EventRegistry::new();
        registry.add("tick");

        let observer = CountingObserver::new();
        registry.add_observer(Arc::clone(&observer) as Arc<dyn RegistryObserver>);

        let client = ClientId::from_raw(1);
        registry.subscribe(client, "tick").unwrap();
        registry.unsubscribe(client, "tick").unwrap();

        assert_eq!(observer.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(observer.unsubscribes.load(Ordering::SeqCst), 1);
    }
}

//! Client-side listener table and broadcast fan-out.
//!
//! Local callbacks are grouped under event names. The host only ever knows
//! one subscription per client+event: the first local listener for a name
//! triggers the host subscribe, later ones reuse it, and dropping the last
//! one (explicitly, by `once` pruning, or on teardown) releases it.
//!
//! Listeners on the reserved [`CLOSE_EVENT`] never touch the host; the
//! table is pre-seeded with the name so teardown dispatch always has a
//! destination.

use crate::error::{LinkError, Result};
use crate::id::{IdGenerator, ListenerId};
use crate::protocol::{Reply, Request, SubscribeReturn, CLOSE_EVENT};
use crate::transport::HostPort;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Callback invoked with the decoded broadcast arguments.
pub type EventCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    callback: EventCallback,
    once: bool,
}

pub(crate) struct ListenerProxy {
    port: Arc<dyn HostPort>,
    table: Mutex<HashMap<String, Vec<ListenerEntry>>>,
    ids: IdGenerator,
}

impl ListenerProxy {
    pub(crate) fn new(port: Arc<dyn HostPort>) -> Self {
        let mut table = HashMap::new();
        table.insert(CLOSE_EVENT.to_string(), Vec::new());
        Self {
            port,
            table: Mutex::new(table),
            ids: IdGenerator::new(),
        }
    }

    /// Register a callback for `event` over the non-blocking channel.
    pub(crate) async fn add(
        &self,
        event: &str,
        callback: EventCallback,
        once: bool,
    ) -> Result<ListenerId> {
        if self.needs_host_subscribe(event) {
            let ret = Self::expect_subscription(
                self.port
                    .request(Request::Subscribe {
                        event: event.to_string(),
                    })
                    .await?,
            )?;
            self.check_subscribed(event, ret)?;
        }
        Ok(self.insert(event, callback, once))
    }

    /// Register a callback for `event` over the blocking channel.
    pub(crate) fn add_sync(
        &self,
        event: &str,
        callback: EventCallback,
        once: bool,
    ) -> Result<ListenerId> {
        if self.needs_host_subscribe(event) {
            let ret = Self::expect_subscription(self.port.request_blocking(Request::Subscribe {
                event: event.to_string(),
            })?)?;
            self.check_subscribed(event, ret)?;
        }
        Ok(self.insert(event, callback, once))
    }

    /// Remove one listener. Dropping the last listener for a name releases
    /// the host subscription first; if the host refuses, local state is left
    /// intact and the error surfaces.
    pub(crate) async fn remove(&self, event: &str, id: ListenerId) -> Result<()> {
        if self.is_last_listener(event, id)? {
            let ret = Self::expect_subscription(
                self.port
                    .request(Request::Unsubscribe {
                        event: event.to_string(),
                    })
                    .await?,
            )?;
            self.check_unsubscribed(event, ret)?;
        }
        self.drop_entry(event, id);
        Ok(())
    }

    /// Blocking variant of [`ListenerProxy::remove`].
    pub(crate) fn remove_sync(&self, event: &str, id: ListenerId) -> Result<()> {
        if self.is_last_listener(event, id)? {
            let ret = Self::expect_subscription(self.port.request_blocking(
                Request::Unsubscribe {
                    event: event.to_string(),
                },
            )?)?;
            self.check_unsubscribed(event, ret)?;
        }
        self.drop_entry(event, id);
        Ok(())
    }

    /// Fan an incoming broadcast out to the local callbacks.
    ///
    /// A panicking callback is caught and logged so it cannot break delivery
    /// to the others. `once` entries are pruned after firing; when that
    /// empties the name, the host subscription is released.
    pub(crate) async fn dispatch(&self, event: &str, args: &[Value]) {
        let snapshot: Vec<(ListenerId, EventCallback, bool)> = {
            let table = self.table.lock().expect("listener table poisoned");
            match table.get(event) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.callback), e.once))
                    .collect(),
                None => {
                    warn!(event, "event delivered with no local listeners");
                    return;
                }
            }
        };

        let mut fired_once = Vec::new();
        for (id, callback, once) in snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(args))).is_err() {
                error!(event, listener = %id, "listener callback panicked");
            }
            if once {
                fired_once.push(id);
            }
        }

        let emptied = {
            let mut table = self.table.lock().expect("listener table poisoned");
            match table.get_mut(event) {
                Some(entries) => {
                    entries.retain(|e| !fired_once.contains(&e.id));
                    if entries.is_empty() && event != CLOSE_EVENT {
                        table.remove(event);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if emptied {
            self.release_subscription(event).await;
        }
    }

    /// Teardown: dispatch the reserved close event to its listeners, then
    /// release every remaining host subscription best-effort.
    pub(crate) async fn close(&self) {
        self.dispatch(CLOSE_EVENT, &[]).await;

        let names: Vec<String> = {
            let mut table = self.table.lock().expect("listener table poisoned");
            let names = table
                .keys()
                .filter(|name| name.as_str() != CLOSE_EVENT)
                .cloned()
                .collect();
            table.retain(|name, _| name.as_str() == CLOSE_EVENT);
            names
        };

        for event in names {
            self.release_subscription(&event).await;
        }
    }

    pub(crate) async fn events(&self) -> Result<Vec<String>> {
        Self::expect_events(self.port.request(Request::GetEvents).await?)
    }

    pub(crate) fn events_sync(&self) -> Result<Vec<String>> {
        Self::expect_events(self.port.request_blocking(Request::GetEvents)?)
    }

    pub(crate) async fn has_event(&self, event: &str) -> Result<bool> {
        Self::expect_has_event(
            self.port
                .request(Request::HasEvent {
                    event: event.to_string(),
                })
                .await?,
        )
    }

    pub(crate) fn has_event_sync(&self, event: &str) -> Result<bool> {
        Self::expect_has_event(self.port.request_blocking(Request::HasEvent {
            event: event.to_string(),
        })?)
    }

    // ------------------------------------------------------------------
    // Local table plumbing
    // ------------------------------------------------------------------

    /// The reserved close event is purely local; everything else needs a
    /// host subscription when it has no local entry yet.
    fn needs_host_subscribe(&self, event: &str) -> bool {
        event != CLOSE_EVENT
            && !self
                .table
                .lock()
                .expect("listener table poisoned")
                .contains_key(event)
    }

    fn insert(&self, event: &str, callback: EventCallback, once: bool) -> ListenerId {
        let id = self.ids.listener_id();
        self.table
            .lock()
            .expect("listener table poisoned")
            .entry(event.to_string())
            .or_default()
            .push(ListenerEntry { id, callback, once });
        id
    }

    /// Validate that `id` exists under `event` and report whether it is the
    /// last local listener for the name (close-event listeners never are:
    /// they hold no host subscription to release).
    fn is_last_listener(&self, event: &str, id: ListenerId) -> Result<bool> {
        let table = self.table.lock().expect("listener table poisoned");
        let entries = table
            .get(event)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| LinkError::UnsubscribeNoListeners {
                event: event.to_string(),
            })?;
        if !entries.iter().any(|e| e.id == id) {
            return Err(LinkError::UnsubscribeUnknownListener {
                event: event.to_string(),
            });
        }
        Ok(entries.len() == 1 && event != CLOSE_EVENT)
    }

    fn drop_entry(&self, event: &str, id: ListenerId) {
        let mut table = self.table.lock().expect("listener table poisoned");
        if let Some(entries) = table.get_mut(event) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() && event != CLOSE_EVENT {
                table.remove(event);
            }
        }
    }

    /// Release a host subscription outside the explicit-remove path. Both
    /// callers tolerate failure, so it is only logged here.
    async fn release_subscription(&self, event: &str) {
        let outcome = self
            .port
            .request(Request::Unsubscribe {
                event: event.to_string(),
            })
            .await
            .and_then(Self::expect_subscription);

        match outcome {
            Ok(ret) if !ret.is_success => {
                error!(event, reason = %ret.data, "host refused unsubscribe");
            }
            Err(err) => {
                error!(event, %err, "unsubscribe request failed");
            }
            Ok(_) => {}
        }
    }

    fn check_subscribed(&self, event: &str, ret: SubscribeReturn) -> Result<()> {
        if ret.is_success {
            Ok(())
        } else {
            Err(LinkError::SubscribeFailed {
                event: event.to_string(),
                message: ret.data,
            })
        }
    }

    fn check_unsubscribed(&self, event: &str, ret: SubscribeReturn) -> Result<()> {
        if ret.is_success {
            Ok(())
        } else {
            Err(LinkError::UnsubscribeFailed {
                event: event.to_string(),
                message: ret.data,
            })
        }
    }

    fn expect_subscription(reply: Reply) -> Result<SubscribeReturn> {
        match reply {
            Reply::Subscribe(ret) | Reply::Unsubscribe(ret) => Ok(ret),
            other => Err(LinkError::protocol(format!(
                "expected a subscription answer, got {:?}",
                other
            ))),
        }
    }

    fn expect_events(reply: Reply) -> Result<Vec<String>> {
        match reply {
            Reply::Events(names) => Ok(names),
            other => Err(LinkError::protocol(format!(
                "expected an event list, got {:?}",
                other
            ))),
        }
    }

    fn expect_has_event(reply: Reply) -> Result<bool> {
        match reply {
            Reply::HasEvent(known) => Ok(known),
            other => Err(LinkError::protocol(format!(
                "expected a has-event answer, got {:?}",
                other
            ))),
        }
    }
}

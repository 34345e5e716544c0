//! Host-side method registry and dispatch.
//!
//! Maps method names to handlers. Registration never overwrites: the first
//! `add` for a name wins and later ones report failure. Dispatch turns every
//! outcome, including handler faults, into a [`MethodReturn`] envelope — a
//! broken handler must never take the host down with it.

use crate::codec;
use crate::error::LinkError;
use crate::id::ClientId;
use crate::protocol::{MethodReturn, MethodsList};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

/// Handler outcome. `Err` is the failure channel; it becomes a failed
/// envelope carrying the error's message.
pub type MethodResult = std::result::Result<Value, anyhow::Error>;

type BoxedMethod = Arc<dyn Fn(ClientId, Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// A registered method as stored in the registry.
#[derive(Clone)]
pub struct MethodEntry {
    handler: BoxedMethod,
    allow_sync: bool,
}

impl MethodEntry {
    /// Whether the method may be called over the blocking channel.
    pub fn allow_sync(&self) -> bool {
        self.allow_sync
    }
}

/// Registry of named methods callable from clients.
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `name`. Returns `false` without touching the
    /// existing entry when the name is already taken.
    pub fn add<F, Fut>(&self, name: &str, allow_sync: bool, handler: F) -> bool
    where
        F: Fn(ClientId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let mut methods = self.methods.write().expect("method registry poisoned");
        if methods.contains_key(name) {
            return false;
        }

        let handler: BoxedMethod = Arc::new(move |client, args| handler(client, args).boxed());
        methods.insert(
            name.to_string(),
            MethodEntry {
                handler,
                allow_sync,
            },
        );
        true
    }

    /// Returns `true` if an entry existed and was deleted.
    pub fn remove(&self, name: &str) -> bool {
        self.methods
            .write()
            .expect("method registry poisoned")
            .remove(name)
            .is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.methods
            .read()
            .expect("method registry poisoned")
            .contains_key(name)
    }

    /// Look up a registered entry.
    pub fn get(&self, name: &str) -> Option<MethodEntry> {
        self.methods
            .read()
            .expect("method registry poisoned")
            .get(name)
            .cloned()
    }

    /// Registered names, sorted. Every method appears in `async`; only
    /// sync-allowed ones also appear in `sync`.
    pub fn names(&self) -> MethodsList {
        let methods = self.methods.read().expect("method registry poisoned");

        let mut list = MethodsList::default();
        for (name, entry) in methods.iter() {
            list.r#async.push(name.clone());
            if entry.allow_sync {
                list.sync.push(name.clone());
            }
        }
        list.r#async.sort();
        list.sync.sort();
        list
    }

    /// Invoke `name` for the given resolved client.
    ///
    /// The caller resolves the raw transport origin first; `None` means the
    /// issuing context could not be resolved, which should not occur under a
    /// correct transport and is reported as an internal fault.
    pub async fn invoke(
        &self,
        client: Option<ClientId>,
        name: &str,
        args: Vec<Value>,
        sync: bool,
    ) -> MethodReturn {
        let Some(client) = client else {
            error!(method = name, "call from an unresolvable client context");
            return codec::fail_return(&LinkError::ClientUnknown);
        };

        let entry = {
            let methods = self.methods.read().expect("method registry poisoned");
            methods
                .get(name)
                .map(|e| (Arc::clone(&e.handler), e.allow_sync))
        };

        let Some((handler, allow_sync)) = entry else {
            debug!(method = name, "call to an unregistered method");
            return codec::fail_return(&LinkError::MethodUnknown {
                name: name.to_string(),
            });
        };

        if sync && !allow_sync {
            return codec::fail_return(&LinkError::NotSyncAllowed {
                name: name.to_string(),
            });
        }

        match handler(client, args).await {
            Ok(value) => codec::encode_return(value),
            Err(err) => codec::fail_return(&LinkError::MethodRuntime {
                message: err.to_string(),
            }),
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn client() -> Option<ClientId> {
        Some(ClientId::from_raw(1))
    }

    #[test]
    fn test_add_twice_keeps_first_registration() {
        let registry = MethodRegistry::new();
        assert!(registry.add("greet", false, |_, _| async { Ok(json!("first")) }));
        assert!(!registry.add("greet", false, |_, _| async { Ok(json!("second")) }));
        assert!(registry.has("greet"));
    }

    #[tokio::test]
    async fn test_first_handler_stays_active_after_rejected_add() {
        let registry = MethodRegistry::new();
        registry.add("greet", false, |_, _| async { Ok(json!("first")) });
        registry.add("greet", false, |_, _| async { Ok(json!("second")) });

        let ret = registry.invoke(client(), "greet", vec![], false).await;
        assert!(ret.is_success);
        assert_eq!(ret.data, json!("first"));
    }

    #[test]
    fn test_get_exposes_the_sync_flag() {
        let registry = MethodRegistry::new();
        registry.add("greet", true, |_, _| async { Ok(json!(null)) });

        let entry = registry.get("greet").expect("entry should exist");
        assert!(entry.allow_sync());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_names_split_by_sync_flag() {
        let registry = MethodRegistry::new();
        registry.add("b_async", false, |_, _| async { Ok(json!(null)) });
        registry.add("a_sync", true, |_, _| async { Ok(json!(null)) });

        let list = registry.names();
        assert_eq!(list.r#async, vec!["a_sync", "b_async"]);
        assert_eq!(list.sync, vec!["a_sync"]);
    }

    #[tokio::test]
    async fn test_unknown_method_fails_without_invoking_anything() {
        let registry = MethodRegistry::new();
        let ret = registry.invoke(client(), "missing", vec![], false).await;

        assert!(!ret.is_success);
        assert_eq!(
            ret.data,
            json!(
                LinkError::MethodUnknown {
                    name: "missing".into()
                }
                .to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_sync_call_to_async_only_method_does_not_run_handler() {
        let registry = MethodRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_probe = Arc::clone(&ran);
        registry.add("async_only", false, move |_, _| {
            let ran = Arc::clone(&ran_probe);
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok(json!(null))
            }
        });

        let ret = registry.invoke(client(), "async_only", vec![], true).await;
        assert!(!ret.is_success);
        assert!(ret.data.as_str().unwrap().contains("async-only"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handler_fault_is_isolated() {
        let registry = MethodRegistry::new();
        registry.add("broken", false, |_, _| async { Err(anyhow!("boom")) });
        registry.add("fine", false, |_, _| async { Ok(json!("ok")) });

        let ret = registry.invoke(client(), "broken", vec![], false).await;
        assert!(!ret.is_success);
        assert!(ret.data.as_str().unwrap().contains("boom"));

        // Other methods keep working after a handler fault.
        let ret = registry.invoke(client(), "fine", vec![], false).await;
        assert!(ret.is_success);
        assert_eq!(ret.data, json!("ok"));
    }

    #[tokio::test]
    async fn test_structured_result_is_flagged_as_object() {
        let registry = MethodRegistry::new();
        registry.add("table", false, |_, _| async { Ok(json!({"rows": [1, 2]})) });

        let ret = registry.invoke(client(), "table", vec![], false).await;
        assert!(ret.is_success);
        assert!(ret.is_object);
        assert!(ret.data.is_string());
    }

    #[tokio::test]
    async fn test_unresolved_client_fails_with_internal_fault() {
        let registry = MethodRegistry::new();
        registry.add("greet", false, |_, _| async { Ok(json!(null)) });

        let ret = registry.invoke(None, "greet", vec![], false).await;
        assert!(!ret.is_success);
        assert_eq!(
            ret.data,
            json!(LinkError::ClientUnknown.to_string())
        );
    }

    #[tokio::test]
    async fn test_handler_receives_client_and_args() {
        let registry = MethodRegistry::new();
        registry.add("echo_ctx", false, |client, args| async move {
            Ok(json!({
                "client": client.as_raw(),
                "args": args,
            }))
        });

        let ret = registry
            .invoke(Some(ClientId::from_raw(9)), "echo_ctx", vec![json!(5)], false)
            .await;
        assert!(ret.is_success);
        let decoded: Value = serde_json::from_str(ret.data.as_str().unwrap()).unwrap();
        assert_eq!(decoded, json!({"client": 9, "args": [5]}));
    }
}

//! Opaque identifiers for calls, listeners and clients.
//!
//! Every table that needs correlation owns its own [`IdGenerator`], a
//! monotonic counter. Uniqueness is per owning table for the lifetime of the
//! process; ids are never reused.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlates an in-flight method call with its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

/// Identifies one registered listener within a client's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(u64);

/// Opaque handle to one attached client context.
///
/// Minted by the host when a client attaches; valid until the host is told
/// the client closed. The host never retains a handle past that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn as_raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

impl_id!(CallId);
impl_id!(ListenerId);
impl_id!(ClientId);

/// Monotonic id source. Starts at 1 so a zero id never appears on the wire.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn call_id(&self) -> CallId {
        CallId(self.next())
    }

    pub fn listener_id(&self) -> ListenerId {
        ListenerId(self.next())
    }

    pub fn client_id(&self) -> ClientId {
        ClientId(self.next())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let ids = IdGenerator::new();
        let a = ids.call_id();
        let b = ids.call_id();
        assert_ne!(a, b);
        assert!(b.as_raw() > a.as_raw());
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(IdGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ids = Arc::clone(&ids);
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| ids.call_id().as_raw()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for raw in handle.join().unwrap() {
                assert!(seen.insert(raw), "id {} handed out twice", raw);
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = CallId::from_raw(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: CallId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}

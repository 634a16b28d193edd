//! Registry of RPC functions keyed by the hash of their name.
//!
//! The operation id travelling on the wire is a stable 32-bit hash of the
//! function name, so both peers derive the same id from the same string
//! without exchanging a table. The registry stores the full name next to the
//! handler and compares it on every insert and lookup, so two distinct names
//! colliding under the hash are rejected instead of silently aliasing.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::handle::Handle;

/// Operation id: hash of a registered function name.
pub type RpcId = u32;

/// Server-side function dispatched for incoming requests.
pub type RpcHandler = Arc<dyn Fn(Handle) -> Result<()> + Send + Sync>;

/// User data attached to a registration; dropped when the entry is evicted.
pub type RegisteredData = Arc<dyn Any + Send + Sync>;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Stable 32-bit FNV-1a hash of a function name.
///
/// Must agree across processes: it defines the wire-level operation id.
pub fn hash_name(name: &str) -> RpcId {
    let mut h = FNV_OFFSET;
    for byte in name.as_bytes() {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

struct RpcEntry {
    name: String,
    handler: RpcHandler,
    data: Option<RegisteredData>,
}

/// Map from operation id to registered function.
pub struct Registry {
    map: RwLock<HashMap<RpcId, RpcEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a function under `hash_name(name)`.
    ///
    /// Fails when the name is already registered or when a distinct name
    /// occupies the same hash.
    pub fn register(&self, name: &str, handler: RpcHandler) -> Result<RpcId> {
        let id = hash_name(name);
        let mut map = self.map.write();
        if let Some(entry) = map.get(&id) {
            if entry.name == name {
                return Err(Error::InvalidParam("function name already registered"));
            }
            return Err(Error::InvalidParam("function name collides with a registered id"));
        }
        map.insert(
            id,
            RpcEntry {
                name: name.to_owned(),
                handler,
                data: None,
            },
        );
        Ok(id)
    }

    /// Look up a name; returns `(present, id)` with `id = 0` when absent.
    pub fn registered(&self, name: &str) -> (bool, RpcId) {
        let id = hash_name(name);
        let map = self.map.read();
        match map.get(&id) {
            Some(entry) if entry.name == name => (true, id),
            _ => (false, 0),
        }
    }

    /// Attach user data to an entry. Replacing drops the previous data.
    pub fn attach_data(&self, id: RpcId, data: RegisteredData) -> Result<()> {
        let mut map = self.map.write();
        let entry = map.get_mut(&id).ok_or(Error::NoMatch(id))?;
        entry.data = Some(data);
        Ok(())
    }

    /// User data attached to an entry, if any.
    pub fn lookup_data(&self, id: RpcId) -> Option<RegisteredData> {
        self.map.read().get(&id).and_then(|entry| entry.data.clone())
    }

    /// Handler registered under `id`.
    pub fn lookup_handler(&self, id: RpcId) -> Result<RpcHandler> {
        self.map
            .read()
            .get(&id)
            .map(|entry| entry.handler.clone())
            .ok_or(Error::NoMatch(id))
    }

    /// Drop every entry, releasing handlers and attached data.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> RpcHandler {
        Arc::new(|_handle| Ok(()))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        let id = registry.register("add", noop_handler()).unwrap();
        assert_ne!(id, 0);
        assert_eq!(id, hash_name("add"));

        assert_eq!(registry.registered("add"), (true, id));
        assert_eq!(registry.registered("sub"), (false, 0));
        assert!(registry.lookup_handler(id).is_ok());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let registry = Registry::new();
        registry.register("echo", noop_handler()).unwrap();
        assert!(matches!(
            registry.register("echo", noop_handler()),
            Err(Error::InvalidParam(_))
        ));
    }

    #[test]
    fn test_missing_id_is_no_match() {
        let registry = Registry::new();
        assert!(matches!(
            registry.lookup_handler(12345),
            Err(Error::NoMatch(12345))
        ));
        assert!(matches!(
            registry.attach_data(12345, Arc::new(())),
            Err(Error::NoMatch(12345))
        ));
    }

    #[test]
    fn test_attached_data_roundtrip() {
        let registry = Registry::new();
        let id = registry.register("stateful", noop_handler()).unwrap();
        assert!(registry.lookup_data(id).is_none());

        registry.attach_data(id, Arc::new(7u64)).unwrap();
        let data = registry.lookup_data(id).unwrap();
        assert_eq!(*data.downcast::<u64>().unwrap(), 7);
    }

    #[test]
    fn test_clear_drops_attached_data() {
        let registry = Registry::new();
        let id = registry.register("teardown", noop_handler()).unwrap();
        let data = Arc::new(3u32);
        registry.attach_data(id, data.clone()).unwrap();
        assert_eq!(Arc::strong_count(&data), 2);

        registry.clear();
        assert_eq!(Arc::strong_count(&data), 1);
        assert_eq!(registry.registered("teardown"), (false, 0));
    }

    #[test]
    fn test_hash_is_stable() {
        // FNV-1a reference value; the wire id must never drift.
        assert_eq!(hash_name(""), FNV_OFFSET);
        assert_eq!(hash_name("add"), hash_name("add"));
        assert_ne!(hash_name("add"), hash_name("sub"));
    }
}

//! Context registry
//!
//! Directory of live bridge contexts addressed by small integer ids. The id
//! is what script entrypoints carry in their closure upvalues, so ids are
//! kept dense: allocation takes the lowest free slot and a released slot is
//! reused by the next allocation.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};

/// Identifier of a context within its registry
pub type ContextId = usize;

/// Registry of live contexts.
///
/// Slots hold weak references: the registry never keeps a context alive.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    slots: Mutex<Vec<Option<Weak<BridgeContext>>>>,
}

impl ContextRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve the lowest free id and store the context built for it
    pub(crate) fn allocate<F>(&self, build: F) -> Arc<BridgeContext>
    where
        F: FnOnce(ContextId) -> BridgeContext,
    {
        let mut slots = self.slots.lock();
        let id = slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(slots.len());

        let context = Arc::new(build(id));
        let weak = Some(Arc::downgrade(&context));
        if id == slots.len() {
            slots.push(weak);
        } else {
            slots[id] = weak;
        }

        debug!(target: "luabridge::registry", id, live = slots.iter().filter(|s| s.is_some()).count(), "context registered");
        context
    }

    /// Live context registered under `id`
    pub fn lookup(&self, id: ContextId) -> BridgeResult<Arc<BridgeContext>> {
        // Upgrade under the lock, but let a possibly-last `Arc` drop after it
        let context = {
            let slots = self.slots.lock();
            slots
                .get(id)
                .and_then(Option::as_ref)
                .ok_or(BridgeError::ContextNotFound(id))?
                .upgrade()
        };
        match context {
            Some(context) if !context.is_closed() => Ok(context),
            _ => Err(BridgeError::ContextClosed),
        }
    }

    /// Free the slot of `context`.
    ///
    /// The slot is only cleared if it still belongs to that context.
    pub(crate) fn release(&self, id: ContextId, context: *const BridgeContext) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(id) {
            if slot.as_ref().is_some_and(|weak| weak.as_ptr() == context) {
                *slot = None;
                debug!(target: "luabridge::registry", id, "context released");
            }
        }
    }

    /// Number of occupied slots
    pub fn live_count(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ClassRegistry;
    use crate::options::BridgeOptions;

    fn create(registry: &Arc<ContextRegistry>) -> Arc<BridgeContext> {
        BridgeContext::create(registry, Arc::new(ClassRegistry::new()), BridgeOptions::default()).unwrap()
    }

    #[test]
    fn test_ids_are_dense() {
        let registry = ContextRegistry::new();
        let a = create(&registry);
        let b = create(&registry);
        let c = create(&registry);
        assert_eq!((a.id(), b.id(), c.id()), (0, 1, 2));
        assert_eq!(registry.live_count(), 3);
    }

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let registry = ContextRegistry::new();
        let a = create(&registry);
        let b = create(&registry);
        let _c = create(&registry);

        b.close().unwrap();
        a.close().unwrap();
        assert_eq!(registry.live_count(), 1);

        let d = create(&registry);
        assert_eq!(d.id(), 0);
        let e = create(&registry);
        assert_eq!(e.id(), 1);
    }

    #[test]
    fn test_lookup_unknown_id() {
        let registry = ContextRegistry::new();
        assert!(matches!(registry.lookup(7), Err(BridgeError::ContextNotFound(7))));
    }

    #[test]
    fn test_lookup_after_close() {
        let registry = ContextRegistry::new();
        let ctx = create(&registry);
        let id = ctx.id();
        assert!(Arc::ptr_eq(&registry.lookup(id).unwrap(), &ctx));

        ctx.close().unwrap();
        assert!(matches!(registry.lookup(id), Err(BridgeError::ContextNotFound(_))));
    }

    #[test]
    fn test_drop_releases_slot() {
        let registry = ContextRegistry::new();
        let ctx = create(&registry);
        drop(ctx);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(create(&registry).id(), 0);
    }

    #[test]
    fn test_stale_release_keeps_new_owner() {
        let registry = ContextRegistry::new();
        let old = create(&registry);
        let stale = Arc::as_ptr(&old);
        old.close().unwrap();

        let fresh = create(&registry);
        assert_eq!(fresh.id(), 0);
        registry.release(0, stale);
        assert!(registry.lookup(0).is_ok());
        drop(old);
    }
}

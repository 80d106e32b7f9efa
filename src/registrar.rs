use crate::invalidation::{InvalidationMap, ObjectIdSet};
use crate::state::{InvalidatorState, InvalidatorStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A consumer subsystem interested in a set of object ids. Callbacks are
/// invoked from the session actor task; implementations must not block.
pub trait InvalidationHandler: Send + Sync {
    fn on_invalidator_state_change(&self, status: InvalidatorStatus);
    fn on_incoming_invalidation(&self, invalidations: InvalidationMap);
    fn owner_name(&self) -> &str;
}

/// Stable identity for a registered handler, derived from `Arc` pointer
/// identity so the same handler value always maps to the same key.
fn handler_key(handler: &Arc<dyn InvalidationHandler>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

struct Registration {
    handler: Arc<dyn InvalidationHandler>,
    ids: ObjectIdSet,
}

/// Tracks registered handlers and the ids each one claims.
///
/// An object id is owned by at most one handler system-wide. Double
/// registration and unregistering an unknown handler are programming errors
/// and panic; id-ownership conflicts are runtime conditions and are reported
/// via a `false` return instead.
#[derive(Default)]
pub struct HandlerRegistrar {
    handlers: BTreeMap<usize, Registration>,
    current: Option<InvalidatorStatus>,
}

impl HandlerRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics if `handler` is already registered.
    pub fn register(&mut self, handler: Arc<dyn InvalidationHandler>) {
        let key = handler_key(&handler);
        let owner = handler.owner_name().to_string();
        let previous = self.handlers.insert(
            key,
            Registration {
                handler,
                ids: ObjectIdSet::new(),
            },
        );
        assert!(
            previous.is_none(),
            "invalidation handler '{owner}' registered twice"
        );
        debug!(owner = %owner, "invalidation handler registered");
    }

    /// Replaces `handler`'s id set. Returns `false` (leaving all
    /// registrations unchanged) if any id is already owned by a different
    /// handler. Panics if `handler` is not registered.
    pub fn update_registered_ids(
        &mut self,
        handler: &Arc<dyn InvalidationHandler>,
        ids: ObjectIdSet,
    ) -> bool {
        let key = handler_key(handler);
        assert!(
            self.handlers.contains_key(&key),
            "update_registered_ids for unregistered handler '{}'",
            handler.owner_name()
        );

        let conflict = self
            .handlers
            .iter()
            .filter(|(other, _)| **other != key)
            .any(|(_, reg)| !reg.ids.is_disjoint(&ids));
        if conflict {
            return false;
        }

        if let Some(reg) = self.handlers.get_mut(&key) {
            reg.ids = ids;
        }
        true
    }

    /// Panics if `handler` is not registered.
    pub fn unregister(&mut self, handler: &Arc<dyn InvalidationHandler>) {
        let key = handler_key(handler);
        let removed = self.handlers.remove(&key);
        assert!(
            removed.is_some(),
            "unregister of unknown invalidation handler '{}'",
            handler.owner_name()
        );
        debug!(owner = %handler.owner_name(), "invalidation handler unregistered");
    }

    /// Union of every handler's registered ids; what gets pushed down to the
    /// live channel.
    pub fn all_registered_ids(&self) -> ObjectIdSet {
        self.handlers
            .values()
            .flat_map(|reg| reg.ids.iter().cloned())
            .collect()
    }

    /// Delivers to each handler only the subset of `invalidations` whose ids
    /// intersect its registered set; each handler sees each applicable
    /// invalidation exactly once per call. Returns (owner, count) pairs for
    /// the diagnostics sink.
    pub fn dispatch_invalidations(&self, invalidations: &InvalidationMap) -> Vec<(String, usize)> {
        let mut delivered = Vec::new();
        for reg in self.handlers.values() {
            let subset = invalidations.subset(&reg.ids);
            if subset.is_empty() {
                continue;
            }
            let count = subset.total();
            delivered.push((reg.handler.owner_name().to_string(), count));
            reg.handler.on_incoming_invalidation(subset);
        }
        delivered
    }

    /// Records the new current status and mirrors it to every handler.
    pub fn update_state(&mut self, status: InvalidatorStatus) {
        self.current = Some(status.clone());
        for reg in self.handlers.values() {
            reg.handler.on_invalidator_state_change(status.clone());
        }
    }

    /// The last broadcast state; `TransientError` before any broadcast,
    /// matching "invalidator currently stopped".
    pub fn current_state(&self) -> InvalidatorState {
        self.current
            .as_ref()
            .map_or(InvalidatorState::TransientError, |s| s.state)
    }

    pub fn current_status(&self) -> InvalidatorStatus {
        self.current
            .clone()
            .unwrap_or_else(|| InvalidatorStatus::new(InvalidatorState::TransientError))
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Owner-name to registered-id-count map for operational logging.
    pub fn sanitized_handler_ids(&self) -> BTreeMap<String, usize> {
        self.handlers
            .values()
            .map(|reg| (reg.handler.owner_name().to_string(), reg.ids.len()))
            .collect()
    }
}

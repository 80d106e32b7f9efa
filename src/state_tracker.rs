use crate::invalidation::InvalidationMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::info;

/// Persisted invalidation state (external collaborator). The session treats
/// this as the sole source of truth for identity and bootstrap data; it never
/// caches a second copy across restarts.
pub trait InvalidationStateTracker: Send {
    /// The persisted client identity, or `None` if one was never generated.
    fn client_id(&self) -> Option<String>;

    /// Replaces the client identity. Implementations drop all other state
    /// tied to the previous identity.
    fn clear_and_set_client_id(&mut self, client_id: String);

    /// Invalidations persisted while the client was offline.
    fn saved_invalidations(&self) -> InvalidationMap;

    /// Opaque bootstrap blob for the underlying invalidation client.
    fn bootstrap_data(&self) -> Vec<u8>;
}

/// Generates a fresh client identity: 128 bits of cryptographically random
/// data, base64-encoded. Similar in shape to a sync cache GUID.
pub fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64.encode(bytes)
}

/// Ensures the tracker holds a client identity, generating and persisting one
/// only when absent. Returns the (possibly pre-existing) identity.
pub fn ensure_client_id(tracker: &mut dyn InvalidationStateTracker) -> String {
    if let Some(existing) = tracker.client_id()
        && !existing.is_empty()
    {
        return existing;
    }
    let fresh = generate_client_id();
    tracker.clear_and_set_client_id(fresh.clone());
    info!("generated new invalidation client id");
    fresh
}

/// Non-persisting tracker for embedders without storage and for tests.
#[derive(Default)]
pub struct InMemoryStateTracker {
    client_id: Option<String>,
    saved_invalidations: InvalidationMap,
    bootstrap_data: Vec<u8>,
}

impl InMemoryStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }
}

impl InvalidationStateTracker for InMemoryStateTracker {
    fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn clear_and_set_client_id(&mut self, client_id: String) {
        self.client_id = Some(client_id);
        self.saved_invalidations = InvalidationMap::new();
        self.bootstrap_data.clear();
    }

    fn saved_invalidations(&self) -> InvalidationMap {
        self.saved_invalidations.clone()
    }

    fn bootstrap_data(&self) -> Vec<u8> {
        self.bootstrap_data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_base64_shaped() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_ne!(a, b);
        // 16 bytes -> 24 base64 chars including padding.
        assert_eq!(a.len(), 24);
        assert!(BASE64.decode(&a).is_ok());
    }

    #[test]
    fn ensure_client_id_is_idempotent() {
        let mut tracker = InMemoryStateTracker::new();
        let first = ensure_client_id(&mut tracker);
        let second = ensure_client_id(&mut tracker);
        assert_eq!(first, second);
        assert_eq!(tracker.client_id().as_deref(), Some(first.as_str()));
    }

    #[test]
    fn ensure_client_id_keeps_a_preexisting_identity() {
        let mut tracker = InMemoryStateTracker::with_client_id("persisted-id");
        assert_eq!(ensure_client_id(&mut tracker), "persisted-id");
    }

    #[test]
    fn empty_persisted_id_is_treated_as_absent() {
        let mut tracker = InMemoryStateTracker::with_client_id("");
        let id = ensure_client_id(&mut tracker);
        assert!(!id.is_empty());
    }

    #[test]
    fn clearing_identity_drops_dependent_state() {
        let mut tracker = InMemoryStateTracker::new();
        tracker.bootstrap_data = vec![1, 2, 3];
        tracker.clear_and_set_client_id(generate_client_id());
        assert!(tracker.bootstrap_data().is_empty());
        assert!(tracker.saved_invalidations().is_empty());
    }
}

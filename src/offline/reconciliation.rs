//! # Identity Reconciliation
//!
//! Maps each entity's stable client identifier to its *current* local key:
//! the provisional key until the create replay confirms, the canonical
//! server id thereafter. Lookups and enqueues resolve through this map
//! instead of caching a key across suspension points, so nothing observes a
//! stale provisional key after confirmation.

use std::collections::HashMap;
use tracing::debug;

use crate::model::{LocalKey, StableId};

/// stable id → current local key.
#[derive(Debug, Default)]
pub struct IdentityReconciler {
    keys: HashMap<StableId, LocalKey>,
}

impl IdentityReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identity, typically at optimistic create or store load.
    pub fn register(&mut self, stable_id: StableId, local_key: LocalKey) {
        self.keys.insert(stable_id, local_key);
    }

    /// The key the entity currently lives under.
    pub fn resolve_local_key(&self, stable_id: StableId) -> Option<LocalKey> {
        self.keys.get(&stable_id).copied()
    }

    /// Swap the provisional key for the canonical one. Called exactly once
    /// per entity, at the moment its create replay succeeds. Returns the
    /// provisional key being retired, or `None` for an unknown identity.
    pub fn reconcile_on_create(
        &mut self,
        stable_id: StableId,
        canonical_key: LocalKey,
    ) -> Option<LocalKey> {
        match self.keys.insert(stable_id, canonical_key) {
            Some(provisional) => {
                debug!(%stable_id, provisional, canonical = canonical_key, "identity reconciled");
                Some(provisional)
            }
            None => {
                debug!(%stable_id, canonical = canonical_key, "identity registered at confirmation");
                None
            }
        }
    }

    /// Drop an identity once its entity is gone and nothing references it.
    pub fn forget(&mut self, stable_id: StableId) {
        self.keys.remove(&stable_id);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tracks_confirmation() {
        let mut reconciler = IdentityReconciler::new();
        let stable = StableId::new();

        reconciler.register(stable, -1000);
        assert_eq!(reconciler.resolve_local_key(stable), Some(-1000));

        let retired = reconciler.reconcile_on_create(stable, 101);
        assert_eq!(retired, Some(-1000));
        assert_eq!(reconciler.resolve_local_key(stable), Some(101));
    }

    #[test]
    fn test_unknown_identity_resolves_none() {
        let reconciler = IdentityReconciler::new();
        assert_eq!(reconciler.resolve_local_key(StableId::new()), None);
    }

    #[test]
    fn test_forget() {
        let mut reconciler = IdentityReconciler::new();
        let stable = StableId::new();
        reconciler.register(stable, 5);
        reconciler.forget(stable);
        assert!(reconciler.is_empty());
    }
}

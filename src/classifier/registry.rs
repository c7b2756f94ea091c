//! Owner-keyed classifier registry
//!
//! The single source of truth for classifiers during process lifetime.
//! Each entry is wrapped in its own `RwLock`: mutating operations (evidence
//! addition, training, reset) hold the write lock for the duration of
//! mutation plus persist, while read-only classification takes the read
//! lock. One owner's mutation therefore never interleaves with its own
//! reads or writes but runs freely alongside other owners' work.

use crate::classifier::user::UserClassifier;
use crate::config::ClassifierConfig;
use crate::error::Result;
use crate::persist::PersistenceLayer;
use crate::types::OwnerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shared handle to one owner's classifier
pub type ClassifierHandle = Arc<RwLock<UserClassifier>>;

/// In-memory map of owner to classifier, lazily hydrated from disk
pub struct ClassifierRegistry {
    persistence: PersistenceLayer,
    cfg: ClassifierConfig,
    inner: RwLock<HashMap<OwnerId, ClassifierHandle>>,
}

impl ClassifierRegistry {
    pub fn new(persistence: PersistenceLayer, cfg: ClassifierConfig) -> Self {
        Self {
            persistence,
            cfg,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn persistence(&self) -> &PersistenceLayer {
        &self.persistence
    }

    /// Get the in-memory classifier for an owner, hydrating from disk (or
    /// creating empty) when absent. Never fails.
    pub async fn get_or_create(&self, owner: &OwnerId) -> ClassifierHandle {
        if let Some(handle) = self.inner.read().await.get(owner) {
            return handle.clone();
        }

        // Hydrate outside the map lock; a racing hydration for the same
        // owner is resolved below by whoever inserted first.
        let classifier =
            UserClassifier::hydrate(owner.clone(), &self.cfg, self.persistence.clone()).await;

        let mut map = self.inner.write().await;
        map.entry(owner.clone())
            .or_insert_with(|| Arc::new(RwLock::new(classifier)))
            .clone()
    }

    /// Look up an owner without creating or hydrating anything
    pub async fn get(&self, owner: &OwnerId) -> Option<ClassifierHandle> {
        self.inner.read().await.get(owner).cloned()
    }

    /// Remove the in-memory classifier and delete its persisted artifacts;
    /// a no-op when neither exists
    ///
    /// Serialized with the owner's own mutators: the removed entry's write
    /// lock is held while the classifier is retired and the disk state
    /// deleted, so an in-flight `add_evidence` or `train` either completes
    /// before the wipe or fails against the retired instance afterwards.
    pub async fn reset(&self, owner: &OwnerId) -> Result<()> {
        let removed = self.inner.write().await.remove(owner);
        if let Some(handle) = removed {
            let mut classifier = handle.write().await;
            classifier.retire();
            info!("Retired in-memory classifier for {}", owner);
            return self.persistence.delete(owner).await;
        }
        self.persistence.delete(owner).await
    }

    /// Hydrate every persisted owner eagerly; runs once at process start.
    /// A failure for one owner is logged and skipped, never aborting the
    /// rest. Returns the number of owners loaded.
    pub async fn load_all(&self) -> usize {
        let owners = match self.persistence.list_owners().await {
            Ok(owners) => owners,
            Err(e) => {
                warn!("Could not enumerate persisted owners: {}", e);
                return 0;
            }
        };

        let mut loaded = 0;
        for owner in owners {
            // hydrate degrades internally; this loop only has to keep going
            self.get_or_create(&owner).await;
            loaded += 1;
        }
        info!("Loaded {} persisted classifiers", loaded);
        loaded
    }

    /// Owners currently held in memory
    pub async fn loaded_owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.inner.read().await.keys().cloned().collect();
        owners.sort();
        owners
    }
}

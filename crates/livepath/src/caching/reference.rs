use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{CachingError, CachingPolicy};
use crate::model::Node;

/// Per-node state of an external reference.
pub(crate) struct ReferenceState {
    pub(crate) policy: Arc<CachingPolicy>,
    pub(crate) dirty: AtomicBool,
}

impl ReferenceState {
    pub(crate) fn new(policy: Arc<CachingPolicy>, dirty: bool) -> Self {
        Self { policy, dirty: AtomicBool::new(dirty) }
    }
}

impl Node {
    /// Creates a dirty external reference governed by `policy`.
    pub fn reference(name: impl Into<Arc<str>>, policy: Arc<CachingPolicy>) -> Self {
        Node::with_state(name.into(), Some(ReferenceState::new(policy, true)))
    }

    pub fn is_reference(&self) -> bool {
        self.0.reference.is_some()
    }

    /// Whether this is a reference whose content is not materialized.
    pub fn is_dirty(&self) -> bool {
        self.0.reference.as_ref().is_some_and(|state| state.dirty.load(Ordering::Acquire))
    }

    pub fn caching_policy(&self) -> Option<Arc<CachingPolicy>> {
        self.0.reference.as_ref().map(|state| Arc::clone(&state.policy))
    }

    pub(crate) fn reference_state(&self) -> Result<&ReferenceState, CachingError> {
        self.0.reference.as_ref().ok_or(CachingError::Unsupported("not an external reference"))
    }

    /// Materializes this reference if it is dirty. Plain nodes are always
    /// in sync.
    pub fn sync(&self) -> Result<(), CachingError> {
        match &self.0.reference {
            Some(state) => state.policy.sync(self),
            None => Ok(()),
        }
    }

    /// Drops the materialized content of this reference and marks it dirty.
    ///
    /// A reference with observers anywhere in its subtree is re-synchronized
    /// right away instead, so live queries keep seeing patched (not vanished)
    /// content.
    pub fn clear_cache(&self) -> Result<(), CachingError> {
        let state = self.reference_state()?;
        if state.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.has_observers_in_subtree() {
            debug!(reference = ?self, "refreshing observed reference");
            state.dirty.store(true, Ordering::Release);
            return state.policy.sync(self);
        }

        debug!(reference = ?self, "dropping cached content");
        state.dirty.store(true, Ordering::Release);
        for child in self.raw_children() {
            super::forget_references(&child);
        }
        while self.raw_remove_child(0).is_some() {}
        for (name, _) in self.raw_attributes() {
            if !state.policy.is_static_attribute(&name) {
                self.raw_remove_attribute(&name);
            }
        }
        self.raw_set_value(None);
        state.policy.cache().remove(self);
        Ok(())
    }
}

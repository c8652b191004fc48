use std::collections::HashSet;
use std::fmt;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::Node;

/// Bookkeeping of synchronized references.
///
/// `add` is called after a reference was materialized, `touch` on every access
/// through its hook, `remove` once its content is dropped.
pub trait Cache: Send + Sync + fmt::Debug {
    fn add(&self, reference: &Node);
    fn remove(&self, reference: &Node);
    fn touch(&self, reference: &Node);
    fn size(&self) -> usize;
    /// `None` for caches that never evict.
    fn capacity(&self) -> Option<usize>;
}

/// Tracks membership only.
#[derive(Debug, Default)]
pub struct UnboundedCache {
    entries: Mutex<HashSet<Node>>,
}

impl UnboundedCache {
    pub fn contains(&self, reference: &Node) -> bool {
        self.entries.lock().contains(reference)
    }
}

impl Cache for UnboundedCache {
    fn add(&self, reference: &Node) {
        self.entries.lock().insert(reference.clone());
    }

    fn remove(&self, reference: &Node) {
        self.entries.lock().remove(reference);
    }

    fn touch(&self, _reference: &Node) {}

    fn size(&self) -> usize {
        self.entries.lock().len()
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

struct AccessOrder {
    capacity: usize,
    /// Eviction candidates, most recently touched first.
    order: LruCache<Node, ()>,
    /// Entries with a cached descendant reference; never evicted.
    locked: HashSet<Node>,
}

impl AccessOrder {
    fn size(&self) -> usize {
        self.order.len() + self.locked.len()
    }

    fn has_cached_descendant(&self, node: &Node) -> bool {
        self.order.iter().any(|(entry, _)| node.is_ancestor_of(entry))
            || self.locked.iter().any(|entry| node.is_ancestor_of(entry))
    }
}

/// Bounded cache evicting the least recently touched reference.
///
/// A reference is not evicted while it is dirty, while any node in its subtree
/// is observed, or while a descendant reference is cached here. When no entry
/// is eligible the capacity grows to fit.
pub struct AccessOrderCache {
    inner: Mutex<AccessOrder>,
}

impl fmt::Debug for AccessOrderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AccessOrderCache")
            .field("capacity", &inner.capacity)
            .field("evictable", &inner.order.len())
            .field("locked", &inner.locked.len())
            .finish()
    }
}

impl AccessOrderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AccessOrder {
                capacity,
                order: LruCache::unbounded(),
                locked: HashSet::new(),
            }),
        }
    }

    pub fn contains(&self, reference: &Node) -> bool {
        let inner = self.inner.lock();
        inner.order.contains(reference) || inner.locked.contains(reference)
    }

    pub fn is_locked(&self, reference: &Node) -> bool {
        self.inner.lock().locked.contains(reference)
    }

    fn evict(&self, added: &Node) {
        loop {
            let victim = {
                let mut inner = self.inner.lock();
                if inner.size() <= inner.capacity {
                    return;
                }
                let candidate = inner
                    .order
                    .iter()
                    .map(|(node, _)| node)
                    .filter(|node| *node != added && !node.is_dirty() && !node.has_observers_in_subtree())
                    .last()
                    .cloned();
                match candidate {
                    Some(node) => {
                        inner.order.pop(&node);
                        node
                    }
                    None => {
                        inner.capacity = inner.size();
                        debug!(capacity = inner.capacity, "no evictable reference, growing cache");
                        return;
                    }
                }
            };
            debug!(reference = ?victim, "evicting reference");
            if let Err(error) = victim.clear_cache() {
                warn!(reference = ?victim, %error, "evicted reference could not be cleared");
            }
        }
    }
}

impl Cache for AccessOrderCache {
    fn add(&self, reference: &Node) {
        {
            let mut inner = self.inner.lock();
            if inner.locked.contains(reference) {
                return;
            }
            inner.order.put(reference.clone(), ());
            for ancestor in reference.ancestors() {
                if inner.order.pop(&ancestor).is_some() {
                    inner.locked.insert(ancestor);
                }
            }
        }
        self.evict(reference);
    }

    fn remove(&self, reference: &Node) {
        let mut inner = self.inner.lock();
        if inner.order.pop(reference).is_none() {
            inner.locked.remove(reference);
        }
        // ancestors without another cached descendant become evictable again,
        // as the least recently used entries
        for ancestor in reference.ancestors() {
            if inner.locked.contains(&ancestor) && !inner.has_cached_descendant(&ancestor) {
                inner.locked.remove(&ancestor);
                inner.order.put(ancestor.clone(), ());
                inner.order.demote(&ancestor);
            }
        }
    }

    fn touch(&self, reference: &Node) {
        self.inner.lock().order.promote(reference);
    }

    fn size(&self) -> usize {
        self.inner.lock().size()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.inner.lock().capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CachingError, CachingPolicy};
    use crate::model::elem;
    use std::sync::Arc;

    fn policy(cache: Arc<AccessOrderCache>) -> Arc<CachingPolicy> {
        CachingPolicy::builder(|_: &Node| -> Result<Node, CachingError> {
            Ok(elem("content").attr("loaded", "yes").child(elem("item")).build())
        })
        .cache(cache)
        .build()
    }

    #[test]
    fn evicts_least_recently_touched() {
        let cache = Arc::new(AccessOrderCache::new(2));
        let policy = policy(Arc::clone(&cache));
        let refs: Vec<Node> = (0..3).map(|_| Node::reference("ref", Arc::clone(&policy))).collect();
        let root = elem("r").children(refs.iter().cloned()).build();

        refs[0].sync().unwrap();
        refs[1].sync().unwrap();
        cache.touch(&refs[0]);
        refs[2].sync().unwrap();

        assert_eq!(cache.size(), 2);
        assert!(refs[1].is_dirty());
        assert!(refs[1].raw_children().is_empty());
        assert!(!refs[0].is_dirty());
        assert!(!refs[2].is_dirty());
        assert_eq!(root.raw_children().len(), 3);
    }

    #[test]
    fn ancestors_are_locked() {
        let cache = Arc::new(AccessOrderCache::new(1));
        let policy = policy(Arc::clone(&cache));
        let outer = Node::reference("outer", Arc::clone(&policy));
        outer.sync().unwrap();
        let inner = Node::reference("inner", Arc::clone(&policy));
        outer.raw_add_child(inner.clone());
        inner.sync().unwrap();

        assert!(cache.is_locked(&outer));
        assert!(!outer.is_dirty());
        assert!(!inner.is_dirty());
        assert_eq!(cache.capacity(), Some(2));

        inner.clear_cache().unwrap();
        assert!(inner.is_dirty());
        assert!(!cache.is_locked(&outer));
        assert!(cache.contains(&outer));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn removed_subtrees_unlock_their_former_ancestors() {
        let cache = Arc::new(AccessOrderCache::new(2));
        let policy = policy(Arc::clone(&cache));
        let outer = Node::reference("outer", Arc::clone(&policy));
        outer.sync().unwrap();
        let inner = Node::reference("inner", Arc::clone(&policy));
        policy.insert(&outer, 0, elem("holder").child(inner.clone()).build()).unwrap();
        inner.sync().unwrap();
        assert!(cache.is_locked(&outer));

        let removed = policy.remove(&outer, 0).unwrap();

        assert_eq!(removed.map(|node| node.name().to_string()).as_deref(), Some("holder"));
        assert!(!cache.contains(&inner));
        assert!(!cache.is_locked(&outer));
        assert!(cache.contains(&outer));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn references_patched_away_leave_the_cache() {
        let cache = Arc::new(AccessOrderCache::new(4));
        let policy = CachingPolicy::builder(|reference: &Node| -> Result<Node, CachingError> {
            let child = if &*reference.name() == "outer" { elem("part") } else { elem("leaf") };
            Ok(elem("content").child(child).build())
        })
        .cache(cache.clone())
        .recursive_stage(crate::compile("part").unwrap(), true)
        .build();
        let outer = Node::reference("outer", Arc::clone(&policy));
        outer.sync().unwrap();
        let part = outer.raw_children()[0].clone();
        assert!(part.is_reference());
        part.sync().unwrap();
        assert!(cache.is_locked(&outer));
        assert_eq!(cache.size(), 2);

        policy.update(&outer, &elem("content").build()).unwrap();

        assert!(outer.raw_children().is_empty());
        assert!(!cache.contains(&part));
        assert!(!cache.is_locked(&outer));
        assert_eq!(cache.size(), 1);
    }
}

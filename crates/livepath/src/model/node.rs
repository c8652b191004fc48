use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::warn;

use super::event::{NodeEvent, NodeObserver, ObserverEntry};
use crate::caching::{CachingError, ReferenceState};

/// Kind of read or write that goes through a node's access hook.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Access<'a> {
    Children,
    Attributes,
    Attribute(&'a str),
    Value,
}

pub(crate) struct Inner {
    name: Arc<str>,
    value: RwLock<Option<String>>,
    parent: RwLock<Option<Weak<Inner>>>,
    children: RwLock<Vec<Node>>,
    attributes: RwLock<Vec<(Arc<str>, String)>>,
    observers: RwLock<SmallVec<[ObserverEntry; 2]>>,
    pub(crate) reference: Option<ReferenceState>,
    /// Only consulted on tree roots.
    pub(crate) sync_lock: AtomicBool,
}

/// Element of a mutable tree.
///
/// `Node` is a cheap handle (`Arc`); equality and hashing use identity. Every
/// field lock is held only for the duration of one access, never while
/// observers run, so observers are free to read and mutate the tree.
#[derive(Clone)]
pub struct Node(pub(crate) Arc<Inner>);

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.0.name)?;
        if let Some(id) = self.raw_attribute("id") {
            write!(f, " id={id:?}")?;
        }
        if self.is_reference() {
            write!(f, " ref{}", if self.is_dirty() { " dirty" } else { "" })?;
        }
        write!(f, ">")
    }
}

impl Node {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_state(name.into(), None)
    }

    pub(crate) fn with_state(name: Arc<str>, reference: Option<ReferenceState>) -> Self {
        Node(Arc::new(Inner {
            name,
            value: RwLock::new(None),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            attributes: RwLock::new(Vec::new()),
            observers: RwLock::new(SmallVec::new()),
            reference,
            sync_lock: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> Arc<str> {
        Arc::clone(&self.0.name)
    }

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.read().as_ref().and_then(Weak::upgrade).map(Node)
    }

    pub fn root(&self) -> Node {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn ancestors(&self) -> impl Iterator<Item = Node> + use<> {
        std::iter::successors(self.parent(), Node::parent)
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        other.ancestors().any(|ancestor| &ancestor == self)
    }

    /// Position of this node in its parent's child list.
    pub fn index_in_parent(&self) -> Option<usize> {
        let parent = self.parent()?;
        parent.0.children.read().iter().position(|child| child == self)
    }

    // ===== Reads (through the access hook) =====

    pub fn try_children(&self) -> Result<Vec<Node>, CachingError> {
        self.access(Access::Children)?;
        Ok(self.raw_children())
    }

    /// Children of this node. A failed synchronization is logged and the stale
    /// (possibly empty) child list is returned; use [`Node::try_children`] to
    /// observe the failure.
    pub fn children(&self) -> Vec<Node> {
        self.try_children().unwrap_or_else(|error| {
            warn!(node = ?self, %error, "reading children of unsynchronized reference");
            self.raw_children()
        })
    }

    pub fn try_attribute(&self, name: &str) -> Result<Option<String>, CachingError> {
        self.access(Access::Attribute(name))?;
        Ok(self.raw_attribute(name))
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.try_attribute(name).unwrap_or_else(|error| {
            warn!(node = ?self, attribute = name, %error, "reading attribute of unsynchronized reference");
            self.raw_attribute(name)
        })
    }

    pub fn try_attributes(&self) -> Result<Vec<(Arc<str>, String)>, CachingError> {
        self.access(Access::Attributes)?;
        Ok(self.raw_attributes())
    }

    pub fn attributes(&self) -> Vec<(Arc<str>, String)> {
        self.try_attributes().unwrap_or_else(|error| {
            warn!(node = ?self, %error, "reading attributes of unsynchronized reference");
            self.raw_attributes()
        })
    }

    pub fn try_value(&self) -> Result<Option<String>, CachingError> {
        self.access(Access::Value)?;
        Ok(self.raw_value())
    }

    pub fn value(&self) -> Option<String> {
        self.try_value().unwrap_or_else(|error| {
            warn!(node = ?self, %error, "reading value of unsynchronized reference");
            self.raw_value()
        })
    }

    // ===== Mutations (through the access hook) =====

    pub fn add_child(&self, child: Node) {
        self.insert_child(usize::MAX, child);
    }

    /// Inserts `child` at `index` (clamped to the child count), detaching it
    /// from its previous parent first.
    pub fn insert_child(&self, index: usize, child: Node) {
        self.prepare_write(Access::Children);
        self.raw_insert_child(index, child);
    }

    pub fn remove_child(&self, index: usize) -> Option<Node> {
        self.prepare_write(Access::Children);
        self.raw_remove_child(index)
    }

    /// Detaches this node from its parent, returning the index it occupied.
    pub fn remove_from_parent(&self) -> Option<usize> {
        let parent = self.parent()?;
        let index = self.index_in_parent()?;
        parent.raw_remove_child(index);
        Some(index)
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) -> Option<String> {
        self.prepare_write(Access::Attribute(name));
        self.raw_set_attribute(name, value.into())
    }

    pub fn remove_attribute(&self, name: &str) -> Option<String> {
        self.prepare_write(Access::Attribute(name));
        self.raw_remove_attribute(name)
    }

    pub fn set_value(&self, value: Option<String>) -> Option<String> {
        self.prepare_write(Access::Value);
        self.raw_set_value(value)
    }

    fn prepare_write(&self, access: Access<'_>) {
        if let Err(error) = self.access(access) {
            warn!(node = ?self, %error, "writing to unsynchronized reference");
        }
    }

    pub(crate) fn access(&self, access: Access<'_>) -> Result<(), CachingError> {
        match &self.0.reference {
            Some(state) => state.policy.on_access(self, access),
            None => Ok(()),
        }
    }

    // ===== Observers =====

    /// Registers `observer` under `slot`. Returns `false` if that exact
    /// registration already exists.
    pub fn add_observer(&self, observer: Weak<dyn NodeObserver>, slot: usize) -> bool {
        let mut observers = self.0.observers.write();
        if observers.iter().any(|entry| entry.is(&observer, slot)) {
            return false;
        }
        observers.push(ObserverEntry { observer, slot });
        true
    }

    /// Removes the registration of `observer` under `slot`. Returns `false` if
    /// it was not registered.
    pub fn remove_observer(&self, observer: &Weak<dyn NodeObserver>, slot: usize) -> bool {
        let mut observers = self.0.observers.write();
        match observers.iter().position(|entry| entry.is(observer, slot)) {
            Some(index) => {
                observers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.0.observers.read().iter().filter(|entry| entry.is_alive()).count()
    }

    /// Whether this node or any materialized descendant has a live observer.
    pub fn has_observers_in_subtree(&self) -> bool {
        self.observer_count() > 0
            || self.raw_children().iter().any(Node::has_observers_in_subtree)
    }

    fn notify(&self, event: &NodeEvent) {
        let observers: SmallVec<[ObserverEntry; 2]> = self.0.observers.read().clone();
        let mut stale = false;
        for entry in &observers {
            match entry.observer.upgrade() {
                Some(observer) => observer.on_event(entry.slot, self, event),
                None => stale = true,
            }
        }
        if stale {
            self.0.observers.write().retain(|entry| entry.is_alive());
        }
    }

    // ===== Raw access: no hooks, used by the caching layer and by watchers =====

    pub(crate) fn raw_children(&self) -> Vec<Node> {
        self.0.children.read().clone()
    }

    pub(crate) fn raw_attribute(&self, name: &str) -> Option<String> {
        self.0
            .attributes
            .read()
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn raw_attributes(&self) -> Vec<(Arc<str>, String)> {
        self.0.attributes.read().clone()
    }

    pub(crate) fn raw_value(&self) -> Option<String> {
        self.0.value.read().clone()
    }

    pub(crate) fn raw_insert_child(&self, index: usize, child: Node) {
        assert!(
            child != *self && !child.is_ancestor_of(self),
            "cannot insert {child:?} below itself"
        );
        let old_parent = child.parent();
        if old_parent.is_some() {
            child.remove_from_parent();
        }
        let index = {
            let mut children = self.0.children.write();
            let index = index.min(children.len());
            children.insert(index, child.clone());
            index
        };
        *child.0.parent.write() = Some(Arc::downgrade(&self.0));
        self.notify(&NodeEvent::ChildAdded { child: child.clone(), index });
        child.notify(&NodeEvent::ParentChanged { new_parent: Some(self.clone()), old_parent });
    }

    pub(crate) fn raw_add_child(&self, child: Node) {
        self.raw_insert_child(usize::MAX, child);
    }

    pub(crate) fn raw_remove_child(&self, index: usize) -> Option<Node> {
        let child = {
            let mut children = self.0.children.write();
            if index >= children.len() {
                return None;
            }
            children.remove(index)
        };
        *child.0.parent.write() = None;
        self.notify(&NodeEvent::ChildRemoved { child: child.clone(), index });
        child.notify(&NodeEvent::ParentChanged { new_parent: None, old_parent: Some(self.clone()) });
        Some(child)
    }

    pub(crate) fn raw_set_attribute(&self, name: &str, value: String) -> Option<String> {
        let (name, old) = {
            let mut attributes = self.0.attributes.write();
            match attributes.iter_mut().find(|(key, _)| key.as_ref() == name) {
                Some((key, current)) => {
                    if *current == value {
                        return Some(value);
                    }
                    (Arc::clone(key), Some(std::mem::replace(current, value)))
                }
                None => {
                    let key: Arc<str> = Arc::from(name);
                    attributes.push((Arc::clone(&key), value));
                    (key, None)
                }
            }
        };
        self.notify(&NodeEvent::AttributeSet { name, old: old.clone() });
        old
    }

    pub(crate) fn raw_remove_attribute(&self, name: &str) -> Option<String> {
        let (name, old) = {
            let mut attributes = self.0.attributes.write();
            let index = attributes.iter().position(|(key, _)| key.as_ref() == name)?;
            attributes.remove(index)
        };
        self.notify(&NodeEvent::AttributeCleared { name, old: old.clone() });
        Some(old)
    }

    pub(crate) fn raw_set_value(&self, value: Option<String>) -> Option<String> {
        let old = {
            let mut current = self.0.value.write();
            if *current == value {
                return value;
            }
            std::mem::replace(&mut *current, value)
        };
        self.notify(&NodeEvent::ValueChanged { old: old.clone() });
        old
    }

    /// Copies this subtree. References are copied as dirty references bound to
    /// the same caching policy.
    pub fn deep_clone(&self) -> Node {
        let copy = match &self.0.reference {
            Some(state) => Node::with_state(self.name(), Some(ReferenceState::new(Arc::clone(&state.policy), true))),
            None => Node::new(self.name()),
        };
        *copy.0.value.write() = self.raw_value();
        *copy.0.attributes.write() = self.raw_attributes();
        if !self.is_reference() {
            for child in self.raw_children() {
                copy.attach_unobserved(child.deep_clone());
            }
        }
        copy
    }

    /// Appends `child` without notifications. Only valid while building a
    /// subtree nobody observes yet.
    pub(crate) fn attach_unobserved(&self, child: Node) {
        *child.0.parent.write() = Some(Arc::downgrade(&self.0));
        self.0.children.write().push(child);
    }

    pub(crate) fn init_attribute(&self, name: &str, value: String) {
        let mut attributes = self.0.attributes.write();
        match attributes.iter_mut().find(|(key, _)| key.as_ref() == name) {
            Some((_, current)) => *current = value,
            None => attributes.push((Arc::from(name), value)),
        }
    }

    pub(crate) fn init_value(&self, value: Option<String>) {
        *self.0.value.write() = value;
    }
}

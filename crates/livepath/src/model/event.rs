use std::sync::{Arc, Weak};

use super::Node;

/// Low-level mutation notification delivered to every observer of a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The node was attached to, moved under, or detached from a parent.
    ParentChanged { new_parent: Option<Node>, old_parent: Option<Node> },
    ChildAdded { child: Node, index: usize },
    ChildRemoved { child: Node, index: usize },
    AttributeSet { name: Arc<str>, old: Option<String> },
    AttributeCleared { name: Arc<str>, old: String },
    ValueChanged { old: Option<String> },
}

impl NodeEvent {
    pub fn is_structural(&self) -> bool {
        matches!(self, NodeEvent::ChildAdded { .. } | NodeEvent::ChildRemoved { .. })
    }

    pub fn is_content(&self) -> bool {
        matches!(
            self,
            NodeEvent::AttributeSet { .. }
                | NodeEvent::AttributeCleared { .. }
                | NodeEvent::ValueChanged { .. }
        )
    }
}

/// Receives [`NodeEvent`]s for nodes it registered with via [`Node::add_observer`].
///
/// The `slot` is the value passed at registration time; one observer object can
/// watch the same node under several slots (a listener chain uses the link index).
pub trait NodeObserver: Send + Sync {
    fn on_event(&self, slot: usize, node: &Node, event: &NodeEvent);
}

/// Registration stored inside a node. Holds the observer weakly so that a node
/// never keeps its observers alive.
#[derive(Clone)]
pub(crate) struct ObserverEntry {
    pub(crate) observer: Weak<dyn NodeObserver>,
    pub(crate) slot: usize,
}

impl ObserverEntry {
    pub(crate) fn is(&self, observer: &Weak<dyn NodeObserver>, slot: usize) -> bool {
        self.slot == slot && Weak::ptr_eq(&self.observer, observer)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.observer.strong_count() > 0
    }
}

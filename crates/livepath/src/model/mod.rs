//! Mutable tree model consumed by the path engine and the caching layer.
//!
//! A [`Node`] has a name, an ordered attribute list, an optional text value and
//! ordered children. Mutations are reported to registered [`NodeObserver`]s as
//! [`NodeEvent`]s. A node built with a caching policy is an external reference
//! (see [`crate::caching`]); its reads and writes pass through the policy's
//! access hook.
mod builder;
mod event;
mod node;
mod path_node;

pub use builder::{NodeBuilder, NodeOrBuilder, elem};
pub use event::{NodeEvent, NodeObserver};
pub use node::Node;
pub use path_node::{PathNode, PathNodeKind};

pub(crate) use node::Access;

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl NodeObserver for Recorder {
        fn on_event(&self, slot: usize, node: &Node, event: &NodeEvent) {
            let text = match event {
                NodeEvent::ParentChanged { new_parent, .. } => {
                    format!("{slot}:{}:parent={:?}", node.name(), new_parent.as_ref().map(Node::name))
                }
                NodeEvent::ChildAdded { child, index } => format!("{slot}:{}:+{}@{index}", node.name(), child.name()),
                NodeEvent::ChildRemoved { child, index } => format!("{slot}:{}:-{}@{index}", node.name(), child.name()),
                NodeEvent::AttributeSet { name, old } => format!("{slot}:{}:set {name} was {old:?}", node.name()),
                NodeEvent::AttributeCleared { name, old } => format!("{slot}:{}:clear {name} was {old}", node.name()),
                NodeEvent::ValueChanged { old } => format!("{slot}:{}:value was {old:?}", node.name()),
            };
            self.0.lock().push(text);
        }
    }

    fn observe(recorder: &Arc<Recorder>, node: &Node, slot: usize) -> Weak<dyn NodeObserver> {
        let weak: Weak<dyn NodeObserver> = Arc::<Recorder>::downgrade(recorder);
        assert!(node.add_observer(weak.clone(), slot));
        weak
    }

    #[test]
    fn builder_links_parents() {
        let root = elem("r").child(elem("a").child(elem("b"))).build();
        let a = root.children()[0].clone();
        let b = a.children()[0].clone();
        assert_eq!(b.parent(), Some(a.clone()));
        assert_eq!(b.root(), root);
        assert!(root.is_ancestor_of(&b));
        assert_eq!(b.ancestors().count(), 2);
    }

    #[test]
    fn mutations_notify_parent_then_child() {
        let root = elem("r").build();
        let child = elem("c").build();
        let recorder = Arc::new(Recorder::default());
        observe(&recorder, &root, 0);
        observe(&recorder, &child, 1);

        root.add_child(child.clone());
        child.remove_from_parent();

        assert_eq!(
            *recorder.0.lock(),
            vec![
                "0:r:+c@0".to_owned(),
                "1:c:parent=Some(\"r\")".to_owned(),
                "0:r:-c@0".to_owned(),
                "1:c:parent=None".to_owned(),
            ]
        );
    }

    #[test]
    fn attribute_and_value_events_report_old_values() {
        let node = elem("a").attr("id", "1").build();
        let recorder = Arc::new(Recorder::default());
        observe(&recorder, &node, 3);

        assert_eq!(node.set_attribute("id", "2"), Some("1".to_owned()));
        node.set_attribute("id", "2");
        assert_eq!(node.remove_attribute("id"), Some("2".to_owned()));
        node.set_value(Some("text".to_owned()));

        assert_eq!(
            *recorder.0.lock(),
            vec![
                "3:a:set id was Some(\"1\")".to_owned(),
                "3:a:clear id was 2".to_owned(),
                "3:a:value was None".to_owned(),
            ]
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let node = elem("a").build();
        let recorder = Arc::new(Recorder::default());
        let weak = observe(&recorder, &node, 0);
        assert!(!node.add_observer(weak.clone(), 0));
        assert!(node.add_observer(weak.clone(), 1));
        assert_eq!(node.observer_count(), 2);
        assert!(node.remove_observer(&weak, 0));
        assert!(!node.remove_observer(&weak, 0));
        assert_eq!(node.observer_count(), 1);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let node = elem("a").build();
        {
            let recorder = Arc::new(Recorder::default());
            observe(&recorder, &node, 0);
        }
        assert_eq!(node.observer_count(), 0);
        node.set_attribute("x", "1");
        assert_eq!(node.observer_count(), 0);
    }

    #[test]
    fn moving_a_child_detaches_it_first() {
        let root = elem("r").child(elem("a")).child(elem("b")).build();
        let a = root.children()[0].clone();
        let b = root.children()[1].clone();
        b.add_child(a.clone());
        assert_eq!(root.children(), vec![b.clone()]);
        assert_eq!(a.parent(), Some(b));
    }

    #[test]
    fn deep_clone_copies_content_but_not_identity() {
        let original = elem("a").attr("k", "v").value("t").child(elem("b")).build();
        let copy = original.deep_clone();
        assert_ne!(copy, original);
        assert_eq!(copy.attribute("k").as_deref(), Some("v"));
        assert_eq!(copy.value().as_deref(), Some("t"));
        assert_eq!(copy.children().len(), 1);
        assert_ne!(copy.children()[0], original.children()[0]);
        assert!(copy.parent().is_none());
    }
}

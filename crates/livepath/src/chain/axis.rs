//! Per-axis tables of the listener chain: when a link installs its observers,
//! which node events it reacts to and which nodes it watches.
use std::collections::HashSet;

use itertools::Itertools;

use crate::compiler::ir::{Axis, RootScope, Step};
use crate::model::{Node, NodeEvent, PathNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObserverTiming {
    /// The step never needs observers (unless it has predicates).
    None,
    /// Materialize the layer member, observe it, then compute its fan-out.
    BeforeFanout,
    /// Compute and propagate the fan-out, then observe.
    ///
    /// A mutation made from inside the listener callback while this link is
    /// the second-to-last goes unnoticed, because the observers are not
    /// installed yet when the terminal reports.
    AfterFanout,
}

pub(crate) fn timing(axis: Axis) -> ObserverTiming {
    match axis {
        Axis::SelfAxis => ObserverTiming::None,
        Axis::Child | Axis::Attribute | Axis::Parent => ObserverTiming::BeforeFanout,
        Axis::Ancestor
        | Axis::AncestorOrSelf
        | Axis::Root(_)
        | Axis::Descendant
        | Axis::DescendantOrSelf
        | Axis::Nested
        | Axis::Following
        | Axis::FollowingSibling
        | Axis::Preceding
        | Axis::PrecedingSibling => ObserverTiming::AfterFanout,
    }
}

/// Whether `event` on a watched node can change the fan-out of a member.
pub(crate) fn reacts_to(step: &Step, event: &NodeEvent) -> bool {
    if step.has_predicates() {
        return true;
    }
    let content = match event {
        NodeEvent::AttributeSet { .. } | NodeEvent::AttributeCleared { .. } => step.test.wants_attributes(),
        NodeEvent::ValueChanged { .. } => step.test.wants_text(),
        _ => false,
    };
    let parent_changed = matches!(event, NodeEvent::ParentChanged { .. });
    match step.axis {
        Axis::SelfAxis => false,
        Axis::Child => event.is_structural() || content,
        Axis::Attribute => matches!(event, NodeEvent::AttributeSet { .. } | NodeEvent::AttributeCleared { .. }),
        Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::Root(RootScope::Node) => parent_changed,
        Axis::Root(RootScope::Subtree) => parent_changed || event.is_structural() || content,
        Axis::Descendant | Axis::DescendantOrSelf => event.is_structural() || content,
        Axis::Nested => event.is_structural(),
        Axis::FollowingSibling | Axis::PrecedingSibling => parent_changed || event.is_structural(),
        Axis::Following | Axis::Preceding => parent_changed || event.is_structural() || content,
    }
}

/// Whether a structural event can be handled by walking only the added or
/// removed subtree.
pub(crate) fn has_subtree_delta(step: &Step) -> bool {
    !step.has_predicates() && matches!(step.axis, Axis::Descendant | Axis::DescendantOrSelf | Axis::Nested)
}

/// Nodes a member must observe so that every change to its fan-out produces
/// an event. `dependencies` are the nodes read by the step's predicates.
pub(crate) fn watch_set(step: &Step, member: &PathNode, fanout: &[PathNode], dependencies: &[Node]) -> Vec<Node> {
    let host = member.host();
    let mut watch: Vec<Node> = match step.axis {
        Axis::SelfAxis => Vec::new(),
        Axis::Child | Axis::Attribute | Axis::Parent => vec![host.clone()],
        Axis::Ancestor | Axis::AncestorOrSelf | Axis::Root(RootScope::Node) => ancestors_or_self(host),
        Axis::Root(RootScope::Subtree) => subtree(&host.root()),
        Axis::Descendant | Axis::DescendantOrSelf => subtree(host),
        Axis::Nested => {
            let matches: HashSet<&Node> = fanout.iter().filter_map(PathNode::as_element).collect();
            let mut out = Vec::new();
            nested_walk(host, &matches, &mut out);
            out
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            let mut out = vec![host.clone()];
            out.extend(host.parent());
            out
        }
        Axis::Following | Axis::Preceding => {
            let mut out = ancestors_or_self(host);
            if member.as_element().is_none() {
                out.extend(subtree(host));
            }
            let following = step.axis == Axis::Following;
            let mut current = Some(host.clone());
            while let Some(node) = current {
                for sibling in raw_siblings(&node, following) {
                    out.extend(subtree(&sibling));
                }
                current = node.parent();
            }
            out
        }
    };
    watch.extend(dependencies.iter().cloned());
    watch.into_iter().unique().collect()
}

/// `node` followed by its materialized descendants, without touching any
/// access hook.
pub(crate) fn subtree(node: &Node) -> Vec<Node> {
    let mut out = vec![node.clone()];
    let mut index = 0;
    while index < out.len() {
        let children = out[index].raw_children();
        out.extend(children);
        index += 1;
    }
    out
}

/// `node` and every non-matching node below it down to the first match of each
/// branch.
pub(crate) fn nested_walk(node: &Node, matches: &HashSet<&Node>, out: &mut Vec<Node>) {
    out.push(node.clone());
    for child in node.raw_children() {
        if !matches.contains(&child) {
            nested_walk(&child, matches, out);
        }
    }
}

fn ancestors_or_self(node: &Node) -> Vec<Node> {
    std::iter::once(node.clone()).chain(node.ancestors()).collect()
}

fn raw_siblings(node: &Node, following: bool) -> Vec<Node> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    let children = parent.raw_children();
    let Some(index) = children.iter().position(|child| child == node) else {
        return Vec::new();
    };
    if following { children[index + 1..].to_vec() } else { children[..index].to_vec() }
}

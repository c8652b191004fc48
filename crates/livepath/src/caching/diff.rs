//! In-place patching of materialized content.
//!
//! Existing nodes keep their identity wherever the new content still contains
//! a node with the same name and `id` attribute, so observers and listener
//! chains see minimal edits instead of a rebuilt subtree.
use tracing::trace;

use super::CachingPolicy;
use crate::model::Node;

/// Makes `target` (a reference governed by `policy`) look like `content`.
/// Nodes of `content` without a counterpart are moved into the tree.
pub(super) fn patch(target: &Node, content: &Node, policy: &CachingPolicy) {
    patch_attributes(target, content, |name| policy.is_static_attribute(name));
    target.raw_set_value(content.raw_value());
    patch_children(target, content);
}

fn patch_node(existing: &Node, source: &Node) {
    if let Some(policy) = existing.caching_policy() {
        // nested references keep their own content
        patch_attributes(existing, source, |name| policy.is_static_attribute(name));
        return;
    }
    patch_attributes(existing, source, |_| false);
    existing.raw_set_value(source.raw_value());
    patch_children(existing, source);
}

fn patch_attributes(target: &Node, source: &Node, keep: impl Fn(&str) -> bool) {
    let wanted = source.raw_attributes();
    for (name, _) in target.raw_attributes() {
        if !keep(&name) && !wanted.iter().any(|(candidate, _)| *candidate == name) {
            target.raw_remove_attribute(&name);
        }
    }
    for (name, value) in wanted {
        target.raw_set_attribute(&name, value);
    }
}

fn patch_children(target: &Node, source: &Node) {
    let wanted = source.raw_children();
    for (index, incoming) in wanted.iter().enumerate() {
        let current = target.raw_children();
        let found = current.iter().skip(index).position(|candidate| same_entity(candidate, incoming));
        match found.map(|offset| offset + index) {
            Some(position) => {
                let existing = current[position].clone();
                if position != index {
                    trace!(node = ?existing, from = position, to = index, "moving child");
                    target.raw_insert_child(index, existing.clone());
                }
                patch_node(&existing, incoming);
            }
            None => target.raw_insert_child(index, incoming.clone()),
        }
    }
    while let Some(stale) = target.raw_children().get(wanted.len()).cloned() {
        super::forget_references(&stale);
        target.raw_remove_child(wanted.len());
    }
}

fn same_entity(existing: &Node, incoming: &Node) -> bool {
    existing.name() == incoming.name() && existing.raw_attribute("id") == incoming.raw_attribute("id")
}

//! Evaluation of single axis steps.
//!
//! Enumeration goes through the access-hooked readers of [`Node`], so
//! querying a dirty reference materializes it first. Reverse axes
//! (`ancestor`, `preceding`, ...) enumerate nearest first, which is the order
//! positional predicates count in.
//!
//! Every node whose children, attributes, value or parent a walk reads is
//! passed to [`Context::record`], so a recording context ends up with the
//! nodes an evaluation depends on.
use std::collections::VecDeque;

use itertools::Itertools;

use super::expr;
use super::runtime::{Context, Result};
use super::value::Value;
use crate::compiler::ir::{Axis, Expr, NodeTest, Path, Principal, RootScope, Step};
use crate::model::{Node, PathNode};

/// Node test of `step` applied to `item`.
pub(crate) fn test_matches(step: &Step, item: &PathNode) -> bool {
    let principal = match step.axis.principal() {
        Principal::Element => matches!(item, PathNode::Element(_)),
        Principal::Attribute => matches!(item, PathNode::Attribute(..)),
    };
    match &step.test {
        NodeTest::Node => true,
        NodeTest::Text => matches!(item, PathNode::Text(_)),
        NodeTest::Any => principal,
        NodeTest::Name(name) => principal && item.name().is_some_and(|candidate| candidate == *name),
        NodeTest::Prefix(prefix) => {
            principal
                && item
                    .name()
                    .and_then(|candidate| candidate.split_once(':').map(|(p, _)| p == prefix.as_ref()))
                    .unwrap_or(false)
        }
    }
}

/// Whether `candidate` satisfies `step` on its own: node test plus every
/// predicate evaluated at position 1 of 1.
///
/// Positional literals of a `nested` step select among the matches of the
/// whole walk and are skipped.
pub(crate) fn evaluate(step: &Step, context: &Context, candidate: &PathNode) -> Result<bool> {
    if !test_matches(step, candidate) {
        return Ok(false);
    }
    let focus = context.focus(candidate.clone(), 1, 1);
    for predicate in &step.predicates {
        if step.axis == Axis::Nested && predicate.as_position_literal().is_some() {
            continue;
        }
        if !predicate_holds(predicate, &focus)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Appends the result of `step` applied to `from`. Predicates only see the
/// items this call added.
pub(crate) fn query(step: &Step, context: &Context, from: &PathNode, out: &mut Vec<PathNode>) -> Result<()> {
    let start = out.len();
    enumerate(step, context, from, out)?;
    if step.axis == Axis::Nested {
        // the walk already applied every non-positional predicate
        let positional: Vec<_> =
            step.predicates.iter().filter(|predicate| predicate.as_position_literal().is_some()).collect();
        return filter(positional.into_iter(), context, out, start);
    }
    filter(step.predicates.iter(), context, out, start)
}

pub(crate) fn query_set(step: &Step, context: &Context, nodes: &[PathNode], out: &mut Vec<PathNode>) -> Result<()> {
    for node in nodes {
        query(step, context, node, out)?;
    }
    Ok(())
}

/// Non-incremental evaluation of a whole path; duplicates keep their first
/// occurrence.
pub(crate) fn evaluate_path(path: &Path, context: &Context) -> Result<Vec<PathNode>> {
    let mut current = vec![context.node().clone()];
    for step in path.steps() {
        let mut next = Vec::new();
        query_set(step, context, &current, &mut next)?;
        current = next.into_iter().unique().collect();
    }
    Ok(current)
}

fn filter<'a>(
    predicates: impl Iterator<Item = &'a Expr>,
    context: &Context,
    out: &mut Vec<PathNode>,
    start: usize,
) -> Result<()> {
    for predicate in predicates {
        if out.len() == start {
            break;
        }
        let slice: Vec<PathNode> = out.drain(start..).collect();
        if let Some(position) = predicate.as_position_literal() {
            if position >= 1.0 && position.fract() == 0.0 {
                if let Some(item) = slice.into_iter().nth(position as usize - 1) {
                    out.push(item);
                }
            }
            continue;
        }
        let size = slice.len();
        for (offset, item) in slice.into_iter().enumerate() {
            let focus = context.focus(item, offset + 1, size);
            if predicate_holds(predicate, &focus)? {
                out.push(focus.node().clone());
            }
        }
    }
    Ok(())
}

fn predicate_holds(predicate: &Expr, focus: &Context) -> Result<bool> {
    Ok(match expr::evaluate(predicate, focus)? {
        Value::Number(number) => number == focus.position() as f64,
        other => other.to_boolean(),
    })
}

fn enumerate(step: &Step, context: &Context, from: &PathNode, out: &mut Vec<PathNode>) -> Result<()> {
    if step.axis == Axis::Nested {
        if let PathNode::Element(node) = from {
            nested(step, context, node, out)?;
        }
        return Ok(());
    }
    context.record(from.host());
    let mut push = |item: PathNode| {
        if test_matches(step, &item) {
            out.push(item);
        }
    };
    match step.axis {
        Axis::SelfAxis => push(from.clone()),
        Axis::Parent => {
            if let Some(parent) = from.parent() {
                push(parent);
            }
        }
        Axis::Ancestor | Axis::AncestorOrSelf => {
            if step.axis == Axis::AncestorOrSelf {
                push(from.clone());
            }
            let mut current = from.parent();
            while let Some(item) = current {
                context.record(item.host());
                current = item.parent();
                push(item);
            }
        }
        Axis::Child => {
            if let PathNode::Element(node) = from {
                pseudo_children(node, &step.test, &mut push)?;
                for child in node.try_children()? {
                    push(PathNode::Element(child));
                }
            }
        }
        Axis::Attribute => {
            if let PathNode::Element(node) = from {
                for (name, _) in node.try_attributes()? {
                    push(PathNode::Attribute(node.clone(), name));
                }
            }
        }
        Axis::Descendant | Axis::DescendantOrSelf => {
            if step.axis == Axis::DescendantOrSelf {
                push(from.clone());
            }
            if let PathNode::Element(node) = from {
                breadth_first(context, node, &step.test, &mut push)?;
            }
        }
        Axis::FollowingSibling | Axis::PrecedingSibling => {
            if let PathNode::Element(node) = from {
                for sibling in siblings(context, node, step.axis == Axis::FollowingSibling)? {
                    push(PathNode::Element(sibling));
                }
            }
        }
        Axis::Following => {
            if let PathNode::Attribute(owner, _) | PathNode::Text(owner) = from {
                for child in owner.try_children()? {
                    document_order(context, &child, &step.test, &mut push)?;
                }
            }
            let mut current = Some(from.host().clone());
            while let Some(node) = current {
                for sibling in siblings(context, &node, true)? {
                    document_order(context, &sibling, &step.test, &mut push)?;
                }
                current = node.parent();
            }
        }
        Axis::Preceding => {
            let mut current = Some(from.host().clone());
            while let Some(node) = current {
                for sibling in siblings(context, &node, false)? {
                    reverse_document_order(context, &sibling, &step.test, &mut push)?;
                }
                current = node.parent();
            }
        }
        Axis::Nested => unreachable!("nested walk handled above"),
        Axis::Root(scope) => {
            for ancestor in from.host().ancestors() {
                context.record(&ancestor);
            }
            let root = from.host().root();
            push(PathNode::Element(root.clone()));
            if scope == RootScope::Subtree {
                breadth_first(context, &root, &step.test, &mut push)?;
            }
        }
    }
    Ok(())
}

/// Attribute and text items owned by `node` that `test` may select.
fn pseudo_children(node: &Node, test: &NodeTest, push: &mut impl FnMut(PathNode)) -> Result<()> {
    if test.wants_attributes() {
        for (name, _) in node.try_attributes()? {
            push(PathNode::Attribute(node.clone(), name));
        }
    }
    if test.wants_text() && node.try_value()?.is_some() {
        push(PathNode::Text(node.clone()));
    }
    Ok(())
}

fn breadth_first(context: &Context, node: &Node, test: &NodeTest, push: &mut impl FnMut(PathNode)) -> Result<()> {
    pseudo_children(node, test, push)?;
    let mut queue = VecDeque::from([node.clone()]);
    while let Some(current) = queue.pop_front() {
        context.record(&current);
        for child in current.try_children()? {
            push(PathNode::Element(child.clone()));
            pseudo_children(&child, test, push)?;
            queue.push_back(child);
        }
    }
    Ok(())
}

fn document_order(context: &Context, node: &Node, test: &NodeTest, push: &mut impl FnMut(PathNode)) -> Result<()> {
    context.record(node);
    push(PathNode::Element(node.clone()));
    pseudo_children(node, test, push)?;
    for child in node.try_children()? {
        document_order(context, &child, test, push)?;
    }
    Ok(())
}

fn reverse_document_order(
    context: &Context,
    node: &Node,
    test: &NodeTest,
    push: &mut impl FnMut(PathNode),
) -> Result<()> {
    context.record(node);
    for child in node.try_children()?.into_iter().rev() {
        reverse_document_order(context, &child, test, push)?;
    }
    pseudo_children(node, test, push)?;
    push(PathNode::Element(node.clone()));
    Ok(())
}

/// Siblings after (`following`) or before `node`, nearest first.
fn siblings(context: &Context, node: &Node, following: bool) -> Result<Vec<Node>> {
    context.record(node);
    let Some(parent) = node.parent() else {
        return Ok(Vec::new());
    };
    context.record(&parent);
    let children = parent.try_children()?;
    let Some(index) = children.iter().position(|child| child == node) else {
        return Ok(Vec::new());
    };
    Ok(if following {
        children[index + 1..].to_vec()
    } else {
        children[..index].iter().rev().cloned().collect()
    })
}

/// Depth-first walk below `node` that stops descending at the first element of
/// each branch satisfying the step's test and non-positional predicates.
fn nested(step: &Step, context: &Context, node: &Node, out: &mut Vec<PathNode>) -> Result<()> {
    context.record(node);
    for child in node.try_children()? {
        let item = PathNode::Element(child.clone());
        if evaluate(step, context, &item)? {
            out.push(item);
        } else {
            nested(step, context, &child, out)?;
        }
    }
    Ok(())
}

/// `node` itself when it satisfies the step, otherwise the nested walk below it.
pub(crate) fn nested_or_self(step: &Step, context: &Context, node: &Node, out: &mut Vec<PathNode>) -> Result<()> {
    let item = PathNode::Element(node.clone());
    if evaluate(step, context, &item)? {
        out.push(item);
        Ok(())
    } else {
        nested(step, context, node, out)
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Weak;

use itertools::Itertools;
use tracing::trace;

use super::axis::{self, ObserverTiming};
use super::{ListenerChain, Mode};
use crate::compiler::ir::{Axis, Step};
use crate::engine::{Result, matcher};
use crate::model::{Node, NodeEvent, NodeObserver, PathNode};

#[derive(Default)]
pub(super) struct Member {
    /// Number of previous-layer members deriving this node.
    count: usize,
    /// Next-layer nodes this member contributed.
    fanout: Vec<PathNode>,
    watch: Vec<Node>,
}

/// State of one path step.
#[derive(Default)]
pub(crate) struct Link {
    members: HashMap<PathNode, Member>,
    /// Members watching each observed node. A node carries this link's
    /// observer exactly while its entry exists.
    watchers: HashMap<Node, Vec<PathNode>>,
}

impl Link {
    fn watch(&mut self, node: &Node, member: &PathNode, slot: usize, observer: &Weak<dyn NodeObserver>) {
        let watchers = self.watchers.entry(node.clone()).or_default();
        if watchers.is_empty() {
            assert!(node.add_observer(observer.clone(), slot), "link {slot} observes {node:?} twice");
        }
        watchers.push(member.clone());
    }

    fn unwatch(&mut self, node: &Node, member: &PathNode, slot: usize, observer: &Weak<dyn NodeObserver>) {
        let Some(watchers) = self.watchers.get_mut(node) else {
            panic!("link {slot} does not observe {node:?}");
        };
        let Some(position) = watchers.iter().position(|watcher| watcher == member) else {
            panic!("{member:?} of link {slot} does not watch {node:?}");
        };
        watchers.swap_remove(position);
        if watchers.is_empty() {
            self.watchers.remove(node);
            assert!(node.remove_observer(observer, slot), "link {slot} lost its observer on {node:?}");
        }
    }
}

impl ListenerChain {
    /// Adds `nodes` to layer `index` and propagates the fan-out of the nodes
    /// that entered it.
    pub(super) fn install(&self, index: usize, nodes: Vec<PathNode>, mode: Mode) {
        if index == self.path.len() {
            return self.terminal_install(nodes, mode);
        }
        let entered: Vec<PathNode> = {
            let mut link = self.links[index].lock();
            nodes
                .into_iter()
                .filter(|node| {
                    let member = link.members.entry(node.clone()).or_default();
                    member.count += 1;
                    member.count == 1
                })
                .collect()
        };
        if entered.is_empty() && mode == Mode::Incremental {
            return;
        }
        if index > 0 && !entered.is_empty() {
            self.notify_added(index, &entered);
        }

        let step = &self.path.steps()[index];
        if axis::timing(step.axis) == ObserverTiming::BeforeFanout {
            for member in &entered {
                if let Err(error) = materialize(step, member) {
                    self.report(mode, error.into());
                }
                self.set_watch(index, member, vec![member.host().clone()]);
            }
        }

        let mut next = Vec::new();
        for member in &entered {
            let fanout = self.fan_out(step, member).unwrap_or_else(|error| {
                self.report(mode, error);
                Vec::new()
            });
            if let Some((removed, added)) = self.swap_fanout(index, member, fanout) {
                if !removed.is_empty() {
                    self.uninstall(index + 1, removed, Mode::Incremental);
                }
                next.extend(added);
            }
        }
        self.install(index + 1, next, mode);

        for member in &entered {
            let watch = self.compute_watch(index, step, member, mode);
            self.set_watch(index, member, watch);
        }
    }

    /// Removes `nodes` from layer `index`. Nodes leaving the layer drop their
    /// observers first, then their recorded fan-out.
    pub(super) fn uninstall(&self, index: usize, nodes: Vec<PathNode>, mode: Mode) {
        if index == self.path.len() {
            return self.terminal_uninstall(nodes, mode);
        }
        let observer = self.observer();
        let left: Vec<(PathNode, Member)> = {
            let mut link = self.links[index].lock();
            let mut left = Vec::new();
            for node in nodes {
                let Some(member) = link.members.get_mut(&node) else {
                    panic!("link {index} never installed {node:?}");
                };
                member.count -= 1;
                if member.count == 0
                    && let Some(member) = link.members.remove(&node)
                {
                    left.push((node, member));
                }
            }
            for (node, member) in &left {
                for watched in &member.watch {
                    link.unwatch(watched, node, index, &observer);
                }
            }
            left
        };
        if left.is_empty() && mode == Mode::Incremental {
            return;
        }

        let fanout: Vec<PathNode> = left.iter().flat_map(|(_, member)| member.fanout.iter().cloned()).collect();
        self.uninstall(index + 1, fanout, mode);
        if index > 0 && !left.is_empty() {
            let nodes: Vec<PathNode> = left.into_iter().map(|(node, _)| node).collect();
            self.notify_removed(index, &nodes);
        }
    }

    /// Entry point for events observed by link `index`.
    pub(super) fn handle(&self, index: usize, node: &Node, event: &NodeEvent) {
        let Some(step) = self.path.steps().get(index) else {
            return;
        };
        if !axis::reacts_to(step, event) {
            return;
        }
        let affected = self.links[index].lock().watchers.get(node).cloned().unwrap_or_default();
        trace!(path = %self.path, link = index, ?node, ?event, members = affected.len(), "link event");

        for member in affected {
            let delta = match event {
                NodeEvent::ChildAdded { child, .. } => Some((child, true)),
                NodeEvent::ChildRemoved { child, .. } => Some((child, false)),
                _ => None,
            };
            match delta {
                Some((child, added))
                    if axis::has_subtree_delta(step)
                        && child != member.host()
                        && !child.is_ancestor_of(member.host()) =>
                {
                    self.subtree_delta(index, step, &member, child, added);
                }
                _ => self.refresh(index, step, &member),
            }
        }
    }

    /// Recomputes fan-out and watch set of `member` from scratch.
    fn refresh(&self, index: usize, step: &Step, member: &PathNode) {
        if !self.links[index].lock().members.contains_key(member) {
            return;
        }
        let fanout = match self.fan_out(step, member) {
            Ok(fanout) => fanout,
            Err(error) => return self.report(Mode::Incremental, error),
        };
        let dependencies = match self.dependencies(step, member) {
            Ok(dependencies) => dependencies,
            Err(error) => return self.report(Mode::Incremental, error),
        };
        let watch = axis::watch_set(step, member, &fanout, &dependencies);
        self.apply(index, member, fanout, watch);
    }

    /// Updates `member` for a subtree that was attached below (or detached
    /// from) one of its watched nodes, walking only that subtree.
    fn subtree_delta(&self, index: usize, step: &Step, member: &PathNode, child: &Node, added: bool) {
        if added {
            let mut items = Vec::new();
            let result = match step.axis {
                Axis::Nested => matcher::nested_or_self(step, &self.context, child, &mut items),
                _ => {
                    let walk = Step::new(Axis::DescendantOrSelf, step.test.clone());
                    matcher::query(&walk, &self.context, &PathNode::from(child), &mut items)
                }
            };
            if let Err(error) = result {
                return self.report(Mode::Incremental, error);
            }
            let watch = match step.axis {
                Axis::Nested => {
                    let matches: HashSet<&Node> = items.iter().filter_map(PathNode::as_element).collect();
                    let mut watch = Vec::new();
                    if !matches.contains(child) {
                        axis::nested_walk(child, &matches, &mut watch);
                    }
                    watch
                }
                _ => axis::subtree(child),
            };
            let Some((fanout, watched)) = self.current(index, member) else {
                return;
            };
            self.apply(
                index,
                member,
                fanout.into_iter().chain(items).collect(),
                watched.into_iter().chain(watch).collect(),
            );
        } else {
            let gone: HashSet<Node> = axis::subtree(child).into_iter().collect();
            let Some((fanout, watched)) = self.current(index, member) else {
                return;
            };
            self.apply(
                index,
                member,
                fanout.into_iter().filter(|item| !gone.contains(item.host())).collect(),
                watched.into_iter().filter(|node| !gone.contains(node)).collect(),
            );
        }
    }

    /// Replaces fan-out and watch set of `member`: unwatch, uninstall what
    /// left, install what entered, then watch.
    fn apply(&self, index: usize, member: &PathNode, fanout: Vec<PathNode>, watch: Vec<Node>) {
        let Some((removed, added)) = self.swap_fanout(index, member, fanout) else {
            return;
        };
        let watch: Vec<Node> = watch.into_iter().unique().collect();
        self.retain_watch(index, member, &watch);
        if !removed.is_empty() {
            self.uninstall(index + 1, removed, Mode::Incremental);
        }
        if !added.is_empty() {
            self.install(index + 1, added, Mode::Incremental);
        }
        self.set_watch(index, member, watch);
    }

    fn current(&self, index: usize, member: &PathNode) -> Option<(Vec<PathNode>, Vec<Node>)> {
        let link = self.links[index].lock();
        link.members.get(member).map(|entry| (entry.fanout.clone(), entry.watch.clone()))
    }

    /// Records the new fan-out of `member`, returning what left and what
    /// entered. `None` if the member already left the layer.
    fn swap_fanout(
        &self,
        index: usize,
        member: &PathNode,
        fanout: Vec<PathNode>,
    ) -> Option<(Vec<PathNode>, Vec<PathNode>)> {
        let fanout: Vec<PathNode> = fanout.into_iter().unique().collect();
        let mut link = self.links[index].lock();
        let entry = link.members.get_mut(member)?;
        let old = std::mem::replace(&mut entry.fanout, fanout);
        let before: HashSet<&PathNode> = old.iter().collect();
        let after: HashSet<&PathNode> = entry.fanout.iter().collect();
        let removed = old.iter().filter(|item| !after.contains(item)).cloned().collect();
        let added = entry.fanout.iter().filter(|item| !before.contains(item)).cloned().collect();
        Some((removed, added))
    }

    /// Stops watching every node of `member` not in `watch`.
    fn retain_watch(&self, index: usize, member: &PathNode, watch: &[Node]) {
        let observer = self.observer();
        let keep: HashSet<&Node> = watch.iter().collect();
        let mut link = self.links[index].lock();
        let Some(entry) = link.members.get_mut(member) else {
            return;
        };
        let (kept, stale): (Vec<Node>, Vec<Node>) = entry.watch.drain(..).partition(|node| keep.contains(node));
        entry.watch = kept;
        for node in &stale {
            link.unwatch(node, member, index, &observer);
        }
    }

    /// Makes `watch` the watch set of `member`, registering and unregistering
    /// observers for the difference.
    fn set_watch(&self, index: usize, member: &PathNode, watch: Vec<Node>) {
        let observer = self.observer();
        let watch: Vec<Node> = watch.into_iter().unique().collect();
        let mut link = self.links[index].lock();
        let Some(entry) = link.members.get_mut(member) else {
            return;
        };
        let old = std::mem::replace(&mut entry.watch, watch.clone());
        let before: HashSet<&Node> = old.iter().collect();
        let after: HashSet<&Node> = watch.iter().collect();
        for node in old.iter().filter(|node| !after.contains(node)) {
            link.unwatch(node, member, index, &observer);
        }
        for node in watch.iter().filter(|node| !before.contains(node)) {
            link.watch(node, member, index, &observer);
        }
    }

    fn compute_watch(&self, index: usize, step: &Step, member: &PathNode, mode: Mode) -> Vec<Node> {
        let dependencies = self.dependencies(step, member).unwrap_or_else(|error| {
            self.report(mode, error);
            Vec::new()
        });
        let fanout = self.current(index, member).map(|(fanout, _)| fanout).unwrap_or_default();
        axis::watch_set(step, member, &fanout, &dependencies)
    }

    fn fan_out(&self, step: &Step, member: &PathNode) -> Result<Vec<PathNode>> {
        if step.axis == Axis::SelfAxis {
            let matched = matcher::evaluate(step, &self.context, member)?;
            return Ok(if matched { vec![member.clone()] } else { Vec::new() });
        }
        let mut out = Vec::new();
        matcher::query(step, &self.context, member, &mut out)?;
        Ok(out.into_iter().unique().collect())
    }

    /// Nodes the predicates of `step` read while deriving the fan-out of
    /// `member`, down to any depth. Empty for steps without predicates.
    fn dependencies(&self, step: &Step, member: &PathNode) -> Result<Vec<Node>> {
        if !step.has_predicates() {
            return Ok(Vec::new());
        }
        let recording = self.context.recording();
        let mut scratch = Vec::new();
        matcher::query(step, &recording, member, &mut scratch)?;
        Ok(recording.take_reads())
    }
}

/// Pulls the content a before-fanout step reads through the access hook, so
/// that synchronization events fire before the member is observed.
fn materialize(step: &Step, member: &PathNode) -> std::result::Result<(), crate::caching::CachingError> {
    let PathNode::Element(node) = member else {
        return Ok(());
    };
    match step.axis {
        Axis::Child => node.try_children().map(drop),
        Axis::Attribute => node.try_attributes().map(drop),
        _ => Ok(()),
    }
}

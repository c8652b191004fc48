//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use livepath::{Context, ListenerError, Node, Path, PathListener, PathNode};
use parking_lot::Mutex;

/// Short label of a path item: `name#id` for elements, `@name=value` for
/// attributes and `'value'` for text. Never synchronizes a dirty reference.
pub fn describe(item: &PathNode) -> String {
    match item {
        PathNode::Element(node) if node.is_dirty() => node.name().to_string(),
        PathNode::Element(node) => match node.attribute("id") {
            Some(id) => format!("{}#{id}", node.name()),
            None => node.name().to_string(),
        },
        PathNode::Attribute(owner, name) => format!("@{name}={}", owner.attribute(name).unwrap_or_default()),
        PathNode::Text(owner) => format!("'{}'", owner.value().unwrap_or_default()),
    }
}

pub fn describe_all(items: &[PathNode]) -> Vec<String> {
    items.iter().map(describe).collect()
}

pub fn evaluate(context: &Node, source: &str) -> Vec<String> {
    let path = livepath::compile(source).unwrap();
    describe_all(&path.evaluate(&Context::new(context)).unwrap())
}

/// Every node of the materialized tree below `root`, `root` first.
pub fn all_nodes(root: &Node) -> Vec<Node> {
    let mut out = vec![root.clone()];
    let mut index = 0;
    while index < out.len() {
        let children = out[index].children();
        out.extend(children);
        index += 1;
    }
    out
}

pub fn total_observers(root: &Node) -> usize {
    all_nodes(root).iter().map(Node::observer_count).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(usize, Vec<String>),
    Removed(usize, Vec<String>),
}

/// Listener keeping the notification log and the current result set.
#[derive(Default)]
pub struct Recorder {
    changes: Mutex<Vec<Change>>,
    results: Mutex<Vec<PathNode>>,
    failing: AtomicBool,
}

impl Recorder {
    /// A recorder whose every notification reports an error after recording.
    pub fn failing() -> Self {
        let recorder = Self::default();
        recorder.failing.store(true, Ordering::Relaxed);
        recorder
    }

    pub fn take_changes(&self) -> Vec<Change> {
        std::mem::take(&mut *self.changes.lock())
    }

    pub fn results(&self) -> Vec<String> {
        describe_all(&self.results.lock())
    }

    pub fn result_nodes(&self) -> Vec<PathNode> {
        self.results.lock().clone()
    }

    fn outcome(&self) -> Result<(), ListenerError> {
        if self.failing.load(Ordering::Relaxed) { Err("listener rejected the change".into()) } else { Ok(()) }
    }
}

impl PathListener for Recorder {
    fn notify_added(&self, _: &Context, path: &Path, step: usize, nodes: &[PathNode]) -> Result<(), ListenerError> {
        self.changes.lock().push(Change::Added(step, describe_all(nodes)));
        if step == path.len() {
            let mut results = self.results.lock();
            for node in nodes {
                assert!(!results.contains(node), "{node:?} reported twice");
                results.push(node.clone());
            }
        }
        self.outcome()
    }

    fn notify_removed(&self, _: &Context, path: &Path, step: usize, nodes: &[PathNode]) -> Result<(), ListenerError> {
        self.changes.lock().push(Change::Removed(step, describe_all(nodes)));
        if step == path.len() {
            let mut results = self.results.lock();
            for node in nodes {
                let position = results.iter().position(|result| result == node);
                assert!(position.is_some(), "{node:?} removed without being added");
                results.retain(|result| result != node);
            }
        }
        self.outcome()
    }
}

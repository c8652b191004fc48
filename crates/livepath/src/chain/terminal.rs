use super::{ListenerChain, Mode};
use crate::model::PathNode;

impl ListenerChain {
    /// Counts result derivations and reports nodes whose count became one.
    pub(super) fn terminal_install(&self, nodes: Vec<PathNode>, mode: Mode) {
        let entered: Vec<PathNode> = {
            let mut counts = self.terminal.lock();
            nodes
                .into_iter()
                .filter(|node| {
                    let count = counts.entry(node.clone()).or_insert(0);
                    *count += 1;
                    *count == 1
                })
                .collect()
        };
        if entered.is_empty() && mode == Mode::Incremental {
            return;
        }
        self.notify_added(self.path.len(), &entered);
    }

    /// Reports nodes whose last derivation went away.
    pub(super) fn terminal_uninstall(&self, nodes: Vec<PathNode>, mode: Mode) {
        let left: Vec<PathNode> = {
            let mut counts = self.terminal.lock();
            let mut left = Vec::new();
            for node in nodes {
                let Some(count) = counts.get_mut(&node) else {
                    panic!("result {node:?} was never added");
                };
                *count -= 1;
                if *count == 0 {
                    counts.remove(&node);
                    left.push(node);
                }
            }
            left
        };
        if left.is_empty() && mode == Mode::Incremental {
            return;
        }
        self.notify_removed(self.path.len(), &left);
    }

    /// Current result of the live path, in no particular order.
    pub(crate) fn results(&self) -> Vec<PathNode> {
        self.terminal.lock().keys().cloned().collect()
    }
}

//! Live evaluation of a compiled path.
//!
//! A [`ListenerChain`] has one link per path step plus a terminal. Link `i`
//! holds layer `i`: the nodes reached by steps `0..i` from the context node,
//! each counted once per deriving member of the previous layer. For every
//! member the link records the fan-out it contributed to the next layer and
//! the nodes it observes to keep that fan-out current. Tree mutations reach
//! the chain as [`NodeEvent`]s, the affected members recompute their fan-out,
//! and the difference travels down the chain to the terminal, which reports
//! net changes of the result set to the client's [`PathListener`].
//!
//! Nodes hold the chain only weakly and per link index, so a chain is torn
//! down by unregistering, never by reference cycles.
mod axis;
mod link;
mod terminal;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::compiler::ir::Path;
use crate::engine::{Context, Error, Result};
use crate::model::{Node, NodeEvent, NodeObserver, PathNode};

use link::Link;

pub type ListenerError = Box<dyn StdError + Send + Sync>;

/// Receives the changes of a live path.
///
/// `step` is the number of path steps the reported nodes satisfy;
/// `step == path.len()` reports the query result itself, smaller values report
/// intermediate layers.
pub trait PathListener: Send + Sync {
    fn notify_added(&self, context: &Context, path: &Path, step: usize, nodes: &[PathNode])
    -> std::result::Result<(), ListenerError>;

    fn notify_removed(&self, context: &Context, path: &Path, step: usize, nodes: &[PathNode])
    -> std::result::Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Binding or unbinding; every layer reports, empty or not.
    Bulk,
    /// Reaction to a tree mutation; only real changes propagate.
    Incremental,
}

pub(crate) struct ListenerChain {
    path: Path,
    context: Context,
    listener: Arc<dyn PathListener>,
    links: Vec<Mutex<Link>>,
    terminal: Mutex<HashMap<PathNode, usize>>,
    bound: AtomicBool,
    /// Errors met while binding; they fail [`Path::add_listener`].
    bind_errors: Mutex<Vec<Error>>,
    me: Weak<ListenerChain>,
}

impl fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerChain")
            .field("path", &self.path.source())
            .field("context", &self.context.node())
            .field("bound", &self.bound.load(Ordering::Relaxed))
            .finish()
    }
}

impl ListenerChain {
    pub(crate) fn new(path: Path, context: Context, listener: Arc<dyn PathListener>) -> Arc<Self> {
        Arc::new_cyclic(|me| ListenerChain {
            links: (0..path.len()).map(|_| Mutex::new(Link::default())).collect(),
            path,
            context,
            listener,
            terminal: Mutex::new(HashMap::new()),
            bound: AtomicBool::new(false),
            bind_errors: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// Seeds every layer from the context node and installs the observers.
    pub(crate) fn bind(&self) -> Result<()> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyBound);
        }
        debug!(path = %self.path, context = ?self.context.node(), "binding listener chain");
        self.install(0, vec![self.context.node().clone()], Mode::Bulk);

        let errors = std::mem::take(&mut *self.bind_errors.lock());
        if let Some(error) = errors.into_iter().next() {
            debug!(path = %self.path, %error, "binding failed, unbinding");
            self.unbind();
            return Err(error);
        }
        Ok(())
    }

    pub(crate) fn unbind(&self) {
        if !self.bound.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(path = %self.path, "unbinding listener chain");
        self.uninstall(0, vec![self.context.node().clone()], Mode::Bulk);
    }

    fn observer(&self) -> Weak<dyn NodeObserver> {
        self.me.clone()
    }

    fn report(&self, mode: Mode, error: Error) {
        match mode {
            Mode::Bulk => self.bind_errors.lock().push(error),
            Mode::Incremental => warn!(path = %self.path, %error, "live path left stale by failed query"),
        }
    }

    fn notify_added(&self, step: usize, nodes: &[PathNode]) {
        if let Err(error) = self.listener.notify_added(&self.context, &self.path, step, nodes) {
            warn!(path = %self.path, step, %error, "listener failed to handle added nodes");
        }
    }

    fn notify_removed(&self, step: usize, nodes: &[PathNode]) {
        if let Err(error) = self.listener.notify_removed(&self.context, &self.path, step, nodes) {
            warn!(path = %self.path, step, %error, "listener failed to handle removed nodes");
        }
    }
}

impl NodeObserver for ListenerChain {
    fn on_event(&self, slot: usize, node: &Node, event: &NodeEvent) {
        if self.bound.load(Ordering::Acquire) {
            self.handle(slot, node, event);
        }
    }
}

/// Registration of a listener on a live path. Dropping the handle removes the
/// listener, reporting the current result as removed.
#[must_use = "the listener is removed when the handle is dropped"]
pub struct ListenerHandle {
    chain: Option<Arc<ListenerChain>>,
}

impl ListenerHandle {
    pub fn remove(mut self) {
        self.release();
    }

    pub fn path(&self) -> Option<&Path> {
        self.chain.as_ref().map(|chain| &chain.path)
    }

    /// Nodes currently in the result, in no particular order.
    pub fn results(&self) -> Vec<PathNode> {
        self.chain.as_ref().map(|chain| chain.results()).unwrap_or_default()
    }

    fn release(&mut self) {
        if let Some(chain) = self.chain.take() {
            chain.unbind();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerHandle").field(&self.chain).finish()
    }
}

impl Path {
    /// Evaluates the path live from `context`.
    ///
    /// The listener first receives the current result (and every intermediate
    /// layer), then every change caused by later tree mutations, until the
    /// returned handle is removed or dropped.
    pub fn add_listener(&self, context: Context, listener: Arc<dyn PathListener>) -> Result<ListenerHandle> {
        let mut variables = Vec::new();
        self.variables(&mut variables);
        if let Some(name) = variables.into_iter().find(|name| context.variable(name).is_none()) {
            return Err(Error::UndefinedVariable { name: name.to_string() });
        }

        let chain = ListenerChain::new(self.clone(), context, listener);
        chain.bind()?;
        Ok(ListenerHandle { chain: Some(chain) })
    }
}

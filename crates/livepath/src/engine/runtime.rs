use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::value::Value;
use crate::caching::CachingError;
use crate::model::{Node, PathNode};

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("syntax error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown function {name}#{arity}")]
    UnknownFunction { name: String, arity: usize },
    #[error("undefined variable ${name}")]
    UndefinedVariable { name: String },
    #[error("type error: {0}")]
    Type(String),
    #[error(transparent)]
    Caching(#[from] CachingError),
    #[error("listener chain is already bound")]
    AlreadyBound,
}

impl Error {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Evaluation context of a query: the context node, variable bindings and the
/// position of the node within the set currently being filtered.
#[derive(Clone)]
pub struct Context {
    node: PathNode,
    variables: Arc<HashMap<Arc<str>, Value>>,
    position: usize,
    size: usize,
    /// Nodes whose children, attributes, value or parent were read, while
    /// recording.
    reads: Option<Arc<Mutex<Vec<Node>>>>,
}

impl Context {
    pub fn new(node: impl Into<PathNode>) -> Self {
        Self { node: node.into(), variables: Arc::default(), position: 1, size: 1, reads: None }
    }

    /// Binds `$name`. Predicates see the binding for the lifetime of every
    /// query or chain created from this context.
    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.variables).insert(Arc::from(name), value.into());
        self
    }

    pub fn node(&self) -> &PathNode {
        &self.node
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub(crate) fn focus(&self, node: PathNode, position: usize, size: usize) -> Context {
        Context { node, variables: Arc::clone(&self.variables), position, size, reads: self.reads.clone() }
    }

    /// Copy of this context that collects the nodes evaluation reads from,
    /// see [`Context::take_reads`].
    pub(crate) fn recording(&self) -> Context {
        Context { reads: Some(Arc::default()), ..self.clone() }
    }

    pub(crate) fn record(&self, node: &Node) {
        if let Some(reads) = &self.reads {
            reads.lock().push(node.clone());
        }
    }

    pub(crate) fn take_reads(&self) -> Vec<Node> {
        self.reads.as_ref().map(|reads| std::mem::take(&mut *reads.lock())).unwrap_or_default()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.variables.keys().collect();
        names.sort();
        f.debug_struct("Context")
            .field("node", &self.node)
            .field("variables", &names)
            .field("position", &self.position)
            .field("size", &self.size)
            .finish()
    }
}

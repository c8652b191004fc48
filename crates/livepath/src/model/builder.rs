//! Ergonomic construction of detached trees.
//!
//! ```
//! use livepath::model::elem;
//!
//! // <r><a id="1">hello</a><b/></r>
//! let root = elem("r")
//!     .child(elem("a").attr("id", "1").value("hello"))
//!     .child(elem("b"))
//!     .build();
//! assert_eq!(root.children().len(), 2);
//! assert_eq!(root.children()[0].attribute("id").as_deref(), Some("1"));
//! ```
use std::sync::Arc;

use super::Node;
use crate::caching::{CachingPolicy, ReferenceState};

pub struct NodeBuilder {
    name: Arc<str>,
    value: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    reference: Option<(Arc<CachingPolicy>, bool)>,
}

impl NodeBuilder {
    fn new(name: &str) -> Self {
        Self { name: Arc::from(name), value: None, attributes: Vec::new(), children: Vec::new(), reference: None }
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push((name.to_owned(), value.into()));
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn child(mut self, child: impl Into<NodeOrBuilder>) -> Self {
        self.children.push(child.into().build());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<NodeOrBuilder>,
    {
        self.children.extend(children.into_iter().map(|child| child.into().build()));
        self
    }

    /// Turns the built node into an external reference managed by `policy`.
    /// Children given to the builder become its already materialized content.
    pub fn reference(mut self, policy: Arc<CachingPolicy>, dirty: bool) -> Self {
        self.reference = Some((policy, dirty));
        self
    }

    pub fn build(self) -> Node {
        let state = self.reference.map(|(policy, dirty)| ReferenceState::new(policy, dirty));
        let node = Node::with_state(self.name, state);
        node.init_value(self.value);
        for (name, value) in self.attributes {
            node.init_attribute(&name, value);
        }
        for child in self.children {
            if child.parent().is_some() {
                child.remove_from_parent();
            }
            node.attach_unobserved(child);
        }
        node
    }
}

pub enum NodeOrBuilder {
    Built(Node),
    Builder(NodeBuilder),
}

impl NodeOrBuilder {
    fn build(self) -> Node {
        match self {
            NodeOrBuilder::Built(node) => node,
            NodeOrBuilder::Builder(builder) => builder.build(),
        }
    }
}

impl From<Node> for NodeOrBuilder {
    fn from(node: Node) -> Self {
        NodeOrBuilder::Built(node)
    }
}

impl From<NodeBuilder> for NodeOrBuilder {
    fn from(builder: NodeBuilder) -> Self {
        NodeOrBuilder::Builder(builder)
    }
}

pub fn elem(name: &str) -> NodeBuilder {
    NodeBuilder::new(name)
}

use std::fmt;
use std::sync::Arc;

use super::Node;
use crate::caching::CachingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathNodeKind {
    Element,
    Attribute,
    Text,
}

/// Item produced by a path step.
///
/// Attributes and the text value of an element are exposed as synthetic
/// nodes owned by the element. Two synthetic nodes are equal when they have
/// the same owner (and attribute name).
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PathNode {
    Element(Node),
    Attribute(Node, Arc<str>),
    Text(Node),
}

impl PathNode {
    pub fn kind(&self) -> PathNodeKind {
        match self {
            PathNode::Element(_) => PathNodeKind::Element,
            PathNode::Attribute(..) => PathNodeKind::Attribute,
            PathNode::Text(_) => PathNodeKind::Text,
        }
    }

    /// The element this item lives on: itself for elements, the owner otherwise.
    pub fn host(&self) -> &Node {
        match self {
            PathNode::Element(node) | PathNode::Attribute(node, _) | PathNode::Text(node) => node,
        }
    }

    pub fn as_element(&self) -> Option<&Node> {
        match self {
            PathNode::Element(node) => Some(node),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<Arc<str>> {
        match self {
            PathNode::Element(node) => Some(node.name()),
            PathNode::Attribute(_, name) => Some(Arc::clone(name)),
            PathNode::Text(_) => None,
        }
    }

    pub fn parent(&self) -> Option<PathNode> {
        match self {
            PathNode::Element(node) => node.parent().map(PathNode::Element),
            PathNode::Attribute(owner, _) | PathNode::Text(owner) => {
                Some(PathNode::Element(owner.clone()))
            }
        }
    }

    pub fn try_string_value(&self) -> Result<String, CachingError> {
        Ok(match self {
            PathNode::Element(node) | PathNode::Text(node) => node.try_value()?.unwrap_or_default(),
            PathNode::Attribute(owner, name) => owner.try_attribute(name)?.unwrap_or_default(),
        })
    }
}

impl From<Node> for PathNode {
    fn from(node: Node) -> Self {
        PathNode::Element(node)
    }
}

impl From<&Node> for PathNode {
    fn from(node: &Node) -> Self {
        PathNode::Element(node.clone())
    }
}

impl fmt::Debug for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathNode::Element(node) => write!(f, "{node:?}"),
            PathNode::Attribute(owner, name) => write!(f, "@{name} of {owner:?}"),
            PathNode::Text(owner) => write!(f, "text() of {owner:?}"),
        }
    }
}

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::engine::{Context, Result, matcher};
use crate::model::PathNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    SelfAxis,
    Parent,
    Child,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    Descendant,
    DescendantOrSelf,
    Following,
    FollowingSibling,
    Preceding,
    PrecedingSibling,
    /// Like `descendant`, but does not look below a node that satisfies the step.
    Nested,
    /// Resolves the tree root, then applies the scope to it.
    Root(RootScope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootScope {
    /// The root itself (`/a`, `/`).
    Node,
    /// The root and every descendant (`//a`).
    Subtree,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::SelfAxis => "self",
            Axis::Parent => "parent",
            Axis::Child => "child",
            Axis::Attribute => "attribute",
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Following => "following",
            Axis::FollowingSibling => "following-sibling",
            Axis::Preceding => "preceding",
            Axis::PrecedingSibling => "preceding-sibling",
            Axis::Nested => "nested",
            Axis::Root(RootScope::Node) => "root",
            Axis::Root(RootScope::Subtree) => "root-subtree",
        }
    }

    /// Kind a name test selects on this axis.
    pub fn principal(self) -> Principal {
        match self {
            Axis::Attribute => Principal::Attribute,
            _ => Principal::Element,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Element,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTest {
    /// `*`: any node of the axis' principal kind.
    Any,
    Name(Arc<str>),
    /// `prefix:*`
    Prefix(Arc<str>),
    /// `text()`
    Text,
    /// `node()`
    Node,
}

impl NodeTest {
    /// Whether the axis must also enumerate synthetic attribute/text nodes.
    pub(crate) fn wants_text(&self) -> bool {
        matches!(self, NodeTest::Text | NodeTest::Node)
    }

    pub(crate) fn wants_attributes(&self) -> bool {
        matches!(self, NodeTest::Node)
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::Any => f.write_str("*"),
            NodeTest::Name(name) => f.write_str(name),
            NodeTest::Prefix(prefix) => write!(f, "{prefix}:*"),
            NodeTest::Text => f.write_str("text()"),
            NodeTest::Node => f.write_str("node()"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    pub fn new(axis: Axis, test: NodeTest) -> Self {
        Self { axis, test, predicates: Vec::new() }
    }

    pub fn with_predicates(mut self, predicates: Vec<Expr>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn has_predicates(&self) -> bool {
        !self.predicates.is_empty()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.axis.name(), self.test)?;
        for _ in &self.predicates {
            f.write_str("[..]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Position,
    Last,
    Count,
    Not,
    True,
    False,
    Boolean,
    String,
    Number,
    Name,
    Concat,
    Contains,
    StartsWith,
    StringLength,
    Sum,
}

impl Function {
    pub fn resolve(name: &str, arity: usize) -> Option<Self> {
        let function = match name {
            "position" => Function::Position,
            "last" => Function::Last,
            "count" => Function::Count,
            "not" => Function::Not,
            "true" => Function::True,
            "false" => Function::False,
            "boolean" => Function::Boolean,
            "string" => Function::String,
            "number" => Function::Number,
            "name" | "local-name" => Function::Name,
            "concat" => Function::Concat,
            "contains" => Function::Contains,
            "starts-with" => Function::StartsWith,
            "string-length" => Function::StringLength,
            "sum" => Function::Sum,
            _ => return None,
        };
        let (min, max) = function.arity();
        (min..=max).contains(&arity).then_some(function)
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Function::Position | Function::Last | Function::True | Function::False => (0, 0),
            Function::Count | Function::Not | Function::Boolean | Function::Sum => (1, 1),
            Function::String | Function::Number | Function::Name | Function::StringLength => (0, 1),
            Function::Contains | Function::StartsWith => (2, 2),
            Function::Concat => (2, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(Arc<str>),
    Variable(Arc<str>),
    Path(Path),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(ComparisonOp, Box<Expr>, Box<Expr>),
    Arithmetic(ArithmeticOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Literal number usable as an absolute position, e.g. the `2` in `a[2]`.
    pub fn as_position_literal(&self) -> Option<f64> {
        match self {
            Expr::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Names of all variables referenced by this expression, including nested
    /// path predicates.
    pub fn variables(&self, out: &mut Vec<Arc<str>>) {
        match self {
            Expr::Variable(name) => out.push(Arc::clone(name)),
            Expr::Path(path) => path.variables(out),
            Expr::Or(left, right)
            | Expr::And(left, right)
            | Expr::Compare(_, left, right)
            | Expr::Arithmetic(_, left, right)
            | Expr::Union(left, right) => {
                left.variables(out);
                right.variables(out);
            }
            Expr::Negate(inner) => inner.variables(out),
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.variables(out)),
            Expr::Number(_) | Expr::String(_) => {}
        }
    }
}

/// Compiled location path: an immutable sequence of steps.
///
/// Cloning is cheap; one path can back any number of listener chains.
#[derive(Clone)]
pub struct Path {
    steps: Arc<[Step]>,
    source: Arc<str>,
}

impl Path {
    pub(crate) fn new(steps: Vec<Step>, source: &str) -> Self {
        Self { steps: steps.into(), source: Arc::from(source) }
    }

    /// Path of predicate sub-expressions, which have no source text of their own.
    pub(crate) fn from_steps(steps: Vec<Step>) -> Self {
        let source = steps.iter().join("/");
        Self { steps: steps.into(), source: Arc::from(source) }
    }

    /// Evaluates the path once against the current tree. Duplicates keep
    /// their first occurrence.
    pub fn evaluate(&self, context: &Context) -> Result<Vec<PathNode>> {
        matcher::evaluate_path(self, context)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self, out: &mut Vec<Arc<str>>) {
        for step in self.steps.iter() {
            for predicate in &step.predicates {
                predicate.variables(out);
            }
        }
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.steps == other.steps
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path").field("source", &self.source).field("steps", &self.steps).finish()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

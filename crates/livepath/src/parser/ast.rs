//! Syntax tree produced by the parser, before abbreviations and `//` are
//! lowered into IR steps.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Path(LocationPath),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    FunctionCall { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisName {
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
    Nested,
    Root,
}

impl AxisName {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "self" => AxisName::SelfAxis,
            "parent" => AxisName::Parent,
            "child" => AxisName::Child,
            "attribute" => AxisName::Attribute,
            "ancestor" => AxisName::Ancestor,
            "ancestor-or-self" => AxisName::AncestorOrSelf,
            "descendant" => AxisName::Descendant,
            "descendant-or-self" => AxisName::DescendantOrSelf,
            "following" => AxisName::Following,
            "following-sibling" => AxisName::FollowingSibling,
            "preceding" => AxisName::Preceding,
            "preceding-sibling" => AxisName::PrecedingSibling,
            "nested" => AxisName::Nested,
            "root" => AxisName::Root,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Wildcard,
    Name(String),
    PrefixWildcard(String),
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: AxisName,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    /// Preceded by `//` instead of `/`.
    pub descendant: bool,
    pub step: Step,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<PathStep>,
}

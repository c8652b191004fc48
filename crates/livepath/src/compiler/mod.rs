use std::sync::Arc;

use crate::engine::{Error, Result};
use crate::parser::{ast, parse_path};

pub mod ir;

use ir::{ArithmeticOp, Axis, ComparisonOp, Expr, Function, NodeTest, Path, RootScope, Step};

/// Compiles a location path.
///
/// ```
/// use livepath::compiler::ir::Axis;
///
/// let path = livepath::compile("//item[@state = 'open']/@id").unwrap();
/// assert_eq!(path.len(), 2);
/// assert_eq!(path.steps()[1].axis, Axis::Attribute);
/// ```
pub fn compile(source: &str) -> Result<Path> {
    let ast = parse_path(source)?;
    let steps = lower_location_path(&ast)?;
    Ok(Path::new(steps, source))
}

fn lower_location_path(path: &ast::LocationPath) -> Result<Vec<Step>> {
    let mut steps = Vec::with_capacity(path.steps.len() + 1);
    let mut rest = path.steps.iter();

    if path.absolute {
        match rest.next() {
            None => steps.push(Step::new(Axis::Root(RootScope::Node), NodeTest::Node)),
            Some(first) => {
                let scope = if first.descendant { RootScope::Subtree } else { RootScope::Node };
                let step = lower_step(&first.step)?;
                if step.axis == Axis::Child && (scope == RootScope::Node || !step.has_predicates()) {
                    // `/a` is the root named `a`, `//a` every `a` in the tree
                    steps.push(Step { axis: Axis::Root(scope), ..step });
                } else {
                    steps.push(Step::new(Axis::Root(scope), NodeTest::Node));
                    steps.push(step);
                }
            }
        }
    }

    for path_step in rest {
        let step = lower_step(&path_step.step)?;
        if !path_step.descendant {
            steps.push(step);
        } else if step.axis == Axis::Child && !step.has_predicates() {
            steps.push(Step { axis: Axis::Descendant, ..step });
        } else {
            steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::Node));
            steps.push(step);
        }
    }
    Ok(steps)
}

fn lower_step(step: &ast::Step) -> Result<Step> {
    let axis = match step.axis {
        ast::AxisName::SelfAxis => Axis::SelfAxis,
        ast::AxisName::Parent => Axis::Parent,
        ast::AxisName::Child => Axis::Child,
        ast::AxisName::Attribute => Axis::Attribute,
        ast::AxisName::Ancestor => Axis::Ancestor,
        ast::AxisName::AncestorOrSelf => Axis::AncestorOrSelf,
        ast::AxisName::Descendant => Axis::Descendant,
        ast::AxisName::DescendantOrSelf => Axis::DescendantOrSelf,
        ast::AxisName::Following => Axis::Following,
        ast::AxisName::FollowingSibling => Axis::FollowingSibling,
        ast::AxisName::Preceding => Axis::Preceding,
        ast::AxisName::PrecedingSibling => Axis::PrecedingSibling,
        ast::AxisName::Nested => Axis::Nested,
        ast::AxisName::Root => Axis::Root(RootScope::Node),
    };
    let test = match &step.test {
        ast::NodeTest::Wildcard => NodeTest::Any,
        ast::NodeTest::Name(name) => NodeTest::Name(Arc::from(name.as_str())),
        ast::NodeTest::PrefixWildcard(prefix) => NodeTest::Prefix(Arc::from(prefix.as_str())),
        ast::NodeTest::Text => NodeTest::Text,
        ast::NodeTest::Node => NodeTest::Node,
    };
    let predicates = step.predicates.iter().map(lower_expr).collect::<Result<Vec<_>>>()?;
    Ok(Step::new(axis, test).with_predicates(predicates))
}

fn lower_expr(expr: &ast::Expr) -> Result<Expr> {
    let boxed = |expr: &ast::Expr| lower_expr(expr).map(Box::new);
    Ok(match expr {
        ast::Expr::Literal(ast::Literal::Number(number)) => Expr::Number(*number),
        ast::Expr::Literal(ast::Literal::String(text)) => Expr::String(Arc::from(text.as_str())),
        ast::Expr::Variable(name) => Expr::Variable(Arc::from(name.as_str())),
        ast::Expr::Path(path) => Expr::Path(Path::from_steps(lower_location_path(path)?)),
        ast::Expr::Negate(inner) => Expr::Negate(boxed(inner)?),
        ast::Expr::Union(left, right) => Expr::Union(boxed(left)?, boxed(right)?),
        ast::Expr::Binary(op, left, right) => {
            let (left, right) = (boxed(left)?, boxed(right)?);
            match op {
                ast::BinaryOp::Or => Expr::Or(left, right),
                ast::BinaryOp::And => Expr::And(left, right),
                ast::BinaryOp::Eq => Expr::Compare(ComparisonOp::Eq, left, right),
                ast::BinaryOp::Ne => Expr::Compare(ComparisonOp::Ne, left, right),
                ast::BinaryOp::Lt => Expr::Compare(ComparisonOp::Lt, left, right),
                ast::BinaryOp::Le => Expr::Compare(ComparisonOp::Le, left, right),
                ast::BinaryOp::Gt => Expr::Compare(ComparisonOp::Gt, left, right),
                ast::BinaryOp::Ge => Expr::Compare(ComparisonOp::Ge, left, right),
                ast::BinaryOp::Add => Expr::Arithmetic(ArithmeticOp::Add, left, right),
                ast::BinaryOp::Sub => Expr::Arithmetic(ArithmeticOp::Sub, left, right),
                ast::BinaryOp::Mul => Expr::Arithmetic(ArithmeticOp::Mul, left, right),
                ast::BinaryOp::Div => Expr::Arithmetic(ArithmeticOp::Div, left, right),
                ast::BinaryOp::Mod => Expr::Arithmetic(ArithmeticOp::Mod, left, right),
            }
        }
        ast::Expr::FunctionCall { name, args } => {
            let function = Function::resolve(name, args.len())
                .ok_or_else(|| Error::UnknownFunction { name: name.clone(), arity: args.len() })?;
            Expr::Call(function, args.iter().map(lower_expr).collect::<Result<Vec<_>>>()?)
        }
    })
}

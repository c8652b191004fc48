//! Predicate expression evaluation over the XPath 1.0 value model.
use itertools::Itertools;

use super::matcher;
use super::runtime::{Context, Error, Result};
use super::value::{Value, parse_number};
use crate::compiler::ir::{ArithmeticOp, ComparisonOp, Expr, Function};
use crate::model::PathNode;

pub(crate) fn evaluate(expr: &Expr, context: &Context) -> Result<Value> {
    match expr {
        Expr::Number(number) => Ok(Value::Number(*number)),
        Expr::String(text) => Ok(Value::String(text.to_string())),
        Expr::Variable(name) => context
            .variable(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable { name: name.to_string() }),
        Expr::Path(path) => {
            let nodes = matcher::evaluate_path(path, context)?;
            // string values of the result live on their hosts
            for node in &nodes {
                context.record(node.host());
            }
            Ok(Value::Nodes(nodes))
        }
        Expr::Or(left, right) => {
            Ok(Value::Boolean(evaluate(left, context)?.to_boolean() || evaluate(right, context)?.to_boolean()))
        }
        Expr::And(left, right) => {
            Ok(Value::Boolean(evaluate(left, context)?.to_boolean() && evaluate(right, context)?.to_boolean()))
        }
        Expr::Compare(op, left, right) => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            Ok(Value::Boolean(compare(*op, &left, &right)?))
        }
        Expr::Arithmetic(op, left, right) => {
            let left = evaluate(left, context)?.to_number()?;
            let right = evaluate(right, context)?.to_number()?;
            Ok(Value::Number(match op {
                ArithmeticOp::Add => left + right,
                ArithmeticOp::Sub => left - right,
                ArithmeticOp::Mul => left * right,
                ArithmeticOp::Div => left / right,
                ArithmeticOp::Mod => left % right,
            }))
        }
        Expr::Negate(inner) => Ok(Value::Number(-evaluate(inner, context)?.to_number()?)),
        Expr::Union(left, right) => {
            let mut nodes = evaluate(left, context)?.into_nodes("|")?;
            nodes.extend(evaluate(right, context)?.into_nodes("|")?);
            Ok(Value::Nodes(nodes.into_iter().unique().collect()))
        }
        Expr::Call(function, args) => call(*function, args, context),
    }
}

fn call(function: Function, args: &[Expr], context: &Context) -> Result<Value> {
    let arg = |index: usize| evaluate(&args[index], context);
    // zero-argument string functions default to the context node
    let context_or_arg = || -> Result<Value> {
        match args.first() {
            Some(expr) => evaluate(expr, context),
            None => {
                context.record(context.node().host());
                Ok(Value::Nodes(vec![context.node().clone()]))
            }
        }
    };
    Ok(match function {
        Function::Position => Value::Number(context.position() as f64),
        Function::Last => Value::Number(context.size() as f64),
        Function::Count => Value::Number(arg(0)?.into_nodes("count()")?.len() as f64),
        Function::Not => Value::Boolean(!arg(0)?.to_boolean()),
        Function::True => Value::Boolean(true),
        Function::False => Value::Boolean(false),
        Function::Boolean => Value::Boolean(arg(0)?.to_boolean()),
        Function::String => Value::String(context_or_arg()?.to_string_value()?),
        Function::Number => Value::Number(context_or_arg()?.to_number()?),
        Function::Name => {
            let nodes = context_or_arg()?.into_nodes("name()")?;
            Value::String(nodes.first().and_then(PathNode::name).map(|name| name.to_string()).unwrap_or_default())
        }
        Function::Concat => {
            let mut text = String::new();
            for index in 0..args.len() {
                text.push_str(&arg(index)?.to_string_value()?);
            }
            Value::String(text)
        }
        Function::Contains => Value::Boolean(arg(0)?.to_string_value()?.contains(&arg(1)?.to_string_value()?)),
        Function::StartsWith => Value::Boolean(arg(0)?.to_string_value()?.starts_with(&arg(1)?.to_string_value()?)),
        Function::StringLength => Value::Number(context_or_arg()?.to_string_value()?.chars().count() as f64),
        Function::Sum => {
            let mut total = 0.0;
            for node in arg(0)?.into_nodes("sum()")? {
                total += parse_number(&node.try_string_value()?);
            }
            Value::Number(total)
        }
    })
}

/// Comparison with XPath 1.0 conversion rules: node-sets compare
/// existentially, otherwise booleans, then numbers, then strings.
fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Result<bool> {
    match (left, right) {
        (Value::Nodes(nodes), other) => {
            if let Value::Boolean(_) = other {
                return compare_atoms(op, &Value::Boolean(left.to_boolean()), other);
            }
            for node in nodes {
                let atom = Value::String(node.try_string_value()?);
                let hit = match other {
                    Value::Nodes(others) => {
                        let mut hit = false;
                        for candidate in others {
                            if compare_atoms(op, &atom, &Value::String(candidate.try_string_value()?))? {
                                hit = true;
                                break;
                            }
                        }
                        hit
                    }
                    Value::Number(_) => compare_atoms(op, &Value::Number(parse_number(atom_text(&atom))), other)?,
                    _ => compare_atoms(op, &atom, other)?,
                };
                if hit {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        (_, Value::Nodes(_)) => compare(op.flipped(), right, left),
        _ => compare_atoms(op, left, right),
    }
}

fn atom_text(value: &Value) -> &str {
    match value {
        Value::String(text) => text,
        _ => "",
    }
}

fn compare_atoms(op: ComparisonOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        ComparisonOp::Eq | ComparisonOp::Ne => {
            let equal = match (left, right) {
                (Value::Boolean(_), _) | (_, Value::Boolean(_)) => left.to_boolean() == right.to_boolean(),
                (Value::Number(_), _) | (_, Value::Number(_)) => left.to_number()? == right.to_number()?,
                _ => left.to_string_value()? == right.to_string_value()?,
            };
            Ok(equal == (op == ComparisonOp::Eq))
        }
        _ => {
            let (left, right) = (left.to_number()?, right.to_number()?);
            Ok(match op {
                ComparisonOp::Lt => left < right,
                ComparisonOp::Le => left <= right,
                ComparisonOp::Gt => left > right,
                _ => left >= right,
            })
        }
    }
}

impl ComparisonOp {
    fn flipped(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            other => other,
        }
    }
}

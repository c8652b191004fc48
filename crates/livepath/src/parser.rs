use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;

use crate::engine::Error;

pub mod ast;

#[derive(pest_derive::Parser)]
#[grammar = "path.pest"]
pub struct PathParser;

/// Parses a location path into its syntax tree.
pub fn parse_path(input: &str) -> Result<ast::LocationPath, Error> {
    let mut pairs = PathParser::parse(Rule::path, input).map_err(convert_error)?;
    let path = pairs.next().expect("path root");
    let location = path.into_inner().next().expect("location path");
    build_location_path(location)
}

fn convert_error(error: pest::error::Error<Rule>) -> Error {
    let position = match error.location {
        InputLocation::Pos(position) => position,
        InputLocation::Span((start, _)) => start,
    };
    Error::Parse { position, message: error.variant.message().into_owned() }
}

fn custom_error(pair: &Pair<Rule>, message: impl Into<String>) -> Error {
    Error::Parse { position: pair.as_span().start(), message: message.into() }
}

fn build_location_path(pair: Pair<Rule>) -> Result<ast::LocationPath, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::location_path);
    let inner = pair.into_inner().next().expect("absolute or relative path");
    let mut steps = Vec::new();
    match inner.as_rule() {
        Rule::absolute_path => {
            let mut parts = inner.into_inner();
            let separator = parts.next().expect("leading separator");
            let descendant = separator.as_rule() == Rule::double_slash;
            if let Some(relative) = parts.next() {
                build_relative_path(relative, descendant, &mut steps)?;
            }
            Ok(ast::LocationPath { absolute: true, steps })
        }
        _ => {
            build_relative_path(inner, false, &mut steps)?;
            Ok(ast::LocationPath { absolute: false, steps })
        }
    }
}

fn build_relative_path(pair: Pair<Rule>, mut descendant: bool, steps: &mut Vec<ast::PathStep>) -> Result<(), Error> {
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::path_sep => {
                let separator = part.into_inner().next().expect("separator");
                descendant = separator.as_rule() == Rule::double_slash;
            }
            Rule::step => {
                steps.push(ast::PathStep { descendant, step: build_step(part)? });
                descendant = false;
            }
            rule => unreachable!("unexpected {rule:?} in relative path"),
        }
    }
    Ok(())
}

fn build_step(pair: Pair<Rule>) -> Result<ast::Step, Error> {
    let inner = pair.into_inner().next().expect("step body");
    let abbreviated = |axis| ast::Step { axis, test: ast::NodeTest::Node, predicates: Vec::new() };
    match inner.as_rule() {
        Rule::parent_step => Ok(abbreviated(ast::AxisName::Parent)),
        Rule::self_step => Ok(abbreviated(ast::AxisName::SelfAxis)),
        _ => {
            let mut axis = ast::AxisName::Child;
            let mut test = ast::NodeTest::Wildcard;
            let mut predicates = Vec::new();
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::axis_spec => {
                        let spec = part.into_inner().next().expect("axis");
                        axis = match spec.as_rule() {
                            Rule::attribute_abbrev => ast::AxisName::Attribute,
                            _ => ast::AxisName::from_keyword(spec.as_str())
                                .ok_or_else(|| custom_error(&spec, format!("unknown axis '{}'", spec.as_str())))?,
                        };
                    }
                    Rule::node_test => test = build_node_test(part),
                    Rule::predicate => {
                        let expr = part.into_inner().next().expect("predicate expression");
                        predicates.push(build_expr(expr)?);
                    }
                    rule => unreachable!("unexpected {rule:?} in step"),
                }
            }
            Ok(ast::Step { axis, test, predicates })
        }
    }
}

fn build_node_test(pair: Pair<Rule>) -> ast::NodeTest {
    let inner = pair.into_inner().next().expect("node test");
    match inner.as_rule() {
        Rule::node_type_test => {
            let name = inner.into_inner().next().expect("node type");
            if name.as_str() == "text" { ast::NodeTest::Text } else { ast::NodeTest::Node }
        }
        Rule::prefix_wildcard => {
            let text = inner.as_str();
            ast::NodeTest::PrefixWildcard(text[..text.len() - 2].to_owned())
        }
        Rule::wildcard => ast::NodeTest::Wildcard,
        _ => ast::NodeTest::Name(inner.as_str().to_owned()),
    }
}

fn build_expr(pair: Pair<Rule>) -> Result<ast::Expr, Error> {
    match pair.as_rule() {
        Rule::expr => build_expr(pair.into_inner().next().expect("or expression")),
        Rule::or_expr
        | Rule::and_expr
        | Rule::equality_expr
        | Rule::relational_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => build_binary_chain(pair),
        Rule::unary_expr => {
            let mut negations = 0;
            let mut operand = None;
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::negation => negations += 1,
                    _ => operand = Some(build_expr(part)?),
                }
            }
            let mut expr = operand.expect("unary operand");
            for _ in 0..negations {
                expr = ast::Expr::Negate(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::union_expr => {
            let mut parts = pair.into_inner();
            let mut expr = build_expr(parts.next().expect("union operand"))?;
            for part in parts {
                expr = ast::Expr::Union(Box::new(expr), Box::new(build_expr(part)?));
            }
            Ok(expr)
        }
        Rule::path_expr => build_expr(pair.into_inner().next().expect("path or primary expression")),
        Rule::location_path => Ok(ast::Expr::Path(build_location_path(pair)?)),
        Rule::primary_expr => build_expr(pair.into_inner().next().expect("primary expression")),
        Rule::variable => {
            let name = pair.into_inner().next().expect("variable name");
            Ok(ast::Expr::Variable(name.as_str().to_owned()))
        }
        Rule::literal => {
            let text = pair.into_inner().next().map(|inner| inner.as_str().to_owned()).unwrap_or_default();
            Ok(ast::Expr::Literal(ast::Literal::String(text)))
        }
        Rule::number => {
            let number = pair.as_str().parse::<f64>().map_err(|error| custom_error(&pair, error.to_string()))?;
            Ok(ast::Expr::Literal(ast::Literal::Number(number)))
        }
        Rule::function_call => {
            let mut parts = pair.into_inner();
            let name = parts.next().expect("function name").as_str().to_owned();
            let args = parts.map(build_expr).collect::<Result<Vec<_>, _>>()?;
            Ok(ast::Expr::FunctionCall { name, args })
        }
        rule => Err(custom_error(&pair, format!("unsupported expression {rule:?}"))),
    }
}

fn build_binary_chain(pair: Pair<Rule>) -> Result<ast::Expr, Error> {
    let mut parts = pair.into_inner();
    let mut expr = build_expr(parts.next().expect("left operand"))?;
    while let Some(op) = parts.next() {
        let op_kind = match op.as_str() {
            "or" => ast::BinaryOp::Or,
            "and" => ast::BinaryOp::And,
            "=" => ast::BinaryOp::Eq,
            "!=" => ast::BinaryOp::Ne,
            "<" => ast::BinaryOp::Lt,
            "<=" => ast::BinaryOp::Le,
            ">" => ast::BinaryOp::Gt,
            ">=" => ast::BinaryOp::Ge,
            "+" => ast::BinaryOp::Add,
            "-" => ast::BinaryOp::Sub,
            "*" => ast::BinaryOp::Mul,
            "div" => ast::BinaryOp::Div,
            "mod" => ast::BinaryOp::Mod,
            other => return Err(custom_error(&op, format!("unknown operator '{other}'"))),
        };
        let right = build_expr(parts.next().ok_or_else(|| custom_error(&op, "missing right operand"))?)?;
        expr = ast::Expr::Binary(op_kind, Box::new(expr), Box::new(right));
    }
    Ok(expr)
}
